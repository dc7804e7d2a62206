//! Per-label alert suppression.
//!
//! A label alerts only when at least `window` has passed since its previous
//! alert; labels never seen before alert immediately. Every label that alerts
//! joins the session's unique-violation set, which is flushed into a single
//! final summary when the session ends.

use chrono::NaiveTime;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(1);

pub const FINAL_SUMMARY_HEADER: &str = "FINAL SUMMARY:";

/// `[HH:MM:SS] VIOLATION: <label>`
pub fn format_alert(label: &str, at: NaiveTime) -> String {
    format!("[{}] VIOLATION: {}", at.format("%H:%M:%S"), label)
}

#[derive(Debug)]
pub struct AlertSuppressor {
    window: Duration,
    last_alert: HashMap<String, Duration>,
    /// First-alert order is preserved for the summary.
    unique: Vec<String>,
    flushed: bool,
}

impl AlertSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_alert: HashMap::new(),
            unique: Vec::new(),
            flushed: false,
        }
    }

    /// Record a hit for `label` at `now`. Returns true when an alert should be emitted.
    pub fn admit(&mut self, label: &str, now: Duration) -> bool {
        if let Some(&last) = self.last_alert.get(label) {
            if now.saturating_sub(last) < self.window {
                return false;
            }
        }
        self.last_alert.insert(label.to_string(), now);
        if !self.unique.iter().any(|l| l == label) {
            self.unique.push(label.to_string());
        }
        true
    }

    pub fn last_alert(&self, label: &str) -> Option<Duration> {
        self.last_alert.get(label).copied()
    }

    pub fn unique_violations(&self) -> &[String] {
        &self.unique
    }

    /// Summary text for the session, at most once and only when something alerted.
    pub fn take_final_summary(&mut self) -> Option<String> {
        if self.flushed || self.unique.is_empty() {
            return None;
        }
        self.flushed = true;
        Some(format!(
            "{}\nAll violations are: {}",
            FINAL_SUMMARY_HEADER,
            self.unique.join(", ")
        ))
    }
}

impl Default for AlertSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION_WINDOW)
    }
}
