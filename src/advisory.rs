//! Safety-guideline lookups for session violations.
//!
//! Alert lines are reduced to their violation labels, each label becomes a
//! natural-language query, and a `Retriever` answers it off the capture thread.
//! Retrieval itself is a collaborator; `KeywordRetriever` is a small in-memory
//! implementation good enough for the CLI and tests.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crate::error::PipelineError;
use crate::suppress::FINAL_SUMMARY_HEADER;

pub const NO_VIOLATIONS_MESSAGE: &str = "No violations available for retrieval.";

const DEFAULT_TOP_K: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub source: Option<String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
        }
    }
}

pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

fn violation_line() -> Result<&'static Regex, &'static regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"VIOLATION:\s*(?P<label>.+?)\s*$"))
        .as_ref()
}

/// Labels named by `VIOLATION:` lines, first occurrence order, summary lines skipped.
pub fn violations_from_alerts<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let pattern = match violation_line() {
        Ok(pattern) => pattern,
        Err(err) => {
            log::error!("advisory: alert pattern failed to compile: {}", err);
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if line.contains(FINAL_SUMMARY_HEADER) {
            continue;
        }
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let label = caps["label"].to_string();
        if seen.insert(label.clone()) {
            labels.push(label);
        }
    }
    labels
}

/// `NO-Safety Vest` -> `Worker not wearing Safety Vest. PPE safety guidelines.`
pub fn advisory_query(label: &str) -> String {
    let item = label.replace("NO-", "").replace('-', " ");
    format!("Worker not wearing {}. PPE safety guidelines.", item.trim())
}

/// Response lines for `alerts`, in the order they should be shown.
pub fn advise(retriever: &dyn Retriever, alerts: &[String], mut emit: impl FnMut(String)) {
    let labels = violations_from_alerts(alerts);
    if labels.is_empty() {
        emit(NO_VIOLATIONS_MESSAGE.to_string());
        return;
    }
    for label in labels {
        let query = advisory_query(&label);
        log::debug!("advisory: querying '{}'", query);
        match retriever.retrieve(&query) {
            Ok(documents) if documents.is_empty() => {
                emit(format!("{} -> No relevant safety documents found.", query))
            }
            Ok(documents) => {
                emit(format!("Violation: {}", query));
                for document in documents {
                    emit(format!("- {}", document.content));
                }
            }
            Err(err) => {
                log::warn!("advisory: retrieval failed: {:#}", err);
                emit(format!("Retrieval error: {:#}", err));
                return;
            }
        }
    }
}

/// Runs `advise` on its own thread and streams the response lines.
pub struct AdvisoryWorker {
    responses: Receiver<String>,
    handle: JoinHandle<()>,
}

impl AdvisoryWorker {
    pub fn spawn(retriever: Arc<dyn Retriever>, alerts: Vec<String>) -> Result<Self, PipelineError> {
        let (tx, rx): (Sender<String>, Receiver<String>) = unbounded();
        let handle = thread::Builder::new()
            .name("ppe-advisory".to_string())
            .spawn(move || {
                advise(retriever.as_ref(), &alerts, |line| {
                    // Receiver gone means nobody is listening any more.
                    let _ = tx.send(line);
                })
            })?;
        Ok(Self {
            responses: rx,
            handle,
        })
    }

    pub fn responses(&self) -> &Receiver<String> {
        &self.responses
    }

    /// Wait for the worker and collect every remaining line.
    pub fn collect(self) -> Result<Vec<String>, PipelineError> {
        self.handle
            .join()
            .map_err(|_| PipelineError::WorkerPanicked)?;
        Ok(self.responses.try_iter().collect())
    }
}

/// In-memory retriever ranking documents by shared keywords.
#[derive(Clone, Debug, Default)]
pub struct KeywordRetriever {
    documents: Vec<Document>,
    top_k: usize,
}

impl KeywordRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Short built-in PPE guidance used when no corpus is configured.
    pub fn with_builtin_guidelines() -> Self {
        Self::new(
            [
                "Hard hats must be worn in all areas with overhead work or falling-object hazards.",
                "Replace any hardhat that has taken an impact, even without visible damage.",
                "High-visibility safety vests are required near moving vehicles and plant.",
                "Safety vests must be fastened and not obscured by other clothing.",
                "Respiratory masks are required where dust, fumes or airborne particles are present.",
                "Masks must be fitted correctly and replaced when damaged or soiled.",
            ]
            .into_iter()
            .map(|line| Document {
                content: line.to_string(),
                source: Some("builtin".to_string()),
            })
            .collect(),
        )
    }
}

const STOP_WORDS: [&str; 12] = [
    "worker",
    "wearing",
    "safety",
    "guidelines",
    "ppe",
    "with",
    "must",
    "not",
    "the",
    "and",
    "any",
    "all",
];

/// Lowercased content words with a plural `s` stripped.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|word| word.to_lowercase())
        .filter(|word| word.len() >= 3 && !STOP_WORDS.contains(&word.as_str()))
        .map(|word| word.trim_end_matches('s').to_string())
        .collect()
}

impl Retriever for KeywordRetriever {
    fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let wanted = keywords(query);
        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .map(|doc| (keywords(&doc.content).intersection(&wanted).count(), doc))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingRetriever;

    impl Retriever for FailingRetriever {
        fn retrieve(&self, _query: &str) -> Result<Vec<Document>> {
            Err(anyhow!("index offline"))
        }
    }

    fn alerts() -> Vec<String> {
        vec![
            "[10:00:01] VIOLATION: NO-Hardhat".to_string(),
            "[10:00:02] VIOLATION: NO-Safety Vest".to_string(),
            "[10:00:03] VIOLATION: NO-Hardhat".to_string(),
            "FINAL SUMMARY:\nAll violations are: NO-Hardhat, NO-Safety Vest".to_string(),
        ]
    }

    #[test]
    fn labels_are_extracted_once_in_order() {
        assert_eq!(
            violations_from_alerts(&alerts()),
            vec!["NO-Hardhat".to_string(), "NO-Safety Vest".to_string()]
        );
        assert!(violations_from_alerts(&["camera reconnected"]).is_empty());
    }

    #[test]
    fn queries_drop_the_no_prefix() {
        assert_eq!(
            advisory_query("NO-Safety Vest"),
            "Worker not wearing Safety Vest. PPE safety guidelines."
        );
        assert_eq!(
            advisory_query("NO-Hard-hat"),
            "Worker not wearing Hard hat. PPE safety guidelines."
        );
    }

    #[test]
    fn worker_streams_documents_per_violation() {
        let retriever: Arc<dyn Retriever> = Arc::new(KeywordRetriever::with_builtin_guidelines());
        let lines = AdvisoryWorker::spawn(retriever, alerts())
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(
            lines[0],
            "Violation: Worker not wearing Hardhat. PPE safety guidelines."
        );
        assert!(lines[1].starts_with("- ") && lines[1].contains("hardhat"));
        assert!(lines
            .iter()
            .any(|l| l == "Violation: Worker not wearing Safety Vest. PPE safety guidelines."));
    }

    #[test]
    fn empty_results_and_errors_are_reported() {
        let empty = KeywordRetriever::new(Vec::new());
        let mut lines = Vec::new();
        advise(&empty, &alerts()[..1], |line| lines.push(line));
        assert_eq!(
            lines,
            vec!["Worker not wearing Hardhat. PPE safety guidelines. -> No relevant safety documents found."]
        );

        let mut lines = Vec::new();
        advise(&FailingRetriever, &alerts(), |line| lines.push(line));
        assert_eq!(lines, vec!["Retrieval error: index offline"]);

        let mut lines = Vec::new();
        advise(&empty, &[], |line| lines.push(line));
        assert_eq!(lines, vec![NO_VIOLATIONS_MESSAGE]);
    }
}
