//! ppe_monitor - watch a camera or video file for PPE violations.
//!
//! This binary:
//! 1. Loads `MonitorConfig` (file from `--config`/`PPE_CONFIG`, `PPE_*` env, CLI flags)
//! 2. Opens the media source and starts a capture session
//! 3. Prints alerts, source errors and the final summary as they arrive
//! 4. Prints the sampling validation report when the session ends
//! 5. Optionally looks up safety guidance for the violations seen (`--advise`)
//!
//! Ctrl-C requests a cooperative stop; the report is still printed.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ppe_watch::advisory::{AdvisoryWorker, KeywordRetriever, Retriever};
use ppe_watch::config::MonitorConfig;
use ppe_watch::detect::{shared, ScriptedBackend, StubBackend};
use ppe_watch::ui::Ui;
use ppe_watch::{
    build_source, BoundingBox, Detection, EventKind, PipelineController, PipelineEvent, Severity,
    SharedDetector, SystemClock, TerminationReason,
};

const EVENT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor a camera or video file for PPE violations")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PPE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Media source: camera index, /dev/videoN, a video file, or a stub:// source.
    #[arg(long)]
    source: Option<String>,

    /// Target sampling rate (frames per second).
    #[arg(long)]
    fps: Option<u32>,

    /// Validation duration in seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Run detection on sampled frames from the start.
    #[arg(long)]
    detect: bool,

    /// Sampling mode (time|frame).
    #[arg(long, value_name = "MODE")]
    sampling: Option<String>,

    /// Replay these labels as detections on every sampled frame (comma separated).
    #[arg(long, value_name = "LABELS", value_delimiter = ',')]
    simulate: Vec<String>,

    /// Look up safety guidance for the session's violations when it ends.
    #[arg(long)]
    advise: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let source = {
        let _stage = ui.stage("Open media source");
        let media = cfg.media_source()?;
        log::info!("media source: {}", media);
        build_source(&media, cfg.source.width, cfg.source.height)?
    };

    let detector = build_detector(&args.simulate)?;
    let detection_enabled = args.detect || !args.simulate.is_empty();
    let session = cfg.session_config(detection_enabled)?;
    let validation = session.validation_duration;

    let mut controller = PipelineController::new(detector, Arc::new(SystemClock::new()));
    let events = controller.subscribe_many(&[
        EventKind::Alert,
        EventKind::Error,
        EventKind::Summary,
        EventKind::Report,
        EventKind::RateWindow,
    ]);

    let stop = controller.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("stop requested, finishing session...");
        stop.stop();
    })
    .context("install Ctrl-C handler")?;

    controller.start(source, session)?;
    let started = Instant::now();
    let progress = ui.session(validation);
    let mut alerts = Vec::new();

    loop {
        let event = match events.recv_timeout(EVENT_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) if controller.is_running() => continue,
            Err(_) => break,
        };
        match event {
            PipelineEvent::Alert(text) => {
                progress.println(&text);
                alerts.push(text);
            }
            PipelineEvent::Error { severity, message } => {
                let tag = match severity {
                    Severity::Transient => "WARN",
                    Severity::Fatal => "ERROR",
                };
                progress.println(&format!("{}: {}", tag, message));
            }
            PipelineEvent::Reconnected { message, .. } => progress.println(&message),
            PipelineEvent::Summary(text) => progress.println(&text),
            PipelineEvent::RateWindow(sample) => progress.update(started.elapsed(), &sample),
            PipelineEvent::Report(report) => {
                progress.finish();
                println!("{}", report);
                break;
            }
            _ => {}
        }
    }
    progress.finish();

    let outcome = controller
        .wait()?
        .ok_or_else(|| anyhow!("capture session did not run"))?;

    if args.advise {
        let _stage = ui.stage("Look up safety guidance");
        let retriever: Arc<dyn Retriever> = Arc::new(KeywordRetriever::with_builtin_guidelines());
        let worker = AdvisoryWorker::spawn(retriever, alerts)?;
        for line in worker.responses().iter() {
            println!("{}", line);
        }
        worker.collect()?;
    }

    match outcome.reason {
        TerminationReason::SourceFailed | TerminationReason::DetectorFailed => {
            Err(anyhow!("session ended early: {}", outcome.reason))
        }
        _ => Ok(()),
    }
}

fn apply_args(cfg: &mut MonitorConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source.uri = source.clone();
    }
    if let Some(fps) = args.fps {
        cfg.sampling.target_fps = fps;
    }
    if let Some(secs) = args.duration {
        cfg.session.validation_secs = secs;
    }
    if let Some(mode) = &args.sampling {
        cfg.sampling.mode = mode.parse()?;
    }
    Ok(())
}

fn build_detector(simulate: &[String]) -> Result<SharedDetector> {
    if simulate.is_empty() {
        return Ok(shared(StubBackend::new()));
    }
    let mut detections = Vec::with_capacity(simulate.len());
    for (slot, label) in simulate.iter().enumerate() {
        let left = 40.0 + slot as f32 * 160.0;
        let bbox = BoundingBox::new(left, 120.0, left + 120.0, 400.0)?;
        detections.push(Detection::new(label.trim(), 0.9, bbox)?);
    }
    log::info!("simulating detections: {}", simulate.join(", "));
    Ok(shared(ScriptedBackend::constant(detections)))
}
