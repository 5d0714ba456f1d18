use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crate::artifact::ArtifactRef;
use crate::backend::ProfilingBackend;
use crate::error::{Error, Result};
use crate::registry::Target;
use crate::selection::RecordingOptions;
use crate::session::{ActionRejected, Phase, SessionController, SessionEvent, SessionSettings};

const TICK: Duration = Duration::from_millis(50);

pub enum StopTrigger {
    After(Duration),
    Signal(Receiver<()>),
}

impl StopTrigger {
    pub fn on_enter() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            let _ = tx.send(());
        });
        StopTrigger::Signal(rx)
    }

    fn fired(&self, started: Instant, now: Instant) -> bool {
        match self {
            StopTrigger::After(d) => now.duration_since(started) >= *d,
            StopTrigger::Signal(rx) => match rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub target: Target,
    pub options: RecordingOptions,
    pub viewport_width: u32,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub artifact: ArtifactRef,
    pub path: PathBuf,
    pub bytes: usize,
}

fn rejected(e: ActionRejected) -> Error {
    Error::msg(e.to_string())
}

fn pump_until(
    ctl: &mut SessionController,
    failure: &mut Option<String>,
    mut done: impl FnMut(&SessionController, Instant) -> bool,
) {
    loop {
        let now = Instant::now();
        ctl.tick(now);
        for ev in ctl.drain_events() {
            match &ev {
                SessionEvent::StartFailed { error, .. } | SessionEvent::StopFailed { error, .. } => {
                    *failure = Some(error.clone());
                }
                SessionEvent::PollAbandoned { .. } => *failure = Some(ev.to_string()),
                _ => {}
            }
            tracing::info!("{ev}");
        }
        if done(ctl, now) {
            return;
        }
        thread::sleep(TICK);
    }
}

pub fn record(
    backend: Arc<dyn ProfilingBackend>,
    settings: SessionSettings,
    req: &RecordRequest,
    trigger: StopTrigger,
) -> Result<RecordOutcome> {
    let mut ctl = SessionController::threaded(Arc::clone(&backend), settings);
    let mut failure = None;

    ctl.select_namespace(&req.target.namespace).map_err(rejected)?;
    ctl.select_target(&req.target.name).map_err(rejected)?;
    ctl.set_options(req.options);

    ctl.start().map_err(rejected)?;
    pump_until(&mut ctl, &mut failure, |c, _| !c.busy());
    if ctl.phase() != Phase::Recording {
        ctl.shutdown();
        let why = failure.unwrap_or_else(|| "backend refused to start".to_string());
        return Err(Error::msg(format!("start on {} failed: {why}", req.target)));
    }

    let started = Instant::now();
    pump_until(&mut ctl, &mut failure, |_, now| trigger.fired(started, now));

    ctl.stop(req.viewport_width).map_err(rejected)?;
    pump_until(&mut ctl, &mut failure, |c, _| !c.busy());
    if ctl.phase() != Phase::StoppingAndPolling {
        ctl.shutdown();
        let why = failure.unwrap_or_else(|| "backend refused to stop".to_string());
        return Err(Error::msg(format!(
            "stop on {} failed: {why}; perf may still be recording",
            req.target
        )));
    }

    pump_until(&mut ctl, &mut failure, |c, _| {
        matches!(c.phase(), Phase::ArtifactReady | Phase::Idle)
    });
    let artifact = ctl.artifact();
    ctl.shutdown();
    let Some(artifact) = artifact else {
        let why = failure.unwrap_or_else(|| "no chart was produced".to_string());
        return Err(Error::msg(why));
    };

    let path = req
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(artifact.suggested_file_name()));
    let bytes = save_chart(backend.as_ref(), &artifact, &path)?;
    Ok(RecordOutcome {
        artifact,
        path,
        bytes,
    })
}

pub fn save_chart(backend: &dyn ProfilingBackend, artifact: &ArtifactRef, path: &Path) -> Result<usize> {
    let body = backend.chart(&artifact.target, artifact.epoch, true)?;
    if body.is_empty() {
        return Err(Error::msg(format!(
            "proxy returned an empty chart for {}",
            artifact.target
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &body)
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), bytes = body.len(), "chart saved");
    Ok(body.len())
}
