mod dispatch;
mod timer;


use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use serde::Deserialize;

pub use dispatch::{
    Completion, Dispatch, InlineDispatch, Job, Reply, Request, Tag, ThreadDispatch, execute,
};
pub use timer::Interval;

use crate::artifact::ArtifactRef;
use crate::backend::{ProfilingBackend, StopParams};
use crate::registry::{Target, TargetRegistry};
use crate::selection::{RecordingOptions, Selection};
use crate::status::{StatusKind, StatusProjection, project, project_kind};

const MAX_QUEUED_EVENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    StoppingAndPolling,
    ArtifactReady,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::StoppingAndPolling => "processing",
            Phase::ArtifactReady => "chart ready",
        }
    }

    fn allows_selection(self) -> bool {
        matches!(self, Phase::Idle | Phase::ArtifactReady)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOnStart {
    /// Hide it as soon as start is issued; bring it back if start fails.
    #[default]
    Hide,
    /// Leave it on display until the next stop.
    Keep,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub registry_refresh: Duration,
    pub status_poll: Duration,
    pub width_margin: u32,
    /// Consecutive status failures before giving up; 0 polls forever.
    pub max_poll_failures: u32,
    pub artifact_on_start: ArtifactOnStart,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            registry_refresh: Duration::from_secs(10),
            status_poll: Duration::from_secs(2),
            width_margin: 20,
            max_poll_failures: 0,
            artifact_on_start: ArtifactOnStart::Hide,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRejected {
    Busy,
    NoNamespace,
    NoTarget,
    WrongPhase { action: &'static str, phase: Phase },
    Closed,
}

impl fmt::Display for ActionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRejected::Busy => write!(f, "another command is still in flight"),
            ActionRejected::NoNamespace => write!(f, "select a namespace first"),
            ActionRejected::NoTarget => write!(f, "select a pod first"),
            ActionRejected::WrongPhase { action, phase } => {
                write!(f, "cannot {action} while {phase}")
            }
            ActionRejected::Closed => write!(f, "session is closed"),
        }
    }
}

impl std::error::Error for ActionRejected {}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TargetsRefreshed { count: usize },
    StartRequested(Target),
    Started(Target),
    StartFailed { target: Target, error: String },
    StopRequested { target: Target, width: u32 },
    Stopped(Target),
    StopFailed { target: Target, error: String },
    Status(StatusProjection),
    PollAbandoned { failures: u32 },
    ArtifactReady(ArtifactRef),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::TargetsRefreshed { count } => write!(f, "{count} target(s) registered"),
            SessionEvent::StartRequested(t) => write!(f, "starting perf record on {t}"),
            SessionEvent::Started(t) => write!(f, "recording {t}"),
            SessionEvent::StartFailed { target, error } => {
                write!(f, "start on {target} failed: {error}")
            }
            SessionEvent::StopRequested { target, width } => {
                write!(f, "stopping {target} (width {width})")
            }
            SessionEvent::Stopped(t) => write!(f, "recording stopped on {t}, processing"),
            SessionEvent::StopFailed { target, error } => {
                write!(f, "stop on {target} failed: {error}")
            }
            SessionEvent::Status(p) => write!(f, "status: {}", p.label),
            SessionEvent::PollAbandoned { failures } => {
                write!(f, "gave up on status after {failures} failed request(s)")
            }
            SessionEvent::ArtifactReady(a) => {
                write!(f, "flamegraph ready for {} (time={})", a.target, a.epoch)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Start,
    Stop,
}

// State to restore if the backend refuses the command.
#[derive(Debug, Clone)]
struct Rollback {
    phase: Phase,
    status: StatusProjection,
    artifact_epoch: Option<i64>,
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    kind: CommandKind,
    target: Target,
    rollback: Rollback,
}

#[derive(Debug)]
struct PollLoop {
    timer: Interval,
    generation: u64,
    active: bool,
    in_flight: bool,
    failures: u32,
}

pub struct SessionController {
    settings: SessionSettings,
    dispatcher: Box<dyn Dispatch>,
    completions: Receiver<Completion>,

    registry: TargetRegistry,
    registry_timer: Interval,
    registry_seq: u64,
    registry_applied: u64,

    selection: Selection,
    options: RecordingOptions,

    phase: Phase,
    status: StatusProjection,
    pending: Option<Pending>,
    command_seq: u64,
    artifact_epoch: Option<i64>,
    last_epoch: i64,
    poll: PollLoop,

    events: VecDeque<SessionEvent>,
    opened: bool,
    closed: bool,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        dispatcher: Box<dyn Dispatch>,
        completions: Receiver<Completion>,
    ) -> Self {
        let registry_timer = Interval::new(settings.registry_refresh);
        let poll_timer = Interval::new(settings.status_poll);
        Self {
            settings,
            dispatcher,
            completions,
            registry: TargetRegistry::new(),
            registry_timer,
            registry_seq: 0,
            registry_applied: 0,
            selection: Selection::default(),
            options: RecordingOptions::default(),
            phase: Phase::Idle,
            status: project_kind(StatusKind::Idle),
            pending: None,
            command_seq: 0,
            artifact_epoch: None,
            last_epoch: 0,
            poll: PollLoop {
                timer: poll_timer,
                generation: 0,
                active: false,
                in_flight: false,
                failures: 0,
            },
            events: VecDeque::new(),
            opened: false,
            closed: false,
        }
    }

    pub fn threaded(backend: Arc<dyn ProfilingBackend>, settings: SessionSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        Self::new(settings, Box::new(ThreadDispatch::new(backend, tx)), rx)
    }

    pub fn inline(backend: Arc<dyn ProfilingBackend>, settings: SessionSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        Self::new(settings, Box::new(InlineDispatch::new(backend, tx)), rx)
    }

    pub fn open(&mut self, now: Instant) {
        if self.opened || self.closed {
            return;
        }
        self.opened = true;
        self.request_registry();
        self.registry_timer.arm_after_period(now);
        tracing::debug!(
            refresh_ms = self.settings.registry_refresh.as_millis() as u64,
            "session opened"
        );
    }

    pub fn refresh_targets(&mut self) {
        if self.closed {
            return;
        }
        self.request_registry();
    }

    /// Cancels both timers. Replies still in flight are dropped on arrival.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry_timer.cancel();
        self.stop_polling();
        self.pending = None;
        tracing::debug!("session closed");
    }

    pub fn tick(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        while let Ok(completion) = self.completions.try_recv() {
            self.apply(completion, now);
        }
        if self.registry_timer.fire(now) {
            self.request_registry();
        }
        if self.poll.active && self.poll.timer.fire(now) {
            self.issue_poll();
        }
    }

    pub fn select_namespace(&mut self, namespace: &str) -> Result<(), ActionRejected> {
        self.guard_selection()?;
        self.selection.set_namespace(namespace.to_string());
        self.reset_for_selection();
        Ok(())
    }

    pub fn select_target(&mut self, pod: &str) -> Result<(), ActionRejected> {
        self.guard_selection()?;
        if self.selection.namespace().is_none() {
            return Err(ActionRejected::NoNamespace);
        }
        self.selection.set_pod(pod.to_string());
        self.reset_for_selection();
        Ok(())
    }

    pub fn set_options(&mut self, options: RecordingOptions) {
        self.options = options;
    }

    pub fn start(&mut self) -> Result<(), ActionRejected> {
        self.guard_command()?;
        if !matches!(self.phase, Phase::Idle | Phase::ArtifactReady) {
            return Err(ActionRejected::WrongPhase {
                action: "start",
                phase: self.phase,
            });
        }
        let target = self.selection.target().ok_or(ActionRejected::NoTarget)?;

        let rollback = self.snapshot();
        if self.settings.artifact_on_start == ArtifactOnStart::Hide && self.artifact_epoch.is_some()
        {
            self.artifact_epoch = None;
            self.phase = Phase::Idle;
        }
        // Shown before the backend confirms; reverted by the rollback on failure.
        self.status = project_kind(StatusKind::PerfRecord);

        let seq = self.next_command_seq();
        self.pending = Some(Pending {
            seq,
            kind: CommandKind::Start,
            target: target.clone(),
            rollback,
        });
        self.push_event(SessionEvent::StartRequested(target.clone()));
        self.dispatcher.dispatch(Job {
            tag: Tag::Command(seq),
            request: Request::Start(target),
        });
        Ok(())
    }

    pub fn stop(&mut self, viewport_width: u32) -> Result<(), ActionRejected> {
        self.guard_command()?;
        if self.phase != Phase::Recording {
            return Err(ActionRejected::WrongPhase {
                action: "stop",
                phase: self.phase,
            });
        }
        let target = self.selection.target().ok_or(ActionRejected::NoTarget)?;

        let rollback = self.snapshot();
        self.artifact_epoch = None;
        let params = StopParams::new(viewport_width, self.settings.width_margin, self.options);

        let seq = self.next_command_seq();
        self.pending = Some(Pending {
            seq,
            kind: CommandKind::Stop,
            target: target.clone(),
            rollback,
        });
        self.push_event(SessionEvent::StopRequested {
            target: target.clone(),
            width: params.width,
        });
        self.dispatcher.dispatch(Job {
            tag: Tag::Command(seq),
            request: Request::Stop(target, params),
        });
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn options(&self) -> RecordingOptions {
        self.options
    }

    pub fn last_status(&self) -> &StatusProjection {
        &self.status
    }

    pub fn display_status(&self) -> Option<StatusProjection> {
        let starting = matches!(
            self.pending,
            Some(Pending {
                kind: CommandKind::Start,
                ..
            })
        );
        if starting || matches!(self.phase, Phase::Recording | Phase::StoppingAndPolling) {
            Some(self.status.clone())
        } else {
            None
        }
    }

    pub fn artifact_epoch(&self) -> Option<i64> {
        self.artifact_epoch
    }

    pub fn artifact(&self) -> Option<ArtifactRef> {
        let epoch = self.artifact_epoch?;
        let target = self.selection.target()?;
        Some(ArtifactRef::new(target, epoch))
    }

    pub fn is_polling(&self) -> bool {
        self.poll.active
    }

    pub fn next_poll_due(&self) -> Option<Instant> {
        if self.poll.active {
            self.poll.timer.next_due()
        } else {
            None
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    fn guard_command(&self) -> Result<(), ActionRejected> {
        if self.closed {
            return Err(ActionRejected::Closed);
        }
        if self.pending.is_some() {
            return Err(ActionRejected::Busy);
        }
        Ok(())
    }

    fn guard_selection(&self) -> Result<(), ActionRejected> {
        self.guard_command()?;
        if !self.phase.allows_selection() {
            return Err(ActionRejected::WrongPhase {
                action: "change selection",
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn reset_for_selection(&mut self) {
        self.stop_polling();
        self.artifact_epoch = None;
        self.phase = Phase::Idle;
        self.status = project_kind(StatusKind::Idle);
    }

    fn snapshot(&self) -> Rollback {
        Rollback {
            phase: self.phase,
            status: self.status.clone(),
            artifact_epoch: self.artifact_epoch,
        }
    }

    fn restore(&mut self, rollback: Rollback) {
        self.phase = rollback.phase;
        self.status = rollback.status;
        self.artifact_epoch = rollback.artifact_epoch;
    }

    fn next_command_seq(&mut self) -> u64 {
        self.command_seq += 1;
        self.command_seq
    }

    fn request_registry(&mut self) {
        self.registry_seq += 1;
        self.dispatcher.dispatch(Job {
            tag: Tag::Registry(self.registry_seq),
            request: Request::ListTargets,
        });
    }

    fn issue_poll(&mut self) {
        if self.poll.in_flight {
            tracing::debug!("status request still in flight; skipping this interval");
            return;
        }
        let Some(target) = self.selection.target() else {
            return;
        };
        self.poll.in_flight = true;
        self.dispatcher.dispatch(Job {
            tag: Tag::Poll(self.poll.generation),
            request: Request::Status(target),
        });
    }

    fn start_polling(&mut self, now: Instant) {
        self.poll.generation += 1;
        self.poll.active = true;
        self.poll.in_flight = false;
        self.poll.failures = 0;
        self.poll.timer.arm_after_period(now);
        tracing::debug!(generation = self.poll.generation, "status polling started");
    }

    fn stop_polling(&mut self) {
        if !self.poll.active {
            return;
        }
        self.poll.active = false;
        self.poll.in_flight = false;
        self.poll.timer.cancel();
        // Anything tagged with the old generation is now stale.
        self.poll.generation += 1;
        tracing::debug!("status polling stopped");
    }

    fn next_epoch(&mut self) -> i64 {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let epoch = now_ms.max(self.last_epoch + 1);
        self.last_epoch = epoch;
        epoch
    }

    fn push_event(&mut self, event: SessionEvent) {
        while self.events.len() >= MAX_QUEUED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn apply(&mut self, completion: Completion, now: Instant) {
        match completion.tag {
            Tag::Registry(seq) => self.apply_registry(seq, completion.reply),
            Tag::Command(seq) => self.apply_command(seq, completion.reply, now),
            Tag::Poll(generation) => self.apply_poll(generation, completion.reply),
        }
    }

    fn apply_registry(&mut self, seq: u64, reply: Reply) {
        let Reply::Targets(result) = reply else {
            tracing::warn!("unexpected reply to registry request");
            return;
        };
        if seq < self.registry_applied {
            tracing::debug!(seq, applied = self.registry_applied, "dropping older registry reply");
            return;
        }
        if self.registry.apply_fetch(result) {
            self.registry_applied = seq;
            let count = self.registry.targets().len();
            self.push_event(SessionEvent::TargetsRefreshed { count });
        }
    }

    fn apply_command(&mut self, seq: u64, reply: Reply, now: Instant) {
        let Some(pending) = self.pending.take_if(|p| p.seq == seq) else {
            tracing::debug!(seq, "dropping reply for a command no longer pending");
            return;
        };
        let target = pending.target.clone();
        match (pending.kind, reply) {
            (CommandKind::Start, Reply::Started(Ok(()))) => {
                self.phase = Phase::Recording;
                tracing::info!(pod = %target, "recording started");
                self.push_event(SessionEvent::Started(target));
            }
            (CommandKind::Start, Reply::Started(Err(e))) => {
                self.restore(pending.rollback);
                tracing::warn!(pod = %target, error = %e, "start failed");
                self.push_event(SessionEvent::StartFailed {
                    target,
                    error: e.to_string(),
                });
            }
            (CommandKind::Stop, Reply::Stopped(Ok(()))) => {
                self.phase = Phase::StoppingAndPolling;
                self.start_polling(now);
                tracing::info!(pod = %target, "recording stopped; waiting for the pipeline");
                self.push_event(SessionEvent::Stopped(target));
            }
            (CommandKind::Stop, Reply::Stopped(Err(e))) => {
                self.restore(pending.rollback);
                // A stop attempt retires the previous chart even when it fails.
                self.artifact_epoch = None;
                tracing::warn!(pod = %target, error = %e, "stop failed");
                self.push_event(SessionEvent::StopFailed {
                    target,
                    error: e.to_string(),
                });
            }
            (kind, other) => {
                tracing::warn!(?kind, reply = ?other, "mismatched command reply; rolling back");
                self.restore(pending.rollback);
            }
        }
    }

    fn apply_poll(&mut self, generation: u64, reply: Reply) {
        if !self.poll.active || generation != self.poll.generation {
            tracing::debug!(
                generation,
                current = self.poll.generation,
                "dropping status reply from a finished polling cycle"
            );
            return;
        }
        self.poll.in_flight = false;
        let Reply::Status(result) = reply else {
            tracing::warn!("unexpected reply to status request");
            return;
        };
        match result {
            Ok(raw) => {
                self.poll.failures = 0;
                let projection = project(&raw);
                if projection.is_unknown() {
                    tracing::warn!(status = %projection.label, "unrecognized pipeline status");
                }
                if projection != self.status {
                    self.status = projection.clone();
                    self.push_event(SessionEvent::Status(projection.clone()));
                }
                if projection.kind.is_terminal() {
                    self.finish_run();
                }
            }
            Err(e) => {
                self.poll.failures = self.poll.failures.saturating_add(1);
                tracing::warn!(error = %e, failures = self.poll.failures, "status request failed");
                let max = self.settings.max_poll_failures;
                if max > 0 && self.poll.failures >= max {
                    let failures = self.poll.failures;
                    self.stop_polling();
                    self.phase = Phase::Idle;
                    self.status = project_kind(StatusKind::Idle);
                    self.push_event(SessionEvent::PollAbandoned { failures });
                }
            }
        }
    }

    fn finish_run(&mut self) {
        self.stop_polling();
        let epoch = self.next_epoch();
        self.artifact_epoch = Some(epoch);
        self.phase = Phase::ArtifactReady;
        if let Some(artifact) = self.artifact() {
            tracing::info!(pod = %artifact.target, epoch, "flamegraph ready");
            self.push_event(SessionEvent::ArtifactReady(artifact));
        }
    }
}
