use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::backend::{ProfilingBackend, StopParams};
use crate::error::Result;
use crate::registry::Target;

/// Which part of the controller a reply belongs to. Sequence numbers let the
/// controller drop replies it no longer waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Registry(u64),
    Command(u64),
    Poll(u64),
}

#[derive(Debug, Clone)]
pub enum Request {
    ListTargets,
    Start(Target),
    Stop(Target, StopParams),
    Status(Target),
}

#[derive(Debug)]
pub enum Reply {
    Targets(Result<Vec<Target>>),
    Started(Result<()>),
    Stopped(Result<()>),
    Status(Result<String>),
}

#[derive(Debug)]
pub struct Job {
    pub tag: Tag,
    pub request: Request,
}

#[derive(Debug)]
pub struct Completion {
    pub tag: Tag,
    pub reply: Reply,
}

pub fn execute(backend: &dyn ProfilingBackend, request: Request) -> Reply {
    match request {
        Request::ListTargets => Reply::Targets(backend.list_targets()),
        Request::Start(target) => Reply::Started(backend.start(&target)),
        Request::Stop(target, params) => Reply::Stopped(backend.stop(&target, &params)),
        Request::Status(target) => Reply::Status(backend.status(&target)),
    }
}

pub trait Dispatch {
    fn dispatch(&self, job: Job);
}

pub struct ThreadDispatch {
    backend: Arc<dyn ProfilingBackend>,
    tx: Sender<Completion>,
}

impl ThreadDispatch {
    pub fn new(backend: Arc<dyn ProfilingBackend>, tx: Sender<Completion>) -> Self {
        Self { backend, tx }
    }
}

impl Dispatch for ThreadDispatch {
    fn dispatch(&self, job: Job) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let reply = execute(backend.as_ref(), job.request);
            // Receiver gone means the session ended; nothing left to notify.
            let _ = tx.send(Completion { tag: job.tag, reply });
        });
    }
}

pub struct InlineDispatch {
    backend: Arc<dyn ProfilingBackend>,
    tx: Sender<Completion>,
}

impl InlineDispatch {
    pub fn new(backend: Arc<dyn ProfilingBackend>, tx: Sender<Completion>) -> Self {
        Self { backend, tx }
    }
}

impl Dispatch for InlineDispatch {
    fn dispatch(&self, job: Job) {
        let reply = execute(self.backend.as_ref(), job.request);
        let _ = self.tx.send(Completion { tag: job.tag, reply });
    }
}
