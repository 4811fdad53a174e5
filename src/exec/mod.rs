//! The VDOM evaluator and coroutine scheduler.
//!
//! ## Modules
//! - `coroutine`: frame stack, stages, scopes
//! - `verbs`: per-element operation sets and the frame driver
//! - `scheduler`: the instance heap and its run loop

pub mod coroutine;
pub mod scheduler;
pub(crate) mod verbs;

pub use coroutine::{
    CatchHandler, Continuation, Coroutine, CoroutineResolver, Frame, NextStep, PageBinding,
    Stage, VerbCtxt,
};
pub use scheduler::{Instance, PageSpec};

use rustc_hash::FxHashMap;

use crate::error::ExecResult;
use crate::executors::ExecutorRegistry;
use crate::fetcher::{FetchRequest, Fetcher};
use crate::observer::ObserverBus;
use crate::rdr::RendererSession;

/// Control flow returned by one driver step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The top frame yielded on I/O; the coroutine leaves the runnable
    /// set until its continuation resumes it.
    Suspend,
}

/// Outcome of driving a coroutine as far as it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stack drained (first run complete, or handler done).
    Finished,
    Suspended,
}

/// Entry in the pending-request table: request id → suspended frame.
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub co: usize,
    pub cont: coroutine::Continuation,
}

/// Instance services handed to verbs for the duration of one step.
pub struct StepCtx<'a> {
    pub rdr: Option<&'a mut RendererSession>,
    pub fetcher: &'a mut dyn Fetcher,
    pub executors: &'a ExecutorRegistry,
    pub bus: &'a mut ObserverBus,
    pub pending: &'a mut FxHashMap<u64, PendingRequest>,
    pub next_fetch_id: &'a mut u64,
}

impl StepCtx<'_> {
    /// Dispatch an async load and record the continuation under a fresh
    /// request id.
    pub fn submit_fetch(
        &mut self,
        co: usize,
        uri: String,
        cont: coroutine::Continuation,
    ) -> ExecResult<()> {
        *self.next_fetch_id += 1;
        let id = *self.next_fetch_id;
        self.pending.insert(id, PendingRequest { co, cont });
        self.fetcher.submit(FetchRequest { id, uri })
    }
}
