//! The instance heap and its run loop.
//!
//! An instance binds one thread to a set of coroutines, one fetcher, one
//! executor registry, and at most one renderer connection. Scheduling is
//! single-threaded cooperative: a runnable coroutine is driven until its
//! stack drains or a frame yields; fetch completions resume suspended
//! frames; observer events deliver only to coroutines that are observing
//! with no frame running; due timers post events. Instances share
//! nothing — cross-instance communication is message passing only.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use slab::Slab;
use tracing::{debug, warn};

use crate::document::{DocType, TargetDoc};
use crate::error::{ExecResult, RuntimeError};
use crate::executors::ExecutorRegistry;
use crate::fetcher::{FetchCompletion, Fetcher};
use crate::observer::{EventSink, ObserverBus, RawEvent};
use crate::rdr::{PageType, RendererSession};
use crate::variant::{json, Variant};
use crate::vdom::VdomElement;

use super::coroutine::{
    Continuation, Coroutine, Frame, NextStep, PageBinding, ProcessScope, Stage, VerbCtxt,
};
use super::verbs;
use super::{PendingRequest, RunOutcome, StepCtx};

/// Where a coroutine renders: page type, workspace, page naming.
#[derive(Debug, Clone)]
pub struct PageSpec {
    pub doc_type: DocType,
    pub page_type: PageType,
    pub workspace_name: String,
    pub page_name: String,
    pub group: Option<String>,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            doc_type: DocType::Html,
            page_type: PageType::PlainWindow,
            workspace_name: "main".to_string(),
            page_name: crate::rdr::client::DEF_PAGE_NAME.to_string(),
            group: None,
        }
    }
}

/// One runtime instance.
pub struct Instance {
    coroutines: Slab<Coroutine>,
    sink: EventSink,
    bus: ObserverBus,
    executors: ExecutorRegistry,
    fetcher: Box<dyn Fetcher>,
    rdr: Option<RendererSession>,
    pending: FxHashMap<u64, PendingRequest>,
    next_fetch_id: u64,
    process_scope: ProcessScope,
    runnable: VecDeque<usize>,
    /// Matched events whose coroutine was mid-frame at delivery time,
    /// keyed by observation id so each registration fires exactly once.
    held_events: VecDeque<(RawEvent, usize)>,
    errors: Vec<(usize, RuntimeError)>,
}

impl Instance {
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        let sink: EventSink = Rc::new(RefCell::new(VecDeque::new()));
        Self {
            coroutines: Slab::new(),
            bus: ObserverBus::new(sink.clone()),
            sink,
            executors: ExecutorRegistry::with_builtins(),
            fetcher,
            rdr: None,
            pending: FxHashMap::default(),
            next_fetch_id: 0,
            process_scope: Rc::new(RefCell::new(FxHashMap::default())),
            runnable: VecDeque::new(),
            held_events: VecDeque::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_renderer(mut self, rdr: RendererSession) -> Self {
        self.rdr = Some(rdr);
        self
    }

    /// Process-scope binding, visible to every coroutine of the
    /// instance.
    pub fn bind_process(&mut self, name: &str, value: Variant) {
        self.process_scope.borrow_mut().insert(CompactString::new(name), value);
    }

    pub fn executors_mut(&mut self) -> &mut ExecutorRegistry {
        &mut self.executors
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Spawning
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn a coroutine with no renderer page (headless).
    pub fn spawn(&mut self, program: Rc<VdomElement>, doc_type: DocType) -> usize {
        let entry = self.coroutines.vacant_entry();
        let id = entry.key();
        let mut co = Coroutine::new(
            id,
            program.clone(),
            TargetDoc::new(doc_type),
            self.sink.clone(),
            self.process_scope.clone(),
        );
        verbs::push_frame(&mut co, program);
        entry.insert(co);
        self.runnable.push_back(id);
        debug!(co = id, "coroutine spawned");
        id
    }

    /// Spawn a coroutine bound to a renderer page; the workspace and
    /// page are created up front, the `load` is deferred until the
    /// first run materializes the document.
    pub fn spawn_with_page(
        &mut self,
        program: Rc<VdomElement>,
        spec: &PageSpec,
    ) -> ExecResult<usize> {
        let rdr = self
            .rdr
            .as_mut()
            .ok_or_else(|| RuntimeError::NotSupported("instance has no renderer".into()))?;
        let workspace = rdr.create_workspace(&spec.workspace_name)?;
        let page =
            rdr.create_page(spec.page_type, workspace, &spec.page_name, spec.group.as_deref())?;

        let id = self.spawn(program, spec.doc_type);
        self.coroutines[id].target = Some(PageBinding {
            page_type: spec.page_type,
            workspace,
            page,
            dom: None,
            suppressed_by: None,
        });
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Drive everything that can make progress without waiting on wall
    /// clock: runnable coroutines, fetch completions, due timers, and
    /// deliverable events.
    pub fn run_until_idle(&mut self) {
        loop {
            let mut progress = false;
            while let Some(id) = self.runnable.pop_front() {
                progress = true;
                self.step(id);
            }
            while let Some(completion) = self.fetcher.poll() {
                progress = true;
                self.complete_fetch(completion);
            }
            if self.poll_timers_at(Instant::now()) > 0 {
                progress = true;
            }
            if self.drain_events() {
                progress = true;
            }
            if !progress {
                break;
            }
        }
    }

    /// Fire timers as of `now` across all coroutines; tests advance time
    /// explicitly through this. Returns how many fired.
    pub fn poll_timers_at(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for (_, co) in self.coroutines.iter() {
            fired += co.timers.poll_due(now).len();
        }
        fired
    }

    fn step(&mut self, id: usize) {
        let outcome = {
            let Self { coroutines, rdr, fetcher, executors, bus, pending, next_fetch_id, .. } =
                self;
            let Some(co) = coroutines.get_mut(id) else { return };
            if co.stage == Stage::CleanedUp {
                return;
            }
            let mut ctx = StepCtx {
                rdr: rdr.as_mut(),
                fetcher: fetcher.as_mut(),
                executors,
                bus,
                pending,
                next_fetch_id,
            };
            verbs::advance(co, &mut ctx)
        };
        match outcome {
            Ok(RunOutcome::Suspended) => {}
            Ok(RunOutcome::Finished) => self.on_drained(id),
            Err(err) => self.teardown_with_error(id, err),
        }
    }

    /// The stack drained: the end of the first run issues `load` and
    /// moves to observing; a finished handler changes nothing.
    fn on_drained(&mut self, id: usize) {
        let mut load_err = None;
        {
            let Self { coroutines, rdr, .. } = self;
            let Some(co) = coroutines.get_mut(id) else { return };
            if co.stage != Stage::FirstRun {
                return;
            }
            co.stage = Stage::Observing;
            debug!(co = id, "first run complete, observing");
            if let (Some(rdr), Some(target)) = (rdr.as_mut(), co.target.as_mut()) {
                match rdr.load_document(target.page_type, target.page, &co.doc) {
                    Ok(result) => {
                        target.dom = Some(result.dom_handle);
                        target.suppressed_by = result.suppressed_by;
                    }
                    Err(err) => load_err = Some(err),
                }
            }
        }
        if let Some(err) = load_err {
            warn!(co = id, error = %err, "page load failed");
            self.errors.push((id, err));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetch completions
    // ─────────────────────────────────────────────────────────────────────────

    fn complete_fetch(&mut self, completion: FetchCompletion) {
        let Some(PendingRequest { co: co_id, cont }) = self.pending.remove(&completion.id)
        else {
            // Cancelled while in flight; drop the response.
            return;
        };
        if !self.coroutines.contains(co_id) {
            return;
        }

        let parsed = completion.result.and_then(|bytes| {
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| RuntimeError::invalid_value(format!("fetched body: {e}")))?;
            json::parse(text)
        });

        match parsed {
            Ok(value) => {
                let co = &mut self.coroutines[co_id];
                apply_continuation(co, cont, value);
                self.runnable.push_back(co_id);
            }
            Err(err) => self.fail_resume(co_id, err),
        }
    }

    /// A resumption failed before the verb could continue: run the
    /// handler search; teardown when nothing matches.
    fn fail_resume(&mut self, co_id: usize, err: RuntimeError) {
        let handled = {
            let Some(co) = self.coroutines.get_mut(co_id) else { return };
            verbs::handle_error(co, err)
        };
        match handled {
            Ok(()) => self.runnable.push_back(co_id),
            Err(err) => self.teardown_with_error(co_id, err),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event delivery
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver queued events to observing coroutines, in enqueue order.
    /// A matched registration whose coroutine is mid-frame is held and
    /// retried, firing exactly once.
    fn drain_events(&mut self) -> bool {
        let mut delivered = false;

        // Retry held deliveries first to preserve enqueue order.
        let held: Vec<(RawEvent, usize)> = self.held_events.drain(..).collect();
        for (event, obs_id) in held {
            let Some(obs) = self.bus.observation(obs_id).cloned() else { continue };
            if self.try_deliver(&event, &obs) {
                delivered = true;
            } else {
                self.held_events.push_back((event, obs_id));
            }
        }

        let queued: Vec<RawEvent> = self.sink.borrow_mut().drain(..).collect();
        for event in queued {
            for (obs_id, obs) in self.bus.match_event(&event) {
                if self.try_deliver(&event, &obs) {
                    delivered = true;
                } else if self.coroutines.contains(obs.co) {
                    self.held_events.push_back((event.clone(), obs_id));
                }
            }
        }
        delivered
    }

    fn try_deliver(&mut self, event: &RawEvent, obs: &crate::observer::Observation) -> bool {
        let Some(co) = self.coroutines.get_mut(obs.co) else { return false };
        if co.stage == Stage::Observing && co.stack.is_empty() {
            push_delivery_frame(co, obs.handler.clone(), event);
            self.runnable.push_back(obs.co);
            return true;
        }
        false
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Page ownership
    // ─────────────────────────────────────────────────────────────────────────

    /// Take renderer ownership of the coroutine's page.
    pub fn register_page(&mut self, co_id: usize) -> ExecResult<()> {
        let rdr = self
            .rdr
            .as_mut()
            .ok_or_else(|| RuntimeError::NotSupported("instance has no renderer".into()))?;
        let co = self
            .coroutines
            .get(co_id)
            .ok_or_else(|| RuntimeError::not_exists(format!("coroutine {co_id}")))?;
        let target = co
            .target
            .as_ref()
            .ok_or_else(|| RuntimeError::NotSupported("coroutine has no page".into()))?;
        rdr.register_page(target.page_type, target.page, crtn_handle(co_id))
    }

    /// Release renderer ownership. A non-zero result names the
    /// suppressed coroutine, whose document is reloaded here.
    pub fn revoke_page(&mut self, co_id: usize) -> ExecResult<()> {
        let reload_crtn = {
            let rdr = self
                .rdr
                .as_mut()
                .ok_or_else(|| RuntimeError::NotSupported("instance has no renderer".into()))?;
            let co = self
                .coroutines
                .get(co_id)
                .ok_or_else(|| RuntimeError::not_exists(format!("coroutine {co_id}")))?;
            let target = co
                .target
                .as_ref()
                .ok_or_else(|| RuntimeError::NotSupported("coroutine has no page".into()))?;
            rdr.revoke_page(target.page_type, target.page, crtn_handle(co_id))?
        };
        if let Some(crtn) = reload_crtn {
            self.reload_coroutine_by_crtn(crtn)?;
        }
        Ok(())
    }

    fn reload_coroutine_by_crtn(&mut self, crtn: u64) -> ExecResult<()> {
        let Some(co_id) = crtn.checked_sub(1).map(|id| id as usize) else {
            return Ok(());
        };
        let Self { coroutines, rdr, .. } = self;
        let (Some(co), Some(rdr)) = (coroutines.get_mut(co_id), rdr.as_mut()) else {
            return Ok(());
        };
        let Some(target) = co.target.as_mut() else { return Ok(()) };
        debug!(co = co_id, "reloading suppressed document");
        let result = rdr.load_document(target.page_type, target.page, &co.doc)?;
        target.dom = Some(result.dom_handle);
        target.suppressed_by = result.suppressed_by;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown and introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Tear a coroutine down: cancel its pending I/O, revoke its
    /// observations, stop its timers, release its page.
    pub fn teardown(&mut self, co_id: usize) {
        if !self.coroutines.contains(co_id) {
            return;
        }
        let in_flight: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.co == co_id)
            .map(|(&id, _)| id)
            .collect();
        for id in in_flight {
            self.pending.remove(&id);
            self.fetcher.cancel(id);
        }
        self.bus.remove_coroutine(co_id);

        let mut co = self.coroutines.remove(co_id);
        co.stage = Stage::CleanedUp;
        if let (Some(rdr), Some(target)) = (self.rdr.as_mut(), co.target.as_ref()) {
            if let Err(err) = rdr.destroy_page(target.page_type, target.workspace, target.page) {
                warn!(co = co_id, error = %err, "page teardown failed");
            }
        }
        debug!(co = co_id, "coroutine cleaned up");
        // Timers stop in Timers::drop.
    }

    fn teardown_with_error(&mut self, co_id: usize, err: RuntimeError) {
        warn!(co = co_id, error = %err, "coroutine failed");
        if let Some(co) = self.coroutines.get_mut(co_id) {
            co.last_error = Some(err.clone());
        }
        self.errors.push((co_id, err));
        self.teardown(co_id);
    }

    pub fn coroutine(&self, id: usize) -> Option<&Coroutine> {
        self.coroutines.get(id)
    }

    pub fn coroutine_mut(&mut self, id: usize) -> Option<&mut Coroutine> {
        self.coroutines.get_mut(id)
    }

    /// Unhandled errors, in occurrence order (the instance error
    /// channel).
    pub fn errors(&self) -> &[(usize, RuntimeError)] {
        &self.errors
    }

    pub fn observer_bus(&self) -> &ObserverBus {
        &self.bus
    }

    pub fn renderer(&self) -> Option<&RendererSession> {
        self.rdr.as_ref()
    }
}

/// Renderer-facing coroutine handle (slab key offset by one so zero
/// stays null).
fn crtn_handle(co_id: usize) -> u64 {
    co_id as u64 + 1
}

fn apply_continuation(co: &mut Coroutine, cont: Continuation, value: Variant) {
    let Some(frame) = co.stack.last_mut() else { return };
    frame.continuation = None;
    match cont {
        Continuation::ArchetypeSrc => {
            frame.ctnt_var = value;
        }
        Continuation::UpdateFrom => {
            if let VerbCtxt::Update(uc) = &mut frame.ctxt {
                uc.src = Some(value);
            }
        }
    }
    frame.next_step = NextStep::SelectChild;
}

/// Push an observe handler body for one delivered event. The body runs
/// with the payload bound as `$?` plus the event name and sub-name.
fn push_delivery_frame(co: &mut Coroutine, handler: Rc<VdomElement>, event: &RawEvent) {
    let mut frame = Frame::new(handler, false);
    frame.ctxt = VerbCtxt::ObserveDeliver;
    frame.next_step = NextStep::SelectChild;
    frame.scope_vars.insert(CompactString::new("?"), event.payload.clone());
    frame
        .scope_vars
        .insert(CompactString::new("eventName"), Variant::string(event.event.as_str()));
    frame
        .scope_vars
        .insert(CompactString::new("eventSub"), Variant::string(event.sub.as_str()));
    co.stack.push(frame);
}
