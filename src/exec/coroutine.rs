//! Coroutine state: the frame stack, stages, and scopes.
//!
//! One coroutine is one concurrent HVML execution. It owns its program
//! tree, its target document, its document-scope bindings (including
//! `$TIMERS`), and a stack of frames, one per active program element.
//! Execution is resumable: a suspended frame records a continuation and
//! survives across yields untouched.

use std::cell::RefCell;
use std::rc::Rc;

use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::document::{NodeId, TargetDoc};
use crate::error::RuntimeError;
use crate::executors::Executor;
use crate::observer::EventSink;
use crate::rdr::PageType;
use crate::timers::{Timers, TIMERS_VAR_NAME};
use crate::variant::{VObject, Variant};
use crate::vcm::{ScopeResolver, VcmNode};
use crate::vdom::{VdomElement, VerbKind};

/// Shared process-scope bindings (outermost resolution level).
pub type ProcessScope = Rc<RefCell<FxHashMap<CompactString, Variant>>>;

// =============================================================================
// Stages and steps
// =============================================================================

/// Coroutine lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Walking the program tree; renderer `load` is deferred until the
    /// document is fully materialized.
    FirstRun,
    /// Only observer handlers run.
    Observing,
    /// Terminal; all resources released.
    CleanedUp,
}

/// What the driver does with the top frame next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    AfterPushed,
    SelectChild,
    OnPopping,
    Rerun,
}

/// Continuation recorded on a suspended frame; the completion message
/// carries it back to the verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// `archetype src=…`: parse the fetched body and bind it.
    ArchetypeSrc,
    /// `update from=…`: use the fetched body as the update source.
    UpdateFrom,
}

// =============================================================================
// Verb contexts
// =============================================================================

/// Per-verb frame state. A closed enum, so no `Any` downcasts.
pub enum VerbCtxt {
    None,
    Choose,
    Iterate(IterateCtxt),
    Update(UpdateCtxt),
    Archetype(ArchetypeCtxt),
    Observe,
    /// An observe handler body being delivered an event.
    ObserveDeliver,
    Foreign(ForeignCtxt),
}

pub struct IterateCtxt {
    pub exec: Option<Box<dyn Executor>>,
    pub rule: String,
    pub onlyif: Option<VcmNode>,
    /// Cleared when the executor is exhausted or `onlyif` turns false.
    pub alive: bool,
}

pub struct UpdateCtxt {
    pub on: Variant,
    /// Document element target when `on` addressed the document.
    pub doc_target: Option<NodeId>,
    pub to: CompactString,
    pub at: CompactString,
    pub src: Option<Variant>,
    pub combinator: crate::vdom::AttrCombinator,
}

pub struct ArchetypeCtxt {
    pub name: CompactString,
}

pub struct ForeignCtxt {
    pub elem: NodeId,
}

/// An `error`/`except` template captured by the enclosing frame.
#[derive(Debug, Clone)]
pub struct CatchHandler {
    pub is_except: bool,
    /// Matched against the raised error's kind; `"*"` matches all.
    pub type_pat: CompactString,
    pub template: Option<Rc<VcmNode>>,
}

// =============================================================================
// Frame
// =============================================================================

/// One active program element.
pub struct Frame {
    pub pos: Rc<VdomElement>,
    pub ctxt: VerbCtxt,
    /// Evaluated attributes.
    pub attr_vars: VObject,
    /// Evaluated content, when the verb consumed a content child.
    pub ctnt_var: Variant,
    pub result_var: Variant,
    /// Iteration counter.
    pub idx: usize,
    pub silently: bool,
    pub next_step: NextStep,
    /// Cursor over `pos.children`.
    pub curr: usize,
    pub scope_vars: FxHashMap<CompactString, Variant>,
    pub handlers: Vec<CatchHandler>,
    pub continuation: Option<Continuation>,
    /// Bindings land in document scope under `<head>`.
    pub in_head: bool,
    /// Document element this frame materialized (foreign elements).
    pub doc_target: Option<NodeId>,
}

impl Frame {
    pub fn new(pos: Rc<VdomElement>, in_head: bool) -> Self {
        let silently = pos.has_attr("silently");
        Self {
            pos,
            ctxt: VerbCtxt::None,
            attr_vars: VObject::new(),
            ctnt_var: Variant::Undefined,
            result_var: Variant::Undefined,
            idx: 0,
            silently,
            next_step: NextStep::AfterPushed,
            curr: 0,
            scope_vars: FxHashMap::default(),
            handlers: Vec::new(),
            continuation: None,
            in_head,
            doc_target: None,
        }
    }

    pub fn verb(&self) -> VerbKind {
        self.pos.verb
    }

    /// Evaluated attribute by name.
    pub fn attr(&self, name: &str) -> Option<Variant> {
        self.attr_vars.get(name)
    }

    /// Evaluated attribute, stringified.
    pub fn attr_str(&self, name: &str) -> Option<String> {
        self.attr(name).map(|v| v.stringify())
    }
}

// =============================================================================
// Page binding
// =============================================================================

/// Renderer handles of the page a coroutine renders into.
#[derive(Debug, Clone)]
pub struct PageBinding {
    pub page_type: PageType,
    pub workspace: u64,
    pub page: u64,
    /// Set after `load`.
    pub dom: Option<u64>,
    /// Coroutine handle that suppressed our document, if any.
    pub suppressed_by: Option<u64>,
}

// =============================================================================
// Coroutine
// =============================================================================

/// One concurrent HVML execution.
pub struct Coroutine {
    pub id: usize,
    pub stage: Stage,
    pub root: Rc<VdomElement>,
    pub doc: TargetDoc,
    pub doc_scope: FxHashMap<CompactString, Variant>,
    pub stack: Vec<Frame>,
    pub timers: Timers,
    pub target: Option<PageBinding>,
    pub process_scope: ProcessScope,
    /// Last unhandled error, surfaced through the instance error channel.
    pub last_error: Option<RuntimeError>,
}

impl Coroutine {
    pub fn new(
        id: usize,
        root: Rc<VdomElement>,
        doc: TargetDoc,
        sink: EventSink,
        process_scope: ProcessScope,
    ) -> Self {
        let timers = Timers::install(sink);
        let mut doc_scope = FxHashMap::default();
        doc_scope.insert(CompactString::new(TIMERS_VAR_NAME), timers.variant());
        Self {
            id,
            stage: Stage::FirstRun,
            root,
            doc,
            doc_scope,
            stack: Vec::new(),
            timers,
            target: None,
            process_scope,
            last_error: None,
        }
    }

    /// Resolve a name against the scope chain: frame scopes
    /// innermost-first, then document scope, then process scope.
    pub fn resolve(&self, name: &str) -> Option<Variant> {
        for frame in self.stack.iter().rev() {
            if let Some(v) = frame.scope_vars.get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = self.doc_scope.get(name) {
            return Some(v.clone());
        }
        self.process_scope.borrow().get(name).cloned()
    }

    /// Bind a name into the enclosing scope. From `<head>`, or when the
    /// enclosing frame is a structural container (`hvml`/`head`/`body`),
    /// the binding has document lifetime and lands in document scope;
    /// otherwise it lives in the parent frame's scope.
    pub fn bind(&mut self, in_head: bool, name: &str, value: Variant) {
        let parent_verb = self
            .stack
            .len()
            .checked_sub(2)
            .map(|idx| self.stack[idx].verb());
        let structural = matches!(
            parent_verb,
            None | Some(VerbKind::Hvml) | Some(VerbKind::Head) | Some(VerbKind::Body)
        );
        if in_head || structural {
            self.doc_scope.insert(CompactString::new(name), value);
            return;
        }
        let parent = self.stack.len() - 2;
        self.stack[parent].scope_vars.insert(CompactString::new(name), value);
    }

    pub fn dom_handle(&self) -> Option<u64> {
        self.target.as_ref().and_then(|t| t.dom)
    }

    /// Whether renderer DOM mirroring is live (document already loaded).
    pub fn mirroring(&self) -> bool {
        self.stage == Stage::Observing && self.dom_handle().is_some()
    }
}

/// Adapter giving the expression evaluator the coroutine's scope chain.
pub struct CoroutineResolver<'a>(pub &'a Coroutine);

impl ScopeResolver for CoroutineResolver<'_> {
    fn resolve(&self, name: &str) -> Option<Variant> {
        self.0.resolve(name)
    }
}
