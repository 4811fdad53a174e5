//! HVML Interpretation Runtime
//!
//! An HVML program is an XML-like tree whose elements are executable
//! verbs (`choose`, `iterate`, `update`, `archetype`, `observe`, …)
//! operating over a dynamically typed value system and producing a
//! *target document* that is continuously reconciled with an external
//! renderer. This crate is the interpretation runtime for such programs:
//!
//! ## Core Modules
//! - `variant`: refcounted dynamic values with structural listeners
//! - `document`: the polymorphic target markup tree (html/xml/xgml/
//!   plain/void) with insertion operators and serialization
//! - `vcm`: the expression sub-language evaluated against scope chains
//! - `vdom`: the program tree handed over by the tokenizer
//! - `exec`: per-element state machines, the frame stack, and the
//!   cooperative instance scheduler
//!
//! ## Satellite Modules
//! - `executors`: iterate plugins (`RANGE`, `MUL`, `SQL`)
//! - `timers`: the `$TIMERS` facility
//! - `observer`: the (source, event, sub) observation bus
//! - `fetcher`: the async load seam
//! - `rdr`: the renderer protocol client (sessions, pages, streaming,
//!   DOM mirroring)
//! - `error`: the runtime error taxonomy
//!
//! # Usage
//!
//! ```
//! use hvml_runtime::exec::Instance;
//! use hvml_runtime::document::DocType;
//! use hvml_runtime::fetcher::StaticFetcher;
//! use hvml_runtime::vcm::VcmNode;
//! use hvml_runtime::vdom::{program, VdomElement};
//!
//! // <choose on=[1,2,3] as="picked"/>
//! let prog = program(vec![VdomElement::new("choose")
//!     .attr("on", VcmNode::Array(vec![
//!         VcmNode::LongInt(1),
//!         VcmNode::LongInt(2),
//!         VcmNode::LongInt(3),
//!     ]))
//!     .attr_str("as", "picked")]);
//!
//! let mut instance = Instance::new(Box::new(StaticFetcher::new()));
//! let co = instance.spawn(prog, DocType::Html);
//! instance.run_until_idle();
//! assert!(instance.coroutine(co).unwrap().resolve("picked").is_some());
//! ```

pub mod atom;
pub mod document;
pub mod error;
pub mod exec;
pub mod executors;
pub mod fetcher;
pub mod observer;
pub mod rdr;
pub mod timers;
pub mod variant;
pub mod vcm;
pub mod vdom;

// =============================================================================
// Re-exports for public API
// =============================================================================

pub use atom::Atom;
pub use error::{ExecResult, RuntimeError};

pub use variant::{ListenerHandle, ListenerOp, UniqKey, VArray, VObject, VSet, VTuple, Variant};

pub use document::{
    AttrOp, ClassCaps, DocOp, DocType, Namespace, NodeId, NodeKind, SerializeOpts, TargetDoc,
};

pub use vcm::{EvalCtx, ScopeResolver, VcmNode};
pub use vdom::{program, AttrCombinator, VdomAttr, VdomElement, VdomNode, VerbKind};

pub use exec::{Coroutine, Frame, Instance, PageSpec, Stage};
pub use executors::{Executor, ExecutorRegistry};
pub use fetcher::{FetchCompletion, FetchRequest, Fetcher, StaticFetcher};
pub use observer::{ObserverBus, RawEvent};
pub use rdr::{
    PageType, RdrConfig, RdrData, RdrOp, RdrRequest, RdrResponse, RendererSession, SessionIdent,
};
pub use timers::{Timers, TIMERS_VAR_NAME};
