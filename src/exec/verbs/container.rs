//! `<hvml>`, `<head>`, `<body>`: structural containers.
//!
//! They carry no verb semantics of their own; their job is scoping
//! (bindings made under `<head>` land in document scope) and child
//! traversal, which the generic driver already provides.

use crate::error::ExecResult;

use super::super::coroutine::Coroutine;
use super::super::{Flow, StepCtx};

pub(super) fn after_pushed(_co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<Flow> {
    Ok(Flow::Continue)
}
