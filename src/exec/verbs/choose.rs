//! `<choose on=…>`: evaluate a value into the result variable.
//!
//! Children execute with the chosen value bound as `$?`. The chosen
//! value is also the verb's result, unless an `error`/`except` handler
//! replaced it.

use compact_str::CompactString;

use crate::error::ExecResult;

use super::super::coroutine::{Coroutine, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::require_attr;

pub(super) fn after_pushed(co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<Flow> {
    let on = require_attr(co, "on")?;
    let frame = co.stack.last_mut().expect("frame present");
    frame.ctxt = VerbCtxt::Choose;
    frame.result_var = on.clone();
    frame.scope_vars.insert(CompactString::new("?"), on);
    Ok(Flow::Continue)
}

pub(super) fn on_popping(_co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<bool> {
    Ok(true)
}
