//! `<observe on=… for=…>`: register with the observer bus.
//!
//! Registration happens at first-run; the body never executes then. When
//! the coroutine is observing and a matching event arrives, the
//! scheduler re-pushes this element in delivery mode and the body runs
//! against a scope carrying the event payload.
//!
//! The `for` attribute is `"event"` or `"event:sub"`; an absent sub
//! matches every sub-name.

use crate::error::{ExecResult, RuntimeError};

use super::super::coroutine::{Coroutine, NextStep, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::require_attr;

pub(super) fn after_pushed(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let on = require_attr(co, "on")?;
    let for_attr = co
        .stack
        .last()
        .expect("frame present")
        .attr_str("for")
        .ok_or_else(|| RuntimeError::argument_missed("attribute 'for' of <observe>"))?;

    let (event, sub) = match for_attr.split_once(':') {
        Some((event, sub)) => (event.to_string(), sub.to_string()),
        None => (for_attr, "*".to_string()),
    };

    let handler = co.stack.last().expect("frame present").pos.clone();
    ctx.bus.observe(co.id, &on, event, sub, handler)?;

    let frame = co.stack.last_mut().expect("frame present");
    frame.ctxt = VerbCtxt::Observe;
    // The body is the handler; nothing to execute at registration time.
    frame.next_step = NextStep::OnPopping;
    Ok(Flow::Continue)
}

pub(super) fn on_popping(_co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<bool> {
    Ok(true)
}
