//! `<archetype name=…>`: bind template content to a name.
//!
//! The binding lands in the enclosing scope, or in document scope when
//! the archetype sits under `<head>`. With `src` present the content is
//! fetched asynchronously and parsed as JSON into a variant; the frame
//! yields until the body arrives. Binding happens after every content
//! child has been consumed.

use compact_str::CompactString;

use crate::error::ExecResult;

use super::super::coroutine::{ArchetypeCtxt, Continuation, Coroutine, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::require_attr;

pub(super) fn after_pushed(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let name = CompactString::from(require_attr(co, "name")?.stringify());
    let src = co.stack.last().expect("frame present").attr_str("src");

    let suspend = src.is_some();
    if let Some(uri) = &src {
        ctx.submit_fetch(co.id, uri.clone(), Continuation::ArchetypeSrc)?;
    }

    let frame = co.stack.last_mut().expect("frame present");
    frame.ctxt = VerbCtxt::Archetype(ArchetypeCtxt { name });
    if suspend {
        frame.continuation = Some(Continuation::ArchetypeSrc);
        return Ok(Flow::Suspend);
    }
    Ok(Flow::Continue)
}

pub(super) fn on_popping(co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<bool> {
    let (name, value, in_head) = {
        let frame = co.stack.last().expect("frame present");
        let VerbCtxt::Archetype(ac) = &frame.ctxt else {
            return Ok(true);
        };
        (ac.name.clone(), frame.ctnt_var.clone(), frame.in_head)
    };
    co.bind(in_head, &name, value.clone());
    co.stack.last_mut().expect("frame present").result_var = value;
    Ok(true)
}
