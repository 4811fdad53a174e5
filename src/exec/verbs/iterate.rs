//! `<iterate on=… by=… onlyif=…>`: run the body once per executor step.
//!
//! The `by` rule selects the executor plugin (default `RANGE: FROM 0`).
//! The body sees the current item as `$?`; `frame.idx` counts the
//! iteration. `on_popping` asks the executor for the next item and
//! requests a re-run while one exists; `onlyif`, when present, is
//! re-evaluated per step and ends the iteration on false.

use compact_str::CompactString;

use crate::error::ExecResult;
use crate::variant::Variant;
use crate::vcm::VcmNode;

use super::super::coroutine::{Coroutine, IterateCtxt, NextStep, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::{eval_vcm, require_attr};

const DEFAULT_RULE: &str = "RANGE: FROM 0";

pub(super) fn after_pushed(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let on = require_attr(co, "on")?;
    let (rule, onlyif) = {
        let frame = co.stack.last().expect("frame present");
        let rule = frame.attr_str("by").unwrap_or_else(|| DEFAULT_RULE.to_string());
        let onlyif = frame.pos.find_attr("onlyif").map(|a| a.value.clone());
        (rule, onlyif)
    };

    let mut exec = ctx.executors.instantiate(&rule, on)?;
    let alive = exec.it_begin(&rule)?;
    let first = if alive { exec.it_value()? } else { Variant::Undefined };

    {
        let frame = co.stack.last_mut().expect("frame present");
        frame.ctxt = VerbCtxt::Iterate(IterateCtxt {
            exec: Some(exec),
            rule,
            onlyif: onlyif.clone(),
            alive,
        });
        if alive {
            frame.result_var = first.clone();
            frame.scope_vars.insert(CompactString::new("?"), first);
        } else {
            frame.next_step = NextStep::OnPopping;
        }
    }

    if alive && !onlyif_holds(co, onlyif.as_ref())? {
        let frame = co.stack.last_mut().expect("frame present");
        if let VerbCtxt::Iterate(c) = &mut frame.ctxt {
            c.alive = false;
        }
        frame.next_step = NextStep::OnPopping;
    }
    Ok(Flow::Continue)
}

pub(super) fn on_popping(co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<bool> {
    let frame = co.stack.last_mut().expect("frame present");
    let VerbCtxt::Iterate(c) = &mut frame.ctxt else {
        return Ok(true);
    };
    if !c.alive {
        return Ok(true);
    }
    let exec = c.exec.as_mut().expect("live iteration has an executor");
    let more = match exec.it_next(None) {
        Ok(more) => more,
        // An exhausted iterator position is the normal end.
        Err(err) if err.kind() == "not-exists" => false,
        Err(err) => return Err(err),
    };
    if !more {
        c.alive = false;
        return Ok(true);
    }
    Ok(false)
}

pub(super) fn rerun(co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<Flow> {
    let (value, onlyif) = {
        let frame = co.stack.last_mut().expect("frame present");
        frame.idx += 1;
        let VerbCtxt::Iterate(c) = &mut frame.ctxt else {
            return Ok(Flow::Continue);
        };
        let value = c.exec.as_mut().expect("live iteration has an executor").it_value()?;
        (value, c.onlyif.clone())
    };

    {
        let frame = co.stack.last_mut().expect("frame present");
        frame.result_var = value.clone();
        frame.scope_vars.insert(CompactString::new("?"), value);
        frame.ctnt_var = Variant::Undefined;
        frame.curr = 0;
        frame.next_step = NextStep::SelectChild;
    }

    if !onlyif_holds(co, onlyif.as_ref())? {
        let frame = co.stack.last_mut().expect("frame present");
        if let VerbCtxt::Iterate(c) = &mut frame.ctxt {
            c.alive = false;
        }
        frame.next_step = NextStep::OnPopping;
    }
    Ok(Flow::Continue)
}

fn onlyif_holds(co: &Coroutine, onlyif: Option<&VcmNode>) -> ExecResult<bool> {
    match onlyif {
        None => Ok(true),
        Some(vcm) => Ok(eval_vcm(co, vcm)?.booleanize()),
    }
}
