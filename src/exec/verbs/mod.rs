//! Per-element operation sets and the frame driver.
//!
//! Each program element is driven through the same four-step protocol:
//! `after_pushed` (allocate verb state, evaluate attributes, start side
//! effects), repeated `select_child` (descend into child elements,
//! consume content inline, skip comments), `on_popping` (true pops the
//! frame, false requests a re-run), and `rerun` (advance iteration
//! state). The driver walks the stack until it drains or a verb yields
//! on I/O.
//!
//! A raised error walks up the frame stack to the nearest matching
//! `error`/`except` handler; the handler's template becomes the verb's
//! result and execution resumes at that frame's popping step.

mod archetype;
mod choose;
mod container;
mod foreign;
mod iterate;
mod observe;
mod update;

use std::rc::Rc;

use compact_str::CompactString;
use tracing::trace;

use crate::error::{ExecResult, RuntimeError};
use crate::rdr::{RdrData, RdrOp};
use crate::variant::Variant;
use crate::vcm::{EvalCtx, VcmNode};
use crate::vdom::{VdomElement, VdomNode, VerbKind};

use super::coroutine::{
    CatchHandler, Coroutine, CoroutineResolver, Frame, NextStep, VerbCtxt,
};
use super::{Flow, RunOutcome, StepCtx};

// =============================================================================
// Driver
// =============================================================================

/// Drive `co` until its stack drains or a frame suspends. Unhandled
/// errors propagate to the caller (coroutine teardown).
pub(crate) fn advance(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<RunOutcome> {
    loop {
        if co.stack.is_empty() {
            return Ok(RunOutcome::Finished);
        }
        let step = co.stack.last().expect("stack checked non-empty").next_step;
        let flow = match step {
            NextStep::AfterPushed => after_pushed_step(co, ctx),
            NextStep::SelectChild => select_child_step(co, ctx),
            NextStep::OnPopping => on_popping_step(co, ctx),
            NextStep::Rerun => rerun_step(co, ctx),
        };
        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Suspend) => return Ok(RunOutcome::Suspended),
            Err(err) => handle_error(co, err)?,
        }
    }
}

/// Push a frame for a child element, inheriting head-ness.
pub(crate) fn push_frame(co: &mut Coroutine, pos: Rc<VdomElement>) {
    let in_head = co
        .stack
        .last()
        .map(|f| f.in_head || f.verb() == VerbKind::Head)
        .unwrap_or(false)
        || pos.verb == VerbKind::Head;
    trace!(tag = %pos.tag, "push frame");
    co.stack.push(Frame::new(pos, in_head));
}

fn after_pushed_step(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    // Handlers first: an error raised while evaluating this element's
    // own attributes must already find them.
    collect_handlers(co)?;
    eval_attrs(co)?;

    let verb = co.stack.last().expect("frame present").verb();
    let flow = match verb {
        VerbKind::Hvml | VerbKind::Head | VerbKind::Body => container::after_pushed(co, ctx)?,
        VerbKind::Choose => choose::after_pushed(co, ctx)?,
        VerbKind::Iterate => iterate::after_pushed(co, ctx)?,
        VerbKind::Update => update::after_pushed(co, ctx)?,
        VerbKind::Archetype => archetype::after_pushed(co, ctx)?,
        VerbKind::Observe => observe::after_pushed(co, ctx)?,
        VerbKind::Foreign => foreign::after_pushed(co, ctx)?,
        // Handler subtrees are captured by their parent; a stray one
        // pops with no effect.
        VerbKind::Error | VerbKind::Except => {
            co.stack.last_mut().expect("frame present").next_step = NextStep::OnPopping;
            return Ok(Flow::Continue);
        }
    };

    if flow == Flow::Continue {
        let frame = co.stack.last_mut().expect("frame present");
        if frame.next_step == NextStep::AfterPushed {
            frame.next_step = NextStep::SelectChild;
        }
    }
    Ok(flow)
}

fn select_child_step(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let (pos, curr) = {
        let frame = co.stack.last().expect("frame present");
        (frame.pos.clone(), frame.curr)
    };

    match pos.children.get(curr) {
        None => {
            co.stack.last_mut().expect("frame present").next_step = NextStep::OnPopping;
        }
        Some(VdomNode::Element(child)) => {
            co.stack.last_mut().expect("frame present").curr += 1;
            if !child.verb.is_handler() {
                push_frame(co, child.clone());
            }
        }
        Some(VdomNode::Content(vcm)) => {
            co.stack.last_mut().expect("frame present").curr += 1;
            on_content(co, ctx, vcm.clone())?;
        }
        Some(VdomNode::Comment(_)) => {
            co.stack.last_mut().expect("frame present").curr += 1;
        }
        Some(VdomNode::Document) => {
            return Err(RuntimeError::not_implemented(format!(
                "document node as a child of <{}>",
                pos.tag
            )));
        }
    }
    Ok(Flow::Continue)
}

fn on_content(co: &mut Coroutine, ctx: &mut StepCtx, vcm: Rc<VcmNode>) -> ExecResult<()> {
    let verb = co.stack.last().expect("frame present").verb();
    match verb {
        VerbKind::Foreign => foreign::on_content(co, ctx, &vcm),
        _ => {
            let value = eval_vcm(co, &vcm)?;
            co.stack.last_mut().expect("frame present").ctnt_var = value;
            Ok(())
        }
    }
}

fn on_popping_step(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let verb = co.stack.last().expect("frame present").verb();
    let pop = match verb {
        VerbKind::Iterate => iterate::on_popping(co, ctx)?,
        VerbKind::Update => update::on_popping(co, ctx)?,
        VerbKind::Archetype => archetype::on_popping(co, ctx)?,
        VerbKind::Observe => observe::on_popping(co, ctx)?,
        VerbKind::Choose => choose::on_popping(co, ctx)?,
        VerbKind::Foreign => foreign::on_popping(co, ctx)?,
        _ => true,
    };

    if pop {
        let (result, as_name, in_head) = {
            let frame = co.stack.last().expect("frame present");
            (frame.result_var.clone(), frame.attr_str("as"), frame.in_head)
        };
        if let Some(name) = &as_name {
            co.bind(in_head, name, result.clone());
        }
        let frame = co.stack.pop().expect("frame present");
        trace!(tag = %frame.pos.tag, "pop frame");
        if let Some(parent) = co.stack.last_mut() {
            parent.scope_vars.insert(CompactString::new("?"), result);
        }
    } else {
        co.stack.last_mut().expect("frame present").next_step = NextStep::Rerun;
    }
    Ok(Flow::Continue)
}

fn rerun_step(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let verb = co.stack.last().expect("frame present").verb();
    match verb {
        VerbKind::Iterate => iterate::rerun(co, ctx),
        other => Err(RuntimeError::not_implemented(format!("rerun of <{other:?}>"))),
    }
}

// =============================================================================
// Error search
// =============================================================================

/// Walk toward the nearest matching `error`/`except` handler. The
/// handler's template becomes the owning frame's result; with no match
/// the error propagates to teardown.
pub(crate) fn handle_error(co: &mut Coroutine, err: RuntimeError) -> ExecResult<()> {
    let mut found: Option<(usize, Option<Rc<VcmNode>>)> = None;
    for i in (0..co.stack.len()).rev() {
        if let Some(handler) = co.stack[i].handlers.iter().find(|h| err.matches(&h.type_pat)) {
            found = Some((i, handler.template.clone()));
            break;
        }
    }
    let Some((frame_idx, template)) = found else {
        return Err(err);
    };
    trace!(kind = err.kind(), frame = frame_idx, "error caught by handler");

    co.stack.truncate(frame_idx + 1);
    // The handler template sees the exception as $!.
    co.stack[frame_idx]
        .scope_vars
        .insert(CompactString::new("!"), Variant::from_error(&err));

    let value = match template {
        Some(template) => {
            let resolver = CoroutineResolver(&*co);
            EvalCtx::silently(&resolver).eval(&template)?
        }
        None => Variant::from_error(&err),
    };

    let frame = co.stack.last_mut().expect("truncated to handler frame");
    frame.result_var = value;
    // A caught error ends the verb's own iteration/evaluation outright.
    frame.ctxt = VerbCtxt::None;
    frame.next_step = NextStep::OnPopping;
    Ok(())
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Evaluate an expression against the coroutine's scope chain, honoring
/// the top frame's `silently`.
pub(crate) fn eval_vcm(co: &Coroutine, vcm: &VcmNode) -> ExecResult<Variant> {
    let silently = co.stack.last().map(|f| f.silently).unwrap_or(false);
    let resolver = CoroutineResolver(co);
    EvalCtx { scope: &resolver, silently }.eval(vcm)
}

/// Evaluate every attribute of the top frame's element into `attr_vars`.
///
/// All attributes are attempted even when one fails, so a handler that
/// catches the error still sees the rest (`as`, `type`, …); the first
/// failure is raised afterwards. `onlyif` stays unevaluated here — the
/// iterate verb re-evaluates it per step against `$?`.
fn eval_attrs(co: &mut Coroutine) -> ExecResult<()> {
    let (pos, silently) = {
        let frame = co.stack.last().expect("frame present");
        (frame.pos.clone(), frame.silently)
    };
    let mut values: Vec<(CompactString, Variant)> = Vec::with_capacity(pos.attrs.len());
    let mut first_err = None;
    for attr in &pos.attrs {
        if attr.name == "silently" || attr.name == "onlyif" {
            continue;
        }
        let resolver = CoroutineResolver(&*co);
        match (EvalCtx { scope: &resolver, silently }).eval(&attr.value) {
            Ok(value) => values.push((attr.name.clone(), value)),
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    let frame = co.stack.last_mut().expect("frame present");
    for (name, value) in values {
        frame.attr_vars.set(name, value)?;
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Capture the `error`/`except` children of the top frame's element.
fn collect_handlers(co: &mut Coroutine) -> ExecResult<()> {
    let pos = co.stack.last().expect("frame present").pos.clone();
    let mut handlers = Vec::new();
    for child in pos.handler_children() {
        let type_pat = match child.find_attr("type") {
            Some(attr) => {
                let resolver = CoroutineResolver(&*co);
                let value = EvalCtx::silently(&resolver).eval(&attr.value)?;
                CompactString::from(value.stringify())
            }
            None => CompactString::new("*"),
        };
        // Handler bodies hold template content; element children inside
        // them are an unfinished path and must not pass silently.
        let mut template = None;
        for grandchild in &child.children {
            match grandchild {
                VdomNode::Content(vcm) => {
                    if template.is_none() {
                        template = Some(vcm.clone());
                    }
                }
                VdomNode::Element(elem) => {
                    return Err(RuntimeError::not_implemented(format!(
                        "element <{}> inside <{}> handler body",
                        elem.tag, child.tag
                    )));
                }
                VdomNode::Document => {
                    return Err(RuntimeError::not_implemented(format!(
                        "document node inside <{}> handler body",
                        child.tag
                    )));
                }
                VdomNode::Comment(_) => {}
            }
        }
        handlers.push(CatchHandler {
            is_except: child.verb == VerbKind::Except,
            type_pat,
            template,
        });
    }
    co.stack.last_mut().expect("frame present").handlers = handlers;
    Ok(())
}

/// A required attribute, or `argument-missed`.
pub(crate) fn require_attr(co: &Coroutine, name: &str) -> ExecResult<Variant> {
    let frame = co.stack.last().expect("frame present");
    frame.attr(name).ok_or_else(|| {
        RuntimeError::ArgumentMissed(format!("attribute '{name}' of <{}>", frame.pos.tag))
    })
}

/// The document element enclosing the top frame: the nearest frame that
/// materialized one, the document `head` for frames under `<head>`, or
/// the document's content root.
pub(crate) fn enclosing_doc_target(co: &Coroutine) -> crate::document::NodeId {
    if let Some(id) = co.stack.iter().rev().find_map(|f| f.doc_target) {
        return id;
    }
    let in_head = co.stack.last().map(|f| f.in_head).unwrap_or(false);
    if in_head {
        if let Some(head) = co.doc.head() {
            return head;
        }
    }
    co.doc.content_root()
}

/// Mirror one document mutation to the renderer, if mirroring is live.
/// Move-buffer transports receive the affected element by reference
/// instead of a serialized payload.
pub(crate) fn mirror_dom(
    co: &Coroutine,
    ctx: &mut StepCtx,
    op: RdrOp,
    element: u64,
    property: Option<&str>,
    data: RdrData,
) -> ExecResult<()> {
    if !co.mirroring() {
        return Ok(());
    }
    let Some(rdr) = ctx.rdr.as_deref_mut() else {
        return Ok(());
    };
    let dom = co.dom_handle().expect("mirroring implies a dom handle");
    let data = if rdr.is_move_buffer() { RdrData::EntityRef(element) } else { data };
    rdr.dom_request(dom, op, element, property, data, true)?;
    Ok(())
}
