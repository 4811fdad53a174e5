//! Foreign elements: tags outside the verb table materialize elements
//! of the target document.
//!
//! Attributes evaluate to strings and land on the created element in
//! order; content children become text nodes. When the page is already
//! loaded (a handler building content while observing), the completed
//! subtree is mirrored to the renderer as an `append` on the parent.

use crate::document::{AttrOp, DocOp};
use crate::error::ExecResult;
use crate::rdr::{DataType, RdrData, RdrOp};
use crate::vcm::VcmNode;

use super::super::coroutine::{Coroutine, ForeignCtxt, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::{enclosing_doc_target, eval_vcm, mirror_dom};

pub(super) fn after_pushed(co: &mut Coroutine, _ctx: &mut StepCtx) -> ExecResult<Flow> {
    let parent = enclosing_doc_target(co);
    let (tag, attrs) = {
        let frame = co.stack.last().expect("frame present");
        (frame.pos.tag.clone(), frame.attr_vars.entries())
    };

    let elem = co.doc.operate_element(parent, DocOp::Append, &tag)?;
    // Correlate the node with its renderer-side entity.
    let handle = elem.handle();
    co.doc.set_user_data(elem, handle);
    for (name, value) in attrs {
        let value = value.stringify();
        co.doc.set_attribute(elem, AttrOp::Update, &name, Some(&value))?;
    }

    let frame = co.stack.last_mut().expect("frame present");
    frame.ctxt = VerbCtxt::Foreign(ForeignCtxt { elem });
    frame.doc_target = Some(elem);
    Ok(Flow::Continue)
}

pub(super) fn on_content(
    co: &mut Coroutine,
    _ctx: &mut StepCtx,
    vcm: &VcmNode,
) -> ExecResult<()> {
    let value = eval_vcm(co, vcm)?;
    let elem = {
        let frame = co.stack.last().expect("frame present");
        let VerbCtxt::Foreign(fc) = &frame.ctxt else { return Ok(()) };
        fc.elem
    };
    let text = value.stringify();
    co.doc.append_text(elem, &text)?;
    co.stack.last_mut().expect("frame present").ctnt_var = value;
    Ok(())
}

pub(super) fn on_popping(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<bool> {
    let elem = {
        let frame = co.stack.last().expect("frame present");
        match &frame.ctxt {
            VerbCtxt::Foreign(fc) => fc.elem,
            _ => return Ok(true),
        }
    };
    if co.mirroring() {
        let markup = co.doc.serialize_node(elem, Default::default());
        let content_type = DataType::from_content_type(co.doc.class().content_type);
        mirror_dom(
            co,
            ctx,
            RdrOp::Append,
            elem.handle(),
            None,
            RdrData::Text { ty: content_type, content: markup },
        )?;
    }
    Ok(true)
}
