//! `<update on=… at=… to=… with=…|from=…>`: mutate a variant container
//! or a document element.
//!
//! The source is exactly one of: the evaluated `with` attribute, the
//! element's content, or the body fetched from `from` (async; the frame
//! yields and resumes with the parsed payload). `with` may carry a
//! combinator prefix (`+=`, `*=`, …) applied between the existing value
//! and the new one.
//!
//! Document-element mutations are mirrored to the renderer once the
//! page is loaded; attribute writes mirror as `update` requests carrying
//! the property name and a plain payload.

use compact_str::CompactString;

use crate::document::{AttrOp, NodeId};
use crate::error::{ExecResult, RuntimeError};
use crate::rdr::{DataType, RdrData, RdrOp};
use crate::variant::Variant;
use crate::vdom::AttrCombinator;

use super::super::coroutine::{Continuation, Coroutine, UpdateCtxt, VerbCtxt};
use super::super::{Flow, StepCtx};
use super::{mirror_dom, require_attr};

pub(super) fn after_pushed(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<Flow> {
    let on = require_attr(co, "on")?;

    let (to, at, with, from, combinator, tag) = {
        let frame = co.stack.last().expect("frame present");
        (
            CompactString::from(frame.attr_str("to").unwrap_or_else(|| "displace".to_string())),
            CompactString::from(frame.attr_str("at").unwrap_or_default()),
            frame.attr("with"),
            frame.attr_str("from"),
            frame.pos.find_attr("with").map(|a| a.combinator).unwrap_or_default(),
            frame.pos.tag.clone(),
        )
    };

    if with.is_some() && from.is_some() {
        return Err(RuntimeError::invalid_value(format!(
            "'with' and 'from' are exclusive on <{tag}>"
        )));
    }
    if from.is_some() && matches!(to.as_str(), "erase" | "clear") {
        return Err(RuntimeError::invalid_value(format!("'from' is forbidden with to={to}")));
    }

    // A string `on` addresses a document element (`#id`).
    let doc_target = resolve_doc_target(co, &on)?;

    let suspend = from.is_some();
    if let Some(uri) = &from {
        ctx.submit_fetch(co.id, uri.clone(), Continuation::UpdateFrom)?;
    }

    let frame = co.stack.last_mut().expect("frame present");
    frame.ctxt = VerbCtxt::Update(UpdateCtxt { on, doc_target, to, at, src: with, combinator });
    if suspend {
        frame.continuation = Some(Continuation::UpdateFrom);
        return Ok(Flow::Suspend);
    }
    Ok(Flow::Continue)
}

fn resolve_doc_target(co: &Coroutine, on: &Variant) -> ExecResult<Option<NodeId>> {
    let Some(selector) = on.as_str() else { return Ok(None) };
    let Some(id) = selector.strip_prefix('#') else { return Ok(None) };
    co.doc
        .elem_by_id(id)
        .map(Some)
        .ok_or_else(|| RuntimeError::not_exists(format!("document element '#{id}'")))
}

pub(super) fn on_popping(co: &mut Coroutine, ctx: &mut StepCtx) -> ExecResult<bool> {
    let (on, doc_target, to, at, src, combinator) = {
        let frame = co.stack.last().expect("frame present");
        let VerbCtxt::Update(uc) = &frame.ctxt else {
            return Ok(true);
        };
        // `erase`/`clear` take no source; everything else requires one.
        let src = match &uc.src {
            Some(src) => src.clone(),
            None if !frame.ctnt_var.is_undefined() => frame.ctnt_var.clone(),
            None if matches!(uc.to.as_str(), "erase" | "clear") => Variant::Undefined,
            None => {
                return Err(RuntimeError::argument_missed(format!(
                    "source ('with', 'from', or content) of <{}>",
                    frame.pos.tag
                )));
            }
        };
        (uc.on.clone(), uc.doc_target, uc.to.clone(), uc.at.clone(), src, uc.combinator)
    };

    match doc_target {
        Some(elem) => update_document(co, ctx, elem, &to, &at, &src, combinator)?,
        None => update_variant(&on, &to, &at, &src, combinator)?,
    }

    co.stack.last_mut().expect("frame present").result_var = src;
    Ok(true)
}

// =============================================================================
// Variant targets
// =============================================================================

fn update_variant(
    on: &Variant,
    to: &str,
    at: &str,
    src: &Variant,
    combinator: AttrCombinator,
) -> ExecResult<()> {
    match on {
        Variant::Object(obj) => match to {
            "merge" => match src {
                Variant::Object(incoming) => obj.merge_another(incoming, true),
                other => Err(RuntimeError::invalid_value(format!(
                    "merge source must be an object, got {}",
                    other.kind_name()
                ))),
            },
            "displace" => {
                if at.is_empty() {
                    // Root displacement replaces the whole membership.
                    match src {
                        Variant::Object(incoming) => obj.displace(incoming.entries()),
                        other => Err(RuntimeError::invalid_value(format!(
                            "displace source must be an object, got {}",
                            other.kind_name()
                        ))),
                    }
                } else {
                    // `at=".key"` addresses one member.
                    let key = at.trim_start_matches('.');
                    let combined = apply_combinator(obj.get(key), src.clone(), combinator);
                    obj.set(key, combined)
                }
            }
            other => Err(RuntimeError::NotSupported(format!("update object with to={other}"))),
        },

        Variant::Array(arr) => match to {
            "append" => arr.append(src.clone()),
            "displace" => arr.displace(src.members_or_self()),
            other => Err(RuntimeError::NotSupported(format!("update array with to={other}"))),
        },

        Variant::Set(set) => match to {
            "displace" => set.displace(src.members_or_self()),
            "unite" => set.unite(src),
            "overwrite" => set.overwrite(src),
            other => Err(RuntimeError::NotSupported(format!("update set with to={other}"))),
        },

        other => Err(RuntimeError::invalid_value(format!(
            "update target must be a container or element, got {}",
            other.kind_name()
        ))),
    }
}

// =============================================================================
// Document targets
// =============================================================================

fn update_document(
    co: &mut Coroutine,
    ctx: &mut StepCtx,
    elem: NodeId,
    to: &str,
    at: &str,
    src: &Variant,
    combinator: AttrCombinator,
) -> ExecResult<()> {
    if at == "textContent" {
        let text = src.stringify();
        co.doc.set_text_content(elem, &text)?;
        return mirror_dom(
            co,
            ctx,
            RdrOp::Update,
            elem.handle(),
            Some("textContent"),
            RdrData::Text { ty: DataType::Plain, content: text },
        );
    }

    if let Some(name) = at.strip_prefix("attr.") {
        if to == "erase" {
            co.doc.set_attribute(elem, AttrOp::Erase, name, None)?;
            return mirror_dom(co, ctx, RdrOp::Erase, elem.handle(), Some(name), RdrData::Void);
        }
        let existing = co.doc.attribute(elem, name).map(|v| Variant::string(v.as_str()));
        let value = apply_combinator(existing, src.clone(), combinator).stringify();
        co.doc.set_attribute(elem, AttrOp::Update, name, Some(&value))?;
        // Attribute displacement mirrors as an `update` request.
        return mirror_dom(
            co,
            ctx,
            RdrOp::Update,
            elem.handle(),
            Some(name),
            RdrData::Text { ty: DataType::Plain, content: value },
        );
    }

    if !at.is_empty() {
        return Err(RuntimeError::invalid_value(format!("selector '{at}' on a document target")));
    }

    let markup = src.stringify();
    let content_type = DataType::from_content_type(co.doc.class().content_type);
    match to {
        "append" => {
            let node = co.doc.new_content(elem, &markup)?;
            mirror_dom(
                co,
                ctx,
                RdrOp::Append,
                node.handle(),
                None,
                RdrData::Text { ty: content_type, content: markup },
            )
        }
        "displace" => {
            co.doc.clear_element(elem)?;
            let node = co.doc.new_content(elem, &markup)?;
            mirror_dom(
                co,
                ctx,
                RdrOp::Displace,
                node.handle(),
                None,
                RdrData::Text { ty: content_type, content: markup },
            )
        }
        "clear" => {
            co.doc.clear_element(elem)?;
            mirror_dom(co, ctx, RdrOp::Clear, elem.handle(), None, RdrData::Void)
        }
        "erase" => {
            let handle = elem.handle();
            co.doc.erase_element(elem)?;
            mirror_dom(co, ctx, RdrOp::Erase, handle, None, RdrData::Void)
        }
        other => Err(RuntimeError::NotSupported(format!("update element with to={other}"))),
    }
}

// =============================================================================
// Combinators
// =============================================================================

/// Combine the existing value with the incoming one. `+=` concatenates
/// strings and adds numbers; the other operators are numeric.
fn apply_combinator(
    existing: Option<Variant>,
    incoming: Variant,
    combinator: AttrCombinator,
) -> Variant {
    let Some(existing) = existing else { return incoming };
    match combinator {
        AttrCombinator::Assign => incoming,
        AttrCombinator::Add => {
            let strings = existing.as_str().is_some() || incoming.as_str().is_some();
            if strings {
                Variant::string(format!("{}{}", existing.stringify(), incoming.stringify()))
            } else {
                Variant::Number(existing.numberify() + incoming.numberify())
            }
        }
        AttrCombinator::Sub => Variant::Number(existing.numberify() - incoming.numberify()),
        AttrCombinator::Mul => Variant::Number(existing.numberify() * incoming.numberify()),
        AttrCombinator::Div => Variant::Number(existing.numberify() / incoming.numberify()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_combinator() {
        let sum = apply_combinator(
            Some(Variant::Number(2.0)),
            Variant::Number(3.0),
            AttrCombinator::Add,
        );
        assert_eq!(sum, Variant::Number(5.0));

        let cat = apply_combinator(
            Some(Variant::string("a")),
            Variant::string("b"),
            AttrCombinator::Add,
        );
        assert_eq!(cat, Variant::string("ab"));

        let product = apply_combinator(
            Some(Variant::Number(4.0)),
            Variant::Number(2.5),
            AttrCombinator::Mul,
        );
        assert_eq!(product, Variant::Number(10.0));

        assert_eq!(
            apply_combinator(None, Variant::LongInt(1), AttrCombinator::Add),
            Variant::LongInt(1)
        );
    }

    #[test]
    fn test_update_variant_object_member() {
        let obj = crate::variant::VObject::new();
        obj.set("count", Variant::Number(1.0)).unwrap();
        let target = Variant::Object(obj.clone());
        update_variant(&target, "displace", ".count", &Variant::Number(2.0), AttrCombinator::Add)
            .unwrap();
        assert_eq!(obj.get("count"), Some(Variant::Number(3.0)));
    }

    #[test]
    fn test_update_variant_set_unite() {
        let set = crate::variant::VSet::new(crate::variant::UniqKey::by_prop("id"));
        let target = Variant::Set(set.clone());
        let member = crate::variant::VObject::new();
        member.set("id", Variant::string("a")).unwrap();
        let batch = Variant::array_from(vec![Variant::Object(member)]);
        update_variant(&target, "unite", "", &batch, AttrCombinator::Assign).unwrap();
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn test_displace_is_idempotent() {
        let obj = crate::variant::VObject::new();
        obj.set("old", Variant::Null).unwrap();
        let target = Variant::Object(obj.clone());

        let fresh = crate::variant::VObject::new();
        fresh.set("k", Variant::LongInt(1)).unwrap();
        let src = Variant::Object(fresh);

        update_variant(&target, "displace", "", &src, AttrCombinator::Assign).unwrap();
        let once = obj.entries();
        update_variant(&target, "displace", "", &src, AttrCombinator::Assign).unwrap();
        assert_eq!(obj.entries(), once);
        assert!(!obj.contains_key("old"));
    }

    #[test]
    fn test_update_scalar_target_rejected() {
        let err = update_variant(
            &Variant::LongInt(1),
            "displace",
            "",
            &Variant::Null,
            AttrCombinator::Assign,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid-value");
    }
}
