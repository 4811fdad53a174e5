//! End-to-end scenarios: whole programs driven through an instance.

use std::time::{Duration, Instant};

use hvml_runtime::document::DocType;
use hvml_runtime::exec::{Instance, PageSpec};
use hvml_runtime::fetcher::StaticFetcher;
use hvml_runtime::rdr::{
    DataType, ElementType, RdrConfig, RdrData, RdrOp, RendererSession, SessionIdent,
    SharedRecording,
};
use hvml_runtime::variant::{json, Variant};
use hvml_runtime::vcm::VcmNode;
use hvml_runtime::vdom::{program, VdomElement};
use hvml_runtime::TargetDoc;

fn headless() -> Instance {
    Instance::new(Box::new(StaticFetcher::new()))
}

fn ident() -> SessionIdent {
    SessionIdent {
        host_name: "localhost".into(),
        app_name: "test.scenarios".into(),
        runner_name: "main".into(),
    }
}

fn timer_member(id: &str, interval: i64, active: &str) -> VcmNode {
    VcmNode::Object(vec![
        VcmNode::string("id"),
        VcmNode::string(id),
        VcmNode::string("interval"),
        VcmNode::LongInt(interval),
        VcmNode::string("active"),
        VcmNode::string(active),
    ])
}

/// `<update on=$TIMERS to=unite>[{"id":"clock","interval":1000,"active":"yes"}]</update>`
/// materializes a timer in the runtime table and fires `expired`.
#[test]
fn timers_materialize_from_update() {
    let prog = program(vec![
        VdomElement::new("update")
            .attr("on", VcmNode::get_var("TIMERS"))
            .attr_str("to", "unite")
            .content(VcmNode::Array(vec![timer_member("clock", 1000, "yes")])),
        VdomElement::new("observe")
            .attr("on", VcmNode::get_var("TIMERS"))
            .attr_str("for", "expired:clock")
            .child(VdomElement::new("em").text("tick")),
    ]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    let entry = instance
        .coroutine(co)
        .unwrap()
        .timers
        .entry("clock")
        .expect("timer exists in the runtime table");
    assert_eq!(entry.interval, Duration::from_millis(1000));
    assert!(entry.active);

    // Advance past the interval: the expired event reaches the observer
    // body, which materializes <em>tick</em>.
    let fired = instance.poll_timers_at(Instant::now() + Duration::from_millis(1500));
    assert_eq!(fired, 1);
    instance.run_until_idle();

    let co_ref = instance.coroutine(co).unwrap();
    let body = co_ref.doc.body().unwrap();
    let em = co_ref
        .doc
        .children(body)
        .iter()
        .copied()
        .find(|&n| co_ref.doc.node(n).map(|node| node.tag == "em").unwrap_or(false))
        .expect("observer body ran");
    assert_eq!(co_ref.doc.text_content(em), "tick");
    assert!(instance.errors().is_empty());
}

/// `<archetype name="T" src="file://a.json">` under `<head>` binds `T`
/// to the parsed JSON in document scope.
#[test]
fn archetype_binds_fetched_json() {
    let body = r#"{"kind":"greeting","words":["hi","there"]}"#;
    let mut fetcher = StaticFetcher::new();
    fetcher.insert("file://a.json", body.as_bytes().to_vec());

    let prog = VdomElement::new("hvml")
        .child(
            VdomElement::new("head").child(
                VdomElement::new("archetype")
                    .attr_str("name", "T")
                    .attr_str("src", "file://a.json"),
            ),
        )
        .child(VdomElement::new("body"))
        .into_rc();

    let mut instance = Instance::new(Box::new(fetcher));
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    let bound = instance.coroutine(co).unwrap().resolve("T").expect("T bound in document scope");
    assert_eq!(bound, json::parse(body).unwrap());
    assert!(instance.errors().is_empty());
}

/// A 404 on `src` surfaces `no-data`; a matching `except` swallows it,
/// and without one the error reaches the instance error channel.
#[test]
fn archetype_missing_src_propagates_no_data() {
    let caught = VdomElement::new("hvml")
        .child(VdomElement::new("body").child(
            VdomElement::new("archetype").attr_str("name", "T").attr_str("src", "file://nope").child(
                VdomElement::new("except").attr_str("type", "no-data").text("fb"),
            ),
        ))
        .into_rc();

    let mut instance = headless();
    let co = instance.spawn(caught, DocType::Html);
    instance.run_until_idle();
    assert!(instance.errors().is_empty(), "handled error must not propagate");
    assert!(instance.coroutine(co).is_some());

    let unhandled = program(vec![
        VdomElement::new("archetype").attr_str("name", "T").attr_str("src", "file://nope"),
    ]);
    let mut instance = headless();
    let co = instance.spawn(unhandled, DocType::Html);
    instance.run_until_idle();
    assert_eq!(instance.errors().len(), 1);
    assert_eq!(instance.errors()[0].1.kind(), "no-data");
    assert!(instance.coroutine(co).is_none(), "unhandled error tears the coroutine down");
}

/// `<iterate on=[10,20,30] by="RANGE: FROM 0">` runs its body exactly
/// three times with `$?` taking the members in order.
#[test]
fn iterate_over_range_runs_body_per_item() {
    let prog = program(vec![VdomElement::new("iterate")
        .attr(
            "on",
            VcmNode::Array(vec![
                VcmNode::LongInt(10),
                VcmNode::LongInt(20),
                VcmNode::LongInt(30),
            ]),
        )
        .attr_str("by", "RANGE: FROM 0")
        .child(VdomElement::new("li").content(VcmNode::get_var("?")))]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    let co_ref = instance.coroutine(co).unwrap();
    let body = co_ref.doc.body().unwrap();
    let items: Vec<String> = co_ref
        .doc
        .children(body)
        .iter()
        .map(|&li| co_ref.doc.text_content(li))
        .collect();
    assert_eq!(items, vec!["10", "20", "30"]);
    assert!(instance.errors().is_empty());
}

/// `onlyif` is re-evaluated per step and ends the iteration on false.
#[test]
fn iterate_onlyif_cuts_iteration() {
    // Stop once $? reaches 3: onlyif = $?.small (items carry the flag).
    let member = |n: i64, small: bool| {
        VcmNode::Object(vec![
            VcmNode::string("n"),
            VcmNode::LongInt(n),
            VcmNode::string("small"),
            VcmNode::Boolean(small),
        ])
    };
    let prog = program(vec![VdomElement::new("iterate")
        .attr(
            "on",
            VcmNode::Array(vec![member(1, true), member(2, true), member(3, false), member(4, true)]),
        )
        .attr(
            "onlyif",
            VcmNode::GetElement {
                parent: Box::new(VcmNode::get_var("?")),
                key: Box::new(VcmNode::string("small")),
            },
        )
        .child(VdomElement::new("li").content(VcmNode::get_member("?", "n"))),
    ]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    let co_ref = instance.coroutine(co).unwrap();
    let body = co_ref.doc.body().unwrap();
    let items: Vec<String> =
        co_ref.doc.children(body).iter().map(|&li| co_ref.doc.text_content(li)).collect();
    assert_eq!(items, vec!["1", "2"], "iteration ends before the non-matching member runs");
}

/// `<update on=#x at="attr.class" to=displace with="hi"/>` from an
/// observer body sets the attribute and mirrors exactly one renderer
/// `update` request with the property and a plain payload.
#[test]
fn update_displace_attribute_mirrors_to_renderer() {
    let prog = program(vec![
        VdomElement::new("div").attr_str("id", "x"),
        VdomElement::new("observe")
            .attr("on", VcmNode::get_var("TIMERS"))
            .attr_str("for", "expired:kick")
            .child(
                VdomElement::new("update")
                    .attr_str("on", "#x")
                    .attr_str("at", "attr.class")
                    .attr_str("to", "displace")
                    .attr_str("with", "hi"),
            ),
        VdomElement::new("update")
            .attr("on", VcmNode::get_var("TIMERS"))
            .attr_str("to", "unite")
            .content(VcmNode::Array(vec![timer_member("kick", 10, "yes")])),
    ]);

    let shared = SharedRecording::new();
    let session =
        RendererSession::connect(Box::new(shared.clone()), RdrConfig::default(), &ident())
            .unwrap();
    let mut instance = Instance::new(Box::new(StaticFetcher::new())).with_renderer(session);
    let co = instance.spawn_with_page(prog, &PageSpec::default()).unwrap();
    instance.run_until_idle();

    // The first run materialized and loaded the page.
    assert_eq!(shared.requests_with_op(RdrOp::Load).len(), 1);
    assert!(instance.coroutine(co).unwrap().dom_handle().is_some());

    instance.poll_timers_at(Instant::now() + Duration::from_millis(100));
    instance.run_until_idle();

    let co_ref = instance.coroutine(co).unwrap();
    let div = co_ref.doc.elem_by_id("x").unwrap();
    assert_eq!(co_ref.doc.attribute(div, "class").as_deref(), Some("hi"));

    let updates = shared.requests_with_op(RdrOp::Update);
    assert!(!updates.is_empty());
    let req = &updates[0];
    assert_eq!(req.element_type, ElementType::Handle);
    assert_eq!(req.element, format!("{}", div.handle()).as_str());
    assert_eq!(req.property.as_deref(), Some("class"));
    assert_eq!(
        req.data,
        RdrData::Text { ty: DataType::Plain, content: "hi".to_string() }
    );
    assert!(instance.errors().is_empty());
}

/// A document beyond the one-write limit streams as
/// `writeBegin writeMore* writeEnd`, chunks UTF-8-aligned, concatenation
/// equal to the full serialization.
#[test]
fn large_document_streams_in_chunks() {
    let shared = SharedRecording::new();
    let mut session =
        RendererSession::connect(Box::new(shared.clone()), RdrConfig::default(), &ident())
            .unwrap();

    let mut doc = TargetDoc::new(DocType::Html);
    let body = doc.body().unwrap();
    let div = doc.operate_element(body, hvml_runtime::DocOp::Append, "pre").unwrap();
    // Multibyte text well past two chunks.
    let text = "é".repeat(13_000); // 26 000 bytes
    doc.append_text(div, &text).unwrap();
    let full = doc.serialize(Default::default());
    assert!(full.len() > 2 * 10_240);

    session.load_document(hvml_runtime::PageType::PlainWindow, 3, &doc).unwrap();

    let begins = shared.requests_with_op(RdrOp::WriteBegin);
    let mores = shared.requests_with_op(RdrOp::WriteMore);
    let ends = shared.requests_with_op(RdrOp::WriteEnd);
    assert_eq!(begins.len(), 1);
    assert_eq!(ends.len(), 1);
    assert!(!mores.is_empty());
    assert!(shared.requests_with_op(RdrOp::Load).is_empty());

    let mut streamed = String::new();
    for req in shared.requests() {
        if matches!(
            req.operation,
            RdrOp::WriteBegin | RdrOp::WriteMore | RdrOp::WriteEnd
        ) {
            let RdrData::Text { content, .. } = &req.data else {
                panic!("streamed chunk must be text");
            };
            assert!(content.len() <= 10_240, "chunk exceeds the one-write limit");
            streamed.push_str(content);
        }
    }
    assert_eq!(streamed, full);
}

/// `<update on=#x at="attr.class" to="erase"/>` needs no source: the
/// attribute is removed and nothing is raised.
#[test]
fn update_erase_attribute_without_source() {
    let prog = program(vec![
        VdomElement::new("div").attr_str("id", "x").attr_str("class", "hi"),
        VdomElement::new("update")
            .attr_str("on", "#x")
            .attr_str("at", "attr.class")
            .attr_str("to", "erase"),
    ]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    assert!(instance.errors().is_empty());
    let co_ref = instance.coroutine(co).unwrap();
    let div = co_ref.doc.elem_by_id("x").unwrap();
    assert_eq!(co_ref.doc.attribute(div, "class"), None);
}

/// `<update on=#x to="clear"/>` empties the element's children with no
/// source either.
#[test]
fn update_clear_element_without_source() {
    let prog = program(vec![
        VdomElement::new("div").attr_str("id", "x").text("old"),
        VdomElement::new("update").attr_str("on", "#x").attr_str("to", "clear"),
    ]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    assert!(instance.errors().is_empty());
    let co_ref = instance.coroutine(co).unwrap();
    let div = co_ref.doc.elem_by_id("x").unwrap();
    assert_eq!(co_ref.doc.children_counts(div), (0, 0, 0));
}

/// An element child inside an `<except>` body is an unfinished path:
/// it surfaces `not-implemented` instead of silently dropping the
/// template.
#[test]
fn element_inside_handler_body_surfaces_not_implemented() {
    let prog = program(vec![VdomElement::new("choose").attr("on", VcmNode::Null).child(
        VdomElement::new("except")
            .attr_str("type", "*")
            .child(VdomElement::new("div").text("nope")),
    )]);

    let mut instance = headless();
    instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    assert_eq!(instance.errors().len(), 1);
    assert_eq!(instance.errors()[0].1.kind(), "not-implemented");
}

/// A failing `<choose on=…>` with a sibling `<except type="*">` yields
/// the handler template as the result and propagates nothing.
#[test]
fn except_handler_catches_choose_failure() {
    // Member access on a number raises invalid-value.
    let bad = VcmNode::GetElement {
        parent: Box::new(VcmNode::Number(1.0)),
        key: Box::new(VcmNode::string("x")),
    };
    let prog = program(vec![VdomElement::new("choose")
        .attr("on", bad)
        .attr_str("as", "res")
        .child(VdomElement::new("except").attr_str("type", "*").text("fallback"))]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    assert!(instance.errors().is_empty(), "no error escapes the handler");
    assert_eq!(
        instance.coroutine(co).unwrap().resolve("res"),
        Some(Variant::string("fallback"))
    );
}

/// Teardown releases the coroutine's references: a value bound in
/// document scope drops back to a single owner.
#[test]
fn teardown_releases_bindings() {
    let prog = program(vec![VdomElement::new("choose")
        .attr("on", VcmNode::Object(vec![VcmNode::string("k"), VcmNode::LongInt(1)]))
        .attr_str("as", "data")]);

    let mut instance = headless();
    let co = instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    let held = instance.coroutine(co).unwrap().resolve("data").unwrap();
    assert_eq!(held.refcount(), Some(2), "document scope plus our clone");

    instance.teardown(co);
    assert_eq!(held.refcount(), Some(1), "teardown released the runtime's reference");
}

/// Comments are skipped; a nested document node surfaces
/// `not-implemented` instead of terminating the process.
#[test]
fn document_node_child_surfaces_not_implemented() {
    let mut choose = VdomElement::new("choose").attr("on", VcmNode::Null).comment("note");
    choose.children.push(hvml_runtime::VdomNode::Document);
    let prog = program(vec![choose]);

    let mut instance = headless();
    instance.spawn(prog, DocType::Html);
    instance.run_until_idle();

    assert_eq!(instance.errors().len(), 1);
    assert_eq!(instance.errors()[0].1.kind(), "not-implemented");
}
