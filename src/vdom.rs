//! The program tree.
//!
//! The tokenizer (external to this crate) parses HVML source into this
//! tree; tests construct it directly through the builder API. Each
//! element is classified once, by tag, into a [`VerbKind`] — the
//! classification drives the executor's per-element operation set. Tags
//! outside the verb table are *foreign*: they materialize elements of
//! the target document.

use std::rc::Rc;

use compact_str::CompactString;

use crate::vcm::VcmNode;

// =============================================================================
// Verb classification
// =============================================================================

/// Static classification of a program element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbKind {
    /// `<hvml>` program root.
    Hvml,
    /// `<head>` — bindings land in document scope.
    Head,
    /// `<body>` — the main program body.
    Body,
    /// Template bound to a name, possibly loaded from `src`.
    Archetype,
    /// Iteration over an executor.
    Iterate,
    /// Choose a value into scope.
    Choose,
    /// Mutate a variant or document target.
    Update,
    /// Register with the observer bus.
    Observe,
    /// Frame-scoped handler for raised errors.
    Error,
    /// Frame-scoped handler for raised exceptions.
    Except,
    /// Not a verb: a target-document element.
    Foreign,
}

impl VerbKind {
    /// Classify a tag name. Unknown tags are foreign elements.
    pub fn classify(tag: &str) -> Self {
        match tag {
            "hvml" => Self::Hvml,
            "head" => Self::Head,
            "body" => Self::Body,
            "archetype" => Self::Archetype,
            "iterate" => Self::Iterate,
            "choose" => Self::Choose,
            "update" => Self::Update,
            "observe" => Self::Observe,
            "error" => Self::Error,
            "except" => Self::Except,
            _ => Self::Foreign,
        }
    }

    /// Template verbs are collected by their parent frame instead of
    /// being executed in document order.
    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Error | Self::Except)
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Combinator carried by an attribute's operator prefix (`with+=…`):
/// applied between the existing value and the newly evaluated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrCombinator {
    #[default]
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl AttrCombinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
        }
    }
}

/// One attribute of a program element; the value is an unevaluated
/// expression.
#[derive(Debug, Clone)]
pub struct VdomAttr {
    pub name: CompactString,
    pub value: VcmNode,
    pub combinator: AttrCombinator,
}

// =============================================================================
// Nodes
// =============================================================================

/// A node of the program tree.
#[derive(Debug, Clone)]
pub enum VdomNode {
    Element(Rc<VdomElement>),
    /// A content node carrying a parsed expression, consumed inline by
    /// the enclosing verb.
    Content(Rc<VcmNode>),
    Comment(CompactString),
    /// A nested document node; verbs surface `not-implemented` when they
    /// meet one.
    Document,
}

/// A program element.
#[derive(Debug, Clone)]
pub struct VdomElement {
    pub tag: CompactString,
    pub verb: VerbKind,
    pub attrs: Vec<VdomAttr>,
    pub children: Vec<VdomNode>,
}

impl VdomElement {
    pub fn new(tag: impl Into<CompactString>) -> Self {
        let tag = tag.into();
        let verb = VerbKind::classify(&tag);
        Self { tag, verb, attrs: Vec::new(), children: Vec::new() }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder API (used by tests and embedders; the tokenizer builds
    // the same structures directly)
    // ─────────────────────────────────────────────────────────────────────────

    pub fn attr(mut self, name: impl Into<CompactString>, value: VcmNode) -> Self {
        self.attrs.push(VdomAttr { name: name.into(), value, combinator: AttrCombinator::Assign });
        self
    }

    pub fn attr_with_combinator(
        mut self,
        name: impl Into<CompactString>,
        combinator: AttrCombinator,
        value: VcmNode,
    ) -> Self {
        self.attrs.push(VdomAttr { name: name.into(), value, combinator });
        self
    }

    /// Shorthand for a literal string attribute.
    pub fn attr_str(self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.attr(name, VcmNode::String(value.into()))
    }

    pub fn child(mut self, child: VdomElement) -> Self {
        self.children.push(VdomNode::Element(Rc::new(child)));
        self
    }

    pub fn content(mut self, vcm: VcmNode) -> Self {
        self.children.push(VdomNode::Content(Rc::new(vcm)));
        self
    }

    pub fn text(self, s: impl Into<CompactString>) -> Self {
        self.content(VcmNode::String(s.into()))
    }

    pub fn comment(mut self, s: impl Into<CompactString>) -> Self {
        self.children.push(VdomNode::Comment(s.into()));
        self
    }

    pub fn into_rc(self) -> Rc<VdomElement> {
        Rc::new(self)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn find_attr(&self, name: &str) -> Option<&VdomAttr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.find_attr(name).is_some()
    }

    /// Child elements classified as `error`/`except` handlers.
    pub fn handler_children(&self) -> impl Iterator<Item = &Rc<VdomElement>> {
        self.children.iter().filter_map(|c| match c {
            VdomNode::Element(e) if e.verb.is_handler() => Some(e),
            _ => None,
        })
    }
}

/// Convenience: a minimal `<hvml><body>…</body></hvml>` program around
/// the given body children.
pub fn program(body_children: Vec<VdomElement>) -> Rc<VdomElement> {
    let mut body = VdomElement::new("body");
    for child in body_children {
        body = body.child(child);
    }
    VdomElement::new("hvml").child(body).into_rc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(VerbKind::classify("iterate"), VerbKind::Iterate);
        assert_eq!(VerbKind::classify("archetype"), VerbKind::Archetype);
        assert_eq!(VerbKind::classify("div"), VerbKind::Foreign);
        assert!(VerbKind::classify("except").is_handler());
    }

    #[test]
    fn test_builder() {
        let elem = VdomElement::new("update")
            .attr("on", VcmNode::get_var("TIMERS"))
            .attr_str("to", "unite")
            .text("payload");
        assert_eq!(elem.verb, VerbKind::Update);
        assert!(elem.has_attr("on"));
        assert_eq!(elem.find_attr("to").unwrap().combinator, AttrCombinator::Assign);
        assert_eq!(elem.children.len(), 1);
    }

    #[test]
    fn test_program_shape() {
        let prog = program(vec![VdomElement::new("choose").attr_str("on", "x")]);
        assert_eq!(prog.verb, VerbKind::Hvml);
        let VdomNode::Element(body) = &prog.children[0] else { panic!() };
        assert_eq!(body.verb, VerbKind::Body);
    }
}
