//! The expression sub-language.
//!
//! Attribute values and content nodes of the program tree carry parsed
//! expression trees ([`VcmNode`]); the tokenizer produces them, the
//! runtime evaluates them on demand against the current scope chain.
//! Evaluation is post-order and produces a [`Variant`].
//!
//! The `silently` flag substitutes `undefined` for evaluation errors
//! (the verb's `silently` attribute toggles it).

use compact_str::CompactString;

use crate::error::{ExecResult, RuntimeError};
use crate::variant::{VArray, VObject, Variant};

// =============================================================================
// Parse tree
// =============================================================================

/// One node of an expression parse tree.
#[derive(Debug, Clone, PartialEq)]
pub enum VcmNode {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    LongInt(i64),
    ULongInt(u64),
    String(CompactString),
    ByteSeq(Vec<u8>),
    /// Children taken in `(key, value)` pairs; a duplicate key keeps the
    /// last write.
    Object(Vec<VcmNode>),
    Array(Vec<VcmNode>),
    /// Stringify each child and concatenate.
    ConcatString(Vec<VcmNode>),
    /// Resolve the child (a name expression) against the scope chain.
    GetVariable(Box<VcmNode>),
    /// Member access: `parent.key` / `parent[key]`.
    GetElement { parent: Box<VcmNode>, key: Box<VcmNode> },
    /// Invoke a dynamic/native getter with arguments.
    CallGetter { subject: Box<VcmNode>, args: Vec<VcmNode> },
    /// Invoke a dynamic/native setter with arguments.
    CallSetter { subject: Box<VcmNode>, args: Vec<VcmNode> },
}

impl VcmNode {
    pub fn string(s: impl Into<CompactString>) -> Self {
        Self::String(s.into())
    }

    /// Shorthand for `$name`.
    pub fn get_var(name: impl Into<CompactString>) -> Self {
        Self::GetVariable(Box::new(Self::String(name.into())))
    }

    /// Shorthand for `$name.key`.
    pub fn get_member(name: impl Into<CompactString>, key: impl Into<CompactString>) -> Self {
        Self::GetElement {
            parent: Box::new(Self::get_var(name)),
            key: Box::new(Self::String(key.into())),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Name resolution seam: the executor walks frame scopes innermost-first,
/// then document scope, then process scope.
pub trait ScopeResolver {
    fn resolve(&self, name: &str) -> Option<Variant>;
}

/// Resolver over a plain map, for tests and detached evaluation.
impl ScopeResolver for rustc_hash::FxHashMap<CompactString, Variant> {
    fn resolve(&self, name: &str) -> Option<Variant> {
        self.get(name).cloned()
    }
}

/// Evaluation context: scope resolution plus the silently flag.
pub struct EvalCtx<'a> {
    pub scope: &'a dyn ScopeResolver,
    pub silently: bool,
}

impl<'a> EvalCtx<'a> {
    pub fn new(scope: &'a dyn ScopeResolver) -> Self {
        Self { scope, silently: false }
    }

    pub fn silently(scope: &'a dyn ScopeResolver) -> Self {
        Self { scope, silently: true }
    }

    /// Evaluate `node`. Under `silently`, errors collapse to `undefined`.
    pub fn eval(&self, node: &VcmNode) -> ExecResult<Variant> {
        match self.eval_strict(node) {
            Ok(v) => Ok(v),
            Err(_) if self.silently => Ok(Variant::Undefined),
            Err(e) => Err(e),
        }
    }

    fn eval_strict(&self, node: &VcmNode) -> ExecResult<Variant> {
        match node {
            VcmNode::Undefined => Ok(Variant::Undefined),
            VcmNode::Null => Ok(Variant::Null),
            VcmNode::Boolean(b) => Ok(Variant::Boolean(*b)),
            VcmNode::Number(n) => Ok(Variant::Number(*n)),
            VcmNode::LongInt(n) => Ok(Variant::LongInt(*n)),
            VcmNode::ULongInt(n) => Ok(Variant::ULongInt(*n)),
            VcmNode::String(s) => Ok(Variant::string(s.as_str())),
            VcmNode::ByteSeq(b) => Ok(Variant::byte_seq(b)),

            VcmNode::Object(children) => {
                if children.len() % 2 != 0 {
                    return Err(RuntimeError::invalid_value(
                        "object constructor expects (key, value) pairs",
                    ));
                }
                let obj = VObject::new();
                for pair in children.chunks_exact(2) {
                    let key = self.eval_strict(&pair[0])?.stringify();
                    let value = self.eval_strict(&pair[1])?;
                    obj.set(key.as_str(), value)?;
                }
                Ok(Variant::Object(obj))
            }

            VcmNode::Array(children) => {
                let arr = VArray::new();
                for child in children {
                    arr.append(self.eval_strict(child)?)?;
                }
                Ok(Variant::Array(arr))
            }

            VcmNode::ConcatString(children) => {
                let mut out = String::new();
                for child in children {
                    out.push_str(&self.eval_strict(child)?.stringify());
                }
                Ok(Variant::string(out))
            }

            VcmNode::GetVariable(name_node) => {
                let name = self.eval_strict(name_node)?.stringify();
                self.scope
                    .resolve(&name)
                    .ok_or_else(|| RuntimeError::not_exists(format!("variable '${name}'")))
            }

            VcmNode::GetElement { parent, key } => {
                let parent = self.eval_strict(parent)?;
                let key = self.eval_strict(key)?;
                self.get_element(&parent, &key)
            }

            VcmNode::CallGetter { subject, args } => {
                let subject = self.eval_strict(subject)?;
                let args = self.eval_args(args)?;
                match &subject {
                    Variant::Dynamic(dynamic) => {
                        let getter = dynamic.getter.as_ref().ok_or_else(|| {
                            RuntimeError::NotSupported("dynamic value has no getter".into())
                        })?;
                        getter(&subject, &args)
                    }
                    Variant::Native(native) => {
                        let getter = native.ops.getter.as_ref().ok_or_else(|| {
                            RuntimeError::NotSupported(format!(
                                "native '{}' has no getter",
                                native.ops.name
                            ))
                        })?;
                        getter(native.entity.as_ref(), &args)
                    }
                    other => Err(RuntimeError::NotSupported(format!(
                        "calling a getter on {}",
                        other.kind_name()
                    ))),
                }
            }

            VcmNode::CallSetter { subject, args } => {
                let subject = self.eval_strict(subject)?;
                let args = self.eval_args(args)?;
                match &subject {
                    Variant::Dynamic(dynamic) => {
                        let setter = dynamic.setter.as_ref().ok_or_else(|| {
                            RuntimeError::NotSupported("dynamic value has no setter".into())
                        })?;
                        setter(&subject, &args)
                    }
                    Variant::Native(native) => {
                        let setter = native.ops.setter.as_ref().ok_or_else(|| {
                            RuntimeError::NotSupported(format!(
                                "native '{}' has no setter",
                                native.ops.name
                            ))
                        })?;
                        setter(native.entity.as_ref(), &args)
                    }
                    other => Err(RuntimeError::NotSupported(format!(
                        "calling a setter on {}",
                        other.kind_name()
                    ))),
                }
            }
        }
    }

    fn eval_args(&self, args: &[VcmNode]) -> ExecResult<Vec<Variant>> {
        args.iter().map(|a| self.eval_strict(a)).collect()
    }

    fn get_element(&self, parent: &Variant, key: &Variant) -> ExecResult<Variant> {
        match parent {
            Variant::Object(obj) => {
                let key = key.stringify();
                obj.get(&key)
                    .ok_or_else(|| RuntimeError::not_exists(format!("object member '{key}'")))
            }
            Variant::Array(arr) => {
                let idx = key.cast_to_i32();
                if idx < 0 {
                    return Err(RuntimeError::invalid_value("negative array index"));
                }
                arr.get(idx as usize)
                    .ok_or_else(|| RuntimeError::not_exists(format!("array index {idx}")))
            }
            Variant::Tuple(tup) => {
                let idx = key.cast_to_i32();
                if idx < 0 {
                    return Err(RuntimeError::invalid_value("negative tuple index"));
                }
                tup.get(idx as usize)
                    .ok_or_else(|| RuntimeError::not_exists(format!("tuple index {idx}")))
            }
            Variant::Set(set) => set
                .get_by_key(key)
                .ok_or_else(|| RuntimeError::not_exists(format!("set member {}", key.stringify()))),
            Variant::Native(native) => {
                let getter = native.ops.property_getter.as_ref().ok_or_else(|| {
                    RuntimeError::NotSupported(format!(
                        "native '{}' has no property getter",
                        native.ops.name
                    ))
                })?;
                getter(native.entity.as_ref(), &key.stringify())
            }
            other => Err(RuntimeError::invalid_value(format!(
                "member access on {}",
                other.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn scope_with(name: &str, value: Variant) -> FxHashMap<CompactString, Variant> {
        let mut scope = FxHashMap::default();
        scope.insert(CompactString::new(name), value);
        scope
    }

    #[test]
    fn test_literals_and_array() {
        let scope = FxHashMap::default();
        let ctx = EvalCtx::new(&scope);
        let node = VcmNode::Array(vec![
            VcmNode::LongInt(1),
            VcmNode::Boolean(true),
            VcmNode::Null,
        ]);
        let v = ctx.eval(&node).unwrap();
        let items = v.as_array().unwrap().items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Variant::LongInt(1));
    }

    #[test]
    fn test_object_last_write_wins() {
        let scope = FxHashMap::default();
        let ctx = EvalCtx::new(&scope);
        let node = VcmNode::Object(vec![
            VcmNode::string("k"),
            VcmNode::LongInt(1),
            VcmNode::string("k"),
            VcmNode::LongInt(2),
        ]);
        let v = ctx.eval(&node).unwrap();
        assert_eq!(v.as_object().unwrap().get("k"), Some(Variant::LongInt(2)));
        assert_eq!(v.as_object().unwrap().size(), 1);
    }

    #[test]
    fn test_concat_string() {
        let scope = scope_with("who", Variant::string("world"));
        let ctx = EvalCtx::new(&scope);
        let node = VcmNode::ConcatString(vec![
            VcmNode::string("hello "),
            VcmNode::get_var("who"),
            VcmNode::string("/"),
            VcmNode::LongInt(3),
        ]);
        assert_eq!(ctx.eval(&node).unwrap(), Variant::string("hello world/3"));
    }

    #[test]
    fn test_get_variable_and_member() {
        let obj = VObject::new();
        obj.set("x", Variant::LongInt(9)).unwrap();
        let scope = scope_with("data", Variant::Object(obj));
        let ctx = EvalCtx::new(&scope);

        assert_eq!(
            ctx.eval(&VcmNode::get_member("data", "x")).unwrap(),
            Variant::LongInt(9)
        );
        let err = ctx.eval(&VcmNode::get_var("nope")).unwrap_err();
        assert_eq!(err.kind(), "not-exists");
    }

    #[test]
    fn test_silently_substitutes_undefined() {
        let scope = FxHashMap::default();
        let ctx = EvalCtx::silently(&scope);
        assert_eq!(ctx.eval(&VcmNode::get_var("nope")).unwrap(), Variant::Undefined);
    }

    #[test]
    fn test_array_indexing() {
        let scope = scope_with(
            "list",
            Variant::array_from(vec![Variant::string("a"), Variant::string("b")]),
        );
        let ctx = EvalCtx::new(&scope);
        let node = VcmNode::GetElement {
            parent: Box::new(VcmNode::get_var("list")),
            key: Box::new(VcmNode::LongInt(1)),
        };
        assert_eq!(ctx.eval(&node).unwrap(), Variant::string("b"));
    }

    #[test]
    fn test_call_getter_on_scalar_refused() {
        let scope = scope_with("n", Variant::number(1.0));
        let ctx = EvalCtx::new(&scope);
        let node = VcmNode::CallGetter {
            subject: Box::new(VcmNode::get_var("n")),
            args: vec![],
        };
        assert_eq!(ctx.eval(&node).unwrap_err().kind(), "not-supported");
    }
}
