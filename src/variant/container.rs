//! Container variants: object, array, set, tuple.
//!
//! Containers are `Rc<RefCell<…>>` newtypes; cloning a wrapper bumps the
//! shared strong count, and dropping the last clone destroys the
//! container together with its members. All mutation goes through the
//! methods here, which fire the structural listeners of
//! [`crate::variant::listener`] after the `RefCell` borrow is released,
//! so handlers may freely re-enter the container.
//!
//! Mutating a frozen container yields `not-supported`.

use std::cell::RefCell;
use std::rc::Rc;

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{ExecResult, RuntimeError};

use super::listener::{self, ListenerFn, ListenerHandle, ListenerOp, Listeners};
use super::Variant;

type HandlerSnapshot = SmallVec<[Rc<ListenerFn>; 2]>;

macro_rules! ensure_thawed {
    ($inner:expr, $what:literal) => {
        if $inner.frozen {
            return Err(RuntimeError::NotSupported(concat!("mutation of frozen ", $what).into()));
        }
    };
}

// =============================================================================
// Object
// =============================================================================

pub(crate) struct ObjectInner {
    /// Entries in insertion order.
    entries: Vec<(CompactString, Variant)>,
    /// Key -> position in `entries`.
    index: FxHashMap<CompactString, usize>,
    listeners: Listeners,
    frozen: bool,
}

/// An ordered string-keyed object.
#[derive(Clone)]
pub struct VObject(pub(crate) Rc<RefCell<ObjectInner>>);

impl VObject {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ObjectInner {
            entries: Vec::new(),
            index: FxHashMap::default(),
            listeners: Listeners::default(),
            frozen: false,
        })))
    }

    /// Identity key for observer registries and reverse indexes.
    #[inline]
    pub fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn size(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().index.contains_key(key)
    }

    /// Get a member by key. Returns a clone (a shared reference for
    /// container members).
    pub fn get(&self, key: &str) -> Option<Variant> {
        let inner = self.0.borrow();
        inner.index.get(key).map(|&idx| inner.entries[idx].1.clone())
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<CompactString> {
        self.0.borrow().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of the entries in insertion order.
    pub fn entries(&self) -> Vec<(CompactString, Variant)> {
        self.0.borrow().entries.clone()
    }

    /// Set `key` to `value`: `grow` for a new key, `change` for an
    /// existing one. Insertion order of existing keys is untouched.
    pub fn set(&self, key: impl Into<CompactString>, value: Variant) -> ExecResult<()> {
        let key = key.into();
        let (op, args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "object");
            match inner.index.get(key.as_str()).copied() {
                Some(idx) => {
                    let old = std::mem::replace(&mut inner.entries[idx].1, value.clone());
                    let args = vec![Variant::string(key.as_str()), old, value];
                    (ListenerOp::Change, args, inner.listeners.snapshot(ListenerOp::Change))
                }
                None => {
                    let idx = inner.entries.len();
                    inner.entries.push((key.clone(), value.clone()));
                    inner.index.insert(key.clone(), idx);
                    let args = vec![Variant::string(key.as_str()), value];
                    (ListenerOp::Grow, args, inner.listeners.snapshot(ListenerOp::Grow))
                }
            }
        };
        self.fire(op, &args, &handlers);
        Ok(())
    }

    /// Remove `key`, firing `shrink`. Missing key yields `not-exists`.
    pub fn remove(&self, key: &str) -> ExecResult<Variant> {
        let (old, args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "object");
            let Some(idx) = inner.index.remove(key) else {
                return Err(RuntimeError::not_exists(format!("object key '{key}'")));
            };
            let (k, old) = inner.entries.remove(idx);
            // Entries after `idx` shifted down by one.
            let ObjectInner { entries, index, .. } = &mut *inner;
            for (i, (ek, _)) in entries.iter().enumerate().skip(idx) {
                index.insert(ek.clone(), i);
            }
            let args = vec![Variant::string(k.as_str()), old.clone()];
            (old, args, inner.listeners.snapshot(ListenerOp::Shrink))
        };
        self.fire(ListenerOp::Shrink, &args, &handlers);
        Ok(old)
    }

    /// Merge every entry of `other` into `self`. New keys append in
    /// `other`'s order (`grow` each); existing keys are replaced when
    /// `overwrite` (`change` each) and kept otherwise.
    pub fn merge_another(&self, other: &VObject, overwrite: bool) -> ExecResult<()> {
        if self.0.as_ptr() == other.0.as_ptr() {
            return Ok(());
        }
        for (k, v) in other.entries() {
            if !overwrite && self.contains_key(k.as_str()) {
                continue;
            }
            self.set(k, v)?;
        }
        Ok(())
    }

    /// Replace the entire membership in one atomic step; fires a single
    /// `change` regardless of entry count.
    pub fn displace(&self, new_entries: Vec<(CompactString, Variant)>) -> ExecResult<()> {
        let handlers = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "object");
            inner.entries.clear();
            inner.index.clear();
            for (k, v) in new_entries {
                match inner.index.get(k.as_str()).copied() {
                    Some(idx) => inner.entries[idx].1 = v,
                    None => {
                        let idx = inner.entries.len();
                        inner.index.insert(k.clone(), idx);
                        inner.entries.push((k, v));
                    }
                }
            }
            inner.listeners.snapshot(ListenerOp::Change)
        };
        self.fire(ListenerOp::Change, &[], &handlers);
        Ok(())
    }

    pub fn register_post_listener(
        &self,
        op: ListenerOp,
        handler: Rc<ListenerFn>,
    ) -> ListenerHandle {
        self.0.borrow_mut().listeners.register(op, handler)
    }

    pub fn revoke_listener(&self, handle: ListenerHandle) -> bool {
        self.0.borrow_mut().listeners.revoke(handle)
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.0.borrow_mut().frozen = frozen;
    }

    fn fire(&self, op: ListenerOp, args: &[Variant], handlers: &HandlerSnapshot) {
        if handlers.is_empty() {
            return;
        }
        let guard = Variant::Object(self.clone());
        listener::fire(&guard, handlers, op, args);
    }
}

impl Default for VObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_map()
            .entries(inner.entries.iter().map(|(k, v)| (k.as_str(), v)))
            .finish()
    }
}

// =============================================================================
// Array
// =============================================================================

pub(crate) struct ArrayInner {
    items: Vec<Variant>,
    listeners: Listeners,
    frozen: bool,
}

/// An ordered sequence.
#[derive(Clone)]
pub struct VArray(pub(crate) Rc<RefCell<ArrayInner>>);

impl VArray {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ArrayInner {
            items: Vec::new(),
            listeners: Listeners::default(),
            frozen: false,
        })))
    }

    pub fn from_items(items: Vec<Variant>) -> Self {
        Self(Rc::new(RefCell::new(ArrayInner {
            items,
            listeners: Listeners::default(),
            frozen: false,
        })))
    }

    #[inline]
    pub fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn size(&self) -> usize {
        self.0.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().items.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Variant> {
        self.0.borrow().items.get(idx).cloned()
    }

    /// Snapshot of the members.
    pub fn items(&self) -> Vec<Variant> {
        self.0.borrow().items.clone()
    }

    pub fn append(&self, value: Variant) -> ExecResult<()> {
        self.insert_at(usize::MAX, value)
    }

    pub fn prepend(&self, value: Variant) -> ExecResult<()> {
        self.insert_at(0, value)
    }

    /// Insert before position `idx`; out-of-range positions append.
    pub fn insert_before(&self, idx: usize, value: Variant) -> ExecResult<()> {
        self.insert_at(idx, value)
    }

    /// Insert after position `idx`; out-of-range positions append.
    pub fn insert_after(&self, idx: usize, value: Variant) -> ExecResult<()> {
        self.insert_at(idx.saturating_add(1), value)
    }

    fn insert_at(&self, idx: usize, value: Variant) -> ExecResult<()> {
        let (pos, args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "array");
            let pos = idx.min(inner.items.len());
            inner.items.insert(pos, value.clone());
            let args = vec![Variant::ulongint(pos as u64), value];
            (pos, args, inner.listeners.snapshot(ListenerOp::Grow))
        };
        let _ = pos;
        self.fire(ListenerOp::Grow, &args, &handlers);
        Ok(())
    }

    /// Replace the member at `idx`, firing `change`.
    pub fn set(&self, idx: usize, value: Variant) -> ExecResult<()> {
        let (args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "array");
            let len = inner.items.len();
            let slot = inner
                .items
                .get_mut(idx)
                .ok_or_else(|| RuntimeError::not_exists(format!("array index {idx} of {len}")))?;
            let old = std::mem::replace(slot, value.clone());
            let args = vec![Variant::ulongint(idx as u64), old, value];
            (args, inner.listeners.snapshot(ListenerOp::Change))
        };
        self.fire(ListenerOp::Change, &args, &handlers);
        Ok(())
    }

    /// Remove the member at `idx`, firing `shrink`.
    pub fn remove(&self, idx: usize) -> ExecResult<Variant> {
        let (old, args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "array");
            if idx >= inner.items.len() {
                let len = inner.items.len();
                return Err(RuntimeError::not_exists(format!("array index {idx} of {len}")));
            }
            let old = inner.items.remove(idx);
            let args = vec![Variant::ulongint(idx as u64), old.clone()];
            (old, args, inner.listeners.snapshot(ListenerOp::Shrink))
        };
        self.fire(ListenerOp::Shrink, &args, &handlers);
        Ok(old)
    }

    /// Replace the entire membership; a single `change`.
    pub fn displace(&self, new_items: Vec<Variant>) -> ExecResult<()> {
        let handlers = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "array");
            inner.items = new_items;
            inner.listeners.snapshot(ListenerOp::Change)
        };
        self.fire(ListenerOp::Change, &[], &handlers);
        Ok(())
    }

    pub fn register_post_listener(
        &self,
        op: ListenerOp,
        handler: Rc<ListenerFn>,
    ) -> ListenerHandle {
        self.0.borrow_mut().listeners.register(op, handler)
    }

    pub fn revoke_listener(&self, handle: ListenerHandle) -> bool {
        self.0.borrow_mut().listeners.revoke(handle)
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.0.borrow_mut().frozen = frozen;
    }

    fn fire(&self, op: ListenerOp, args: &[Variant], handlers: &HandlerSnapshot) {
        if handlers.is_empty() {
            return;
        }
        let guard = Variant::Array(self.clone());
        listener::fire(&guard, handlers, op, args);
    }
}

impl Default for VArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.borrow().items.iter()).finish()
    }
}

// =============================================================================
// Set
// =============================================================================

/// Uniqueness key declared at set construction: members are projected to
/// a key value and compared by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqKey {
    /// The member itself is the key.
    Whole,
    /// Project object members to the value of one property; the common
    /// specialization (`$TIMERS` uses `id`).
    Prop(CompactString),
}

impl UniqKey {
    pub fn by_prop(name: impl Into<CompactString>) -> Self {
        Self::Prop(name.into())
    }

    /// Project `member` to its key value.
    pub fn project(&self, member: &Variant) -> Variant {
        match self {
            Self::Whole => member.clone(),
            Self::Prop(name) => match member {
                Variant::Object(obj) => obj.get(name.as_str()).unwrap_or(Variant::Undefined),
                _ => member.clone(),
            },
        }
    }
}

pub(crate) struct SetInner {
    unique_by: UniqKey,
    items: Vec<Variant>,
    listeners: Listeners,
    frozen: bool,
}

/// A set with keyed uniqueness.
#[derive(Clone)]
pub struct VSet(pub(crate) Rc<RefCell<SetInner>>);

impl VSet {
    pub fn new(unique_by: UniqKey) -> Self {
        Self(Rc::new(RefCell::new(SetInner {
            unique_by,
            items: Vec::new(),
            listeners: Listeners::default(),
            frozen: false,
        })))
    }

    #[inline]
    pub fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn unique_by(&self) -> UniqKey {
        self.0.borrow().unique_by.clone()
    }

    pub fn size(&self) -> usize {
        self.0.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().items.is_empty()
    }

    /// Snapshot of the members in insertion order.
    pub fn items(&self) -> Vec<Variant> {
        self.0.borrow().items.clone()
    }

    /// Find a member whose projected key equals `key`.
    pub fn get_by_key(&self, key: &Variant) -> Option<Variant> {
        let inner = self.0.borrow();
        inner
            .items
            .iter()
            .find(|m| &inner.unique_by.project(m) == key)
            .cloned()
    }

    fn position_of(items: &[Variant], unique_by: &UniqKey, key: &Variant) -> Option<usize> {
        items.iter().position(|m| &unique_by.project(m) == key)
    }

    /// Insert one member. A duplicate key is rejected in strict mode
    /// (`duplicated`) and replaced when `overwrite` is set.
    pub fn insert(&self, member: Variant, overwrite: bool) -> ExecResult<bool> {
        let (op, args, handlers, grew) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "set");
            let key = inner.unique_by.project(&member);
            match Self::position_of(&inner.items, &inner.unique_by, &key) {
                Some(idx) if overwrite => {
                    let old = std::mem::replace(&mut inner.items[idx], member.clone());
                    let args = vec![old, member];
                    (ListenerOp::Change, args, inner.listeners.snapshot(ListenerOp::Change), false)
                }
                Some(_) => {
                    return Err(RuntimeError::Duplicated(format!(
                        "set member with key {}",
                        key.stringify()
                    )));
                }
                None => {
                    inner.items.push(member.clone());
                    let args = vec![member];
                    (ListenerOp::Grow, args, inner.listeners.snapshot(ListenerOp::Grow), true)
                }
            }
        };
        self.fire(op, &args, &handlers);
        Ok(grew)
    }

    /// Add-or-replace one member by its key.
    pub fn overwrite_member(&self, member: Variant) -> ExecResult<()> {
        self.insert(member, true).map(|_| ())
    }

    /// Unite the members of `src` (array, set, or tuple; any other value
    /// is treated as one member) into `self`. Members whose key already
    /// exists are merged object-into-object, or replaced when either side
    /// is not an object.
    pub fn unite(&self, src: &Variant) -> ExecResult<()> {
        for member in src.members_or_self() {
            let key = self.unique_by().project(&member);
            match self.get_by_key(&key) {
                Some(Variant::Object(existing)) => {
                    if let Variant::Object(incoming) = &member {
                        existing.merge_another(incoming, true)?;
                        // The member mutated in place: surface it as a set
                        // change so watchers see the united value.
                        self.fire_change_for(&key);
                    } else {
                        self.overwrite_member(member)?;
                    }
                }
                Some(_) => self.overwrite_member(member)?,
                None => {
                    self.insert(member, false)?;
                }
            }
        }
        Ok(())
    }

    /// Add-or-replace every member of `src`.
    pub fn overwrite(&self, src: &Variant) -> ExecResult<()> {
        for member in src.members_or_self() {
            self.overwrite_member(member)?;
        }
        Ok(())
    }

    /// Remove the member with the given projected key, firing `shrink`.
    pub fn remove_by_key(&self, key: &Variant) -> ExecResult<Variant> {
        let (old, args, handlers) = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "set");
            let Some(idx) = Self::position_of(&inner.items, &inner.unique_by, key) else {
                return Err(RuntimeError::not_exists(format!(
                    "set member with key {}",
                    key.stringify()
                )));
            };
            let old = inner.items.remove(idx);
            let args = vec![old.clone()];
            (old, args, inner.listeners.snapshot(ListenerOp::Shrink))
        };
        self.fire(ListenerOp::Shrink, &args, &handlers);
        Ok(old)
    }

    /// Replace the entire membership in one atomic step; later duplicates
    /// win. Fires a single `change` regardless of member count.
    pub fn displace(&self, members: Vec<Variant>) -> ExecResult<()> {
        let handlers = {
            let mut inner = self.0.borrow_mut();
            ensure_thawed!(inner, "set");
            let mut deduped: Vec<Variant> = Vec::with_capacity(members.len());
            for member in members {
                let key = inner.unique_by.project(&member);
                match Self::position_of(&deduped, &inner.unique_by, &key) {
                    Some(idx) => deduped[idx] = member,
                    None => deduped.push(member),
                }
            }
            inner.items = deduped;
            inner.listeners.snapshot(ListenerOp::Change)
        };
        self.fire(ListenerOp::Change, &[], &handlers);
        Ok(())
    }

    pub fn register_post_listener(
        &self,
        op: ListenerOp,
        handler: Rc<ListenerFn>,
    ) -> ListenerHandle {
        self.0.borrow_mut().listeners.register(op, handler)
    }

    pub fn revoke_listener(&self, handle: ListenerHandle) -> bool {
        self.0.borrow_mut().listeners.revoke(handle)
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.0.borrow_mut().frozen = frozen;
    }

    fn fire_change_for(&self, key: &Variant) {
        let (args, handlers) = {
            let inner = self.0.borrow();
            let member = inner
                .items
                .iter()
                .find(|m| &inner.unique_by.project(m) == key)
                .cloned();
            let args: Vec<Variant> = member.into_iter().collect();
            (args, inner.listeners.snapshot(ListenerOp::Change))
        };
        self.fire(ListenerOp::Change, &args, &handlers);
    }

    fn fire(&self, op: ListenerOp, args: &[Variant], handlers: &HandlerSnapshot) {
        if handlers.is_empty() {
            return;
        }
        let guard = Variant::Set(self.clone());
        listener::fire(&guard, handlers, op, args);
    }
}

impl std::fmt::Debug for VSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.borrow().items.iter()).finish()
    }
}

// =============================================================================
// Tuple
// =============================================================================

pub(crate) struct TupleInner {
    items: Vec<Variant>,
    listeners: Listeners,
}

/// A fixed-size sequence; slots start `undefined` and only `set` mutates.
#[derive(Clone)]
pub struct VTuple(pub(crate) Rc<RefCell<TupleInner>>);

impl VTuple {
    pub fn new(size: usize) -> Self {
        Self(Rc::new(RefCell::new(TupleInner {
            items: vec![Variant::Undefined; size],
            listeners: Listeners::default(),
        })))
    }

    pub fn from_items(items: Vec<Variant>) -> Self {
        Self(Rc::new(RefCell::new(TupleInner {
            items,
            listeners: Listeners::default(),
        })))
    }

    #[inline]
    pub fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn size(&self) -> usize {
        self.0.borrow().items.len()
    }

    pub fn get(&self, idx: usize) -> Option<Variant> {
        self.0.borrow().items.get(idx).cloned()
    }

    pub fn items(&self) -> Vec<Variant> {
        self.0.borrow().items.clone()
    }

    /// Replace slot `idx`, firing `change`. Tuples never grow or shrink.
    pub fn set(&self, idx: usize, value: Variant) -> ExecResult<()> {
        let (args, handlers) = {
            let mut inner = self.0.borrow_mut();
            let len = inner.items.len();
            let slot = inner
                .items
                .get_mut(idx)
                .ok_or_else(|| RuntimeError::not_exists(format!("tuple index {idx} of {len}")))?;
            let old = std::mem::replace(slot, value.clone());
            let args = vec![Variant::ulongint(idx as u64), old, value];
            (args, inner.listeners.snapshot(ListenerOp::Change))
        };
        if !handlers.is_empty() {
            let guard = Variant::Tuple(self.clone());
            listener::fire(&guard, &handlers, ListenerOp::Change, &args);
        }
        Ok(())
    }

    pub fn register_post_listener(
        &self,
        op: ListenerOp,
        handler: Rc<ListenerFn>,
    ) -> ListenerHandle {
        self.0.borrow_mut().listeners.register(op, handler)
    }

    pub fn revoke_listener(&self, handle: ListenerHandle) -> bool {
        self.0.borrow_mut().listeners.revoke(handle)
    }
}

impl std::fmt::Debug for VTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        write!(f, "Tuple")?;
        f.debug_list().entries(inner.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_object_set_get() {
        let obj = VObject::new();
        obj.set("a", Variant::number(1.0)).unwrap();
        obj.set("b", Variant::number(2.0)).unwrap();
        assert_eq!(obj.get("a"), Some(Variant::number(1.0)));
        assert_eq!(obj.size(), 2);
        assert_eq!(obj.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_object_merge_preserves_order() {
        let a = VObject::new();
        a.set("x", Variant::number(1.0)).unwrap();
        let b = VObject::new();
        b.set("y", Variant::number(2.0)).unwrap();
        b.set("z", Variant::number(3.0)).unwrap();
        a.merge_another(&b, true).unwrap();
        assert_eq!(a.keys(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_object_frozen_rejects_mutation() {
        let obj = VObject::new();
        obj.set_frozen(true);
        let err = obj.set("a", Variant::Null).unwrap_err();
        assert_eq!(err.kind(), "not-supported");
    }

    #[test]
    fn test_object_listener_fires_once_per_mutation() {
        let obj = VObject::new();
        let grows = Rc::new(Cell::new(0u32));
        let g = grows.clone();
        obj.register_post_listener(
            ListenerOp::Grow,
            Rc::new(move |_, _, _| {
                g.set(g.get() + 1);
                true
            }),
        );
        obj.set("a", Variant::Null).unwrap();
        obj.set("a", Variant::Null).unwrap(); // change, not grow
        obj.set("b", Variant::Null).unwrap();
        assert_eq!(grows.get(), 2);
    }

    #[test]
    fn test_listener_may_mutate_container() {
        let obj = VObject::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        obj.register_post_listener(
            ListenerOp::Grow,
            Rc::new(move |source, _, _| {
                // Re-enter the container from inside the handler.
                if let Variant::Object(o) = source {
                    if !o.contains_key("echo") {
                        o.set("echo", Variant::boolean(true)).unwrap();
                    }
                }
                f.set(true);
                true
            }),
        );
        obj.set("a", Variant::Null).unwrap();
        assert!(fired.get());
        assert_eq!(obj.get("echo"), Some(Variant::boolean(true)));
    }

    #[test]
    fn test_array_insert_before_out_of_range_appends() {
        let arr = VArray::new();
        arr.append(Variant::number(1.0)).unwrap();
        arr.insert_before(99, Variant::number(2.0)).unwrap();
        assert_eq!(arr.items(), vec![Variant::number(1.0), Variant::number(2.0)]);
    }

    #[test]
    fn test_array_prepend_and_remove() {
        let arr = VArray::new();
        arr.append(Variant::number(2.0)).unwrap();
        arr.prepend(Variant::number(1.0)).unwrap();
        assert_eq!(arr.remove(0).unwrap(), Variant::number(1.0));
        assert_eq!(arr.size(), 1);
        assert!(arr.remove(5).is_err());
    }

    #[test]
    fn test_set_keyed_uniqueness() {
        let set = VSet::new(UniqKey::by_prop("id"));
        let a = VObject::new();
        a.set("id", Variant::string("x")).unwrap();
        let b = VObject::new();
        b.set("id", Variant::string("x")).unwrap();

        assert!(set.insert(Variant::Object(a), false).unwrap());
        let err = set.insert(Variant::Object(b.clone()), false).unwrap_err();
        assert_eq!(err.kind(), "duplicated");
        set.insert(Variant::Object(b), true).unwrap();
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn test_set_displace_single_change() {
        let set = VSet::new(UniqKey::Whole);
        let changes = Rc::new(Cell::new(0u32));
        let c = changes.clone();
        set.register_post_listener(
            ListenerOp::Change,
            Rc::new(move |_, _, _| {
                c.set(c.get() + 1);
                true
            }),
        );
        set.displace(vec![
            Variant::number(1.0),
            Variant::number(2.0),
            Variant::number(3.0),
        ])
        .unwrap();
        assert_eq!(changes.get(), 1);
        assert_eq!(set.size(), 3);
    }

    #[test]
    fn test_tuple_fixed_size() {
        let tup = VTuple::new(2);
        tup.set(0, Variant::boolean(true)).unwrap();
        assert_eq!(tup.get(0), Some(Variant::boolean(true)));
        assert_eq!(tup.get(1), Some(Variant::Undefined));
        assert!(tup.set(2, Variant::Null).is_err());
    }
}
