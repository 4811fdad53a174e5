//! Structural listeners for container variants.
//!
//! Containers (object, array, set, tuple) fire listeners on the three
//! structural mutations: `grow` (a member added), `shrink` (a member
//! removed), and `change` (a member replaced, or the whole membership
//! displaced atomically).
//!
//! Dispatch is re-entrancy safe: the listener list is snapshotted before
//! firing, the caller holds a guard clone of the container for the whole
//! dispatch, and revocations during dispatch only take effect for later
//! events. A handler returning `false` aborts the remaining handlers for
//! that event but does not undo the mutation.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::variant::Variant;

/// The structural mutation a listener fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerOp {
    Grow,
    Shrink,
    Change,
}

impl ListenerOp {
    /// Event name used when container events are adapted into
    /// observation events.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Grow => "grow",
            Self::Shrink => "shrink",
            Self::Change => "change",
        }
    }
}

/// Handler signature: `(source container, op, event args) -> keep_going`.
pub type ListenerFn = dyn Fn(&Variant, ListenerOp, &[Variant]) -> bool;

/// Handle returned by registration; pass back to revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub(crate) u64);

pub(crate) struct ListenerEntry {
    pub id: u64,
    pub op: ListenerOp,
    pub handler: Rc<ListenerFn>,
}

/// Per-container listener list. Registration order is dispatch order.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<ListenerEntry>,
    next_id: u64,
}

impl Listeners {
    pub fn register(&mut self, op: ListenerOp, handler: Rc<ListenerFn>) -> ListenerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ListenerEntry { id, op, handler });
        ListenerHandle(id)
    }

    pub fn revoke(&mut self, handle: ListenerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != handle.0);
        self.entries.len() != before
    }

    /// Snapshot the handlers subscribed to `op`, in registration order.
    pub fn snapshot(&self, op: ListenerOp) -> SmallVec<[Rc<ListenerFn>; 2]> {
        self.entries
            .iter()
            .filter(|e| e.op == op)
            .map(|e| Rc::clone(&e.handler))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fire a snapshotted handler list.
///
/// `source` doubles as the guard reference: the caller clones the
/// container variant into it, which keeps the container alive even if a
/// handler drops every other reference.
pub(crate) fn fire(
    source: &Variant,
    handlers: &[Rc<ListenerFn>],
    op: ListenerOp,
    args: &[Variant],
) {
    for handler in handlers {
        if !handler(source, op, args) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_registration_order_and_abort() {
        let mut listeners = Listeners::default();
        let hits = Rc::new(Cell::new(0u32));

        let h1 = hits.clone();
        listeners.register(
            ListenerOp::Grow,
            Rc::new(move |_, _, _| {
                h1.set(h1.get() + 1);
                false // abort the rest
            }),
        );
        let h2 = hits.clone();
        listeners.register(
            ListenerOp::Grow,
            Rc::new(move |_, _, _| {
                h2.set(h2.get() + 10);
                true
            }),
        );

        let snap = listeners.snapshot(ListenerOp::Grow);
        fire(&Variant::Null, &snap, ListenerOp::Grow, &[]);
        assert_eq!(hits.get(), 1, "second handler must not run after abort");
    }

    #[test]
    fn test_revoke() {
        let mut listeners = Listeners::default();
        let handle = listeners.register(ListenerOp::Change, Rc::new(|_, _, _| true));
        assert!(listeners.revoke(handle));
        assert!(!listeners.revoke(handle));
        assert!(listeners.snapshot(ListenerOp::Change).is_empty());
    }
}
