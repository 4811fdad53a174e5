//! The observer bus.
//!
//! Registrations are `(source, event-name, sub-name)` triples with a
//! handler subtree from the program tree. Firing never runs handlers
//! inline: a raw event is posted to the instance event queue, and the
//! scheduler delivers it to the owning coroutine when that coroutine is
//! in the observing stage with no frame running.
//!
//! Container sources are adapted through the variant listener mechanism:
//! the first registration on a container installs listeners translating
//! `grow`/`shrink`/`change` mutations into posted events; the last
//! `forget` removes them again (the reverse index keyed by source
//! identity). Dropping the container drops its listeners with it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use slab::Slab;
use tracing::trace;

use crate::error::{ExecResult, RuntimeError};
use crate::variant::{ListenerHandle, ListenerOp, Variant};
use crate::vdom::VdomElement;

/// Identity of an observed source (container pointer key).
pub type SourceKey = usize;

/// An event as posted by a source, before matching.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub source: SourceKey,
    pub event: CompactString,
    pub sub: CompactString,
    pub payload: Variant,
}

/// Shared queue the bus, timers, and variant listeners post into; the
/// scheduler drains it between frames.
pub type EventSink = Rc<RefCell<VecDeque<RawEvent>>>;

/// One registration.
#[derive(Clone)]
pub struct Observation {
    pub co: usize,
    pub source: SourceKey,
    pub event: CompactString,
    /// `"*"` matches every sub-name.
    pub sub: CompactString,
    pub handler: Rc<VdomElement>,
}

impl Observation {
    fn matches(&self, ev: &RawEvent) -> bool {
        self.source == ev.source
            && self.event == ev.event
            && (self.sub == "*" || self.sub == ev.sub)
    }
}

struct SourceAdapter {
    source: Variant,
    handles: Vec<ListenerHandle>,
    registrations: usize,
}

/// Registration table plus the event queue.
pub struct ObserverBus {
    regs: Slab<Observation>,
    by_source: FxHashMap<SourceKey, Vec<usize>>,
    adapters: FxHashMap<SourceKey, SourceAdapter>,
    sink: EventSink,
}

impl ObserverBus {
    pub fn new(sink: EventSink) -> Self {
        Self {
            regs: Slab::new(),
            by_source: FxHashMap::default(),
            adapters: FxHashMap::default(),
            sink,
        }
    }

    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Register an observation on a container source. Installs the
    /// listener adapter on first registration for the source.
    pub fn observe(
        &mut self,
        co: usize,
        source: &Variant,
        event: impl Into<CompactString>,
        sub: impl Into<CompactString>,
        handler: Rc<VdomElement>,
    ) -> ExecResult<usize> {
        let key = source.container_key().ok_or_else(|| {
            RuntimeError::invalid_value(format!("{} is not observable", source.kind_name()))
        })?;
        let event = event.into();
        let sub = sub.into();
        trace!(source = key, event = %event, sub = %sub, "observe");

        let id = self.regs.insert(Observation {
            co,
            source: key,
            event,
            sub,
            handler,
        });
        self.by_source.entry(key).or_default().push(id);
        self.ensure_adapter(key, source);
        Ok(id)
    }

    fn ensure_adapter(&mut self, key: SourceKey, source: &Variant) {
        if let Some(adapter) = self.adapters.get_mut(&key) {
            adapter.registrations += 1;
            return;
        }
        let mut handles = Vec::new();
        for op in [ListenerOp::Grow, ListenerOp::Shrink, ListenerOp::Change] {
            let sink = self.sink.clone();
            let listener = Rc::new(move |_source: &Variant, op: ListenerOp, args: &[Variant]| {
                sink.borrow_mut().push_back(RawEvent {
                    source: key,
                    event: CompactString::new(op.event_name()),
                    sub: CompactString::default(),
                    payload: Variant::array_from(args.to_vec()),
                });
                true
            });
            let handle = match source {
                Variant::Object(o) => Some(o.register_post_listener(op, listener)),
                Variant::Array(a) => Some(a.register_post_listener(op, listener)),
                Variant::Set(s) => Some(s.register_post_listener(op, listener)),
                Variant::Tuple(t) => Some(t.register_post_listener(op, listener)),
                _ => None,
            };
            if let Some(handle) = handle {
                handles.push(handle);
            }
        }
        self.adapters.insert(key, SourceAdapter { source: source.clone(), handles, registrations: 1 });
    }

    fn release_adapter(&mut self, key: SourceKey, count: usize) {
        let Some(adapter) = self.adapters.get_mut(&key) else { return };
        adapter.registrations = adapter.registrations.saturating_sub(count);
        if adapter.registrations == 0 {
            let adapter = self.adapters.remove(&key).expect("adapter present");
            for handle in adapter.handles {
                match &adapter.source {
                    Variant::Object(o) => {
                        o.revoke_listener(handle);
                    }
                    Variant::Array(a) => {
                        a.revoke_listener(handle);
                    }
                    Variant::Set(s) => {
                        s.revoke_listener(handle);
                    }
                    Variant::Tuple(t) => {
                        t.revoke_listener(handle);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Explicit cancellation of every observation `(co, source, event)`.
    /// Returns how many registrations were removed.
    pub fn forget(&mut self, co: usize, source: &Variant, event: &str) -> usize {
        let Some(key) = source.container_key() else { return 0 };
        let Some(mut ids) = self.by_source.remove(&key) else { return 0 };
        let mut removed = 0;
        let regs = &mut self.regs;
        ids.retain(|&id| {
            let matched = regs.get(id).is_some_and(|o| o.co == co && o.event == event);
            if matched {
                regs.remove(id);
                removed += 1;
            }
            !matched
        });
        if !ids.is_empty() {
            self.by_source.insert(key, ids);
        }
        self.release_adapter(key, removed);
        removed
    }

    /// Drop every observation owned by a coroutine (teardown).
    pub fn remove_coroutine(&mut self, co: usize) {
        let ids: Vec<usize> = self
            .regs
            .iter()
            .filter(|(_, o)| o.co == co)
            .map(|(id, _)| id)
            .collect();
        let mut per_source: FxHashMap<SourceKey, usize> = FxHashMap::default();
        for id in ids {
            let obs = self.regs.remove(id);
            *per_source.entry(obs.source).or_default() += 1;
            if let Some(list) = self.by_source.get_mut(&obs.source) {
                list.retain(|&x| x != id);
                if list.is_empty() {
                    self.by_source.remove(&obs.source);
                }
            }
        }
        for (key, count) in per_source {
            self.release_adapter(key, count);
        }
    }

    /// Post a raw event (timers and native sources use this directly).
    pub fn post(&self, event: RawEvent) {
        self.sink.borrow_mut().push_back(event);
    }

    pub fn observation(&self, id: usize) -> Option<&Observation> {
        self.regs.get(id)
    }

    /// Match a raw event against the registrations, in registration
    /// order.
    pub fn match_event(&self, ev: &RawEvent) -> Vec<(usize, Observation)> {
        let mut hits: Vec<(usize, Observation)> = self
            .regs
            .iter()
            .filter(|(_, o)| o.matches(ev))
            .map(|(id, o)| (id, o.clone()))
            .collect();
        hits.sort_by_key(|(id, _)| *id);
        hits
    }

    pub fn observation_count(&self) -> usize {
        self.regs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{UniqKey, VSet};
    use crate::vdom::VdomElement;

    fn new_bus() -> ObserverBus {
        ObserverBus::new(Rc::new(RefCell::new(VecDeque::new())))
    }

    #[test]
    fn test_container_mutation_posts_event() {
        let mut bus = new_bus();
        let set = VSet::new(UniqKey::Whole);
        let source = Variant::Set(set.clone());
        let handler = VdomElement::new("observe").into_rc();
        bus.observe(0, &source, "grow", "*", handler).unwrap();

        set.insert(Variant::LongInt(1), false).unwrap();

        let sink = bus.sink();
        let ev = sink.borrow_mut().pop_front().expect("event posted");
        assert_eq!(ev.event, "grow");
        assert_eq!(ev.source, source.container_key().unwrap());
        assert_eq!(bus.match_event(&ev).len(), 1);
    }

    #[test]
    fn test_sub_name_matching() {
        let mut bus = new_bus();
        let source = Variant::object();
        let handler = VdomElement::new("observe").into_rc();
        bus.observe(0, &source, "expired", "clock", handler.clone()).unwrap();
        bus.observe(0, &source, "expired", "*", handler).unwrap();

        let key = source.container_key().unwrap();
        let ev = RawEvent {
            source: key,
            event: "expired".into(),
            sub: "clock".into(),
            payload: Variant::Null,
        };
        assert_eq!(bus.match_event(&ev).len(), 2);

        let other = RawEvent { sub: "other".into(), ..ev };
        assert_eq!(bus.match_event(&other).len(), 1);
    }

    #[test]
    fn test_forget_removes_adapter() {
        let mut bus = new_bus();
        let set = VSet::new(UniqKey::Whole);
        let source = Variant::Set(set.clone());
        let handler = VdomElement::new("observe").into_rc();
        bus.observe(3, &source, "change", "*", handler).unwrap();
        assert_eq!(bus.forget(3, &source, "change"), 1);
        assert_eq!(bus.observation_count(), 0);

        // Listener gone: mutations no longer post.
        set.insert(Variant::LongInt(1), false).unwrap();
        assert!(bus.sink().borrow().is_empty());
    }

    #[test]
    fn test_remove_coroutine() {
        let mut bus = new_bus();
        let source = Variant::object();
        let handler = VdomElement::new("observe").into_rc();
        bus.observe(1, &source, "expired", "*", handler.clone()).unwrap();
        bus.observe(2, &source, "expired", "*", handler).unwrap();
        bus.remove_coroutine(1);
        assert_eq!(bus.observation_count(), 1);
    }

    #[test]
    fn test_scalar_not_observable() {
        let mut bus = new_bus();
        let handler = VdomElement::new("observe").into_rc();
        let err = bus.observe(0, &Variant::LongInt(1), "x", "*", handler).unwrap_err();
        assert_eq!(err.kind(), "invalid-value");
    }
}
