//! Named timers bound to the `$TIMERS` variant set.
//!
//! Each coroutine's document scope carries a `$TIMERS` set whose members
//! are objects `{id, interval (ms), active ∈ {"yes","no"}}`, unique by
//! `id`. Listeners on the set keep an internal id → timer table in sync:
//! `grow` creates a timer (armed when active), `shrink` destroys it, and
//! `change` re-reads interval/active. A due timer posts the observation
//! event `(source=$TIMERS, event="expired", sub=id)`.
//!
//! The timer facility is deadline-based: the instance run loop calls
//! [`Timers::poll_due`] with the current instant, which also keeps tests
//! free of real sleeping. Timers repeat by default; a member with
//! `"oneshot":"yes"` fires once and deactivates.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::observer::{EventSink, RawEvent, SourceKey};
use crate::variant::{ListenerHandle, ListenerOp, UniqKey, VSet, Variant};

/// Name the set is bound under in document scope (`$TIMERS`).
pub const TIMERS_VAR_NAME: &str = "TIMERS";

const EVENT_EXPIRED: &str = "expired";
const KEY_ID: &str = "id";
const KEY_INTERVAL: &str = "interval";
const KEY_ACTIVE: &str = "active";
const KEY_ONESHOT: &str = "oneshot";
const VAL_YES: &str = "yes";

/// One internal timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub interval: Duration,
    pub active: bool,
    pub oneshot: bool,
    pub deadline: Option<Instant>,
}

type Table = Rc<RefCell<FxHashMap<CompactString, TimerEntry>>>;

/// The per-coroutine timer facility.
pub struct Timers {
    set: VSet,
    table: Table,
    handles: Vec<ListenerHandle>,
    sink: EventSink,
}

impl Timers {
    /// Create the `$TIMERS` set and install its listeners.
    pub fn install(sink: EventSink) -> Self {
        let set = VSet::new(UniqKey::by_prop(KEY_ID));
        let table: Table = Rc::new(RefCell::new(FxHashMap::default()));

        let mut handles = Vec::new();
        for op in [ListenerOp::Grow, ListenerOp::Shrink, ListenerOp::Change] {
            let table = table.clone();
            handles.push(set.register_post_listener(
                op,
                Rc::new(move |source: &Variant, _op, _args| {
                    if let Variant::Set(set) = source {
                        sync_table(&table, &set.items());
                    }
                    true
                }),
            ));
        }

        Self { set, table, handles, sink }
    }

    /// The variant to bind as `$TIMERS` in document scope.
    pub fn variant(&self) -> Variant {
        Variant::Set(self.set.clone())
    }

    /// Identity of the set, as seen by observation registrations.
    pub fn source_key(&self) -> SourceKey {
        self.set.ptr_key()
    }

    /// Snapshot of one timer, for introspection and tests.
    pub fn entry(&self, id: &str) -> Option<TimerEntry> {
        self.table.borrow().get(id).cloned()
    }

    pub fn timer_count(&self) -> usize {
        self.table.borrow().len()
    }

    /// The earliest pending deadline, for run-loop waits.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.table
            .borrow()
            .values()
            .filter_map(|e| if e.active { e.deadline } else { None })
            .min()
    }

    /// Fire every timer due at `now`, posting `expired` events; repeating
    /// timers re-arm, one-shot timers deactivate. Returns the ids fired.
    pub fn poll_due(&self, now: Instant) -> Vec<CompactString> {
        let mut fired = Vec::new();
        {
            let mut table = self.table.borrow_mut();
            for (id, entry) in table.iter_mut() {
                if !entry.active {
                    continue;
                }
                let Some(deadline) = entry.deadline else { continue };
                if deadline > now {
                    continue;
                }
                fired.push(id.clone());
                if entry.oneshot {
                    entry.active = false;
                    entry.deadline = None;
                } else {
                    entry.deadline = Some(now + entry.interval);
                }
            }
        }
        let source = self.source_key();
        for id in &fired {
            debug!(timer = %id, "timer expired");
            self.sink.borrow_mut().push_back(RawEvent {
                source,
                event: CompactString::new(EVENT_EXPIRED),
                sub: id.clone(),
                payload: Variant::Undefined,
            });
        }
        fired
    }

    /// Stop everything and detach from the set (coroutine teardown).
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            self.set.revoke_listener(handle);
        }
        self.table.borrow_mut().clear();
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reconcile the timer table with the current set membership. Handles
/// grow, shrink, change, and whole-set displacement uniformly.
fn sync_table(table: &Table, members: &[Variant]) {
    let now = Instant::now();
    let mut table = table.borrow_mut();
    let mut seen: Vec<CompactString> = Vec::with_capacity(members.len());

    for member in members {
        let Variant::Object(obj) = member else { continue };
        let Some(id) = obj.get(KEY_ID).map(|v| CompactString::from(v.stringify())) else {
            continue;
        };
        let interval =
            Duration::from_millis(obj.get(KEY_INTERVAL).map(|v| v.cast_to_u64()).unwrap_or(0));
        let active = obj
            .get(KEY_ACTIVE)
            .map(|v| v.stringify() == VAL_YES)
            .unwrap_or(false);
        let oneshot = obj
            .get(KEY_ONESHOT)
            .map(|v| v.stringify() == VAL_YES)
            .unwrap_or(false);
        seen.push(id.clone());

        match table.get_mut(&id) {
            Some(entry) => {
                let interval_changed = entry.interval != interval;
                entry.interval = interval;
                entry.oneshot = oneshot;
                if active && (!entry.active || interval_changed) {
                    entry.deadline = Some(now + interval);
                } else if !active {
                    entry.deadline = None;
                }
                entry.active = active;
            }
            None => {
                table.insert(
                    id,
                    TimerEntry {
                        interval,
                        active,
                        oneshot,
                        deadline: active.then(|| now + interval),
                    },
                );
            }
        }
    }

    table.retain(|id, _| seen.contains(id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn timer_member(id: &str, interval_ms: u64, active: bool) -> Variant {
        let obj = crate::variant::VObject::new();
        obj.set(KEY_ID, Variant::string(id)).unwrap();
        obj.set(KEY_INTERVAL, Variant::ulongint(interval_ms)).unwrap();
        obj.set(KEY_ACTIVE, Variant::string(if active { "yes" } else { "no" })).unwrap();
        Variant::Object(obj)
    }

    fn new_timers() -> Timers {
        Timers::install(Rc::new(RefCell::new(VecDeque::new())))
    }

    #[test]
    fn test_grow_creates_timer() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        set.insert(timer_member("clock", 1000, true), false).unwrap();

        let entry = timers.entry("clock").expect("timer materialized");
        assert_eq!(entry.interval, Duration::from_millis(1000));
        assert!(entry.active);
        assert!(entry.deadline.is_some());
    }

    #[test]
    fn test_unite_through_set_materializes() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        let batch = Variant::array_from(vec![timer_member("clock", 1000, true)]);
        set.unite(&batch).unwrap();
        assert_eq!(timers.timer_count(), 1);
    }

    #[test]
    fn test_shrink_destroys_timer() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        set.insert(timer_member("t", 10, true), false).unwrap();
        set.remove_by_key(&Variant::string("t")).unwrap();
        assert_eq!(timers.timer_count(), 0);
    }

    #[test]
    fn test_change_flips_active() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        set.insert(timer_member("t", 10, true), false).unwrap();
        set.overwrite_member(timer_member("t", 10, false)).unwrap();
        let entry = timers.entry("t").unwrap();
        assert!(!entry.active);
        assert!(entry.deadline.is_none());
    }

    #[test]
    fn test_poll_due_fires_and_rearms() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        set.insert(timer_member("clock", 1000, true), false).unwrap();

        let later = Instant::now() + Duration::from_millis(1500);
        let fired = timers.poll_due(later);
        assert_eq!(fired, vec![CompactString::new("clock")]);

        // Re-armed relative to the poll instant.
        let entry = timers.entry("clock").unwrap();
        assert_eq!(entry.deadline, Some(later + Duration::from_millis(1000)));

        // Nothing due immediately after.
        assert!(timers.poll_due(later).is_empty());
    }

    #[test]
    fn test_expired_event_shape() {
        let sink: EventSink = Rc::new(RefCell::new(VecDeque::new()));
        let timers = Timers::install(sink.clone());
        let Variant::Set(set) = timers.variant() else { panic!() };
        set.insert(timer_member("clock", 5, true), false).unwrap();
        timers.poll_due(Instant::now() + Duration::from_millis(10));

        let ev = sink.borrow_mut().pop_front().expect("expired posted");
        assert_eq!(ev.source, timers.source_key());
        assert_eq!(ev.event, EVENT_EXPIRED);
        assert_eq!(ev.sub, "clock");
    }

    #[test]
    fn test_oneshot_deactivates() {
        let timers = new_timers();
        let Variant::Set(set) = timers.variant() else { panic!() };
        let member = timer_member("once", 5, true);
        member.as_object().unwrap().set(KEY_ONESHOT, Variant::string("yes")).unwrap();
        set.insert(member, false).unwrap();

        let later = Instant::now() + Duration::from_millis(10);
        assert_eq!(timers.poll_due(later).len(), 1);
        let entry = timers.entry("once").unwrap();
        assert!(!entry.active);
        assert!(timers.poll_due(later + Duration::from_millis(10)).is_empty());
    }
}
