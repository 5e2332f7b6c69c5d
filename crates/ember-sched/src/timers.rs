use ember_time::is_before;

/// Handle to a timer record registered with the scheduler.
///
/// The record lives in the scheduler's arena; the id is the owner's only
/// reference to it. Adding an id that is already queued, or using an id after
/// unregistering it, is a caller contract violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

impl TimerId {
    /// The always-present queue head that fires every 100 ms.
    pub(crate) const PERIODIC: TimerId = TimerId(0);
    /// The always-present queue tail; its waketime stays `periodic + 2^31`.
    pub(crate) const SENTINEL: TimerId = TimerId(1);
    /// Trampoline record used to splice out the queue head.
    pub(crate) const DELETED: TimerId = TimerId(2);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    waketime: u32,
    next: Option<TimerId>,
}

/// Waketime-ordered singly-linked list of timer records, arena-backed.
///
/// The list is never empty: it begins with the periodic timer and ends with
/// the sentinel. Because `sentinel.waketime` is kept exactly
/// `periodic.waketime + 0x8000_0000`, any legitimate waketime is before the
/// sentinel's under the wrap-aware ordering, so insertion walks terminate at
/// the sentinel without an end-of-list check.
#[derive(Debug)]
pub(crate) struct TimerList {
    slots: Vec<Slot>,
    free: Vec<TimerId>,
    head: TimerId,
    /// Timer most recently inserted or re-inserted; insertion may start its
    /// walk here instead of at the head.
    last_insert: TimerId,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        let periodic = Slot {
            waketime: 0,
            next: Some(TimerId::SENTINEL),
        };
        let sentinel = Slot {
            waketime: 0x8000_0000,
            next: None,
        };
        let deleted = Slot::default();
        Self {
            slots: vec![periodic, sentinel, deleted],
            free: Vec::new(),
            head: TimerId::PERIODIC,
            last_insert: TimerId::PERIODIC,
        }
    }

    pub(crate) fn alloc(&mut self) -> TimerId {
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Slot::default();
            return id;
        }
        let id = TimerId(u32::try_from(self.slots.len()).expect("timer arena overflowed u32"));
        self.slots.push(Slot::default());
        id
    }

    pub(crate) fn release(&mut self, id: TimerId) {
        debug_assert!(!self.is_queued(id), "released timer is still queued");
        self.free.push(id);
    }

    pub(crate) fn head(&self) -> TimerId {
        self.head
    }

    pub(crate) fn set_head(&mut self, id: TimerId) {
        self.head = id;
    }

    pub(crate) fn last_insert(&self) -> TimerId {
        self.last_insert
    }

    pub(crate) fn set_last_insert(&mut self, id: TimerId) {
        self.last_insert = id;
    }

    pub(crate) fn waketime(&self, id: TimerId) -> u32 {
        self.slots[id.index()].waketime
    }

    pub(crate) fn set_waketime(&mut self, id: TimerId, waketime: u32) {
        self.slots[id.index()].waketime = waketime;
    }

    pub(crate) fn next(&self, id: TimerId) -> Option<TimerId> {
        self.slots[id.index()].next
    }

    pub(crate) fn set_next(&mut self, id: TimerId, next: Option<TimerId>) {
        self.slots[id.index()].next = next;
    }

    /// Links `id` into the list at its waketime position, walking from the
    /// record after `start`. `start.waketime` must not be after `waketime`.
    pub(crate) fn insert_from(&mut self, start: TimerId, id: TimerId, waketime: u32) {
        let mut prev = start;
        let pos = loop {
            let pos = self
                .next(prev)
                .expect("timer list walk ran past the sentinel");
            // The sentinel is an unconditional stop: a waketime equal to the
            // sentinel's is "not before" it and still lands in front of it.
            if pos == TimerId::SENTINEL || is_before(waketime, self.waketime(pos)) {
                break pos;
            }
            prev = pos;
        };
        self.set_waketime(id, waketime);
        self.set_next(id, Some(pos));
        self.set_next(prev, Some(id));
    }

    /// Unlinks `id`. A deleted head is replaced by the `deleted` trampoline
    /// (keeping its waketime) so an in-flight dispatch completes gracefully.
    pub(crate) fn del(&mut self, id: TimerId) {
        if self.head == id {
            self.set_waketime(TimerId::DELETED, self.waketime(id));
            self.set_next(TimerId::DELETED, self.next(id));
            self.head = TimerId::DELETED;
        } else {
            let mut pos = self.head;
            while let Some(next) = self.next(pos) {
                if next == id {
                    self.set_next(pos, self.next(id));
                    break;
                }
                pos = next;
            }
        }
        if self.last_insert == id {
            self.last_insert = TimerId::PERIODIC;
        }
    }

    /// Drops all user timers, restoring the queue to `[periodic, sentinel]`
    /// behind the `deleted` trampoline.
    pub(crate) fn reset(&mut self) {
        self.set_waketime(TimerId::DELETED, self.waketime(TimerId::PERIODIC));
        self.set_next(TimerId::DELETED, Some(TimerId::PERIODIC));
        self.set_next(TimerId::PERIODIC, Some(TimerId::SENTINEL));
        self.head = TimerId::DELETED;
        self.last_insert = TimerId::PERIODIC;
    }

    pub(crate) fn is_queued(&self, id: TimerId) -> bool {
        let mut pos = Some(self.head);
        while let Some(cur) = pos {
            if cur == id {
                return true;
            }
            pos = self.next(cur);
        }
        false
    }

    pub(crate) fn queued_ids(&self) -> Vec<TimerId> {
        let mut out = Vec::new();
        let mut pos = Some(self.head);
        while let Some(cur) = pos {
            out.push(cur);
            pos = self.next(cur);
        }
        out
    }
}
