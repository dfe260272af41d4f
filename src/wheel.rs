use log::trace;
use thiserror::Error;

use crate::arena::{Arena, TimerId, NIL};
use crate::timer::Timer;
use crate::{LEVEL_BITS, NUM_LEVELS, NUM_SLOTS, SLOT_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A delay of zero ticks is rejected rather than interpreted as
    /// "fires on the next advance"; the caller decides what a tick means,
    /// the wheel only promises determinism.
    #[error("cannot schedule a timer zero ticks ahead")]
    ZeroDelay,
    /// The id does not name a registered timer (never registered, or
    /// deregistered since).
    #[error("timer id does not name a registered timer")]
    UnknownTimer,
    /// `now + delay` would pass `u64::MAX`. A wrapped expiration would sit
    /// behind the cursor at every level and fire early, so it is rejected.
    #[error("delay overflows the tick counter")]
    DelayOverflow,
}

/// Where a node currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Registered but not armed.
    Idle,
    /// Linked into a slot list, waiting to cascade or fire.
    Slot { level: u8, slot: u8 },
    /// Detached from its slot this tick, queued to fire.
    Pending,
}

struct Node<T> {
    /// Taken out of the node while its callback runs, so the callback can
    /// receive `&mut` to the wheel without aliasing itself.
    timer: Option<T>,
    expiration: u64,
    prev: u32,
    next: u32,
    position: Position,
}

/// Head and tail of one intrusive node list.
#[derive(Debug, Clone, Copy)]
struct List {
    head: u32,
    tail: u32,
}

impl List {
    const EMPTY: List = List {
        head: NIL,
        tail: NIL,
    };
}

/// Hierarchical timer wheel.
///
/// Eight levels of 256 slots each cover the full `u64` tick range: level
/// *k* files a timer under base-256 digit *k* of its absolute expiration,
/// chosen as the highest digit that differs from the current tick. As the
/// clock rotates past a coarse slot, its timers cascade down to finer
/// levels until they reach level 0 and fire.
///
/// The wheel owns timer storage in an arena and hands out stable
/// [`TimerId`]s; schedule, cancel, and fire are O(1) link operations on
/// intrusive lists threaded through the arena. Nodes survive firing and
/// can be re-armed with the same callback any number of times.
pub struct TimerWheel<T: Timer> {
    arena: Arena<Node<T>>,
    levels: Box<[[List; NUM_SLOTS]; NUM_LEVELS]>,
    /// Nodes detached from the current tick's slot, about to fire.
    pending: List,
    now: u64,
}

impl<T: Timer> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Timer> TimerWheel<T> {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            levels: Box::new([[List::EMPTY; NUM_SLOTS]; NUM_LEVELS]),
            pending: List::EMPTY,
            now: 0,
        }
    }

    /// Current tick. Advanced only by [`advance`](Self::advance).
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of registered timers, armed or not.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Register a timer without arming it. The node starts inactive and
    /// holds its callback until [`deregister`](Self::deregister).
    pub fn register(&mut self, timer: T) -> TimerId {
        self.arena.insert(Node {
            timer: Some(timer),
            expiration: 0,
            prev: NIL,
            next: NIL,
            position: Position::Idle,
        })
    }

    /// Register and arm in one step. A rejected delay registers nothing.
    pub fn insert(&mut self, timer: T, delay: u64) -> Result<TimerId, ScheduleError> {
        if delay == 0 {
            return Err(ScheduleError::ZeroDelay);
        }
        if self.now.checked_add(delay).is_none() {
            return Err(ScheduleError::DelayOverflow);
        }
        let id = self.register(timer);
        self.schedule(id, delay)?;
        Ok(id)
    }

    /// Arm (or re-arm) a timer to fire `delay` ticks from now.
    ///
    /// Re-scheduling an armed timer is last-write-wins: the node is
    /// unlinked from its current slot first, so it fires exactly once, at
    /// the most recently scheduled expiration. No firing happens from the
    /// implicit unlink.
    pub fn schedule(&mut self, id: TimerId, delay: u64) -> Result<(), ScheduleError> {
        if delay == 0 {
            return Err(ScheduleError::ZeroDelay);
        }
        if !self.arena.contains(id) {
            return Err(ScheduleError::UnknownTimer);
        }
        let expiration = self
            .now
            .checked_add(delay)
            .ok_or(ScheduleError::DelayOverflow)?;

        // All checks passed; a rejected schedule leaves any prior arming
        // untouched.
        self.unlink(id.index());

        let (level, slot) = placement(self.now, expiration);
        self.arena.index_mut(id.index()).expiration = expiration;
        self.push_back(level, slot, id.index());

        trace!("schedule {id:?}: +{delay} -> tick {expiration} (level {level}, slot {slot})");
        Ok(())
    }

    /// Disarm a timer. Returns whether it was armed. Idempotent, safe on
    /// stale ids, and callable from within any callback, including the
    /// one belonging to the timer being cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if !self.arena.contains(id) {
            return false;
        }
        let was_armed = self.unlink(id.index());
        if was_armed {
            trace!("cancel {id:?}");
        }
        was_armed
    }

    /// Whether the timer is currently armed.
    pub fn active(&self, id: TimerId) -> bool {
        self.arena
            .get(id)
            .is_some_and(|node| node.position != Position::Idle)
    }

    /// Shared access to a timer's callback value. Returns `None` for a
    /// stale id, and for the timer currently firing, whose value is moved
    /// out of the wheel for the duration of its callback.
    pub fn get(&self, id: TimerId) -> Option<&T> {
        self.arena.get(id).and_then(|node| node.timer.as_ref())
    }

    /// Mutable access to a timer's callback value. Same availability as
    /// [`get`](Self::get): `None` when stale or mid-fire.
    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut T> {
        self.arena.get_mut(id).and_then(|node| node.timer.as_mut())
    }

    /// Destroy a timer, cancelling it if armed. Returns the callback
    /// value, or `None` if the id is stale or the timer is mid-fire.
    pub fn deregister(&mut self, id: TimerId) -> Option<T> {
        if !self.arena.contains(id) {
            return None;
        }
        self.unlink(id.index());
        self.arena.remove(id).and_then(|node| node.timer)
    }

    /// Advance the clock by `ticks` unit ticks, firing and cascading as
    /// each tick passes. `advance(n)` is observationally equivalent to
    /// `n` calls of `advance(1)`; `advance(0)` is a no-op.
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Minimum ticks until the earliest armed timer fires, capped at
    /// `max`. Non-mutating and non-firing; returns `max` when nothing is
    /// armed within the horizon, and 0 when called from a callback while
    /// other timers are still queued to fire this tick.
    pub fn ticks_to_next_event(&self, max: u64) -> u64 {
        if self.pending.head != NIL {
            return 0;
        }

        let mut best = max;
        for level in 0..NUM_LEVELS {
            let shift = LEVEL_BITS * level;
            let cursor = ((self.now >> shift) & SLOT_MASK) as usize;
            let into_window = self.now & ((1u64 << shift) - 1);

            // Occupied slots at a level sit strictly ahead of its cursor:
            // placement files a node under the highest differing digit, and
            // cascading empties each slot as the cursor enters it.
            for slot in cursor + 1..NUM_SLOTS {
                let lower_bound = (((slot - cursor) as u64) << shift) - into_window;
                if lower_bound >= best {
                    break;
                }
                let mut index = self.levels[level][slot].head;
                if index == NIL {
                    continue;
                }
                // Nodes carry absolute expirations, so a coarse slot still
                // yields the exact distance, not the window bound.
                while index != NIL {
                    let node = self.arena.index(index);
                    best = best.min(node.expiration - self.now);
                    index = node.next;
                }
                break;
            }
        }
        best
    }

    fn step(&mut self) {
        self.now = self.now.wrapping_add(1);

        // Cascade every outer level whose counter just wrapped, coarsest
        // work last: a level-k node re-places below level k, never into
        // another slot cascaded this same tick.
        for level in 1..NUM_LEVELS {
            let mask = (1u64 << (LEVEL_BITS * level)) - 1;
            if self.now & mask != 0 {
                break;
            }
            self.cascade(level);
        }

        let slot = (self.now & SLOT_MASK) as usize;
        self.stage_slot(slot);
        self.run_pending();
    }

    /// Detach every node in the given slot of `level` and re-place it by
    /// its unchanged expiration against the new current tick. A node whose
    /// remaining delay reached zero lands in the level-0 slot drained this
    /// very tick, so it still fires on time.
    fn cascade(&mut self, level: usize) {
        let slot = ((self.now >> (LEVEL_BITS * level)) & SLOT_MASK) as usize;
        let list = std::mem::replace(&mut self.levels[level][slot], List::EMPTY);

        let mut index = list.head;
        while index != NIL {
            let node = self.arena.index_mut(index);
            let next = node.next;
            let expiration = node.expiration;
            node.prev = NIL;
            node.next = NIL;
            node.position = Position::Idle;

            let (new_level, new_slot) = placement(self.now, expiration);
            debug_assert!(new_level < level, "cascade must re-place downward");
            self.push_back(new_level, new_slot, index);

            index = next;
        }
    }

    /// Move the whole level-0 slot onto the pending list in one splice,
    /// before anything is invoked. Callbacks may then relink any slot,
    /// including this one, without disturbing the snapshot.
    fn stage_slot(&mut self, slot: usize) {
        let list = std::mem::replace(&mut self.levels[0][slot], List::EMPTY);
        if list.head == NIL {
            return;
        }

        // Retag so a reentrant cancel can find these nodes in the pending
        // list rather than the slot they were detached from.
        let mut index = list.head;
        while index != NIL {
            let node = self.arena.index_mut(index);
            node.position = Position::Pending;
            index = node.next;
        }

        if self.pending.tail != NIL {
            self.arena.index_mut(self.pending.tail).next = list.head;
            self.arena.index_mut(list.head).prev = self.pending.tail;
            self.pending.tail = list.tail;
        } else {
            self.pending = list;
        }
    }

    fn run_pending(&mut self) {
        while self.pending.head != NIL {
            let index = self.pending.head;
            self.unlink(index);

            let id = TimerId::new(index, self.arena.generation_at(index));
            let timer = self.arena.index_mut(index).timer.take();
            debug_assert!(timer.is_some(), "pending node has no payload");
            let Some(mut timer) = timer else { continue };

            trace!("fire {id:?} at tick {}", self.now);
            timer.fire(self, id);

            // Hand the callback back unless the node deregistered itself.
            if let Some(node) = self.arena.get_mut(id) {
                node.timer = Some(timer);
            }
        }
    }

    /// Append at the tail of a slot list; same-slot timers fire in
    /// insertion order.
    fn push_back(&mut self, level: usize, slot: usize, index: u32) {
        let tail = self.levels[level][slot].tail;
        {
            let node = self.arena.index_mut(index);
            node.prev = tail;
            node.next = NIL;
            node.position = Position::Slot {
                level: level as u8,
                slot: slot as u8,
            };
        }

        if tail != NIL {
            self.arena.index_mut(tail).next = index;
        } else {
            self.levels[level][slot].head = index;
        }
        self.levels[level][slot].tail = index;
    }

    /// Unlink a node from whichever list holds it. Returns whether it was
    /// linked at all.
    fn unlink(&mut self, index: u32) -> bool {
        let node = self.arena.index(index);
        let position = node.position;
        if position == Position::Idle {
            return false;
        }
        let (prev, next) = (node.prev, node.next);

        if prev != NIL {
            self.arena.index_mut(prev).next = next;
        }
        if next != NIL {
            self.arena.index_mut(next).prev = prev;
        }

        let list = match position {
            Position::Slot { level, slot } => &mut self.levels[level as usize][slot as usize],
            Position::Pending => &mut self.pending,
            Position::Idle => unreachable!(),
        };
        if list.head == index {
            list.head = next;
        }
        if list.tail == index {
            list.tail = prev;
        }

        let node = self.arena.index_mut(index);
        node.prev = NIL;
        node.next = NIL;
        node.position = Position::Idle;
        true
    }
}

/// Level and slot for a timer expiring at `expiration`, seen from `now`:
/// the level of the highest base-256 digit that differs, and that digit of
/// the expiration. A remaining delay that is an exact multiple of 256
/// lands in slot 0 of the next level down by this rule, which is required,
/// not incidental.
fn placement(now: u64, expiration: u64) -> (usize, usize) {
    let diff = now ^ expiration;
    let level = if diff == 0 {
        0
    } else {
        (63 - diff.leading_zeros()) as usize / LEVEL_BITS
    };
    let slot = ((expiration >> (LEVEL_BITS * level)) & SLOT_MASK) as usize;
    (level, slot)
}
