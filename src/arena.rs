//! Growable free-list arena backing the timer nodes.
//!
//! Slots in the wheel hold intrusive index links into this arena rather
//! than owning pointers. Each entry carries a generation counter that is
//! bumped on removal, so a stale [`TimerId`] held by the caller can never
//! reach an entry that has been freed or reused.

pub(crate) const NIL: u32 = u32::MAX;

/// Stable handle to a registered timer.
///
/// `TimerId` is `Copy`, so callbacks may capture ids of other timers in
/// the same wheel and schedule or cancel them while firing. An id goes
/// stale once its timer is deregistered; every operation on a stale id
/// is a defined no-op (or an error for `schedule`), never a misfire
/// against whatever timer later reuses the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u64,
}

impl TimerId {
    pub(crate) fn new(index: u32, generation: u64) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> u32 {
        self.index
    }
}

enum State<V> {
    Vacant { next: u32 },
    Occupied(V),
}

struct Entry<V> {
    generation: u64,
    state: State<V>,
}

pub(crate) struct Arena<V> {
    entries: Vec<Entry<V>>,
    free_head: u32,
    len: usize,
}

impl<V> Arena<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value, reusing a freed entry when one is available.
    pub fn insert(&mut self, value: V) -> TimerId {
        self.len += 1;

        if self.free_head != NIL {
            let index = self.free_head;
            let entry = &mut self.entries[index as usize];
            let State::Vacant { next } = entry.state else {
                unreachable!("free list points at occupied entry {index}");
            };
            self.free_head = next;
            entry.state = State::Occupied(value);
            return TimerId::new(index, entry.generation);
        }

        debug_assert!(self.entries.len() < NIL as usize, "arena exhausted");
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            state: State::Occupied(value),
        });
        TimerId::new(index, 0)
    }

    /// Remove by id. Returns `None` if the id is stale.
    pub fn remove(&mut self, id: TimerId) -> Option<V> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation || matches!(entry.state, State::Vacant { .. }) {
            return None;
        }

        // Bump the generation so outstanding copies of this id go stale.
        entry.generation += 1;
        let old = std::mem::replace(
            &mut entry.state,
            State::Vacant {
                next: self.free_head,
            },
        );
        self.free_head = id.index;
        self.len -= 1;

        match old {
            State::Occupied(value) => Some(value),
            State::Vacant { .. } => unreachable!(),
        }
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: TimerId) -> Option<&V> {
        match self.entries.get(id.index as usize) {
            Some(entry) if entry.generation == id.generation => match &entry.state {
                State::Occupied(value) => Some(value),
                State::Vacant { .. } => None,
            },
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut V> {
        match self.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation => match &mut entry.state {
                State::Occupied(value) => Some(value),
                State::Vacant { .. } => None,
            },
            _ => None,
        }
    }

    /// Access by raw index. Entries reached through live intrusive links
    /// are occupied by invariant.
    pub fn index(&self, index: u32) -> &V {
        match &self.entries[index as usize].state {
            State::Occupied(value) => value,
            State::Vacant { .. } => unreachable!("dangling intrusive link: entry {index} is vacant"),
        }
    }

    pub fn index_mut(&mut self, index: u32) -> &mut V {
        match &mut self.entries[index as usize].state {
            State::Occupied(value) => value,
            State::Vacant { .. } => unreachable!("dangling intrusive link: entry {index} is vacant"),
        }
    }

    /// Current generation of an occupied entry, for rebuilding an id from
    /// a raw link.
    pub fn generation_at(&self, index: u32) -> u64 {
        debug_assert!(
            matches!(self.entries[index as usize].state, State::Occupied(_)),
            "generation_at on vacant entry {index}"
        );
        self.entries[index as usize].generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Basic Insert / Remove ====================

    #[test]
    fn test_insert_and_get() {
        let mut arena: Arena<u32> = Arena::new();

        let id = arena.insert(42);

        assert_eq!(arena.get(id), Some(&42));
        assert_eq!(arena.len(), 1);
        assert!(!arena.is_empty());
    }

    #[test]
    fn test_remove_returns_value() {
        let mut arena: Arena<u32> = Arena::new();

        let id = arena.insert(42);
        assert_eq!(arena.remove(id), Some(42));

        assert!(arena.is_empty());
        assert_eq!(arena.get(id), None);
    }

    #[test]
    fn test_remove_twice_is_none() {
        let mut arena: Arena<u32> = Arena::new();

        let id = arena.insert(7);
        assert_eq!(arena.remove(id), Some(7));
        assert_eq!(arena.remove(id), None);
    }

    // ==================== Generations ====================

    #[test]
    fn test_stale_id_after_reuse() {
        let mut arena: Arena<u32> = Arena::new();

        let old = arena.insert(1);
        arena.remove(old);

        // The entry index is reused, the generation is not.
        let new = arena.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);

        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut arena: Arena<u32> = Arena::new();

        let a = arena.insert(1);
        let b = arena.insert(2);
        let _c = arena.insert(3);

        arena.remove(a);
        arena.remove(b);

        // Most recently freed entry is handed out first.
        let d = arena.insert(4);
        assert_eq!(d.index(), b.index());
        let e = arena.insert(5);
        assert_eq!(e.index(), a.index());
    }

    // ==================== Mutation ====================

    #[test]
    fn test_get_mut() {
        let mut arena: Arena<u32> = Arena::new();

        let id = arena.insert(10);
        *arena.get_mut(id).unwrap() += 5;

        assert_eq!(arena.get(id), Some(&15));
    }

    #[test]
    fn test_index_access() {
        let mut arena: Arena<String> = Arena::new();

        let id = arena.insert("hello".to_string());

        assert_eq!(arena.index(id.index()), "hello");
        arena.index_mut(id.index()).push_str(" world");
        assert_eq!(arena.get(id), Some(&"hello world".to_string()));
    }

    // ==================== Bookkeeping ====================

    #[test]
    fn test_len_tracking() {
        let mut arena: Arena<u32> = Arena::new();
        let mut ids = vec![];

        for i in 0..50 {
            ids.push(arena.insert(i));
            assert_eq!(arena.len(), ids.len());
        }

        for (i, id) in ids.iter().enumerate() {
            arena.remove(*id);
            assert_eq!(arena.len(), 49 - i);
        }

        assert!(arena.is_empty());
    }

    #[test]
    fn test_churn_reuses_entries() {
        let mut arena: Arena<u32> = Arena::new();

        for round in 0..100u32 {
            let id = arena.insert(round);
            assert_eq!(arena.remove(id), Some(round));
        }

        // Single entry recycled throughout.
        assert_eq!(arena.entries.len(), 1);
    }
}
