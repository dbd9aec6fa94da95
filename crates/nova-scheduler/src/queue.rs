use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// A keyed max-priority queue whose priorities can change after insertion.
///
/// Entries are ordered by priority (highest first), then by key (smallest
/// first) so ordering is deterministic. The map and the heap are kept in sync
/// lazily: changing a priority pushes a fresh heap entry and the stale one is
/// skipped when it surfaces.
pub struct PriorityQueue<K, P, T> {
    slots: HashMap<K, Slot<P, T>>,
    heap: BinaryHeap<HeapEntry<K, P>>,
    next_generation: u64,
}

struct Slot<P, T> {
    priority: P,
    generation: u64,
    value: T,
}

struct HeapEntry<K, P> {
    priority: P,
    key: Reverse<K>,
    generation: u64,
}

impl<K: Ord, P: Ord> PartialEq for HeapEntry<K, P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, P: Ord> Eq for HeapEntry<K, P> {}

impl<K: Ord, P: Ord> PartialOrd for HeapEntry<K, P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, P: Ord> Ord for HeapEntry<K, P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl<K, P, T> Default for PriorityQueue<K, P, T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }
}

impl<K, P, T> PriorityQueue<K, P, T>
where
    K: Ord + Hash + Clone,
    P: Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub fn priority(&self, key: &K) -> Option<&P> {
        self.slots.get(key).map(|slot| &slot.priority)
    }

    /// Inserts `value` under `key`. An existing entry is replaced and its old
    /// value returned.
    pub fn push(&mut self, key: K, priority: P, value: T) -> Option<T> {
        let generation = self.bump_generation();
        self.heap.push(HeapEntry {
            priority: priority.clone(),
            key: Reverse(key.clone()),
            generation,
        });
        let previous = self.slots.insert(
            key,
            Slot {
                priority,
                generation,
                value,
            },
        );
        self.maybe_compact();
        previous.map(|slot| slot.value)
    }

    /// Rewrites the priority of a queued entry. Returns the new priority, or
    /// `None` if `key` is not queued.
    pub fn update_priority(&mut self, key: &K, update: impl FnOnce(&mut P)) -> Option<P> {
        let generation = self.bump_generation();
        let slot = self.slots.get_mut(key)?;
        update(&mut slot.priority);
        slot.generation = generation;
        let priority = slot.priority.clone();
        self.heap.push(HeapEntry {
            priority: priority.clone(),
            key: Reverse(key.clone()),
            generation,
        });
        self.maybe_compact();
        Some(priority)
    }

    pub fn pop(&mut self) -> Option<(K, T)> {
        while let Some(entry) = self.heap.pop() {
            let key = entry.key.0;
            let live = self
                .slots
                .get(&key)
                .is_some_and(|slot| slot.generation == entry.generation);
            if live {
                let slot = self.slots.remove(&key)?;
                return Some((key, slot.value));
            }
        }
        None
    }

    /// Removes an entry; its heap entry is discarded lazily.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let slot = self.slots.remove(key)?;
        if self.slots.is_empty() {
            self.heap.clear();
        }
        Some(slot.value)
    }

    /// Removes every entry matching `predicate`, returning them in no
    /// particular order.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&K, &T) -> bool) -> Vec<(K, T)> {
        let keys: Vec<K> = self
            .slots
            .iter()
            .filter(|(key, slot)| predicate(key, &slot.value))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                let value = self.remove(&key)?;
                Some((key, value))
            })
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(K, T)> {
        self.heap.clear();
        self.slots
            .drain()
            .map(|(key, slot)| (key, slot.value))
            .collect()
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() <= 2 * self.slots.len() + 64 {
            return;
        }
        let heap = self
            .slots
            .iter()
            .map(|(key, slot)| HeapEntry {
                priority: slot.priority.clone(),
                key: Reverse(key.clone()),
                generation: slot.generation,
            })
            .collect();
        self.heap = heap;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pop_all<P: Ord + Clone>(queue: &mut PriorityQueue<&'static str, P, ()>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.pop().map(|(key, ())| key)).collect()
    }

    #[test]
    fn ties_break_on_smallest_key() {
        let mut queue = PriorityQueue::new();
        queue.push("c", 0, ());
        queue.push("a", 0, ());
        queue.push("b", 0, ());
        assert_eq!(pop_all(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn bumped_entries_move_ahead() {
        let mut queue = PriorityQueue::new();
        queue.push("a", 0_u32, ());
        queue.push("b", 0, ());
        queue.push("c", 0, ());
        queue.update_priority(&"c", |bumps| *bumps += 1);
        assert_eq!(queue.update_priority(&"c", |bumps| *bumps += 1), Some(2));
        assert_eq!(queue.update_priority(&"missing", |bumps| *bumps += 1), None);
        assert_eq!(pop_all(&mut queue), vec!["c", "a", "b"]);
    }

    #[test]
    fn removed_entries_never_surface() {
        let mut queue = PriorityQueue::new();
        queue.push("a", 1, ());
        queue.push("b", 2, ());
        queue.update_priority(&"b", |p| *p += 5);
        assert_eq!(queue.remove(&"b"), Some(()));
        assert!(!queue.contains(&"b"));
        assert!(queue.contains(&"a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(pop_all(&mut queue), vec!["a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn heap_stays_bounded_under_repeated_bumps() {
        let mut queue = PriorityQueue::new();
        queue.push("a", 0_u64, ());
        for _ in 0..10_000 {
            queue.update_priority(&"a", |p| *p += 1);
        }
        assert!(queue.heap.len() <= 2 * queue.len() + 65);
        assert_eq!(queue.priority(&"a"), Some(&10_000));
    }
}
