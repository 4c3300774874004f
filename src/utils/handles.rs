// src/utils/handles.rs
//! Generation-checked handles for long-lived resources.
//!
//! Wallets, credential searches and blob readers/writers are addressed through a
//! [`Handle<T>`]: an arena slot index plus the generation that slot had when the
//! handle was issued. Closing a resource bumps the slot's generation, so a handle
//! kept after close no longer resolves even once the slot is reused.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed reference into a [`HandleArena<T>`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Packs the handle into one integer, generation in the high half.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_u64(raw: u64) -> Self {
        Handle::new(raw as u32, (raw >> 32) as u32)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_u64().hash(state)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Handle::from_u64)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena that hands out [`Handle`]s and recycles freed slots.
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        HandleArena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::new(index, 0)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Frees the slot and invalidates every outstanding copy of `handle`.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_is_rejected_after_reuse() {
        let mut arena = HandleArena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second");
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn handles_round_trip_through_integers() {
        let mut arena = HandleArena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let b = arena.insert(2);

        let raw = b.as_u64();
        assert_eq!(raw >> 32, 1);
        assert_eq!(Handle::<i32>::from_u64(raw), b);
        assert_eq!(serde_json::to_string(&b).unwrap(), raw.to_string());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut arena = HandleArena::new();
        let h = arena.insert(vec![1]);
        arena.get_mut(h).unwrap().push(2);
        assert_eq!(arena.get(h), Some(&vec![1, 2]));
        assert!(!arena.is_empty());
    }
}
