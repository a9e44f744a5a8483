//! Generation-checked handles and the arena that issues them.
//!
//! A handle is a slot index plus the generation the slot had when the value
//! was inserted. Removing a value bumps the slot generation, so a handle kept
//! past destruction no longer resolves, even after the slot is reused.

use std::fmt;
use std::marker::PhantomData;

/// A typed index + generation pair issued by an [`Arena`].
pub trait ArenaHandle: Copy + Eq + fmt::Debug {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::handle::ArenaHandle for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}

pub(crate) use define_handle;

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

/// Slot storage addressed by generation-checked handles.
pub struct Arena<H, V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<fn() -> H>,
}

impl<H: ArenaHandle, V> Default for Arena<H, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ArenaHandle, V> Arena<H, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Store a value and return its handle.
    pub fn insert(&mut self, value: V) -> H {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return H::from_parts(index, slot.generation);
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        H::from_parts(index, 0)
    }

    pub fn get(&self, handle: H) -> Option<&V> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut V> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value; the handle and every copy of it become stale.
    pub fn remove(&mut self, handle: H) -> Option<V> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Some(value)
    }

    /// Remove every value, invalidating all outstanding handles.
    pub fn drain(&mut self) -> Vec<(H, V)> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                #[allow(clippy::cast_possible_truncation)]
                let index = index as u32;
                drained.push((H::from_parts(index, slot.generation), value));
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
            }
        }
        self.len = 0;
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &V)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            #[allow(clippy::cast_possible_truncation)]
            let index = index as u32;
            slot.value
                .as_ref()
                .map(|value| (H::from_parts(index, slot.generation), value))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    define_handle!(TestHandle);

    #[test]
    fn insert_and_get() {
        let mut arena: Arena<TestHandle, &str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut arena: Arena<TestHandle, u32> = Arena::new();
        let old = arena.insert(1);
        assert_eq!(arena.remove(old), Some(1));

        let new = arena.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn drain_invalidates_everything() {
        let mut arena: Arena<TestHandle, u32> = Arena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(handles[1]);

        let drained = arena.drain();
        assert_eq!(drained.len(), 3);
        assert!(arena.is_empty());
        assert!(handles.iter().all(|&h| !arena.contains(h)));
    }
}
