//! Recycling store shared by the fence, semaphore, command buffer and
//! descriptor pools.
//!
//! Native objects stay alive while they sit on the free list. Every hand-out
//! is a [`Lease`] carrying the entry generation; releasing bumps it so a
//! lease used after reclamation is rejected instead of aliasing the next user.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{GpuError, Result};

/// A claim on one pooled native object.
pub struct Lease<T> {
    index: u32,
    generation: u32,
    _object: PhantomData<fn() -> T>,
}

impl<T> Lease<T> {
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _object: PhantomData,
        }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Lease<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Lease<T> {}

impl<T> PartialEq for Lease<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Lease<T> {}

impl<T> Hash for Lease<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Free,
    Leased,
    // Unusable; kept only so teardown still destroys it.
    Retired,
}

struct Entry<T> {
    native: T,
    generation: u32,
    state: EntryState,
}

/// Free-list of native objects handed out as generation-checked leases.
pub struct LeasePool<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

impl<T: Copy> Default for LeasePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> LeasePool<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Lease a recycled object, or one produced by `create` if none is free.
    pub fn acquire(&mut self, create: impl FnOnce() -> Result<T>) -> Result<Lease<T>> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let native = create()?;
                #[allow(clippy::cast_possible_truncation)]
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    native,
                    generation: 0,
                    state: EntryState::Free,
                });
                index
            }
        };

        let entry = &mut self.entries[index as usize];
        entry.state = EntryState::Leased;
        Ok(Lease::new(index, entry.generation))
    }

    /// Resolve a lease to its native object.
    pub fn get(&self, lease: Lease<T>) -> Result<T> {
        match self.entries.get(lease.index as usize) {
            Some(entry)
                if entry.state == EntryState::Leased && entry.generation == lease.generation =>
            {
                Ok(entry.native)
            }
            _ => Err(GpuError::StaleHandle(short_type_name::<T>())),
        }
    }

    /// Return a leased object after running `reset` on it.
    ///
    /// If `reset` fails the object is retired: it is never handed out again
    /// but is still yielded by [`drain`](Self::drain).
    pub fn release(&mut self, lease: Lease<T>, reset: impl FnOnce(T) -> Result<()>) -> Result<()> {
        let native = self.get(lease)?;
        let outcome = reset(native);

        let entry = &mut self.entries[lease.index as usize];
        entry.generation = entry.generation.wrapping_add(1);
        match outcome {
            Ok(()) => {
                entry.state = EntryState::Free;
                self.free.push(lease.index);
                Ok(())
            }
            Err(err) => {
                entry.state = EntryState::Retired;
                Err(err)
            }
        }
    }

    /// Take a leased object out of circulation without recycling it.
    ///
    /// The object is still yielded by [`drain`](Self::drain).
    pub fn retire(&mut self, lease: Lease<T>) -> Result<()> {
        self.get(lease)?;
        let entry = &mut self.entries[lease.index as usize];
        entry.generation = entry.generation.wrapping_add(1);
        entry.state = EntryState::Retired;
        Ok(())
    }

    /// Remove every native object, leased or not, for destruction.
    pub fn drain(&mut self) -> Vec<T> {
        self.free.clear();
        self.entries.drain(..).map(|entry| entry.native).collect()
    }

    /// Number of distinct native objects ever created and still owned.
    pub fn allocated(&self) -> usize {
        self.entries.len()
    }

    /// Number of objects ready to be handed out without creating new ones.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn leased(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Leased)
            .count()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
