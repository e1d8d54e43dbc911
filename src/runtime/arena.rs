//! Generational slot arena.
//!
//! Each slot carries a generation that is bumped on removal, so a handle to a
//! removed value never resolves to whatever later reuses the slot. Every arena
//! belongs to one session; handles carrying another session's id never
//! resolve.

use std::marker::PhantomData;

use crate::types::Handle;

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub(crate) struct Arena<H, T> {
    session: u32,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<H>,
}

impl<H: Handle, T> Arena<H, T> {
    pub(crate) fn new(session: u32) -> Self {
        Self {
            session,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Handle the next `insert` will return.
    pub(crate) fn next_handle(&self) -> H {
        match self.free.last() {
            Some(&index) => H::from_parts(
                self.session,
                index,
                self.slots[index as usize].generation,
            ),
            None => H::from_parts(self.session, self.slots.len() as u32, 0),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> H {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;
        H::from_parts(self.session, index, slot.generation)
    }

    fn owns(&self, handle: H) -> bool {
        handle.session() == self.session
    }

    fn slot(&self, handle: H) -> Option<&Slot<T>> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .get(handle.slot() as usize)
            .filter(|s| s.generation == handle.slot_generation())
    }

    pub(crate) fn get(&self, handle: H) -> Option<&T> {
        self.slot(handle).and_then(|s| s.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .get_mut(handle.slot() as usize)
            .filter(|s| s.generation == handle.slot_generation())
            .and_then(|s| s.value.as_mut())
    }

    /// True when `handle` was issued by this arena and its value has since
    /// been removed.
    pub(crate) fn is_retired(&self, handle: H) -> bool {
        self.owns(handle)
            && self
                .slots
                .get(handle.slot() as usize)
                .is_some_and(|s| handle.slot_generation() < s.generation)
    }

    pub(crate) fn remove(&mut self, handle: H) -> Option<T> {
        if !self.owns(handle) {
            return None;
        }
        let index = handle.slot();
        let slot = self
            .slots
            .get_mut(index as usize)
            .filter(|s| s.generation == handle.slot_generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value
                .as_ref()
                .map(|v| (H::from_parts(self.session, i as u32, s.generation), v))
        })
    }

    pub(crate) fn handles(&self) -> Vec<H> {
        self.iter().map(|(h, _)| h).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
