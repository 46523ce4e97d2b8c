//! Generational slot table backing the opaque handles.

use crate::{Error, ErrorKind, Result};

/// Slot index plus the generation the slot had when the handle was issued.
///
/// A slot bumps its generation every time it is emptied, so a handle kept after its entry was removed can
/// never reach the entry stored in the same slot later.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, entry: T) -> Result<Handle> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);

            return Ok(Handle {
                index,
                generation: slot.generation,
            });
        }

        let index = u32::try_from(self.slots.len())
            .map_err(|_| Error::new(ErrorKind::InsufficientMemory, "the handle table is full"))?;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });

        Ok(Handle { index, generation: 0 })
    }

    pub(crate) fn get(&self, handle: Handle) -> Result<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| invalid_handle(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| invalid_handle(handle))
    }

    /// Takes the entry out and invalidates every copy of the handle.
    pub(crate) fn remove(&mut self, handle: Handle) -> Result<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
            .ok_or_else(|| invalid_handle(handle))?;

        let entry = slot.entry.take().ok_or_else(|| invalid_handle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        Ok(entry)
    }

    /// Drops every entry. Handles issued before stay invalid after new insertions.
    pub(crate) fn clear(&mut self) {
        self.free.clear();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            // slots.len() fits into u32: insert refuses to grow past it
            self.free.push(index as u32);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }
}

fn invalid_handle(handle: Handle) -> Error {
    Error::new(
        ErrorKind::InvalidHandle,
        format!("handle {}:{} is not allocated", handle.index, handle.generation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_handle_is_invalid() {
        let mut table = HandleTable::new();
        let handle = table.insert("first").unwrap();

        assert_eq!(table.remove(handle).unwrap(), "first");

        assert_eq!(table.get(handle).unwrap_err().error_type, ErrorKind::InvalidHandle);
        assert_eq!(table.remove(handle).unwrap_err().error_type, ErrorKind::InvalidHandle);
    }

    #[test]
    fn reused_slot_does_not_revive_stale_handle() {
        let mut table = HandleTable::new();
        let stale = table.insert(1).unwrap();
        table.remove(stale).unwrap();

        let fresh = table.insert(2).unwrap();

        assert_eq!(fresh.index, stale.index);
        assert_ne!(fresh.generation, stale.generation);
        assert!(table.get(stale).is_err());
        assert_eq!(*table.get(fresh).unwrap(), 2);
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut table = HandleTable::new();
        let handles = (0..4).map(|i| table.insert(i).unwrap()).collect::<Vec<_>>();

        table.clear();
        let after = table.insert(10).unwrap();

        assert_eq!(table.len(), 1);
        for handle in handles {
            assert!(table.get(handle).is_err());
        }
        assert_eq!(*table.get(after).unwrap(), 10);
    }

    #[test]
    fn get_mut_updates_entry() {
        let mut table = HandleTable::new();
        let handle = table.insert(String::from("a")).unwrap();

        table.get_mut(handle).unwrap().push('b');

        assert_eq!(table.get(handle).unwrap(), "ab");
    }
}
