//! Generation-checked storage for raw native component pointers.
//!
//! `fmi2Component` values are opaque pointers whose lifetime the binary
//! controls. Handing them out as [`HandleId`]s (slot index plus generation)
//! turns any use of a freed or recycled handle into [`Error::InvalidHandle`]
//! instead of a call into freed memory.

use std::os::raw::c_void;
use std::sync::Mutex;

use crate::Error;

/// Stable identifier for a stored native pointer. Copyable and cheap; stale
/// copies are rejected by the generation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    ptr: Option<*mut c_void>,
}

// Raw pointers are stored, never dereferenced here; ownership stays with the
// instance that allocated the slot.
unsafe impl Send for Slot {}

#[derive(Debug, Default)]
pub struct HandleArena {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self, ptr: *mut c_void) -> HandleId {
        let mut inner = self.inner.lock().unwrap();
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.ptr = Some(ptr);
            HandleId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(Slot {
                generation: 0,
                ptr: Some(ptr),
            });
            HandleId {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, id: HandleId) -> Result<*mut c_void, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.ptr)
            .ok_or(Error::InvalidHandle)
    }

    /// Swap the stored pointer, returning the previous one. Used when a
    /// native instance is recreated behind the same handle.
    pub fn replace(&self, id: HandleId, ptr: *mut c_void) -> Result<*mut c_void, Error> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.ptr.is_some())
            .ok_or(Error::InvalidHandle)?;
        Ok(slot.ptr.replace(ptr).expect("checked above"))
    }

    /// Retire the handle, bumping the generation so stale copies cannot
    /// resolve after the slot is recycled. Returns the pointer for the
    /// caller to release.
    pub fn free(&self, id: HandleId) -> Result<*mut c_void, Error> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(Error::InvalidHandle)?;
        let ptr = slot.ptr.take().ok_or(Error::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(id.index);
        Ok(ptr)
    }

    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter(|s| s.ptr.is_some()).count()
    }
}
