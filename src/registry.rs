//! Opt-in mapping from the calling thread to a current instance handle.
//!
//! A convenience for callers porting code written against globals: each
//! thread may name one handle as "current" and retrieve it later without
//! threading it through every call. The registry holds non-owning
//! [`HandleId`] tokens only; validity is still checked by the arena at use.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::thread::{self, ThreadId};

use crate::handle::HandleId;

fn registry() -> &'static Mutex<HashMap<ThreadId, HandleId>> {
    static REGISTRY: OnceLock<Mutex<HashMap<ThreadId, HandleId>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Make `id` the calling thread's current handle, returning the one it
/// replaces.
pub fn bind(id: HandleId) -> Option<HandleId> {
    registry()
        .lock()
        .unwrap()
        .insert(thread::current().id(), id)
}

/// The calling thread's current handle, if one is bound.
pub fn current() -> Option<HandleId> {
    registry()
        .lock()
        .unwrap()
        .get(&thread::current().id())
        .copied()
}

/// Drop the calling thread's binding.
pub fn clear() -> Option<HandleId> {
    registry().lock().unwrap().remove(&thread::current().id())
}
