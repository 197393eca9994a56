//! Synthetic response bodies.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use cdnpress_types::FILLER_BYTE;

/// Produces filler bodies, optionally keeping one body per size in memory.
///
/// Cached bodies are never evicted. Lock poisoning is ignored since the map is only ever extended
/// with complete entries.
#[derive(Debug, Default)]
pub struct BodyCache {
    enabled: bool,
    bodies: RwLock<HashMap<usize, Bytes>>,
}

impl BodyCache {
    /// Creates a cache. A disabled cache generates a fresh body on every call.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            bodies: RwLock::default(),
        }
    }

    /// Returns a body of `size` filler bytes.
    pub fn get(&self, size: usize) -> Bytes {
        if !self.enabled {
            return generate(size);
        }

        let cached = self
            .bodies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&size)
            .cloned();
        if let Some(body) = cached {
            return body;
        }

        let body = generate(size);
        let mut bodies = self.bodies.write().unwrap_or_else(PoisonError::into_inner);
        // Another request may have inserted the same size in the meantime.
        bodies.entry(size).or_insert(body).clone()
    }

    /// Returns the number of cached sizes.
    pub fn len(&self) -> usize {
        self.bodies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no body is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate(size: usize) -> Bytes {
    Bytes::from(vec![FILLER_BYTE; size])
}
