//! fixed-capacity byte arrays

use serde::{Deserialize, Serialize};

/// zero-padded array of fixed capacity plus the used length
///
/// circuits only accept arrays of a declared size, so variable-length data
/// is carried as `storage` (always `capacity` long) and `len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedVec {
    storage: Vec<u8>,
    len: usize,
}

impl BoundedVec {
    /// `None` when `bytes` does not fit
    pub fn wrap(bytes: &[u8], capacity: usize) -> Option<Self> {
        if bytes.len() > capacity {
            return None;
        }
        let mut storage = vec![0u8; capacity];
        storage[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            storage,
            len: bytes.len(),
        })
    }

    /// reassemble from the ABI representation; `None` when `len` overruns
    pub fn from_parts(storage: Vec<u8>, len: usize) -> Option<Self> {
        if len > storage.len() {
            return None;
        }
        Some(Self { storage, len })
    }

    pub fn storage(&self) -> &[u8] {
        &self.storage
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// the meaningful prefix
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// padding is all zero and len is within capacity
    pub fn is_well_formed(&self) -> bool {
        self.len <= self.storage.len() && self.storage[self.len..].iter().all(|&b| b == 0)
    }
}
