// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal stand-in for the out-of-scope shard-buffer / allocation-record
//! collaborator: a symmetric allocation addressable by `(peer, offset)`.
//!
//! This is deliberately not a multi-dimensional array descriptor — just
//! enough byte-addressable storage for the engine to gather replies from
//! and install `get` results into.

use parking_lot::RwLock;

/// One peer's local slice of the logically global array.
pub struct ShardBuffer {
    element_size: usize,
    data: RwLock<Vec<u8>>,
}

impl ShardBuffer {
    /// Allocate `num_elements` elements of `element_size` bytes each,
    /// zero-initialized.
    #[must_use]
    pub fn allocate_symmetric(num_elements: usize, element_size: usize) -> Self {
        Self {
            element_size,
            data: RwLock::new(vec![0u8; num_elements * element_size]),
        }
    }

    /// Build a shard whose elements are pre-populated by `init(index)`,
    /// used by tests that want an identity shard (`shard[i] == i`).
    pub fn from_fn(num_elements: usize, element_size: usize, mut init: impl FnMut(usize) -> Vec<u8>) -> Self {
        let mut data = vec![0u8; num_elements * element_size];
        for i in 0..num_elements {
            let bytes = init(i);
            assert_eq!(bytes.len(), element_size);
            data[i * element_size..(i + 1) * element_size].copy_from_slice(&bytes);
        }
        Self {
            element_size,
            data: RwLock::new(data),
        }
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[must_use]
    pub fn len_elements(&self) -> usize {
        self.data.read().len() / self.element_size
    }

    /// Copy out the bytes at `offset`.
    #[must_use]
    pub fn read_element(&self, offset: u64) -> Vec<u8> {
        let data = self.data.read();
        let start = offset as usize * self.element_size;
        data[start..start + self.element_size].to_vec()
    }

    /// Overwrite the bytes at `offset`. `value.len()` must equal
    /// `element_size`.
    pub fn write_element(&self, offset: u64, value: &[u8]) {
        assert_eq!(value.len(), self.element_size, "element size mismatch");
        let mut data = self.data.write();
        let start = offset as usize * self.element_size;
        data[start..start + self.element_size].copy_from_slice(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_symmetric_is_zeroed() {
        let shard = ShardBuffer::allocate_symmetric(4, 8);
        assert_eq!(shard.read_element(0), vec![0u8; 8]);
        assert_eq!(shard.len_elements(), 4);
    }

    #[test]
    fn write_then_read_round_trips() {
        let shard = ShardBuffer::allocate_symmetric(4, 8);
        shard.write_element(2, &42.0f64.to_le_bytes());
        assert_eq!(shard.read_element(2), 42.0f64.to_le_bytes().to_vec());
    }

    #[test]
    fn from_fn_builds_identity_shard() {
        let shard = ShardBuffer::from_fn(4, 8, |i| (i as f64).to_le_bytes().to_vec());
        assert_eq!(shard.read_element(3), 3.0f64.to_le_bytes().to_vec());
    }
}
