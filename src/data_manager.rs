//! Chunk registry backing every layer's inputs, outputs, gradients and
//! weights.
//!
//! The registry maps monotonically issued chunk ids to shared buffer
//! handles. Chained layers share a single chunk through its id without
//! copying; the downstream layer holds a handle but never owns the
//! allocation.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::Elem;

/// One registered unit of benchmark memory.
///
/// Owns its allocation for the registry's whole lifetime and is mutated
/// only by [`Data::filler`] and by kernels writing into it as an output.
#[derive(Debug)]
pub struct Data {
    values: Vec<Elem>,
    fill_seed: u64,
}

impl Data {
    fn new(count: usize, fill_seed: u64) -> Self {
        Self {
            values: vec![0.0; count],
            fill_seed,
        }
    }

    /// Element count of the buffer.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Populates the buffer with synthetic non-zero input values.
    ///
    /// Called before every forward pass, emulating a fresh batch. The
    /// fill is seeded per chunk so repeated runs are reproducible.
    pub fn filler(&mut self) {
        let mut rng = SmallRng::seed_from_u64(self.fill_seed);
        for value in &mut self.values {
            *value = rng.gen_range(0.1..1.0);
        }
    }

    /// Raw storage, passed into backend kernel entry points.
    pub fn as_slice(&self) -> &[Elem] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [Elem] {
        &mut self.values
    }
}

/// Registry mapping chunk ids to shared buffer handles.
///
/// Constructed explicitly and passed by reference wherever buffers are
/// created or resolved; there is no process-wide singleton. Ids are
/// strictly increasing and never reused, and the registry only grows:
/// every id returned by [`DataManager::create_data`] resolves for the
/// registry's remaining lifetime. Single-threaded by design.
#[derive(Debug, Default)]
pub struct DataManager {
    chunks: Vec<Rc<RefCell<Data>>>,
}

impl DataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a buffer of `count` elements and registers it under a
    /// freshly issued chunk id.
    pub fn create_data(&mut self, count: usize) -> usize {
        let id = self.chunks.len();
        self.chunks
            .push(Rc::new(RefCell::new(Data::new(count, id as u64 + 1))));
        id
    }

    /// Resolves a previously created chunk.
    ///
    /// # Panics
    ///
    /// Looking up an id that was never issued is a programming error and
    /// aborts immediately.
    pub fn get_data(&self, id: usize) -> Rc<RefCell<Data>> {
        self.chunks
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("unknown chunk id {}", id))
    }

    /// Number of chunks issued so far.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increasing() {
        let mut manager = DataManager::new();
        let ids: Vec<usize> = (0..8).map(|_| manager.create_data(16)).collect();
        for window in ids.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_get_data_returns_exact_count() {
        let mut manager = DataManager::new();
        let id = manager.create_data(3072);
        assert_eq!(manager.get_data(id).borrow().len(), 3072);
    }

    #[test]
    #[should_panic(expected = "unknown chunk id")]
    fn test_unknown_id_is_fatal() {
        let manager = DataManager::new();
        let _ = manager.get_data(42);
    }

    #[test]
    fn test_shared_handle_sees_writes() {
        let mut manager = DataManager::new();
        let id = manager.create_data(4);
        let writer = manager.get_data(id);
        writer.borrow_mut().as_mut_slice()[2] = 7.5;

        let reader = manager.get_data(id);
        assert_eq!(reader.borrow().as_slice()[2], 7.5);
    }

    #[test]
    fn test_filler_produces_nonzero_deterministic_values() {
        let mut manager = DataManager::new();
        let id = manager.create_data(64);
        let chunk = manager.get_data(id);

        chunk.borrow_mut().filler();
        let first: Vec<_> = chunk.borrow().as_slice().to_vec();
        assert!(first.iter().all(|&v| v > 0.0));

        chunk.borrow_mut().filler();
        assert_eq!(first, chunk.borrow().as_slice());
    }
}
