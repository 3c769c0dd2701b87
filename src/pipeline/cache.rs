/// Composite tile cache and freeze switch
///
/// - FIFO: when full, the oldest insert is evicted. Overwriting an entry
///   keeps its place in line.
/// - Frozen: the pipeline serves what is cached here and stops recomputing.

use log::{debug, info};
use std::collections::{HashMap, VecDeque};

use crate::tiles::key::TileCoords;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreezeState {
    #[default]
    Live,
    Frozen,
}

#[derive(Debug, Clone)]
pub struct TileCache {
    capacity: usize,
    order: VecDeque<TileCoords>,
    entries: HashMap<TileCoords, Vec<u8>>,
    state: FreezeState,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl TileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
            state: FreezeState::Live,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, tile: &TileCoords) -> Option<&[u8]> {
        self.entries.get(tile).map(Vec::as_slice)
    }

    pub fn insert(&mut self, tile: TileCoords, composite: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&tile) {
            *existing = composite;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    debug!("Evicted tile {} from cache", oldest);
                }
                None => break,
            }
        }
        self.order.push_back(tile);
        self.entries.insert(tile, composite);
    }

    pub fn remove_tile(&mut self, tile: &TileCoords) {
        if self.entries.remove(tile).is_some() {
            self.order.retain(|t| t != tile);
        }
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!("Tile cache cleared ({} tiles)", self.entries.len());
        }
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ---- freeze -------------------------------------------------------------

    pub fn state(&self) -> FreezeState {
        self.state
    }

    pub fn is_frozen(&self) -> bool {
        self.state == FreezeState::Frozen
    }

    /// Entries survive freezing so the frozen view has something to show
    pub fn freeze(&mut self) {
        self.set_state(FreezeState::Frozen);
    }

    pub fn unfreeze(&mut self) {
        self.set_state(FreezeState::Live);
    }

    pub fn toggle(&mut self) -> FreezeState {
        let next = match self.state {
            FreezeState::Live => FreezeState::Frozen,
            FreezeState::Frozen => FreezeState::Live,
        };
        self.set_state(next);
        next
    }

    fn set_state(&mut self, state: FreezeState) {
        if self.state != state {
            info!("🧊 Tile cache {:?} -> {:?} ({} tiles cached)", self.state, state, self.entries.len());
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::key::TileKey;

    #[test]
    fn test_fifo_eviction() {
        let mut cache = TileCache::new(2);
        cache.insert(TileCoords::new(0, 0), vec![0]);
        cache.insert(TileCoords::new(1, 0), vec![1]);
        cache.insert(TileCoords::new(2, 0), vec![2]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&TileCoords::new(0, 0)).is_none());
        assert_eq!(cache.get(&TileCoords::new(2, 0)), Some(&[2u8][..]));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut cache = TileCache::new(2);
        cache.insert(TileCoords::new(0, 0), vec![0]);
        cache.insert(TileCoords::new(1, 0), vec![1]);
        cache.insert(TileCoords::new(0, 0), vec![9]);
        cache.insert(TileCoords::new(2, 0), vec![2]);

        // (0,0) was inserted first, so it goes first despite the overwrite
        assert!(cache.get(&TileCoords::new(0, 0)).is_none());
        assert_eq!(cache.get(&TileCoords::new(1, 0)), Some(&[1u8][..]));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = TileCache::new(4);
        cache.insert(TileCoords::new(0, 0), vec![0]);
        cache.insert(TileCoords::new(1, 0), vec![1]);

        cache.remove_tile(&TileCoords::new(0, 0));
        assert_eq!(cache.len(), 1);
        cache.insert(TileCoords::new(2, 0), vec![2]);
        cache.insert(TileCoords::new(3, 0), vec![3]);
        cache.insert(TileCoords::new(4, 0), vec![4]);
        assert_eq!(cache.len(), 4);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = TileCache::new(0);
        cache.insert(TileCoords::new(0, 0), vec![0]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_frozen_cache_keeps_entry() {
        let key: TileKey = "0001,0002,010,010".parse().unwrap();
        let mut cache = TileCache::default();
        cache.insert(key.tile(), b"X".to_vec());

        cache.freeze();
        assert!(cache.is_frozen());
        assert_eq!(cache.get(&key.tile()), Some(&b"X"[..]));

        assert_eq!(cache.toggle(), FreezeState::Live);
        assert_eq!(cache.len(), 1);
    }
}
