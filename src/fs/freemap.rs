//! Free sector bitmap.
//!
//! Grounded on `original_source/src/filesys/free-map.c` (not reproduced
//! in the retrieved C sources, but referenced throughout `inode.c`): a
//! single bitmap sector tracks which data/inode sectors are in use.
//! Bit `i` of the bitmap corresponds to absolute sector `i`; sectors
//! below `FIRST_DATA_SECTOR` (the bitmap sector itself and the root
//! directory's inode sector) are always marked in-use and never handed
//! out.

use crate::bio::BufferCache;
use crate::error::{Error, Result};
use crate::param::{FIRST_DATA_SECTOR, FREE_MAP_SECTOR, SECTOR_SIZE};

/// Bits addressable by the single bitmap sector.
const CAPACITY: usize = SECTOR_SIZE * 8;

pub struct FreeMap {
    bits: Vec<bool>,
}

impl FreeMap {
    /// Loads the bitmap from `cache`, marking every sector below
    /// `FIRST_DATA_SECTOR` as in-use regardless of what's on disk.
    pub fn load(cache: &BufferCache) -> Result<Self> {
        let mut raw = [0u8; SECTOR_SIZE];
        cache.read_sector(FREE_MAP_SECTOR, &mut raw)?;
        let mut bits = vec![false; CAPACITY];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = raw[i / 8] & (1 << (i % 8)) != 0;
        }
        for i in 0..FIRST_DATA_SECTOR as usize {
            bits[i] = true;
        }
        Ok(Self { bits })
    }

    /// Formats a brand new, empty bitmap (used when creating a fresh
    /// filesystem image).
    pub fn format() -> Self {
        let mut bits = vec![false; CAPACITY];
        for i in 0..FIRST_DATA_SECTOR as usize {
            bits[i] = true;
        }
        Self { bits }
    }

    pub fn flush(&self, cache: &BufferCache) -> Result<()> {
        let mut raw = [0u8; SECTOR_SIZE];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                raw[i / 8] |= 1 << (i % 8);
            }
        }
        cache.write_sector(FREE_MAP_SECTOR, &raw)
    }

    pub fn allocate(&mut self) -> Result<u32> {
        let idx = self
            .bits
            .iter()
            .position(|&used| !used)
            .ok_or(Error::NoFreeSectors)?;
        self.bits[idx] = true;
        Ok(idx as u32)
    }

    pub fn free(&mut self, sector: u32) {
        self.bits[sector as usize] = false;
    }

    pub fn is_free(&self, sector: u32) -> bool {
        !self.bits[sector as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use std::sync::Arc;

    #[test]
    fn allocate_then_free_round_trips_through_disk() {
        let device = Arc::new(MemBlockDevice::new(64));
        let cache = BufferCache::new(device);
        let mut map = FreeMap::format();
        let a = map.allocate().unwrap();
        let b = map.allocate().unwrap();
        assert_ne!(a, b);
        map.flush(&cache).unwrap();

        let reloaded = FreeMap::load(&cache).unwrap();
        assert!(!reloaded.is_free(a));
        assert!(!reloaded.is_free(b));
    }

    #[test]
    fn exhausting_the_map_returns_no_free_sectors() {
        let mut map = FreeMap::format();
        for _ in FIRST_DATA_SECTOR as usize..CAPACITY {
            map.allocate().unwrap();
        }
        assert_eq!(map.allocate(), Err(Error::NoFreeSectors));
    }

    #[test]
    fn freeing_a_sector_makes_it_allocatable_again() {
        let mut map = FreeMap::format();
        let s = map.allocate().unwrap();
        map.free(s);
        assert!(map.is_free(s));
        assert_eq!(map.allocate().unwrap(), s);
    }
}
