//! Block device abstraction.
//!
//! `spec.md` §1/§6 treats the raw block device as an external
//! collaborator: fixed 512-byte sectors, synchronous `read`/`write`,
//! one role for the filesystem and one for swap. This module is the
//! named interface that collaborator must satisfy; everything above it
//! (buffer cache, swap device) only ever talks to a `&dyn BlockDevice`.

use crate::error::{Error, Result};
use crate::param::SECTOR_SIZE;

pub trait BlockDevice: Send + Sync {
    /// Total number of addressable sectors on this device.
    fn num_sectors(&self) -> u32;

    /// Synchronously reads one sector into `buf`, which must be
    /// exactly `SECTOR_SIZE` bytes long.
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<()>;

    /// Synchronously writes one sector from `buf`, which must be
    /// exactly `SECTOR_SIZE` bytes long.
    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<()>;
}

/// An in-memory block device, for unit tests and the swap device,
/// which Pintos itself backs with a plain RAM-disk-like device in
/// many configurations.
pub struct MemBlockDevice {
    sectors: spin::Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemBlockDevice {
    pub fn new(num_sectors: u32) -> Self {
        Self {
            sectors: spin::Mutex::new(vec![[0u8; SECTOR_SIZE]; num_sectors as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn num_sectors(&self) -> u32 {
        self.sectors.lock().len() as u32
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<()> {
        let sectors = self.sectors.lock();
        let data = sectors.get(sector as usize).ok_or(Error::Io)?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<()> {
        let mut sectors = self.sectors.lock();
        let data = sectors.get_mut(sector as usize).ok_or(Error::Io)?;
        data.copy_from_slice(buf);
        Ok(())
    }
}

/// A block device backed by a real file, used for integration tests
/// (see `tests/`) and for the on-disk image a booted kernel would use.
pub struct FileBlockDevice {
    file: spin::Mutex<std::fs::File>,
    num_sectors: u32,
}

impl FileBlockDevice {
    pub fn new(file: std::fs::File, num_sectors: u32) -> Result<Self> {
        file.set_len((num_sectors as u64) * (SECTOR_SIZE as u64))
            .map_err(|_| Error::Io)?;
        Ok(Self {
            file: spin::Mutex::new(file),
            num_sectors,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((sector as u64) * (SECTOR_SIZE as u64)))
            .map_err(|_| Error::Io)?;
        file.read_exact(buf).map_err(|_| Error::Io)
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((sector as u64) * (SECTOR_SIZE as u64)))
            .map_err(|_| Error::Io)?;
        file.write_all(buf).map_err(|_| Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_round_trips_a_sector() {
        let dev = MemBlockDevice::new(4);
        let mut data = [0u8; SECTOR_SIZE];
        data[0] = 0xAB;
        dev.write_sector(2, &data).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        dev.read_sector(2, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
    }

    #[test]
    fn mem_device_rejects_out_of_range_sector() {
        let dev = MemBlockDevice::new(4);
        let buf = [0u8; SECTOR_SIZE];
        assert_eq!(dev.write_sector(99, &buf), Err(Error::Io));
    }
}
