//! Swap device.
//!
//! Grounded on `original_source/src/vm/swap.c`: a bitmap of swap slots,
//! each `SECTORS_PER_PAGE` sectors wide, over a dedicated block device.
//! `swap_in`/`swap_out` there read/write one page at a time; `check_idx`
//! validates a slot index before using it. Kept as a thin, safe
//! equivalent here.

use std::sync::Arc;

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::param::{PGSIZE, SECTORS_PER_PAGE, SECTOR_SIZE};

pub struct SwapDevice {
    device: Arc<dyn BlockDevice>,
    used: Vec<bool>,
}

impl SwapDevice {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slots = device.num_sectors() as usize / SECTORS_PER_PAGE;
        Self {
            device,
            used: vec![false; slots],
        }
    }

    pub fn allocate(&mut self) -> Result<u32> {
        let idx = self
            .used
            .iter()
            .position(|&b| !b)
            .ok_or(Error::SwapFull)?;
        self.used[idx] = true;
        Ok(idx as u32)
    }

    pub fn free(&mut self, slot: u32) {
        self.used[slot as usize] = false;
    }

    pub fn write(&self, slot: u32, data: &[u8; PGSIZE]) -> Result<()> {
        self.check_idx(slot)?;
        let base = slot as usize * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &data[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            self.device.write_sector((base + i) as u32, chunk)?;
        }
        Ok(())
    }

    pub fn read(&self, slot: u32, data: &mut [u8; PGSIZE]) -> Result<()> {
        self.check_idx(slot)?;
        let base = slot as usize * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &mut data[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            self.device.read_sector((base + i) as u32, chunk)?;
        }
        Ok(())
    }

    fn check_idx(&self, slot: u32) -> Result<()> {
        if (slot as usize) < self.used.len() {
            Ok(())
        } else {
            Err(Error::Io)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    #[test]
    fn write_then_read_round_trips_a_page() {
        let device = Arc::new(MemBlockDevice::new((SECTORS_PER_PAGE * 4) as u32));
        let mut swap = SwapDevice::new(device);
        let slot = swap.allocate().unwrap();
        let mut page = [0u8; PGSIZE];
        page[0] = 1;
        page[PGSIZE - 1] = 2;
        swap.write(slot, &page).unwrap();
        let mut out = [0u8; PGSIZE];
        swap.read(slot, &mut out).unwrap();
        assert_eq!(out[0], 1);
        assert_eq!(out[PGSIZE - 1], 2);
    }

    #[test]
    fn exhausted_swap_reports_full() {
        let device = Arc::new(MemBlockDevice::new(SECTORS_PER_PAGE as u32));
        let mut swap = SwapDevice::new(device);
        swap.allocate().unwrap();
        assert_eq!(swap.allocate(), Err(Error::SwapFull));
    }

    #[test]
    fn freed_slot_is_reusable() {
        let device = Arc::new(MemBlockDevice::new((SECTORS_PER_PAGE * 2) as u32));
        let mut swap = SwapDevice::new(device);
        let slot = swap.allocate().unwrap();
        swap.free(slot);
        assert_eq!(swap.allocate().unwrap(), slot);
    }
}
