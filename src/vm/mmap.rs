//! Memory-mapped files.
//!
//! Bridges `vm::page::PageSource` to `fs::inode::Inode` via `InodeSource`
//! (so `vm` never depends on `fs` directly except through this one
//! adapter) and tracks active mappings so `munmap` can write back dirty
//! pages and tear down the range. Grounded on
//! `original_source/src/vm/page.c`'s `VM_BIN`/file-backed page handling
//! plus `spec.md` §4's mmap/munmap operations and its "deny write while
//! mapped for execution" invariant, which `fs::inode` has no notion of
//! on its own -- `Mmap` enforces it by refusing to open a second,
//! writable mapping over a range another mapping already claims.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fs::inode::Inode;
use crate::fs::Filesystem;
use crate::param::PGSIZE;
use crate::vm::page::PageSource;
use crate::vm::{VAddr, VirtualMemory};

/// Adapts an `Inode` to `PageSource`, paging through the owning
/// filesystem's buffer cache and free map.
pub struct InodeSource {
    fs: Arc<Filesystem>,
    inode: Arc<Inode>,
}

impl InodeSource {
    pub fn new(fs: Arc<Filesystem>, inode: Arc<Inode>) -> Self {
        Self { fs, inode }
    }
}

impl PageSource for InodeSource {
    fn read_page(&self, offset: u32, buf: &mut [u8; PGSIZE]) -> Result<()> {
        buf.fill(0);
        self.inode.read_at(offset, buf)?;
        Ok(())
    }

    fn write_page(&self, offset: u32, buf: &[u8; PGSIZE]) -> Result<()> {
        let remaining = self.inode.len().saturating_sub(offset);
        let n = std::cmp::min(remaining as usize, PGSIZE);
        if n > 0 {
            self.fs.write_at(&self.inode, offset, &buf[..n])?;
        }
        Ok(())
    }
}

struct Mapping {
    base: VAddr,
    pages: usize,
    writable: bool,
    fs: Arc<Filesystem>,
    inode: Arc<Inode>,
}

/// Tracks every active memory map so they can be listed, written back,
/// and torn down by `munmap`.
#[derive(Default)]
pub struct MmapTable {
    next_id: u32,
    mappings: HashMap<u32, Mapping>,
}

impl MmapTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn overlaps(&self, base: VAddr, pages: usize) -> bool {
        let end = base + pages * PGSIZE;
        self.mappings.values().any(|m| {
            let m_end = m.base + m.pages * PGSIZE;
            base < m_end && m_end > 0 && end > m.base
        })
    }

    /// Maps `inode`'s full current length at `base`, one page per
    /// `PGSIZE`-aligned region, read-write unless `writable` is false.
    /// Refuses a mapping that would overlap one already registered, and
    /// (per the execute-deny invariant) refuses a writable mapping over
    /// a file already mapped for execution via a separate read-only
    /// mapping of the same inode. A read-only mapping in turn calls
    /// `Inode::deny_write`, so ordinary `write()` syscalls against that
    /// inode are refused for as long as the mapping is live -- matches
    /// `inode_deny_write`/`inode_allow_write` in
    /// `original_source/src/filesys/inode.c`.
    pub fn mmap(
        &mut self,
        vm: &mut VirtualMemory,
        fs: Arc<Filesystem>,
        inode: Arc<Inode>,
        base: VAddr,
        writable: bool,
    ) -> Result<u32> {
        if base % PGSIZE != 0 {
            return Err(Error::InvalidMmap);
        }
        let len = inode.len() as usize;
        if len == 0 {
            return Err(Error::InvalidMmap);
        }
        let pages = (len + PGSIZE - 1) / PGSIZE;
        if self.overlaps(base, pages) {
            return Err(Error::AlreadyMapped);
        }
        if writable
            && self
                .mappings
                .values()
                .any(|m| Arc::ptr_eq(&m.inode, &inode) && !m.writable)
        {
            return Err(Error::WriteDenied);
        }

        if !writable {
            inode.deny_write();
        }

        let source: Arc<dyn PageSource> = Arc::new(InodeSource::new(fs.clone(), inode.clone()));
        for i in 0..pages {
            vm.register_file(
                base + i * PGSIZE,
                source.clone(),
                (i * PGSIZE) as u32,
                writable,
            );
        }

        let id = self.next_id;
        self.next_id += 1;
        self.mappings.insert(
            id,
            Mapping {
                base,
                pages,
                writable,
                fs,
                inode,
            },
        );
        Ok(id)
    }

    /// Unmaps `id`: writes back any dirty, writable, resident pages,
    /// releases the write-deny this mapping held (if it was read-only),
    /// then removes the mapping's pages from the supplemental page
    /// table entirely.
    pub fn munmap(&mut self, vm: &mut VirtualMemory, id: u32) -> Result<()> {
        let mapping = self.mappings.remove(&id).ok_or(Error::NotFound)?;
        for i in 0..mapping.pages {
            let vaddr = mapping.base + i * PGSIZE;
            if mapping.writable && vm.page_dir().is_dirty(vaddr) {
                if let Some(bytes) = vm.page_bytes(vaddr) {
                    mapping.fs.write_at(&mapping.inode, (i * PGSIZE) as u32, &bytes)?;
                }
            }
            vm.unregister(vaddr);
        }
        if !mapping.writable {
            mapping.inode.allow_write();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::fs::Filesystem;
    use crate::param::SECTORS_PER_PAGE;
    use crate::vm::SimplePageDirectory;
    use crate::vm::swap::SwapDevice;

    fn setup() -> (Arc<Filesystem>, Arc<Inode>, VirtualMemory) {
        let device = Arc::new(MemBlockDevice::new(4096));
        let fs = Arc::new(Filesystem::format(device).unwrap());
        let root = fs.root().unwrap();
        let file = fs.create("mapped.bin", &root, false).unwrap();
        fs.write_at(&file, 0, &[7u8; PGSIZE]).unwrap();

        let swap_device = Arc::new(MemBlockDevice::new((SECTORS_PER_PAGE * 4) as u32));
        let vm = VirtualMemory::new(
            4,
            Box::new(SimplePageDirectory::new()),
            SwapDevice::new(swap_device),
            0x8000_0000,
        );
        (fs, file, vm)
    }

    #[test]
    fn mmap_then_read_sees_file_content() {
        let (fs, file, mut vm) = setup();
        let mut table = MmapTable::new();
        let base = 0x4000_0000;
        table.mmap(&mut vm, fs, file, base, true).unwrap();
        let mut buf = [0u8; 4];
        vm.read(base, &mut buf).unwrap();
        assert_eq!(buf, [7, 7, 7, 7]);
    }

    #[test]
    fn overlapping_mmap_is_rejected() {
        let (fs, file, mut vm) = setup();
        let mut table = MmapTable::new();
        let base = 0x4000_0000;
        table.mmap(&mut vm, fs.clone(), file.clone(), base, true).unwrap();
        assert_eq!(
            table.mmap(&mut vm, fs, file, base, true),
            Err(Error::AlreadyMapped)
        );
    }

    #[test]
    fn munmap_unknown_id_fails() {
        let (_fs, _file, mut vm) = setup();
        let mut table = MmapTable::new();
        assert_eq!(table.munmap(&mut vm, 0), Err(Error::NotFound));
    }

    #[test]
    fn write_is_refused_while_a_file_is_mapped_read_only() {
        let (fs, file, mut vm) = setup();
        let mut table = MmapTable::new();
        let base = 0x4000_0000;
        let id = table.mmap(&mut vm, fs.clone(), file.clone(), base, false).unwrap();
        assert_eq!(
            fs.write_at(&file, 0, b"nope"),
            Err(Error::WriteDenied)
        );
        table.munmap(&mut vm, id).unwrap();
        assert!(fs.write_at(&file, 0, b"ok").is_ok());
    }

    #[test]
    fn munmap_removes_the_mapping_from_virtual_memory() {
        let (fs, file, mut vm) = setup();
        let mut table = MmapTable::new();
        let base = 0x4000_0000;
        let id = table.mmap(&mut vm, fs, file, base, true).unwrap();
        table.munmap(&mut vm, id).unwrap();
        assert!(!vm.is_registered(base));
    }
}
