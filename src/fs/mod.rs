//! File system implementation.
//!
//! Layers, same split as the teacher's `fs/mod.rs` doc comment:
//!   + Blocks: `crate::block`, the raw device.
//!   + Cache: `crate::bio`, a write-back sector cache.
//!   + Free map: `freemap`, which sectors are in use.
//!   + Inodes: `inode`, a multi-level indexed file.
//!   + Directories: `directory`, inodes whose content is a name list.
//!   + Names: `path`, splitting `/a/b/c` into components.
//!
//! This module wires those pieces into `Filesystem`, which interns
//! inodes by sector (`sector -> Arc<Inode>`) instead of the teacher's
//! pinned `ArrayArena<Inode, NINODE>`, per `spec.md` §9 Design Notes.

pub mod directory;
pub mod freemap;
pub mod inode;
pub mod path;
pub mod stat;

use std::collections::HashMap;
use std::sync::Arc;

use crate::bio::BufferCache;
use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::lock::Spinlock;
use crate::param::{FIRST_DATA_SECTOR, ROOT_DIR_SECTOR};

use freemap::FreeMap;
use inode::Inode;
use stat::Stat;

pub struct Filesystem {
    cache: Arc<BufferCache>,
    free_map: Spinlock<FreeMap>,
    inodes: Spinlock<HashMap<u32, Arc<Inode>>>,
}

impl Filesystem {
    /// Formats a brand new filesystem image: a free map with only the
    /// reserved sectors marked used, and an empty root directory at
    /// `ROOT_DIR_SECTOR`.
    pub fn format(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = Arc::new(BufferCache::new(device));
        let mut free_map = FreeMap::format();
        let root = Inode::create(cache.clone(), ROOT_DIR_SECTOR, true)?;
        free_map.flush(&cache)?;
        let fs = Self {
            cache,
            free_map: Spinlock::new("free_map", free_map),
            inodes: Spinlock::new("inodes", HashMap::new()),
        };
        fs.inodes.lock().insert(ROOT_DIR_SECTOR, root);
        Ok(fs)
    }

    /// Mounts an existing filesystem image.
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = Arc::new(BufferCache::new(device));
        let free_map = FreeMap::load(&cache)?;
        Ok(Self {
            cache,
            free_map: Spinlock::new("free_map", free_map),
            inodes: Spinlock::new("inodes", HashMap::new()),
        })
    }

    pub fn root(&self) -> Result<Arc<Inode>> {
        self.open_inode(ROOT_DIR_SECTOR)
    }

    /// Returns the interned `Inode` for `sector`, loading it from disk
    /// on first access.
    pub fn open_inode(&self, sector: u32) -> Result<Arc<Inode>> {
        let mut inodes = self.inodes.lock();
        if let Some(inode) = inodes.get(&sector) {
            return Ok(inode.clone());
        }
        let inode = Inode::load(self.cache.clone(), sector)?;
        inodes.insert(sector, inode.clone());
        Ok(inode)
    }

    /// Resolves an absolute or `base`-relative path to its inode.
    pub fn resolve(&self, path: &str, base: &Arc<Inode>) -> Result<Arc<Inode>> {
        let mut current = if path::is_absolute(path) {
            self.root()?
        } else {
            base.clone()
        };
        for name in path::components(path)? {
            if !current.is_dir() {
                return Err(Error::NotADirectory);
            }
            let sector = directory::lookup(&current, name)?;
            current = self.open_inode(sector)?;
        }
        Ok(current)
    }

    /// Creates a file or directory at `path`, relative to `base`.
    pub fn create(&self, path: &str, base: &Arc<Inode>, is_dir: bool) -> Result<Arc<Inode>> {
        let (parent_path, name) = path::split_parent(path)?;
        let parent = if parent_path.is_empty() {
            base.clone()
        } else {
            self.resolve(&parent_path, base)?
        };
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        if directory::lookup(&parent, name).is_ok() {
            return Err(Error::AlreadyExists);
        }

        let mut free_map = self.free_map.lock();
        let sector = free_map.allocate()?;
        let inode = match Inode::create(self.cache.clone(), sector, is_dir) {
            Ok(inode) => inode,
            Err(e) => {
                free_map.free(sector);
                return Err(e);
            }
        };
        if let Err(e) = directory::add(&parent, name, sector, &mut free_map) {
            inode.deallocate(&mut free_map).ok();
            return Err(e);
        }
        free_map.flush(&self.cache)?;
        drop(free_map);

        self.inodes.lock().insert(sector, inode.clone());
        Ok(inode)
    }

    /// Removes the entry named by `path`. A non-empty directory cannot
    /// be removed.
    pub fn remove(&self, path: &str, base: &Arc<Inode>) -> Result<()> {
        let (parent_path, name) = path::split_parent(path)?;
        let parent = if parent_path.is_empty() {
            base.clone()
        } else {
            self.resolve(&parent_path, base)?
        };
        let target = self.resolve(path, base)?;
        if target.is_dir() && !directory::is_empty(&target)? {
            return Err(Error::DirectoryNotEmpty);
        }

        let mut free_map = self.free_map.lock();
        directory::remove(&parent, name, &mut free_map)?;
        target.deallocate(&mut free_map)?;
        free_map.flush(&self.cache)?;
        drop(free_map);

        self.inodes.lock().remove(&target.sector);
        Ok(())
    }

    pub fn stat(&self, inode: &Inode) -> Stat {
        Stat {
            inode_sector: inode.sector,
            is_dir: inode.is_dir(),
            size: inode.len(),
        }
    }

    /// Writes through `inode`, allocating growth sectors from this
    /// filesystem's free map. A thin wrapper so callers outside this
    /// module (e.g. `vm::mmap`) never need to reach into `free_map`
    /// themselves.
    pub fn write_at(&self, inode: &Inode, offset: u32, buf: &[u8]) -> Result<usize> {
        let mut free_map = self.free_map.lock();
        inode.write_at(offset, buf, &mut free_map)
    }

    pub fn free_map_allocate(&self) -> Result<u32> {
        self.free_map.lock().allocate()
    }

    pub fn free_map_free(&self, sector: u32) {
        self.free_map.lock().free(sector)
    }

    pub fn buffer_cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    /// Flushes the buffer cache and free map to the device. Called at
    /// shutdown (§8 "shutdown flush equivalence").
    pub fn sync(&self) -> Result<()> {
        self.free_map.lock().flush(&self.cache)?;
        self.cache.flush()
    }
}

/// First sector a freshly formatted filesystem will hand out to a file.
pub const FIRST_FILE_SECTOR: u32 = FIRST_DATA_SECTOR;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn new_fs() -> Filesystem {
        Filesystem::format(Arc::new(MemBlockDevice::new(4096))).unwrap()
    }

    #[test]
    fn create_file_then_resolve_it() {
        let fs = new_fs();
        let root = fs.root().unwrap();
        let file = fs.create("hello.txt", &root, false).unwrap();
        let resolved = fs.resolve("hello.txt", &root).unwrap();
        assert_eq!(resolved.sector, file.sector);
        assert!(!resolved.is_dir());
    }

    #[test]
    fn create_nested_directories_and_file() {
        let fs = new_fs();
        let root = fs.root().unwrap();
        fs.create("a", &root, true).unwrap();
        let a = fs.resolve("a", &root).unwrap();
        fs.create("b.txt", &a, false).unwrap();
        let resolved = fs.resolve("a/b.txt", &root).unwrap();
        assert!(!resolved.is_dir());
    }

    #[test]
    fn remove_nonempty_directory_fails() {
        let fs = new_fs();
        let root = fs.root().unwrap();
        fs.create("a", &root, true).unwrap();
        let a = fs.resolve("a", &root).unwrap();
        fs.create("b.txt", &a, false).unwrap();
        assert_eq!(fs.remove("a", &root), Err(Error::DirectoryNotEmpty));
    }

    #[test]
    fn creating_a_duplicate_name_fails_without_leaking_sectors() {
        let fs = new_fs();
        let root = fs.root().unwrap();
        fs.create("dup.txt", &root, false).unwrap();
        let free_before = fs.free_map_allocate().unwrap();
        fs.free_map_free(free_before);
        assert_eq!(fs.create("dup.txt", &root, false), Err(Error::AlreadyExists));
        let reused = fs.free_map_allocate().unwrap();
        assert_eq!(reused, free_before);
    }

    #[test]
    fn sync_then_reopen_preserves_content() {
        let device = Arc::new(MemBlockDevice::new(4096));
        let fs = Filesystem::format(device.clone()).unwrap();
        let root = fs.root().unwrap();
        let file = fs.create("hello.txt", &root, false).unwrap();
        let mut free_map = fs.free_map.lock();
        file.write_at(0, b"hi", &mut free_map).unwrap();
        drop(free_map);
        fs.sync().unwrap();

        let reopened = Filesystem::open(device).unwrap();
        let root2 = reopened.root().unwrap();
        let file2 = reopened.resolve("hello.txt", &root2).unwrap();
        let mut buf = [0u8; 2];
        file2.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }
}
