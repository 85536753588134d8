//! Directory entries.
//!
//! A directory is just a file (see `inode.rs`) whose content is a
//! packed sequence of fixed-size entries. Grounded on
//! `original_source/src/filesys/directory.c`'s `struct dir_entry` and
//! its linear `dir_lookup`/`dir_add`/`dir_remove` scans -- this crate
//! keeps the same linear-scan approach rather than a hashed or sorted
//! layout, since the spec does not call for one.

use crate::error::{Error, Result};
use crate::fs::inode::Inode;
use crate::fs::freemap::FreeMap;
use crate::param::NAME_MAX;
use std::sync::Arc;

/// One packed directory entry: a NUL-padded name plus the inode sector
/// it names, plus an in-use flag so removed entries can be reused
/// without compacting the file.
const NAME_FIELD: usize = NAME_MAX + 1;
pub const ENTRY_SIZE: usize = NAME_FIELD + 4 + 4;

#[derive(Clone)]
pub struct DirEntry {
    pub name: String,
    pub sector: u32,
}

fn encode(name: &str, sector: u32, in_use: bool) -> [u8; ENTRY_SIZE] {
    let mut raw = [0u8; ENTRY_SIZE];
    let bytes = name.as_bytes();
    raw[..bytes.len()].copy_from_slice(bytes);
    raw[NAME_FIELD..NAME_FIELD + 4].copy_from_slice(&sector.to_le_bytes());
    raw[NAME_FIELD + 4] = in_use as u8;
    raw
}

fn decode(raw: &[u8; ENTRY_SIZE]) -> Option<DirEntry> {
    if raw[NAME_FIELD + 4] == 0 {
        return None;
    }
    let nul = raw[..NAME_FIELD].iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
    let name = String::from_utf8_lossy(&raw[..nul]).into_owned();
    let sector = u32::from_le_bytes(raw[NAME_FIELD..NAME_FIELD + 4].try_into().unwrap());
    Some(DirEntry { name, sector })
}

/// Reads every live entry of a directory inode.
pub fn list(dir: &Inode) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0u32;
    let mut raw = [0u8; ENTRY_SIZE];
    while (dir.read_at(offset, &mut raw)?) == ENTRY_SIZE {
        if let Some(entry) = decode(&raw) {
            entries.push(entry);
        }
        offset += ENTRY_SIZE as u32;
    }
    Ok(entries)
}

/// Looks up `name` in `dir`. Returns `Error::NotFound` if absent.
pub fn lookup(dir: &Inode, name: &str) -> Result<u32> {
    list(dir)?
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| e.sector)
        .ok_or(Error::NotFound)
}

/// Adds `name -> sector` to `dir`, reusing a removed slot if one
/// exists. Fails with `Error::AlreadyExists` if `name` is already
/// present.
pub fn add(dir: &Inode, name: &str, sector: u32, free_map: &mut FreeMap) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidPath);
    }
    if name.len() > NAME_MAX {
        return Err(Error::NameTooLong);
    }
    let mut offset = 0u32;
    let mut raw = [0u8; ENTRY_SIZE];
    loop {
        let n = dir.read_at(offset, &mut raw)?;
        if n < ENTRY_SIZE {
            break;
        }
        if let Some(entry) = decode(&raw) {
            if entry.name == name {
                return Err(Error::AlreadyExists);
            }
        } else {
            // A removed slot: reuse it.
            let encoded = encode(name, sector, true);
            dir.write_at(offset, &encoded, free_map)?;
            return Ok(());
        }
        offset += ENTRY_SIZE as u32;
    }
    let encoded = encode(name, sector, true);
    dir.write_at(offset, &encoded, free_map)?;
    Ok(())
}

/// Marks `name`'s slot as unused, without shrinking the directory file.
pub fn remove(dir: &Inode, name: &str, free_map: &mut FreeMap) -> Result<u32> {
    let mut offset = 0u32;
    let mut raw = [0u8; ENTRY_SIZE];
    loop {
        let n = dir.read_at(offset, &mut raw)?;
        if n < ENTRY_SIZE {
            return Err(Error::NotFound);
        }
        if let Some(entry) = decode(&raw) {
            if entry.name == name {
                let tombstone = encode("", 0, false);
                dir.write_at(offset, &tombstone, free_map)?;
                return Ok(entry.sector);
            }
        }
        offset += ENTRY_SIZE as u32;
    }
}

/// Directories must be empty before removal. This crate does not
/// materialize `.`/`..` as entries (parent sectors are tracked by the
/// caller, see `fs::path`), so an empty entry list means truly empty.
pub fn is_empty(dir: &Inode) -> Result<bool> {
    Ok(list(dir)?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::BufferCache;
    use crate::block::MemBlockDevice;

    fn setup() -> (Arc<BufferCache>, FreeMap) {
        let device = Arc::new(MemBlockDevice::new(4096));
        (Arc::new(BufferCache::new(device)), FreeMap::format())
    }

    #[test]
    fn add_then_lookup_finds_the_entry() {
        let (cache, mut map) = setup();
        let sector = map.allocate().unwrap();
        let dir = Inode::create(cache, sector, true).unwrap();
        add(&dir, "foo.txt", 42, &mut map).unwrap();
        assert_eq!(lookup(&dir, "foo.txt").unwrap(), 42);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (cache, mut map) = setup();
        let sector = map.allocate().unwrap();
        let dir = Inode::create(cache, sector, true).unwrap();
        add(&dir, "foo.txt", 42, &mut map).unwrap();
        assert_eq!(add(&dir, "foo.txt", 43, &mut map), Err(Error::AlreadyExists));
    }

    #[test]
    fn removed_entry_slot_is_reused() {
        let (cache, mut map) = setup();
        let sector = map.allocate().unwrap();
        let dir = Inode::create(cache, sector, true).unwrap();
        add(&dir, "a", 1, &mut map).unwrap();
        remove(&dir, "a", &mut map).unwrap();
        assert_eq!(lookup(&dir, "a"), Err(Error::NotFound));
        add(&dir, "b", 2, &mut map).unwrap();
        assert_eq!(dir.len(), ENTRY_SIZE as u32);
        assert_eq!(lookup(&dir, "b").unwrap(), 2);
    }

    #[test]
    fn empty_directory_reports_empty() {
        let (cache, mut map) = setup();
        let sector = map.allocate().unwrap();
        let dir = Inode::create(cache, sector, true).unwrap();
        assert!(is_empty(&dir).unwrap());
        add(&dir, "a", 1, &mut map).unwrap();
        assert!(!is_empty(&dir).unwrap());
    }

    #[test]
    fn adding_an_empty_name_is_rejected() {
        let (cache, mut map) = setup();
        let sector = map.allocate().unwrap();
        let dir = Inode::create(cache, sector, true).unwrap();
        assert_eq!(add(&dir, "", 1, &mut map), Err(Error::InvalidPath));
    }
}
