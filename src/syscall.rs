//! Syscall glue: a per-process open-file table translating POSIX-style
//! calls into `Filesystem` operations and mapping any `Error` to `-1`,
//! the way a real trap handler would.
//!
//! Grounded on `original_source/src/userprog/syscall.c`'s dispatch
//! table (`SYS_CREATE`, `SYS_REMOVE`, `SYS_OPEN`, `SYS_FILESIZE`,
//! `SYS_READ`, `SYS_WRITE`, `SYS_SEEK`, `SYS_TELL`, `SYS_CLOSE`). Not
//! implemented: `SYS_HALT`, `SYS_EXEC`, `SYS_WAIT` -- `spec.md` §1 names
//! the process loader and shell as external collaborators this crate
//! does not own, and there is no process-image loader here to exec.
//! `SYS_MMAP`/`SYS_MUNMAP` are exposed directly through
//! `vm::mmap::MmapTable` rather than through this table, since they
//! need the caller's `VirtualMemory`, which this table does not hold.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fs::inode::Inode;
use crate::fs::Filesystem;

pub type Fd = i32;

const STDIN_FD: Fd = 0;
const STDOUT_FD: Fd = 1;

struct OpenFile {
    inode: Arc<Inode>,
    position: u32,
}

/// One process's open-file table, keyed by file descriptor the way the
/// original keys `struct thread`'s `fd_table` by small integer. This
/// crate does not yet track a file table per `proc::ThreadId` (see
/// `DESIGN.md`), so one `FileTable` models a single process's syscall
/// surface at a time.
pub struct FileTable {
    fs: Arc<Filesystem>,
    cwd: Arc<Inode>,
    files: HashMap<Fd, OpenFile>,
    next_fd: Fd,
}

impl FileTable {
    pub fn new(fs: Arc<Filesystem>, cwd: Arc<Inode>) -> Self {
        Self {
            fs,
            cwd,
            files: HashMap::new(),
            next_fd: STDOUT_FD + 1,
        }
    }

    pub fn create(&self, path: &str, is_dir: bool) -> i64 {
        match self.fs.create(path, &self.cwd, is_dir) {
            Ok(_) => 0,
            Err(_) => -1,
        }
    }

    pub fn remove(&self, path: &str) -> i64 {
        match self.fs.remove(path, &self.cwd) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    pub fn open(&mut self, path: &str) -> Fd {
        match self.fs.resolve(path, &self.cwd) {
            Ok(inode) => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, OpenFile { inode, position: 0 });
                fd
            }
            Err(_) => -1,
        }
    }

    pub fn close(&mut self, fd: Fd) {
        self.files.remove(&fd);
    }

    pub fn filesize(&self, fd: Fd) -> i64 {
        self.files
            .get(&fd)
            .map(|f| f.inode.len() as i64)
            .unwrap_or(-1)
    }

    pub fn seek(&mut self, fd: Fd, position: u32) {
        if let Some(f) = self.files.get_mut(&fd) {
            f.position = position;
        }
    }

    pub fn tell(&self, fd: Fd) -> i64 {
        self.files.get(&fd).map(|f| f.position as i64).unwrap_or(-1)
    }

    /// Reads from `fd` into `buf`, advancing its position. Reading from
    /// stdin is refused -- console input is an external collaborator
    /// `spec.md` §1 does not give this crate a way to satisfy.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> i64 {
        if fd == STDIN_FD {
            return -1;
        }
        let Some(file) = self.files.get_mut(&fd) else {
            return -1;
        };
        match file.inode.read_at(file.position, buf) {
            Ok(n) => {
                file.position += n as u32;
                n as i64
            }
            Err(_) => -1,
        }
    }

    /// Writes `buf` to `fd`. Writing to stdout always succeeds and
    /// reports the full length, matching `putbuf`'s behavior in the
    /// original -- this crate has no console device to actually render
    /// it to.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> i64 {
        if fd == STDOUT_FD {
            return buf.len() as i64;
        }
        let Some(file) = self.files.get_mut(&fd) else {
            return -1;
        };
        match self.fs.write_at(&file.inode, file.position, buf) {
            Ok(n) => {
                file.position += n as u32;
                n as i64
            }
            Err(_) => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn setup() -> FileTable {
        let device = Arc::new(MemBlockDevice::new(4096));
        let fs = Arc::new(Filesystem::format(device).unwrap());
        let cwd = fs.root().unwrap();
        FileTable::new(fs, cwd)
    }

    #[test]
    fn create_open_write_read_round_trips() {
        let mut table = setup();
        assert_eq!(table.create("a.txt", false), 0);
        let fd = table.open("a.txt");
        assert!(fd > STDOUT_FD);
        assert_eq!(table.write(fd, b"hello"), 5);
        table.seek(fd, 0);
        let mut buf = [0u8; 5];
        assert_eq!(table.read(fd, &mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(table.tell(fd), 5);
    }

    #[test]
    fn opening_a_missing_file_returns_negative_one() {
        let mut table = setup();
        assert_eq!(table.open("missing.txt"), -1);
    }

    #[test]
    fn closed_descriptor_is_no_longer_usable() {
        let mut table = setup();
        table.create("b.txt", false);
        let fd = table.open("b.txt");
        table.close(fd);
        let mut buf = [0u8; 1];
        assert_eq!(table.read(fd, &mut buf), -1);
    }

    #[test]
    fn writing_to_stdout_always_reports_full_length() {
        let mut table = setup();
        assert_eq!(table.write(STDOUT_FD, b"hi"), 2);
    }
}
