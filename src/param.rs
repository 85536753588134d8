//! Tunable constants shared across subsystems.

/// Maximum number of threads/processes tracked at once.
pub const NPROC: usize = 64;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Sector size of both the filesystem and swap block devices.
pub const SECTOR_SIZE: usize = 512;

/// Simulated page size. Stack growth, frames, and swap slots are all
/// measured in units of this.
pub const PGSIZE: usize = 4096;

/// Sectors per page (swap slot granularity).
pub const SECTORS_PER_PAGE: usize = PGSIZE / SECTOR_SIZE;

/// Number of cache lines in the buffer cache.
pub const NBUF: usize = 64;

/// Number of 4-byte pointers that fit in one sector (an indirect block).
pub const POINTERS_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Number of direct block pointers stored in an on-disk inode, chosen
/// so that `DiskInode` occupies exactly one 512-byte sector:
/// 4 (length) + 4 (magic) + 4 (is_dir) + DIRECT*4 + 4 (indirect) + 4 (double_indirect) == 512.
pub const DIRECT_BLOCK_NUMBER: usize = 123;

/// Total sector capacity addressable by one inode.
pub const MAX_FILE_SECTORS: usize =
    DIRECT_BLOCK_NUMBER + POINTERS_PER_SECTOR + POINTERS_PER_SECTOR * POINTERS_PER_SECTOR;

/// Maximum length of a path component, excluding the NUL terminator.
pub const NAME_MAX: usize = 14;

/// Sector holding the free-map bitmap header.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// First sector available for inode/data allocation.
pub const FIRST_DATA_SECTOR: u32 = 2;

/// Magic number stamped into every on-disk inode.
pub const INODE_MAGIC: u32 = 0x494E_4F44;

/// Lowest valid thread priority.
pub const PRI_MIN: i32 = 0;

/// Highest valid thread priority.
pub const PRI_MAX: i32 = 63;

/// Priority assigned to new threads absent other instruction.
pub const PRI_DEFAULT: i32 = 31;

/// Number of ticks a thread may run before being forced to yield.
pub const TIME_SLICE: u32 = 4;

/// Number of ticks per second, used for the once-a-second MLFQS recompute.
pub const TIMER_FREQ: u32 = 100;

/// How far below the current stack pointer a faulting address may still
/// be considered a legitimate stack-growth access.
pub const STACK_GROWTH_SLACK: usize = 32;

/// Maximum size the user stack is allowed to grow to, in bytes.
pub const STACK_LIMIT: usize = 8 * 1024 * 1024;

/// Sentinel returned by swap allocation when the swap device is full.
pub const SWAP_FULL: i64 = -1;
