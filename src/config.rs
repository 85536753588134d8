//! Boot-time command-line configuration.
//!
//! Grounded on `other_examples/realchonk-fuse-ufs`'s use of `clap`'s
//! derive API for a disk-image-backed filesystem binary's options.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tinix", about = "A Pintos-style teaching kernel simulation")]
pub struct BootOptions {
    /// Path to the filesystem disk image.
    #[arg(long, default_value = "fs.img")]
    pub disk: PathBuf,

    /// Path to the swap device image.
    #[arg(long, default_value = "swap.img")]
    pub swap: PathBuf,

    /// Number of sectors in the disk image. Only consulted when
    /// `--format` creates it fresh.
    #[arg(long, default_value_t = 8192)]
    pub disk_sectors: u32,

    /// Number of sectors in the swap image.
    #[arg(long, default_value_t = 4096)]
    pub swap_sectors: u32,

    /// Format a fresh filesystem instead of mounting an existing image.
    #[arg(long)]
    pub format: bool,

    /// Use the multi-level feedback queue scheduler instead of plain
    /// priority donation.
    #[arg(long)]
    pub mlfqs: bool,

    /// Number of simulated physical frames available to the frame table.
    #[arg(long, default_value_t = 256)]
    pub frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_bare_invocation() {
        let opts = BootOptions::parse_from(["tinix"]);
        assert!(!opts.format);
        assert!(!opts.mlfqs);
        assert_eq!(opts.frames, 256);
    }

    #[test]
    fn mlfqs_flag_is_recognized() {
        let opts = BootOptions::parse_from(["tinix", "--mlfqs", "--format"]);
        assert!(opts.mlfqs);
        assert!(opts.format);
    }
}
