//! Binary entry point: parses `BootOptions`, opens or formats the disk
//! and swap images, boots the kernel, and flushes on exit.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use tinix::block::FileBlockDevice;
use tinix::config::BootOptions;
use tinix::kernel::Kernel;

fn open_image(path: &std::path::Path, sectors: u32, create: bool) -> std::io::Result<std::fs::File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .open(path)
        .map(|f| {
            let _ = sectors;
            f
        })
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = BootOptions::parse();

    let disk_file = match open_image(&opts.disk, opts.disk_sectors, opts.format) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to open disk image {:?}: {e}", opts.disk);
            return ExitCode::FAILURE;
        }
    };
    let disk = match FileBlockDevice::new(disk_file, opts.disk_sectors) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!("failed to size disk image {:?}: {e}", opts.disk);
            return ExitCode::FAILURE;
        }
    };

    let swap_file = match open_image(&opts.swap, opts.swap_sectors, true) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to open swap image {:?}: {e}", opts.swap);
            return ExitCode::FAILURE;
        }
    };
    let swap = match FileBlockDevice::new(swap_file, opts.swap_sectors) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!("failed to size swap image {:?}: {e}", opts.swap);
            return ExitCode::FAILURE;
        }
    };

    let kernel = match Kernel::boot(disk, swap, opts.format, opts.mlfqs, opts.frames, 0xC000_0000) {
        Ok(k) => k,
        Err(e) => {
            error!("boot failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = kernel.shutdown() {
        error!("shutdown flush failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
