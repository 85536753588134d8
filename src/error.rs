//! Crate-wide error taxonomy.
//!
//! Mirrors the four-way split of `spec.md` §7: resource exhaustion,
//! invalid input, not-found, and fatal (the last group is not
//! represented here at all -- fatal conditions `panic!` at the call
//! site instead of being returned).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    #[error("out of free sectors")]
    NoFreeSectors,

    #[error("swap device is full")]
    SwapFull,

    #[error("out of physical frames")]
    OutOfFrames,

    #[error("invalid path")]
    InvalidPath,

    #[error("name too long")]
    NameTooLong,

    #[error("name already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("directory not empty")]
    DirectoryNotEmpty,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("write denied while file is memory-mapped for execution")]
    WriteDenied,

    #[error("address range already mapped")]
    AlreadyMapped,

    #[error("invalid memory-map request")]
    InvalidMmap,

    #[error("underlying I/O failure")]
    Io,
}

pub type Result<T> = core::result::Result<T, Error>;
