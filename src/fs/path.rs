//! Path parsing.
//!
//! The teacher's `Path`/`FileName` wrap borrowed `[u8]` slices validated
//! to contain no NUL bytes, mirroring C string handling. Hosted on
//! `std`, there is no NUL-terminated C string to parse in the first
//! place, so this version works directly on `&str` and yields owned
//! `String` components -- same `skipelem`-style splitting, simpler
//! representation.

use crate::error::{Error, Result};
use crate::param::NAME_MAX;

/// Splits `path` into its non-empty, non-`.`-separated components,
/// collapsing repeated slashes the way the original `skipelem` does.
pub fn components(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for part in &parts {
        if part.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
    }
    Ok(parts)
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits a path into its parent directory path and final component,
/// e.g. `"/a/b/c"` -> `("/a/b", "c")`. The parent keeps the leading `/`
/// if the original path was absolute.
pub fn split_parent(path: &str) -> Result<(String, &str)> {
    let parts = components(path)?;
    let (last, init) = parts.split_last().ok_or(Error::InvalidPath)?;
    let mut parent = if is_absolute(path) {
        String::from("/")
    } else {
        String::new()
    };
    parent.push_str(&init.join("/"));
    Ok((parent, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(components("///a//bb").unwrap(), vec!["a", "bb"]);
    }

    #[test]
    fn splits_parent_and_name() {
        let (parent, name) = split_parent("/a/b/c").unwrap();
        assert_eq!(parent, "/a/b");
        assert_eq!(name, "c");
    }

    #[test]
    fn rejects_overlong_component() {
        let long = "x".repeat(NAME_MAX + 1);
        assert_eq!(components(&long), Err(Error::NameTooLong));
    }
}
