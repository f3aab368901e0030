//! Username/filename validation (`spec.md` §3).
//!
//! Both are ASCII byte strings used directly as path components and as
//! index keys; a filename is additionally bounded to 256 bytes so it fits
//! the index's fixed-width entry format.

use crate::error::{FoxyError, Result};

pub const MAX_FILENAME_LEN: usize = 256;

fn validate_component(what: &str, s: &str, max_len: Option<usize>) -> Result<()> {
    if s.is_empty() {
        return Err(FoxyError::input(format!("{what} must not be empty")));
    }
    if let Some(max) = max_len {
        if s.len() > max {
            return Err(FoxyError::input(format!("{what} exceeds {max} bytes")));
        }
    }
    if !s.is_ascii() {
        return Err(FoxyError::input(format!("{what} must be ASCII")));
    }
    if s.contains('/') || s.contains('\0') {
        return Err(FoxyError::input(format!("{what} must not contain '/' or NUL")));
    }
    if s == "." || s == ".." {
        return Err(FoxyError::input(format!("{what} must not be '.' or '..'")));
    }
    Ok(())
}

/// Validate a filename: ASCII, 1..=256 bytes, usable as a path component and
/// an index key.
pub fn validate_filename(filename: &str) -> Result<()> {
    validate_component("filename", filename, Some(MAX_FILENAME_LEN))
}

/// Validate a username: ASCII, usable as a path component and index-key
/// prefix. The spec places no length cap on usernames beyond what is
/// usable as a single path component.
pub fn validate_username(user: &str) -> Result<()> {
    validate_component("username", user, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_filename("photo.png").is_ok());
        assert!(validate_username("alice").is_ok());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_filename("a/b").is_err());
        assert!(validate_username("a/b").is_err());
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(validate_filename("café.png").is_err());
    }

    #[test]
    fn rejects_overlong_filename() {
        let long = "a".repeat(MAX_FILENAME_LEN + 1);
        assert!(validate_filename(&long).is_err());
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
    }
}
