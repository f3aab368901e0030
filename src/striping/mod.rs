//! RAID-4-style striping engine (`spec.md` §4.1/§4.2): split a file across
//! `N` data strips plus one parity strip on write, and verify/reconstruct on
//! read.

pub mod layout;
pub mod read;
pub mod write;

pub use layout::{find_trim_point, padding_bytes, strip_len_and_padding, PADDING_SENTINEL};
pub use read::{read_file, read_file_default};
pub use write::{write_file, DEFAULT_BUF_SIZE};
