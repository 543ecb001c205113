//! Checksum and detached OpenPGP signature verification (spec §3 Checksum,
//! §4.3).

pub mod digest;
#[cfg(feature = "gpg")]
pub mod gpg;

pub use digest::{ChecksumType, verify_bytes, verify_file};
