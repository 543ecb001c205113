//! Streaming checksum verification (spec §3 Checksum, §4.3): MD5, SHA-1,
//! SHA-224, SHA-256, SHA-384, SHA-512.

use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::core::error::{Error, Result};

/// A supported checksum algorithm (spec §3 `ChecksumType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumType {
    /// Parse a repomd.xml `type="..."` attribute or metalink `hash
    /// type="..."` attribute (case-insensitive, `sha` is treated as an
    /// alias for `sha1` the way the original library does).
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha" | "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::UnknownChecksum(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

fn digest_hex(mut reader: impl Read, checksum_type: ChecksumType) -> Result<String> {
    let mut buf = vec![0u8; CHUNK_SIZE];

    macro_rules! hash_with {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hex::encode(hasher.finalize())
        }};
    }

    let hex = match checksum_type {
        ChecksumType::Md5 => hash_with!(Md5::new()),
        ChecksumType::Sha1 => hash_with!(Sha1::new()),
        ChecksumType::Sha224 => hash_with!(Sha224::new()),
        ChecksumType::Sha256 => hash_with!(Sha256::new()),
        ChecksumType::Sha384 => hash_with!(Sha384::new()),
        ChecksumType::Sha512 => hash_with!(Sha512::new()),
    };
    Ok(hex)
}

/// Verify a file's digest, streaming it in fixed-size chunks rather than
/// reading it whole into memory (spec §4.3).
pub fn verify_file(path: &Path, checksum_type: ChecksumType, expected_hex: &str) -> Result<()> {
    let file = std::fs::File::open(path)?;
    let actual = digest_hex(file, checksum_type)?;
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(Error::BadChecksum {
            path: path.display().to_string(),
            expected: expected_hex.to_string(),
            actual,
        })
    }
}

/// Verify an in-memory buffer's digest (used for `repomd.xml`, which is
/// small and already resident for signature checking).
pub fn verify_bytes(data: &[u8], checksum_type: ChecksumType, expected_hex: &str) -> Result<()> {
    let actual = digest_hex(data, checksum_type)?;
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(Error::BadChecksum {
            path: "<memory>".to_string(),
            expected: expected_hex.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_string() {
        assert_eq!(
            digest_hex(&b""[..], ChecksumType::Md5).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            digest_hex(&b"abc"[..], ChecksumType::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha1_alias_is_accepted() {
        assert_eq!(ChecksumType::parse("sha").unwrap(), ChecksumType::Sha1);
        assert_eq!(ChecksumType::parse("SHA1").unwrap(), ChecksumType::Sha1);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(ChecksumType::parse("crc32").is_err());
    }

    #[test]
    fn verify_bytes_reports_mismatch() {
        let err = verify_bytes(b"hello", ChecksumType::Md5, "0".repeat(32).as_str()).unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::BadChecksum);
    }
}
