//! Detached OpenPGP signature verification of `repomd.xml` (spec §4.3,
//! §6.1 `gnupghomedir`). Gated behind the `gpg` feature.

use std::path::{Path, PathBuf};

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::Packet;
use openpgp::parse::Parse;
use openpgp::parse::{PacketParser, PacketParserResult};
use openpgp::policy::StandardPolicy;

use crate::core::error::{Error, Result};

/// Loads a keyring and checks detached signatures against it. Injected
/// into the metadata fetch as a capability rather than hardwired, so a
/// caller can substitute a fake for tests.
pub struct PgpVerifier {
    policy: StandardPolicy<'static>,
    certs: Vec<Cert>,
}

impl PgpVerifier {
    /// Load every certificate found under `gnupghomedir` (a directory of
    /// `*.gpg`/`*.asc` keyring files, spec §6.1). An empty or missing
    /// directory yields a verifier that accepts no signatures.
    pub fn load(gnupghomedir: &Path) -> Result<Self> {
        let mut certs = Vec::new();
        if gnupghomedir.is_dir() {
            let entries = std::fs::read_dir(gnupghomedir)?;
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Ok(mut file) = std::fs::File::open(&path) else {
                    continue;
                };
                if let Ok(parser) = openpgp::cert::CertParser::from_reader(&mut file) {
                    certs.extend(parser.filter_map(std::result::Result::ok));
                }
            }
        } else if gnupghomedir.is_file() {
            let mut file = std::fs::File::open(gnupghomedir)?;
            if let Ok(parser) = openpgp::cert::CertParser::from_reader(&mut file) {
                certs.extend(parser.filter_map(std::result::Result::ok));
            }
        }

        Ok(Self {
            policy: StandardPolicy::new(),
            certs,
        })
    }

    /// A verifier with no trusted certificates; every check fails closed.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policy: StandardPolicy::new(),
            certs: Vec::new(),
        }
    }

    /// Verify `data` against a detached ASCII-armored or binary signature
    /// (spec §4.3: `repomd.xml` is checked against `repomd.xml.asc`).
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let mut ppr = PacketParser::from_bytes(signature)
            .map_err(|e| Error::BadGpg(format!("cannot parse signature: {e}")))?;
        let mut valid = false;

        while let PacketParserResult::Some(pp) = ppr {
            if let Packet::Signature(sig) = &pp.packet {
                let algo = sig.hash_algo();
                let issuers = sig.get_issuers();

                let mut hasher = algo
                    .context()
                    .map_err(|e| Error::BadGpg(e.to_string()))?
                    .for_signature(sig.version());
                hasher.update(data);

                for cert in &self.certs {
                    let relevant = issuers.is_empty()
                        || issuers.iter().any(|issuer| {
                            cert.keys().any(|k| k.key().key_handle().aliases(issuer))
                        });
                    if !relevant {
                        continue;
                    }
                    for key in cert
                        .keys()
                        .with_policy(&self.policy, None)
                        .alive()
                        .revoked(false)
                        .for_signing()
                    {
                        if sig.verify_hash(key.key(), hasher.clone()).is_ok() {
                            valid = true;
                            break;
                        }
                    }
                    if valid {
                        break;
                    }
                }
            }
            if valid {
                break;
            }
            ppr = pp
                .next()
                .map_err(|e| Error::BadGpg(e.to_string()))?
                .1;
        }

        if valid {
            Ok(())
        } else {
            Err(Error::BadGpg(
                "no trusted certificate produced a valid signature".to_string(),
            ))
        }
    }

    /// Verify a file on disk against a detached signature file.
    pub fn verify_files(&self, data_path: &Path, sig_path: &Path) -> Result<()> {
        let data = std::fs::read(data_path)?;
        let signature = std::fs::read(sig_path)?;
        self.verify(&data, &signature)
    }
}

/// Default keyring location under a destdir, mirroring the original
/// library's `gnupghomedir` option default of `<destdir>/gpg`.
#[must_use]
pub fn default_gnupghomedir(destdir: &Path) -> PathBuf {
    destdir.join("gpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_verifier_rejects_everything() {
        let verifier = PgpVerifier::empty();
        let result = verifier.verify(b"repomd.xml contents", b"not a real signature");
        assert!(result.is_err());
    }

    #[test]
    fn missing_keyring_directory_loads_with_no_certs() {
        let verifier = PgpVerifier::load(Path::new("/nonexistent/keyring/dir")).unwrap();
        assert!(verifier.verify(b"data", b"sig").is_err());
    }

    #[test]
    fn empty_signature_bytes_fail_to_parse() {
        let verifier = PgpVerifier::empty();
        assert!(verifier.verify(b"data", b"").is_err());
    }
}
