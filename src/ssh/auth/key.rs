//! Private key file loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{self, PrivateKey, PublicKey};
use tracing::debug;

/// A private key read from disk, remembered with the path it came from.
#[derive(Debug, Clone)]
pub struct LoadedKey {
    path: PathBuf,
    key: Arc<PrivateKey>,
}

impl LoadedKey {
    /// Load a private key, returning `None` on any failure.
    ///
    /// Missing files, unsupported formats and wrong (or absent) passphrases are
    /// logged at debug level and skipped so one bad key never blocks the rest.
    pub fn load(path: &Path, passphrase: Option<&str>) -> Option<Self> {
        if !path.is_file() {
            debug!("Skipping key {}: not a file", path.display());
            return None;
        }

        let passphrase = passphrase.filter(|p| !p.is_empty());
        match keys::load_secret_key(path, passphrase) {
            Ok(key) => {
                debug!("Loaded {} key from {}", key.algorithm().as_str(), path.display());
                Some(Self {
                    path: path.to_path_buf(),
                    key: Arc::new(key),
                })
            }
            Err(e) => {
                debug!("Skipping key {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    pub(crate) fn private_key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }
}

/// Identity used to de-duplicate key paths.
///
/// Symlinks and relative spellings of the same file collapse to one entry.
/// Paths that cannot be canonicalized are compared as written.
pub(crate) fn path_identity(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
