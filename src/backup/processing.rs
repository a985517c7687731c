//! File work behind the backup stages.
//!
//! Sources are digested with sha2-256, compressed with gzip and sealed with
//! AES-256-GCM. A sealed file is the 12-byte nonce followed by the ciphertext
//! and its tag. Everything here is blocking I/O and runs on the blocking pool.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const NONCE_LEN: usize = 12;

/// Stat and digest of one source file
#[derive(Clone, Debug)]
pub(crate) struct SourceFile {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) sha256: String,
    pub(crate) modified: DateTime<Utc>,
}

/// AES-256 key derived from a passphrase with sha2-256
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Derive the key for `passphrase`
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(passphrase.as_bytes()));
        Self(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Other(format!("backup stage task failed: {e}")))?
}

/// Check that `path` is a regular file and digest it
///
/// A missing file is a validation error naming the path.
pub(crate) async fn inspect(path: PathBuf) -> Result<SourceFile> {
    blocking(move || {
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::validation(
                    "files",
                    format!("file does not exist: {}", path.display()),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::validation(
                "files",
                format!("not a regular file: {}", path.display()),
            ));
        }

        let mut hasher = Sha256::new();
        let mut reader = BufReader::new(File::open(&path)?);
        std::io::copy(&mut reader, &mut hasher)?;

        Ok(SourceFile {
            size: meta.len(),
            sha256: format!("{:x}", hasher.finalize()),
            modified: DateTime::<Utc>::from(meta.modified()?),
            path,
        })
    })
    .await
}

/// Gzip `src` into `dst` at `level` (1-9); returns the size of `dst`
pub(crate) async fn compress_file(src: PathBuf, dst: PathBuf, level: u32) -> Result<u64> {
    blocking(move || {
        let mut reader = BufReader::new(File::open(&src)?);
        let writer = BufWriter::new(File::create(&dst)?);
        let mut encoder = GzEncoder::new(writer, Compression::new(level));
        std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.flush()?;
        Ok(std::fs::metadata(&dst)?.len())
    })
    .await
}

/// Seal `src` into `dst` with `key`; returns the size of `dst`
pub(crate) async fn encrypt_file(src: PathBuf, dst: PathBuf, key: EncryptionKey) -> Result<u64> {
    blocking(move || {
        let sealed = encrypt(&std::fs::read(&src)?, &key)?;
        std::fs::write(&dst, &sealed)?;
        Ok(sealed.len() as u64)
    })
    .await
}

/// Seal `plaintext` under a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Other("encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open data produced by [`encrypt`] or the encrypt stage
///
/// Fails when the key is wrong or the data was altered.
pub fn decrypt(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(Error::Other("sealed data is truncated".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Other("decryption failed: wrong key or corrupt data".to_string()))
}

/// Inflate gzip data produced by the compress stage
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut out)?;
    Ok(out)
}

/// Staged file name for source `index`, keeping the source's own name readable
pub(crate) fn staged_name(dir: &Path, index: usize, source: &Path, suffix: &str) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    dir.join(format!("{index}-{name}{suffix}"))
}
