// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! Coin Vault - encrypted persistence of the coin balance
//!
//! Two files live in the data directory:
//!
//! - `secret.key`: 32 raw key bytes, created on first use with owner-only
//!   permissions and reused for the life of the installation.
//! - `coins.dat`: `nonce (12) || ChaCha20-Poly1305 ciphertext || tag (16)`
//!   of the balance written as decimal text.
//!
//! A save file that cannot be decrypted or parsed counts as no save at all.
//! [`Vault::inspect`] reports exactly what went wrong; [`Vault::load`] turns
//! every such case into a balance of zero.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const KEY_FILE: &str = "secret.key";
pub const COINS_FILE: &str = "coins.dat";

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Binds ciphertexts to this file's purpose
const ASSOCIATED_DATA: &[u8] = b"ai-judge/coins/v1";

// ============ Keys ============

/// Symmetric key for the save file. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<[u8; KEY_SIZE]>);

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| VaultError::InvalidKey {
            expected: KEY_SIZE,
            found: bytes.len(),
        })?;
        Ok(Self(Zeroizing::new(array)))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for SecretKey {}

// ============ Errors and Outcomes ============

/// Failures that must reach the caller
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid key material: expected {expected} bytes, found {found}")]
    InvalidKey { expected: usize, found: usize },
    #[error("encryption failed")]
    Encryption,
}

/// Why an existing save file was ignored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Corruption {
    /// The file exists but could not be read
    Unreadable,
    /// Shorter than nonce plus tag
    Truncated,
    /// Wrong key or tampered ciphertext
    Authentication,
    NotUtf8,
    NotANumber,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Missing,
    Loaded(u64),
    Corrupt(Corruption),
}

impl LoadOutcome {
    /// Balance this outcome stands for
    pub fn value(&self) -> u64 {
        match self {
            LoadOutcome::Loaded(coins) => *coins,
            LoadOutcome::Missing | LoadOutcome::Corrupt(_) => 0,
        }
    }
}

// ============ Vault ============

#[derive(Debug, Clone)]
pub struct Vault {
    dir: PathBuf,
}

impl Vault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn save_path(&self) -> PathBuf {
        self.dir.join(COINS_FILE)
    }

    /// Read the key, generating and persisting one on first use
    pub fn ensure_key(&self) -> Result<SecretKey, VaultError> {
        let path = self.key_path();
        match read_key(&path) {
            Ok(key) => return Ok(key),
            Err(VaultError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        fs::create_dir_all(&self.dir)?;
        let key = SecretKey::generate();
        match create_private(&path) {
            Ok(mut file) => {
                file.write_all(key.as_bytes())?;
                file.sync_all()?;
                info!(path = %path.display(), "generated new save key");
                Ok(key)
            }
            // Another process created it first; use theirs
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => read_key(&path),
            Err(e) => Err(e.into()),
        }
    }

    /// Encrypt and write the balance, replacing any previous save
    pub fn save(&self, coins: u64, key: &SecretKey) -> Result<(), VaultError> {
        let blob = seal(key, coins.to_string().as_bytes())?;

        fs::create_dir_all(&self.dir)?;
        // Dropping an unpersisted temp file deletes it
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&blob)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.save_path()).map_err(|e| e.error)?;

        debug!(coins, "balance saved");
        Ok(())
    }

    /// Examine the save file without collapsing failures
    pub fn inspect(&self, key: &SecretKey) -> LoadOutcome {
        let blob = match fs::read(self.save_path()) {
            Ok(blob) => blob,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(e) => {
                debug!(error = %e, "save file unreadable");
                return LoadOutcome::Corrupt(Corruption::Unreadable);
            }
        };

        match open(key, &blob) {
            Ok(coins) => LoadOutcome::Loaded(coins),
            Err(corruption) => LoadOutcome::Corrupt(corruption),
        }
    }

    /// Saved balance, or 0 when there is no usable save
    pub fn load(&self, key: &SecretKey) -> u64 {
        let outcome = self.inspect(key);
        match outcome {
            LoadOutcome::Loaded(coins) => debug!(coins, "balance loaded"),
            LoadOutcome::Missing => debug!("no save file, starting from zero"),
            LoadOutcome::Corrupt(reason) => {
                warn!(?reason, path = %self.save_path().display(), "ignoring unusable save file")
            }
        }
        outcome.value()
    }
}

fn read_key(path: &Path) -> Result<SecretKey, VaultError> {
    let bytes = Zeroizing::new(fs::read(path)?);
    SecretKey::from_bytes(&bytes)
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map_err(|_| VaultError::Encryption)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn open(key: &SecretKey, blob: &[u8]) -> Result<u64, Corruption> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Corruption::Truncated);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| Corruption::Authentication)?;

    let text = std::str::from_utf8(&plaintext).map_err(|_| Corruption::NotUtf8)?;
    text.trim().parse().map_err(|_| Corruption::NotANumber)
}

// ============ Tests ============
