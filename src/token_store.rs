use std::{
    fs,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{generic_array::typenum::Unsigned, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::models::Session;

type Result<T> = std::result::Result<T, TokenStoreError>;

#[derive(thiserror::Error, Debug)]
pub enum TokenStoreError {
    #[error("key error: {0}")]
    Key(String),
    #[error("encryption error")]
    Encryption,
    #[error("decryption error")]
    Decryption,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// OAuth token as persisted between runs.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub token_uri: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredToken {
    pub fn session(&self) -> Session {
        Session::new(SecretString::new(self.access_token.clone()), self.expires_at)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.session().is_valid_at(now)
    }
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Encrypted on-disk cache of the session state.
pub struct TokenStore {
    token_path: PathBuf,
    key_path: PathBuf,
}

struct Cipher {
    key: SecretVec<u8>,
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn load_key(key_path: &Path) -> Result<Cipher> {
    Cipher::from_bytes(fs::read(key_path)?)
}

fn load_or_create_key(key_path: &Path) -> Result<Cipher> {
    if key_path.exists() {
        return load_key(key_path);
    }

    if let Some(parent) = key_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut key = vec![0u8; 32];
    OsRng.fill_bytes(&mut key);
    fs::write(key_path, &key)?;
    restrict_permissions(key_path)?;
    Cipher::from_bytes(key)
}

impl TokenStore {
    pub fn new(token_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn exists(&self) -> bool {
        self.token_path.exists()
    }

    /// Returns `Ok(None)` when nothing has been cached yet.
    pub fn load(&self) -> Result<Option<StoredToken>> {
        if !self.token_path.exists() {
            return Ok(None);
        }
        if !self.key_path.exists() {
            return Err(TokenStoreError::Key("token cache exists without its key".into()));
        }

        let cipher = load_key(&self.key_path)?;
        let encoded = fs::read_to_string(&self.token_path)?;
        let plaintext = cipher.decrypt_bytes(encoded.trim())?;
        let token = serde_json::from_slice(&plaintext)
            .map_err(|err| TokenStoreError::Serialization(err.to_string()))?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &StoredToken) -> Result<()> {
        let cipher = load_or_create_key(&self.key_path)?;
        let plaintext = serde_json::to_vec(token)
            .map_err(|err| TokenStoreError::Serialization(err.to_string()))?;
        let encoded = cipher.encrypt_bytes(&plaintext)?;

        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.token_path, encoded)?;
        restrict_permissions(&self.token_path)?;
        Ok(())
    }
}

impl Cipher {
    fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(TokenStoreError::Key("stored key has invalid length".into()));
        }
        Ok(Self {
            key: SecretVec::new(bytes),
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|_| TokenStoreError::Key("expected 32 byte key".into()))
    }

    fn encrypt_bytes(&self, data: &[u8]) -> Result<String> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut payload = cipher
            .encrypt(&nonce, data)
            .map_err(|_| TokenStoreError::Encryption)?;
        let mut combined = nonce.to_vec();
        combined.append(&mut payload);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    fn decrypt_bytes(&self, data: &str) -> Result<Vec<u8>> {
        let combined = general_purpose::STANDARD
            .decode(data)
            .map_err(|_| TokenStoreError::Decryption)?;
        let nonce_len = <Aes256Gcm as AeadCore>::NonceSize::to_usize();
        if combined.len() < nonce_len {
            return Err(TokenStoreError::Decryption);
        }
        let (nonce_bytes, payload) = combined.split_at(nonce_len);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher()?
            .decrypt(nonce, payload)
            .map_err(|_| TokenStoreError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_token() -> StoredToken {
        StoredToken {
            client_id: "1234.apps.googleusercontent.com".into(),
            client_secret: Some("GOCSPX-secret".into()),
            token_uri: "https://oauth2.googleapis.com/token".into(),
            access_token: "ya29.access".into(),
            refresh_token: Some("1//refresh".into()),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: vec!["https://mail.google.com/".into()],
        }
    }

    #[test]
    fn load_without_cache_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"), dir.path().join("token.key"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn saved_token_is_encrypted_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"), dir.path().join("token.key"));
        let token = sample_token();
        store.save(&token).expect("save");

        let on_disk = fs::read_to_string(store.token_path()).expect("read");
        assert!(!on_disk.contains("ya29.access"));

        let loaded = store.load().expect("load").expect("cached token");
        assert_eq!(loaded.access_token, token.access_token);
        assert_eq!(loaded.refresh_token, token.refresh_token);
        assert_eq!(loaded.expires_at, token.expires_at);
    }

    #[test]
    fn tampered_cache_fails_to_decrypt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"), dir.path().join("token.key"));
        store.save(&sample_token()).expect("save");

        let mut bytes = general_purpose::STANDARD
            .decode(fs::read_to_string(store.token_path()).expect("read"))
            .expect("base64");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(store.token_path(), general_purpose::STANDARD.encode(bytes)).expect("write");

        assert!(matches!(store.load(), Err(TokenStoreError::Decryption)));
    }

    #[test]
    fn truncated_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"), dir.path().join("token.key"));
        store.save(&sample_token()).expect("save");
        fs::write(dir.path().join("token.key"), [7u8; 16]).expect("write");

        assert!(matches!(store.load(), Err(TokenStoreError::Key(_))));
        assert!(matches!(store.save(&sample_token()), Err(TokenStoreError::Key(_))));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_private() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = dir.path().join("token.key");
        let store = TokenStore::new(dir.path().join("token.json"), &key_path);
        store.save(&sample_token()).expect("save");

        let mode = fs::metadata(&key_path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
