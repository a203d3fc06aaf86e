//! Encrypted API-key vault.
//!
//! `CredentialVault` encrypts remote-service API keys at rest using
//! AES-256-GCM. The symmetric key is derived by hashing the process-wide
//! master secret; the stored blob is `hex(nonce):hex(tag):hex(ciphertext)`.
//! The plaintext key is returned exactly once at creation.

use crate::models::UserId;
use crate::store::models::ApiKeyRecord;
use crate::store::traits::DashboardDb;
use crate::{Error, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use ulid::Ulid;
use uuid::Uuid;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_PREFIX_LEN: usize = 10;

#[derive(Clone)]
pub struct CredentialVault {
    db: Arc<dyn DashboardDb>,
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from the store and the process master secret.
    ///
    /// Fails with `Error::Configuration` when the secret is blank; callers
    /// should treat that as fatal at startup.
    pub fn new(db: Arc<dyn DashboardDb>, master_secret: &str) -> Result<Self> {
        if master_secret.trim().is_empty() {
            return Err(Error::Configuration(
                "vault master secret is not set".to_string(),
            ));
        }
        let key = Sha256::digest(master_secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .expect("32-byte key is always valid for AES-256");
        Ok(Self { db, cipher })
    }

    /// Create a key: generate the plaintext, encrypt it, persist the record.
    ///
    /// The plaintext is returned exactly once; only the ciphertext and a
    /// display prefix survive.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create(&self, user_id: UserId, name: &str) -> Result<(ApiKeyRecord, String)> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("key name must not be empty".to_string()));
        }

        let plaintext = format!("ob_{}{}", Ulid::new(), Ulid::new());
        let ciphertext = self.encrypt(plaintext.as_bytes())?;

        let record = ApiKeyRecord {
            key_id: Uuid::new_v4(),
            user_id,
            name: name.trim().to_string(),
            key_prefix: plaintext.chars().take(KEY_PREFIX_LEN).collect(),
            ciphertext,
            active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.db.insert_api_key(&record).await?;

        Ok((record, plaintext))
    }

    /// Key metadata for the account, newest first. Never exposes ciphertext
    /// or plaintext.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list(&self, user_id: UserId) -> Result<Vec<ApiKeyRecord>> {
        self.db.list_api_keys(user_id).await
    }

    /// Irreversibly deactivate a key. `NotFound` if it isn't the user's.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn revoke(&self, user_id: UserId, key_id: Uuid) -> Result<ApiKeyRecord> {
        self.db.revoke_api_key(user_id, key_id).await
    }

    /// Decrypt the most recently created active key for sync use.
    ///
    /// Returns `None` when no active, decryptable key exists; callers treat
    /// this as "sync unavailable", not a failure. Decryption fails closed: a
    /// tampered blob is reported as `None`, never as partial plaintext.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn decrypt_for_use(&self, user_id: UserId) -> Result<Option<String>> {
        let Some(record) = self.db.latest_active_api_key(user_id).await? else {
            return Ok(None);
        };

        match self.decrypt(&record.ciphertext) {
            Ok(plaintext) => {
                // Best-effort usage tracking.
                let _ = self
                    .db
                    .touch_api_key_last_used(record.key_id, Utc::now())
                    .await;
                Ok(Some(plaintext))
            }
            Err(e) => {
                tracing::warn!(key_id = %record.key_id, error = %e, "stored api key failed to decrypt");
                Ok(None)
            }
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::BackendMessage(format!("encrypt: {e}")))?;
        // aes-gcm appends the auth tag; store it as its own segment.
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        let mut parts = stored.splitn(3, ':');
        let (Some(nonce_hex), Some(tag_hex), Some(payload_hex)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Integrity);
        };

        let nonce_bytes = hex::decode(nonce_hex).map_err(|_| Error::Integrity)?;
        let tag = hex::decode(tag_hex).map_err(|_| Error::Integrity)?;
        let payload = hex::decode(payload_hex).map_err(|_| Error::Integrity)?;
        if nonce_bytes.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(Error::Integrity);
        }

        let mut ciphertext = payload;
        ciphertext.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| Error::Integrity)?;
        String::from_utf8(plaintext).map_err(|_| Error::Integrity)
    }
}
