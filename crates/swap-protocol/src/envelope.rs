//! The hop-by-hop security envelope: HMAC-SHA256 integrity and AES-GCM
//! confidentiality, with PBKDF2-derived keys cached per shared secret.

use crate::canonical::to_canonical_bytes;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const PBKDF2_ITERATIONS: u32 = 100_000;
const AES_KEY_LEN: usize = 32;
const GCM_NONCE_LEN: usize = 12;

const BASE_FIELDS: [&str; 4] = ["version", "source_id", "message_id", "message_type"];

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("security envelope missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid base64 in security envelope: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("AES-GCM encryption failed")]
    EncryptFailed,
    #[error("AES-GCM decryption failed")]
    DecryptFailed,
    #[error("HMAC signature verification failed")]
    InvalidSignature,
    #[error("decrypted payload is not valid JSON: {0}")]
    InvalidPayloadJson(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// On-the-wire shape of the `security` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEnvelope {
    pub enc: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl SecurityEnvelope {
    pub fn none() -> Self {
        Self {
            enc: "none".to_owned(),
            mac: "none".to_owned(),
            ciphertext: None,
            iv: None,
            signature: None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.enc == "AES-GCM" && self.ciphertext.is_some() && self.iv.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.mac == "HMAC-SHA256" && self.signature.is_some()
    }
}

/// Lazily derives and caches the AES-GCM and HMAC keys for a shared secret,
/// keyed additionally by `source_id` for the AES key (its PBKDF2 salt is
/// `"swap-v1:" + source_id`).
pub struct CryptoContext {
    shared_secret: String,
    aes_keys: Mutex<HashMap<String, [u8; AES_KEY_LEN]>>,
}

impl CryptoContext {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            aes_keys: Mutex::new(HashMap::new()),
        }
    }

    fn hmac_key(&self) -> &[u8] {
        self.shared_secret.as_bytes()
    }

    fn aes_key_for(&self, source_id: &str) -> [u8; AES_KEY_LEN] {
        let mut cache = self.aes_keys.lock().expect("crypto key cache poisoned");
        if let Some(key) = cache.get(source_id) {
            return *key;
        }
        let salt = format!("swap-v1:{source_id}");
        let mut key = [0u8; AES_KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.shared_secret.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ITERATIONS,
            &mut key,
        );
        cache.insert(source_id.to_owned(), key);
        key
    }

    /// Encrypts every top-level field of `message` except the base envelope
    /// fields and `security`, replacing them with a populated `security`
    /// block carrying `enc = "AES-GCM"`.
    pub fn encrypt(&self, source_id: &str, message: &mut Value) -> Result<(), CryptoError> {
        let obj = message.as_object_mut().ok_or(CryptoError::NotAnObject)?;

        let mut payload = Map::new();
        let payload_keys: Vec<String> = obj
            .keys()
            .filter(|k| !BASE_FIELDS.contains(&k.as_str()) && k.as_str() != "security")
            .cloned()
            .collect();
        for key in &payload_keys {
            if let Some(v) = obj.remove(key) {
                payload.insert(key.clone(), v);
            }
        }

        let plaintext = serde_json::to_vec(&Value::Object(payload))?;

        let mut iv = [0u8; GCM_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let key = self.aes_key_for(source_id);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::EncryptFailed)?;
        let nonce = Nonce::from_slice(&iv);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CryptoError::EncryptFailed)?;

        obj.insert(
            "security".to_owned(),
            serde_json::to_value(SecurityEnvelope {
                enc: "AES-GCM".to_owned(),
                mac: "none".to_owned(),
                ciphertext: Some(BASE64.encode(ciphertext)),
                iv: Some(BASE64.encode(iv)),
                signature: None,
            })?,
        );
        Ok(())
    }

    /// Decrypts `security.ciphertext`/`security.iv` (when present and
    /// `enc = "AES-GCM"`) and merges the recovered payload fields back into
    /// the top-level object, alongside the base fields.
    pub fn decrypt(&self, source_id: &str, message: &mut Value) -> Result<(), CryptoError> {
        let security = match message.get("security") {
            Some(Value::Object(_)) => message["security"].clone(),
            _ => return Ok(()),
        };
        let envelope: SecurityEnvelope = serde_json::from_value(security)?;
        if !envelope.is_encrypted() {
            return Ok(());
        }
        if envelope.enc != "AES-GCM" {
            return Err(CryptoError::UnsupportedAlgorithm(envelope.enc));
        }

        let ciphertext = BASE64.decode(
            envelope
                .ciphertext
                .as_deref()
                .ok_or(CryptoError::MissingField("ciphertext"))?,
        )?;
        let iv = BASE64.decode(envelope.iv.as_deref().ok_or(CryptoError::MissingField("iv"))?)?;
        if iv.len() != GCM_NONCE_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let key = self.aes_key_for(source_id);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::DecryptFailed)?;
        let nonce = Nonce::from_slice(&iv);
        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptFailed)?;

        let payload: Value = serde_json::from_slice(&plaintext)?;
        let payload_obj = payload.as_object().ok_or(CryptoError::DecryptFailed)?;

        let obj = message.as_object_mut().ok_or(CryptoError::NotAnObject)?;
        for (k, v) in payload_obj {
            obj.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    /// Computes the HMAC over the canonical form of `message` with
    /// `security.signature` removed, and writes the base64 tag back into
    /// `security.signature`. Ensures a `security` object exists first.
    pub fn sign(&self, message: &mut Value) -> Result<(), CryptoError> {
        let obj = message.as_object_mut().ok_or(CryptoError::NotAnObject)?;
        if !obj.contains_key("security") {
            obj.insert(
                "security".to_owned(),
                serde_json::to_value(SecurityEnvelope::none())?,
            );
        }

        let tag = self.compute_tag(message)?;

        let obj = message.as_object_mut().ok_or(CryptoError::NotAnObject)?;
        let security = obj
            .get_mut("security")
            .and_then(Value::as_object_mut)
            .ok_or(CryptoError::NotAnObject)?;
        security.insert("mac".to_owned(), Value::String("HMAC-SHA256".to_owned()));
        security.insert("signature".to_owned(), Value::String(BASE64.encode(tag)));
        Ok(())
    }

    /// Recomputes the HMAC with `security.signature` removed and compares
    /// it to the stored signature in constant time.
    pub fn verify(&self, message: &Value) -> Result<bool, CryptoError> {
        let signature_b64 = message
            .get("security")
            .and_then(|s| s.get("signature"))
            .and_then(Value::as_str)
            .ok_or(CryptoError::MissingField("signature"))?;
        let signature = BASE64.decode(signature_b64)?;

        let expected = self.compute_tag(message)?;
        Ok(bool::from(expected.ct_eq(&signature)))
    }

    /// Computes the HMAC tag over the canonical form of `message` with
    /// `security.signature` removed (absent entirely), covering the base
    /// fields and every other field of `security` (`enc`, `iv`,
    /// `ciphertext`, `mac`) when present.
    fn compute_tag(&self, message: &Value) -> Result<Vec<u8>, CryptoError> {
        let mut working = message.clone();
        if let Some(security) = working.get_mut("security").and_then(Value::as_object_mut) {
            security.remove("signature");
        }
        let canonical = to_canonical_bytes(&working);

        let mut mac = HmacSha256::new_from_slice(self.hmac_key()).expect("HMAC accepts any key length");
        mac.update(&canonical);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
