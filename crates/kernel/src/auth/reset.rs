//! One-time password-reset tokens.
//!
//! The clear token only travels in the emailed URL; the user document keeps
//! its SHA-256 and an expiry.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::query::Filter;
use crate::resource::patch_value;

/// Minutes a reset token stays usable.
pub const RESET_TOKEN_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct ResetToken {
    /// Sent to the user.
    pub plain: String,
    /// Stored on the user.
    pub hash: String,
    pub expires: DateTime<Utc>,
}

impl ResetToken {
    pub fn issue(now: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let plain = hex::encode(bytes);
        Self {
            hash: hash_token(&plain),
            plain,
            expires: now + Duration::minutes(RESET_TOKEN_MINUTES),
        }
    }

    /// Patch that stores the hash and expiry.
    pub fn store_patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("password_reset_token".to_string(), self.hash.clone().into());
        patch.insert("password_reset_expires".to_string(), patch_value(&self.expires));
        patch
    }
}

pub fn hash_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Filter locating the user a clear token was issued to.
pub fn lookup_filter(plain: &str) -> Filter {
    Filter::eq("password_reset_token", hash_token(plain))
}

/// True while a stored expiry lies in the future.
pub fn is_unexpired(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires.is_some_and(|expires| expires > now)
}

/// Patch clearing both reset fields.
pub fn clear_patch() -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("password_reset_token".to_string(), Value::Null);
    patch.insert("password_reset_expires".to_string(), Value::Null);
    patch
}
