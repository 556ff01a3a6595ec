//! Session tokens of the form `user.expiry.signature`.
//!
//! `expiry` is a unix timestamp in seconds and `signature` is the hex
//! HMAC-SHA512 of `user.expiry` under the process signing key.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::TokenError;
use crate::keys::KeyMaterial;

type HmacSha512 = Hmac<Sha512>;

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

fn mac(keys: &KeyMaterial) -> Result<HmacSha512, TokenError> {
    HmacSha512::new_from_slice(keys.sign_key()).map_err(|_| TokenError::InvalidKey)
}

/// Issue a token for `user` valid until `now + lifetime`.
pub fn issue_token(
    keys: &KeyMaterial,
    user: &str,
    now: DateTime<Utc>,
    lifetime: Duration,
) -> Result<String, TokenError> {
    let payload = format!("{user}.{}", (now + lifetime).timestamp());
    let mut mac = mac(keys)?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{payload}.{signature}"))
}

/// Verify a token and return the user it was issued for.
pub fn verify_token(
    keys: &KeyMaterial,
    token: &str,
    now: DateTime<Utc>,
) -> Result<String, TokenError> {
    let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
    let (user, expiry) = payload.rsplit_once('.').ok_or(TokenError::Malformed)?;
    if user.is_empty() {
        return Err(TokenError::Malformed);
    }
    let expiry: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
    let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

    let mut mac = mac(keys)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    if now.timestamp() >= expiry {
        return Err(TokenError::Expired);
    }
    Ok(user.to_string())
}
