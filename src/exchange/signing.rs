//! Request signing for live-mode order placement.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `timestamp || method || path || body`, hex-encoded.
///
/// This is the one of the two authentication schemes named for the order interface
/// that a portable signer can actually implement; the other (EIP-712 typed-data,
/// pinned to a specific exchange contract and chain id) is left to `OrderAuth::Eip712`,
/// which live mode refuses to arm for.
pub fn sign_hmac_request(timestamp: u64, method: &str, path: &str, body: &str, secret: &str) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| format!("HMAC error: {}", e))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Authentication material for the live order client (§4.7).
pub enum OrderAuth {
    Hmac { api_key: String, api_secret: String },
    /// Not implemented; any attempt to arm live mode with this variant is a `SecurityError`.
    Eip712,
}
