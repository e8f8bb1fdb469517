use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing or malformed signature header")]
    Malformed,
    #[error("Signature timestamp is outside the tolerance")]
    Expired,
    #[error("No signature matches the payload")]
    Mismatch,
}

fn mac(secret: &str, timestamp: i64, payload: &str) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>]`).
/// Any `v1` entry matching the HMAC-SHA256 of `"{t}.{payload}"` passes.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", signature)) => signatures.push(signature),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now.timestamp() - timestamp).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }
    let mac = mac(secret, timestamp, payload)?;
    let matched = signatures
        .into_iter()
        .filter_map(|s| hex::decode(s).ok())
        .any(|bytes| mac.clone().verify_slice(&bytes).is_ok());
    match matched {
        true => Ok(()),
        false => Err(SignatureError::Mismatch),
    }
}

/// Header value the processor would send for `payload` at `at`.
pub fn signature_header(
    payload: &str,
    secret: &str,
    at: DateTime<Utc>,
) -> Result<String, SignatureError> {
    let timestamp = at.timestamp();
    let signature = mac(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}
