//! Request authentication.
//!
//! Every call except the health check carries three headers: the shared API key,
//! a Unix timestamp in seconds, and a hex HMAC-SHA256 signature over
//! `"{timestamp}:{canonical payload}"` keyed with the API key. The canonical payload
//! is the request's JSON with object keys sorted, no insignificant whitespace, and
//! every non-ASCII character written as a `\uXXXX` escape (UTF-16, lowercase hex).

use axum::{extract::FromRequestParts, http::request::Parts};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Serialize `value` with object keys sorted at every level and compact separators.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    let quoted = Value::String(s.to_string()).to_string();
    let mut units = [0u16; 2];
    for c in quoted.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
}

/// The authentication headers of one request.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
}

impl<S> FromRequestParts<S> for SignatureHeaders
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    warn!("Missing or unreadable {} header", name);
                    ApiError::Unauthorized
                })
        };

        Ok(Self {
            api_key: header(API_KEY_HEADER)?,
            timestamp: header(TIMESTAMP_HEADER)?,
            signature: header(SIGNATURE_HEADER)?,
        })
    }
}

/// Verifies API key, freshness and signature of incoming requests.
pub struct RequestAuthenticator {
    api_key: String,
    window_secs: u64,
}

impl RequestAuthenticator {
    pub fn new(api_key: impl Into<String>, window_secs: u64) -> Self {
        Self {
            api_key: api_key.into(),
            window_secs,
        }
    }

    /// Hex signature of `payload` at `timestamp`, as a client computes it.
    pub fn sign(&self, timestamp: &str, payload: &Value) -> String {
        hex::encode(self.mac(timestamp, payload).finalize().into_bytes())
    }

    fn mac(&self, timestamp: &str, payload: &Value) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.api_key.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(canonicalize(payload).as_bytes());
        mac
    }

    pub fn verify(&self, headers: &SignatureHeaders, payload: &Value) -> bool {
        self.verify_at(headers, payload, chrono::Utc::now().timestamp())
    }

    /// Check the request against the clock reading `now` (Unix seconds).
    pub fn verify_at(&self, headers: &SignatureHeaders, payload: &Value, now: i64) -> bool {
        if !bool::from(headers.api_key.as_bytes().ct_eq(self.api_key.as_bytes())) {
            warn!("API key mismatch");
            return false;
        }

        let Ok(ts) = headers.timestamp.trim().parse::<i64>() else {
            warn!("Invalid timestamp format: {}", headers.timestamp);
            return false;
        };
        if now.abs_diff(ts) > self.window_secs {
            warn!("Timestamp outside the accepted window: {}", headers.timestamp);
            return false;
        }

        let Ok(signature) = hex::decode(headers.signature.trim()) else {
            warn!("Signature is not valid hex");
            return false;
        };
        if self
            .mac(&headers.timestamp, payload)
            .verify_slice(&signature)
            .is_err()
        {
            warn!("Signature mismatch");
            return false;
        }

        true
    }

    /// [`Self::verify`] as a handler guard.
    pub fn authorize(&self, headers: &SignatureHeaders, payload: &Value) -> ApiResult<()> {
        if self.verify(headers, payload) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

impl std::fmt::Debug for RequestAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthenticator")
            .field("api_key", &"<redacted>")
            .field("window_secs", &self.window_secs)
            .finish()
    }
}
