//! Canonical field strings and HMAC signatures for gateway requests and callbacks.
//!
//! Two strategies exist:
//! - [`OrderedPlainCodec`]: fixed field order, raw values, HMAC-SHA256 (MoMo).
//! - [`SortedEncodedCodec`]: fields sorted by name, form-urlencoded values,
//!   empty values skipped, HMAC-SHA512 (VNPay).
//!
//! Both produce lowercase hex digests.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::payments::error::{PaymentError, PaymentResult};

pub trait SignatureCodec: Send + Sync {
    /// Gateway name used in error reporting
    fn gateway(&self) -> &str;

    /// Canonical string over decoded field values.
    fn canonical_string(&self, fields: &[(&str, &str)]) -> String;

    /// Keyed digest of an already canonical string, lowercase hex.
    fn digest(&self, secret: &str, canonical: &str) -> String;

    fn sign(&self, secret: &str, fields: &[(&str, &str)]) -> String {
        self.digest(secret, &self.canonical_string(fields))
    }

    fn verify_canonical(&self, secret: &str, canonical: &str, received: &str) -> PaymentResult<()> {
        let computed = self.digest(secret, canonical);
        if secure_eq(computed.as_bytes(), received.trim().as_bytes()) {
            Ok(())
        } else {
            Err(PaymentError::SignatureInvalid {
                gateway: self.gateway().to_string(),
            })
        }
    }

    fn verify(&self, secret: &str, fields: &[(&str, &str)], received: &str) -> PaymentResult<()> {
        self.verify_canonical(secret, &self.canonical_string(fields), received)
    }
}

/// `name=value` pairs in a hardcoded order, values as-is.
///
/// Fields not listed in `field_order` (e.g. `signature`) never enter the
/// canonical string. Listed fields missing from the input render as `name=`.
#[derive(Debug, Clone)]
pub struct OrderedPlainCodec {
    gateway: &'static str,
    field_order: &'static [&'static str],
}

impl OrderedPlainCodec {
    pub const fn new(gateway: &'static str, field_order: &'static [&'static str]) -> Self {
        Self {
            gateway,
            field_order,
        }
    }
}

impl SignatureCodec for OrderedPlainCodec {
    fn gateway(&self) -> &str {
        self.gateway
    }

    fn canonical_string(&self, fields: &[(&str, &str)]) -> String {
        self.field_order
            .iter()
            .map(|name| {
                let value = fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .map(|(_, value)| *value)
                    .unwrap_or("");
                format!("{}={}", name, value)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn digest(&self, secret: &str, canonical: &str) -> String {
        hmac_sha256_hex(secret, canonical)
    }
}

/// Alphabetically sorted `name=urlencoded(value)` pairs, empty values skipped.
#[derive(Debug, Clone)]
pub struct SortedEncodedCodec {
    gateway: &'static str,
    excluded: &'static [&'static str],
}

impl SortedEncodedCodec {
    pub const fn new(gateway: &'static str, excluded: &'static [&'static str]) -> Self {
        Self { gateway, excluded }
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|excluded| *excluded == name)
    }

    /// Canonical string over a query string exactly as it arrived on the wire.
    ///
    /// Values keep their transport encoding; only the field names are decoded
    /// for sorting and exclusion.
    pub fn canonical_from_raw_query(&self, raw_query: &str) -> String {
        let mut pairs: Vec<(String, &str)> = raw_query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let name = decode_component(name);
                if value.is_empty() || self.is_excluded(&name) {
                    None
                } else {
                    Some((name, value))
                }
            })
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl SignatureCodec for SortedEncodedCodec {
    fn gateway(&self) -> &str {
        self.gateway
    }

    fn canonical_string(&self, fields: &[(&str, &str)]) -> String {
        let mut pairs: Vec<&(&str, &str)> = fields
            .iter()
            .filter(|(name, value)| !value.is_empty() && !self.is_excluded(name))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
            .iter()
            .map(|(name, value)| format!("{}={}", encode_component(name), encode_component(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn digest(&self, secret: &str, canonical: &str) -> String {
        hmac_sha512_hex(secret, canonical)
    }
}

/// application/x-www-form-urlencoded encoding (space becomes `+`).
pub fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode_component(value: &str) -> String {
    url::form_urlencoded::parse(format!("{}=", value).as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
        .unwrap_or_else(|| value.to_string())
}

pub fn hmac_sha256_hex(secret: &str, data: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha512_hex(secret: &str, data: &str) -> String {
    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
