//! Reversible content obfuscation for chat bodies.
//!
//! This is NOT encryption. It keeps raw text out of the wire format by
//! default and nothing more: anyone holding the (fixed, shared) key can
//! reverse it.
//!
//! # Wire Format
//!
//! ```text
//! ENC:<base64(xor(utf8-bytes, key))>
//! ```
//!
//! The XOR runs over UTF-8 bytes rather than characters, since XOR over
//! scalar values can produce surrogates. XOR output may contain `\n` or
//! invalid UTF-8, so the transformed bytes are base64-encoded before they go
//! into a line-delimited envelope.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

/// Wire prefix for obfuscated content.
pub const ENC_PREFIX: &str = "ENC:";

/// Key used when none is configured.
pub const DEFAULT_KEY: &str = "ChatAppSecretKey123";

/// Check if a content string carries the obfuscated text form.
pub fn is_obfuscated(text: &str) -> bool {
    text.starts_with(ENC_PREFIX)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObfuscationError {
    #[error("content is not obfuscated")]
    NotObfuscated,
    #[error("malformed base64 payload")]
    MalformedPayload,
    #[error("revealed content is not valid UTF-8")]
    InvalidUtf8,
}

/// A stateless, self-inverse byte transform.
///
/// Implementations must satisfy `apply(&apply(x)) == x` for every input.
/// The text helpers are provided on top of `apply`.
pub trait Obfuscator: Send + Sync {
    fn apply(&self, bytes: &[u8]) -> Vec<u8>;

    /// Whether envelopes built with this transform are flagged `encrypted`.
    fn is_active(&self) -> bool {
        true
    }

    /// Transform `text` into its `ENC:` text form.
    fn obfuscate(&self, text: &str) -> String {
        format!("{ENC_PREFIX}{}", B64.encode(self.apply(text.as_bytes())))
    }

    /// Reverse [`Obfuscator::obfuscate`].
    fn reveal(&self, text: &str) -> Result<String, ObfuscationError> {
        let payload = text
            .strip_prefix(ENC_PREFIX)
            .ok_or(ObfuscationError::NotObfuscated)?;
        let bytes = B64
            .decode(payload)
            .map_err(|_| ObfuscationError::MalformedPayload)?;
        String::from_utf8(self.apply(&bytes)).map_err(|_| ObfuscationError::InvalidUtf8)
    }
}

/// XOR every byte with a cyclically repeating key.
#[derive(Debug, Clone)]
pub struct XorObfuscator {
    key: Vec<u8>,
}

impl XorObfuscator {
    /// An empty key would make the transform the identity, so it falls back
    /// to [`DEFAULT_KEY`].
    pub fn new(key: &str) -> Self {
        let key = if key.is_empty() { DEFAULT_KEY } else { key };
        Self {
            key: key.as_bytes().to_vec(),
        }
    }
}

impl Default for XorObfuscator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl Obfuscator for XorObfuscator {
    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

/// Identity transform, used when obfuscation is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Obfuscator for Passthrough {
    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    fn is_active(&self) -> bool {
        false
    }

    fn obfuscate(&self, text: &str) -> String {
        text.to_string()
    }

    fn reveal(&self, text: &str) -> Result<String, ObfuscationError> {
        Ok(text.to_string())
    }
}
