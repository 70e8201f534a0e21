//! Key transformers: user key → wire key.

use crate::error::{Error, Result};

/// Memcached's protocol-level key length limit.
pub const MAX_KEY_LEN: usize = 250;

/// Maps a user-facing key to the key placed on the wire.
pub trait KeyTransformer: Send + Sync {
    fn transform(&self, key: &str) -> Result<String>;
}

/// Validating pass-through: rejects keys the protocol cannot carry
/// (empty, overlong, or containing whitespace/control bytes).
#[derive(Debug, Default)]
pub struct DefaultKeyTransformer;

impl KeyTransformer for DefaultKeyTransformer {
    fn transform(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key".to_string()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidArgument(format!(
                "key is {} bytes, limit is {MAX_KEY_LEN}",
                key.len()
            )));
        }
        if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
            return Err(Error::InvalidArgument(
                "key contains whitespace or control bytes".to_string(),
            ));
        }
        Ok(key.to_string())
    }
}

/// Hashes every key to a fixed-width hex digest. Useful when user keys
/// can exceed the protocol limit or carry unsafe bytes.
#[derive(Debug, Default)]
pub struct DigestKeyTransformer;

impl KeyTransformer for DigestKeyTransformer {
    fn transform(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key".to_string()));
        }
        Ok(format!("{:x}", md5::compute(key.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_passes_clean_keys_through() {
        let t = DefaultKeyTransformer;
        assert_eq!(t.transform("user:123").unwrap(), "user:123");
    }

    #[test]
    fn default_rejects_protocol_unsafe_keys() {
        let t = DefaultKeyTransformer;
        assert!(t.transform("").is_err());
        assert!(t.transform("has space").is_err());
        assert!(t.transform("tab\there").is_err());
        assert!(t.transform("nl\nhere").is_err());
        assert!(t.transform(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(t.transform(&"x".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn digest_is_fixed_width_and_deterministic() {
        let t = DigestKeyTransformer;
        let a = t.transform(&"long key with spaces ".repeat(50)).unwrap();
        let b = t.transform(&"long key with spaces ".repeat(50)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
