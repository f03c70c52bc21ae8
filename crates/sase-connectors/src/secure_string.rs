//! Wrapper for splunkd session keys and SOAR auth tokens that zeroizes
//! its memory on drop and never renders the value through `Debug` or
//! `Display`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// A credential string that is cleared from memory when dropped.
///
/// Session keys arrive on every REST request and auth tokens live in the
/// password store; both pass through this type so they cannot leak via
/// logs or linger after use.
#[derive(Clone)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(Zeroizing::new(s))
    }

    /// Exposes the raw credential. Callers must not copy the returned
    /// slice into longer-lived storage.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl Default for SecureString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison so token checks don't leak timing.
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecureString {}

impl Serialize for SecureString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecureString::new(s))
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_round_trip() {
        let key: SecureString = "Splunk session-key".into();
        assert_eq!(key.expose_secret(), "Splunk session-key");
        assert_eq!(key.len(), 18);
        assert!(!key.is_empty());
    }

    #[test]
    fn test_debug_and_display_redact() {
        let token = SecureString::new("ph-token-value".to_string());
        assert!(!format!("{:?}", token).contains("ph-token-value"));
        assert_eq!(format!("{}", token), "[REDACTED]");
    }

    #[test]
    fn test_equality_is_value_based() {
        let a = SecureString::from("same");
        let b = SecureString::from("same");
        let c = SecureString::from("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_carries_the_value() {
        let token = SecureString::from("stored-token");
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("stored-token"));
        let back: SecureString = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
    }
}
