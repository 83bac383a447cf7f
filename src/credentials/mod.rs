//! Credential pool with strict round-robin rotation
//!
//! Credentials are opaque secrets that authenticate one request stream to the
//! text-generation service. The pool keeps them in insertion order, tracks
//! which one is current and counts successful requests per credential.
//!
//! Credentials are never printed in full: `Debug` and `Display` both render
//! the redacted suffix (`...abcd`).

use std::fmt;

use crate::error::{Error, Result};

/// Number of trailing characters kept in the redacted form
const REDACTED_SUFFIX_LEN: usize = 4;

/// Highest numbered `API_KEY_<n>` variable scanned by default
pub const DEFAULT_MAX_NUMBERED_KEYS: usize = 9;

/// A secret used to authenticate requests
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret value
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for the request boundary only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last few characters of the secret, used as the external identity
    pub fn suffix(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(REDACTED_SUFFIX_LEN);
        chars[start..].iter().collect()
    }

    /// Redacted identity (`...abcd`)
    pub fn redacted(&self) -> String {
        format!("...{}", self.suffix())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// Usage counter snapshot for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialUsage {
    /// Redacted identity
    pub identity: String,

    /// Successful requests made with this credential
    pub requests: u64,
}

/// Ordered, cyclic set of credentials with per-credential usage counters
///
/// The pool is never empty once constructed. Rotation is strictly
/// round-robin in insertion order; credentials are never removed.
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    usage: Vec<u64>,
    current: usize,
    rotations: u64,
}

impl CredentialPool {
    /// Build a pool from the given credentials
    ///
    /// Blank values are ignored and duplicates keep their first position.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when no usable credential remains.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Result<Self> {
        let mut unique: Vec<Credential> = Vec::new();
        for credential in credentials {
            if credential.expose().trim().is_empty() || unique.contains(&credential) {
                continue;
            }
            unique.push(credential);
        }

        if unique.is_empty() {
            return Err(Error::config("No API keys found in environment variables"));
        }

        let usage = vec![0; unique.len()];
        Ok(Self {
            credentials: unique,
            usage,
            current: 0,
            rotations: 0,
        })
    }

    /// Load credentials from `API_KEY_1` .. `API_KEY_<max>` and `GEMINI_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when none of the variables is set.
    pub fn from_env(max_numbered_keys: usize) -> Result<Self> {
        Self::from_lookup(max_numbered_keys, |name| std::env::var(name).ok())
    }

    /// Load credentials through an arbitrary variable lookup
    pub fn from_lookup<F>(max_numbered_keys: usize, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut found = Vec::new();
        for i in 1..=max_numbered_keys {
            let name = format!("API_KEY_{i}");
            if let Some(value) = lookup(&name) {
                let credential = Credential::new(value.trim());
                tracing::info!(variable = %name, key = %credential, "Found API key");
                found.push(credential);
            }
        }

        if let Some(value) = lookup("GEMINI_API_KEY") {
            let credential = Credential::new(value.trim());
            tracing::info!(variable = "GEMINI_API_KEY", key = %credential, "Found API key");
            found.push(credential);
        }

        let pool = Self::new(found)?;
        tracing::info!(count = pool.len(), "Loaded API keys");
        Ok(pool)
    }

    /// Number of credentials in the pool
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// The current credential
    pub fn current(&self) -> &Credential {
        &self.credentials[self.current]
    }

    /// Rotate to the next credential (wrapping) and return it
    pub fn advance(&mut self) -> &Credential {
        let previous = self.current;
        self.current = (self.current + 1) % self.credentials.len();
        self.rotations += 1;

        tracing::info!(
            previous = %self.credentials[previous],
            next = %self.credentials[self.current],
            "Switching API key"
        );
        for usage in self.usage() {
            tracing::debug!(key = %usage.identity, requests = usage.requests, "API key usage");
        }

        &self.credentials[self.current]
    }

    /// Count one successful request against `credential` and return its new total
    ///
    /// Unknown credentials are ignored and report zero.
    pub fn record_use(&mut self, credential: &Credential) -> u64 {
        match self.credentials.iter().position(|c| c == credential) {
            Some(index) => {
                self.usage[index] += 1;
                self.usage[index]
            }
            None => {
                tracing::warn!(key = %credential, "Usage recorded for credential outside the pool");
                0
            }
        }
    }

    /// Requests recorded so far for `credential`
    pub fn usage_of(&self, credential: &Credential) -> u64 {
        self.credentials
            .iter()
            .position(|c| c == credential)
            .map_or(0, |index| self.usage[index])
    }

    /// Per-credential usage in rotation order
    pub fn usage(&self) -> Vec<CredentialUsage> {
        self.credentials
            .iter()
            .zip(&self.usage)
            .map(|(credential, &requests)| CredentialUsage {
                identity: credential.redacted(),
                requests,
            })
            .collect()
    }

    /// Total number of rotations performed
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Total successful requests across all credentials
    pub fn total_requests(&self) -> u64 {
        self.usage.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn pool_of(keys: &[&str]) -> CredentialPool {
        CredentialPool::new(keys.iter().map(|k| Credential::new(*k))).unwrap()
    }

    #[test]
    fn test_empty_pool_is_config_error() {
        let err = CredentialPool::new(Vec::new()).unwrap_err();
        assert!(err.is_config());

        let blanks = vec![Credential::new(""), Credential::new("  ")];
        assert!(CredentialPool::new(blanks).is_err());
    }

    #[test]
    fn test_redaction() {
        let credential = Credential::new("AIzaSyExampleSecret1234");
        assert_eq!(credential.suffix(), "1234");
        assert_eq!(credential.to_string(), "...1234");
        assert!(!format!("{credential:?}").contains("Example"));

        let short = Credential::new("ab");
        assert_eq!(short.redacted(), "...ab");
    }

    #[test]
    fn test_rotation_wraps_in_insertion_order() {
        let mut pool = pool_of(&["key-aaaa", "key-bbbb", "key-cccc"]);
        assert_eq!(pool.current().suffix(), "aaaa");
        assert_eq!(pool.advance().suffix(), "bbbb");
        assert_eq!(pool.advance().suffix(), "cccc");
        assert_eq!(pool.advance().suffix(), "aaaa");
        assert_eq!(pool.rotations(), 3);
    }

    #[test]
    fn test_duplicates_removed() {
        let pool = pool_of(&["key-aaaa", "key-bbbb", "key-aaaa"]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_record_use() {
        let mut pool = pool_of(&["key-aaaa", "key-bbbb"]);
        let first = pool.current().clone();
        assert_eq!(pool.record_use(&first), 1);
        assert_eq!(pool.record_use(&first), 2);

        let second = pool.advance().clone();
        assert_eq!(pool.record_use(&second), 1);

        assert_eq!(pool.usage_of(&first), 2);
        assert_eq!(pool.total_requests(), 3);
        assert_eq!(
            pool.usage(),
            vec![
                CredentialUsage {
                    identity: "...aaaa".to_string(),
                    requests: 2
                },
                CredentialUsage {
                    identity: "...bbbb".to_string(),
                    requests: 1
                },
            ]
        );

        assert_eq!(pool.record_use(&Credential::new("stranger")), 0);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("API_KEY_1", "first-key-1111"),
            ("API_KEY_3", "third-key-3333"),
            ("GEMINI_API_KEY", "single-key-9999"),
        ]
        .into_iter()
        .collect();

        let pool = CredentialPool::from_lookup(DEFAULT_MAX_NUMBERED_KEYS, |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();

        let identities: Vec<String> = pool.usage().into_iter().map(|u| u.identity).collect();
        assert_eq!(identities, vec!["...1111", "...3333", "...9999"]);
    }

    #[test]
    fn test_from_lookup_nothing_set() {
        let result = CredentialPool::from_lookup(DEFAULT_MAX_NUMBERED_KEYS, |_| None);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_round_robin_closure(count in 1usize..12, start_offset in 0usize..12) {
            let keys: Vec<Credential> = (0..count)
                .map(|i| Credential::new(format!("secret-{i:04}")))
                .collect();
            let mut pool = CredentialPool::new(keys).unwrap();

            for _ in 0..start_offset {
                pool.advance();
            }
            let original = pool.current().clone();

            for _ in 0..count {
                pool.advance();
            }
            prop_assert_eq!(pool.current(), &original);
        }
    }
}
