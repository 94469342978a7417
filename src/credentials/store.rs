//! Credential storage and usage counters
//!
//! Holds the upstream API keys loaded at startup together with one usage
//! counter per key. Counters live in a vector aligned with the key list, so
//! every loaded key always has exactly one counter.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// An upstream API key
///
/// Identity is the trimmed string value. `Debug` and `Display` only ever
/// show the masked form so keys don't end up in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Create a credential from a raw key, trimming surrounding whitespace
    pub fn new(raw: &str) -> Self {
        Self(Arc::from(raw.trim()))
    }

    /// The raw key, for building upstream requests
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form keeping the first and last four characters
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}****{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Ordered, de-duplicated set of credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    credentials: Vec<Credential>,
}

impl CredentialSet {
    /// Parse a comma-separated key list
    ///
    /// Entries are trimmed, empty entries dropped and duplicates removed,
    /// keeping the first occurrence order.
    pub fn parse(raw: &str) -> Self {
        let mut seen = HashSet::new();
        let credentials = raw
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .filter(|key| seen.insert(*key))
            .map(Credential::new)
            .collect();

        Self { credentials }
    }

    /// Number of distinct credentials
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether no credential was loaded
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Credentials in load order
    pub fn as_slice(&self) -> &[Credential] {
        &self.credentials
    }
}

/// One row of the usage report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStat {
    pub credential: Credential,
    pub count: u64,
}

/// Serializable view of a usage row, with the key masked
#[derive(Debug, Clone, Serialize)]
pub struct MaskedUsageStat {
    pub key: String,
    pub count: u64,
}

impl From<&UsageStat> for MaskedUsageStat {
    fn from(stat: &UsageStat) -> Self {
        Self {
            key: stat.credential.masked(),
            count: stat.count,
        }
    }
}

/// Credentials plus their usage counters
///
/// All counter reads and writes go through one mutex, so a selection and
/// its increment are never interleaved with another selection.
pub struct CredentialStore {
    credentials: CredentialSet,
    usage: Mutex<Vec<u64>>,
}

impl CredentialStore {
    /// Build a store from an already parsed set, with all counters at zero
    pub fn new(credentials: CredentialSet) -> Self {
        let usage = Mutex::new(vec![0; credentials.len()]);
        Self { credentials, usage }
    }

    /// Load credentials from a comma-separated list
    ///
    /// An empty result is not an error: the store simply has no keys and
    /// every selection fails with `NoCredentialsAvailable`.
    pub fn load(raw: &str) -> Self {
        let credentials = CredentialSet::parse(raw);

        if credentials.is_empty() {
            warn!("GEMINI_API_KEYS is empty; every proxied request will fail until keys are configured");
        } else {
            info!(count = credentials.len(), "Loaded upstream API keys");
        }

        Self::new(credentials)
    }

    /// Number of distinct credentials
    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    /// Credentials in load order
    pub fn credentials(&self) -> &[Credential] {
        self.credentials.as_slice()
    }

    /// Current counter for `credential`, if it belongs to this store
    pub fn usage_of(&self, credential: &Credential) -> Option<u64> {
        let index = self.index_of(credential)?;
        self.lock_usage().get(index).copied()
    }

    /// Snapshot of all counters, sorted by count descending
    pub fn stats(&self) -> Vec<UsageStat> {
        let usage = self.lock_usage().clone();
        let mut stats: Vec<UsageStat> = self
            .credentials
            .as_slice()
            .iter()
            .zip(usage)
            .map(|(credential, count)| UsageStat {
                credential: credential.clone(),
                count,
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }

    /// Sum of all counters
    pub fn total_usage(&self) -> u64 {
        self.lock_usage().iter().sum()
    }

    /// Overwrite counters with externally stored values
    ///
    /// Only credentials present in both the store and `counts` are touched.
    /// Returns how many counters were restored.
    pub fn restore(&self, counts: &HashMap<Credential, u64>) -> usize {
        let mut usage = self.lock_usage();
        let mut restored = 0;
        for (index, credential) in self.credentials.as_slice().iter().enumerate() {
            if let Some(count) = counts.get(credential) {
                usage[index] = *count;
                restored += 1;
            }
        }
        restored
    }

    /// Pick one of the least-used credentials and increment its counter
    ///
    /// `pick` receives the number of tied candidates (always at least one)
    /// and returns the position of the chosen one. Out-of-range positions
    /// fall back to the first candidate. Returns the credential and its
    /// counter value after the increment.
    pub fn checkout<F>(&self, pick: F) -> AppResult<(Credential, u64)>
    where
        F: FnOnce(usize) -> usize,
    {
        let mut usage = self.lock_usage();

        let min = *usage.iter().min().ok_or(AppError::NoCredentialsAvailable)?;
        let candidates: Vec<usize> = usage
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == min)
            .map(|(index, _)| index)
            .collect();

        let position = pick(candidates.len());
        let chosen = candidates.get(position).copied().unwrap_or(candidates[0]);

        usage[chosen] += 1;
        Ok((self.credentials.as_slice()[chosen].clone(), usage[chosen]))
    }

    fn index_of(&self, credential: &Credential) -> Option<usize> {
        self.credentials
            .as_slice()
            .iter()
            .position(|c| c == credential)
    }

    fn lock_usage(&self) -> MutexGuard<'_, Vec<u64>> {
        // Counters are plain integers; a panic elsewhere cannot leave them torn.
        self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
