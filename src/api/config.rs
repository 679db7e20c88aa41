//! Purpose: Resolve which item store to use and how to connect to it.
//! Exports: `StoreRef`, `StoreConfig`, `default_store_path`, env var names.
//! Role: Startup-time configuration shared by the CLI and integration tests.
//! Invariants: Settings are read once through an injectable lookup, never re-read later.
//! Invariants: Missing required connection values fail startup with a `Usage` error.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::firestore::{FirestoreConfig, FirestoreStore};
use super::remote::{DEFAULT_TIMEOUT, RemoteStore};
use crate::core::error::{Error, ErrorKind};
use crate::core::file_store::FileStore;
use crate::core::store::{ItemStore, MemoryStore, StoreResult};

pub const ENV_STORE: &str = "STOCKTAKE_STORE";
pub const ENV_TOKEN: &str = "STOCKTAKE_TOKEN";
pub const ENV_TIMEOUT_MS: &str = "STOCKTAKE_TIMEOUT_MS";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreRef {
    Memory,
    File(PathBuf),
    Remote(String),
    Firestore,
}

impl StoreRef {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("store ref must not be empty")
                .with_hint("Use a file path, an http(s):// url, `memory`, or `firestore`."));
        }
        if raw == "memory" {
            return Ok(StoreRef::Memory);
        }
        if raw == "firestore" {
            return Ok(StoreRef::Firestore);
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(StoreRef::Remote(raw.to_string()));
        }
        if raw.contains("://") {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported store url scheme: {raw}"))
                .with_hint("Remote stores must use http:// or https://."));
        }
        Ok(StoreRef::File(PathBuf::from(raw)))
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRef::Memory => write!(f, "memory"),
            StoreRef::File(path) => write!(f, "{}", path.display()),
            StoreRef::Remote(url) => write!(f, "{url}"),
            StoreRef::Firestore => write!(f, "firestore"),
        }
    }
}

pub fn default_store_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".stocktake").join("inventory.json")
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub store: StoreRef,
    pub token: Option<String>,
    pub timeout: Duration,
    pub firestore: Option<FirestoreConfig>,
}

impl StoreConfig {
    /// Build the configuration for `store`, pulling connection values through `lookup`.
    pub fn from_lookup<F>(store: StoreRef, lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(ENV_TOKEN).filter(|token| !token.is_empty());
        let timeout = match lookup(ENV_TIMEOUT_MS) {
            None => DEFAULT_TIMEOUT,
            Some(raw) => {
                let millis = raw.trim().parse::<u64>().map_err(|err| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("{ENV_TIMEOUT_MS} must be a whole number of ms"))
                        .with_source(err)
                })?;
                if millis == 0 {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("{ENV_TIMEOUT_MS} must be greater than zero")));
                }
                Duration::from_millis(millis)
            }
        };
        let firestore = match store {
            StoreRef::Firestore => {
                let mut config = FirestoreConfig::from_lookup(&lookup)?;
                config.timeout = timeout;
                Some(config)
            }
            _ => None,
        };
        Ok(Self {
            store,
            token,
            timeout,
            firestore,
        })
    }

    pub fn from_env(store: StoreRef) -> StoreResult<Self> {
        Self::from_lookup(store, |key| std::env::var(key).ok())
    }

    pub fn open(&self) -> StoreResult<Box<dyn ItemStore>> {
        match &self.store {
            StoreRef::Memory => Ok(Box::new(MemoryStore::new())),
            StoreRef::File(path) => Ok(Box::new(FileStore::open(path)?)),
            StoreRef::Remote(url) => {
                let mut store = RemoteStore::new(url.clone())?.with_timeout(self.timeout);
                if let Some(token) = &self.token {
                    store = store.with_token(token.clone());
                }
                Ok(Box::new(store))
            }
            StoreRef::Firestore => {
                let config = self.firestore.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::Internal).with_message("firestore config not loaded")
                })?;
                Ok(Box::new(FirestoreStore::new(config)?))
            }
        }
    }
}
