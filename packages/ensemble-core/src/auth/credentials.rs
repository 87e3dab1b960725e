//! Strategy-tagged authentication material.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::AuthStrategyKind;
use crate::error::{EnsembleError, EnsembleResult};

/// Authentication material issued by exactly one strategy.
///
/// The variant is the strategy tag: a `Native` bundle is only ever
/// interpreted by the native strategy, and so on. Instances are immutable
/// once issued; re-authenticating produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No login step. An optional static token is sent as a bearer header.
    None {
        server_url: String,
        token: Option<String>,
    },
    /// Static username/password pair for a reverse-proxy gateway.
    Gateway {
        server_url: String,
        username: String,
        password: String,
    },
    /// Tokens minted by the server's own login command.
    Native {
        server_url: String,
        username: Option<String>,
        access_token: String,
        long_lived_token: Option<String>,
    },
}

impl Credentials {
    /// Strategy that issued these credentials.
    #[must_use]
    pub fn kind(&self) -> AuthStrategyKind {
        match self {
            Self::None { .. } => AuthStrategyKind::None,
            Self::Gateway { .. } => AuthStrategyKind::Gateway,
            Self::Native { .. } => AuthStrategyKind::Native,
        }
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        match self {
            Self::None { server_url, .. }
            | Self::Gateway { server_url, .. }
            | Self::Native { server_url, .. } => server_url,
        }
    }

    /// Bearer token to present to the server, if any.
    ///
    /// The long-lived token wins over the access token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::None { token, .. } => token.as_deref(),
            Self::Gateway { .. } => None,
            Self::Native {
                access_token,
                long_lived_token,
                ..
            } => long_lived_token.as_deref().or(Some(access_token.as_str())),
        }
    }
}

/// Plain-map form of [`Credentials`] for the settings store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Name of the strategy that must interpret `data`.
    pub strategy: String,
    pub data: BTreeMap<String, String>,
}

impl StoredCredentials {
    pub(crate) fn new(kind: AuthStrategyKind) -> Self {
        Self {
            strategy: kind.name().to_string(),
            data: BTreeMap::new(),
        }
    }

    pub(crate) fn put(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn put_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.put(key, value);
        }
    }

    /// Value stored under `key`, verbatim. Empty strings are values too.
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    pub(crate) fn require(&self, key: &str) -> EnsembleResult<String> {
        self.get(key).ok_or_else(|| {
            EnsembleError::Auth(format!(
                "stored {} credentials missing '{}'",
                self.strategy, key
            ))
        })
    }

    /// Fails unless this blob was written by `kind`.
    pub(crate) fn expect_strategy(&self, kind: AuthStrategyKind) -> EnsembleResult<()> {
        if self.strategy == kind.name() {
            Ok(())
        } else {
            Err(EnsembleError::Auth(format!(
                "credentials tagged '{}' cannot be read by the {} strategy",
                self.strategy,
                kind.name()
            )))
        }
    }
}
