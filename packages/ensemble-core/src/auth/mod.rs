//! Authentication strategies.
//!
//! Every strategy exposes the same flat capability set through the
//! [`AuthStrategy`] trait:
//!
//! - `login` - turn user input into [`Credentials`]
//! - `validate_credentials` - check whether stored credentials still work
//! - `transport_headers` / `streaming_headers` - headers for the WebSocket
//!   handshake, HTTP commands and audio stream requests
//! - `serialize` / `deserialize` - plain-map form for the settings store
//!
//! Variants are selected by [`AuthStrategyKind`]. Detecting which scheme a
//! server uses is the caller's job; exactly one strategy must be chosen
//! before the transport connects.

mod credentials;
mod gateway;
mod native;
mod none;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use credentials::{Credentials, StoredCredentials};
pub use gateway::GatewayAuth;
pub use native::NativeAuth;
pub use none::NoAuth;

use crate::error::{EnsembleError, EnsembleResult};
use crate::transport::HttpCommandClient;

/// Header name → value pairs produced by a strategy.
pub type AuthHeaders = BTreeMap<String, String>;

/// Identifies an authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStrategyKind {
    /// No login step.
    None,
    /// Reverse-proxy basic auth.
    Gateway,
    /// The media server's own token auth.
    Native,
}

impl AuthStrategyKind {
    /// Stable name used as the credentials tag.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gateway => "gateway",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for AuthStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthStrategyKind {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "gateway" => Ok(Self::Gateway),
            "native" => Ok(Self::Native),
            other => Err(EnsembleError::Auth(format!(
                "unknown auth strategy: {}",
                other
            ))),
        }
    }
}

/// Uniform contract for authentication schemes.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn kind(&self) -> AuthStrategyKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Produces credentials from user input.
    async fn login(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> EnsembleResult<Credentials>;

    /// Returns true if `credentials` are accepted by the server.
    async fn validate_credentials(&self, server_url: &str, credentials: &Credentials) -> bool;

    /// Headers for the WebSocket handshake and HTTP commands.
    fn transport_headers(&self, credentials: &Credentials) -> AuthHeaders;

    /// Headers for audio stream requests.
    fn streaming_headers(&self, credentials: &Credentials) -> AuthHeaders;

    /// Converts credentials into the plain-map form.
    ///
    /// # Errors
    /// Returns `Auth` if `credentials` were issued by another strategy.
    fn serialize(&self, credentials: &Credentials) -> EnsembleResult<StoredCredentials>;

    /// Rebuilds credentials from the plain-map form.
    ///
    /// # Errors
    /// Returns `Auth` if the blob is tagged for another strategy or misses
    /// a required field.
    fn deserialize(&self, stored: &StoredCredentials) -> EnsembleResult<Credentials>;
}

/// Returns the strategy implementation for `kind`.
///
/// # Arguments
/// * `kind` - Scheme to build
/// * `http` - HTTP command client used for login and validation checks
/// * `client_name` - Name under which long-lived tokens are minted
pub fn strategy_for(
    kind: AuthStrategyKind,
    http: HttpCommandClient,
    client_name: &str,
) -> Arc<dyn AuthStrategy> {
    match kind {
        AuthStrategyKind::None => Arc::new(NoAuth::new()),
        AuthStrategyKind::Gateway => Arc::new(GatewayAuth::new(http)),
        AuthStrategyKind::Native => Arc::new(NativeAuth::new(http, client_name)),
    }
}

/// Builds a `Bearer` authorization header map.
pub(crate) fn bearer_headers(token: Option<&str>) -> AuthHeaders {
    let mut headers = AuthHeaders::new();
    if let Some(token) = token {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
}

/// Rejects credentials issued by a different strategy.
pub(crate) fn ensure_kind(kind: AuthStrategyKind, credentials: &Credentials) -> EnsembleResult<()> {
    if credentials.kind() == kind {
        Ok(())
    } else {
        Err(EnsembleError::Auth(format!(
            "{} credentials passed to the {} strategy",
            credentials.kind(),
            kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use std::time::Duration;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            AuthStrategyKind::None,
            AuthStrategyKind::Gateway,
            AuthStrategyKind::Native,
        ] {
            assert_eq!(kind.name().parse::<AuthStrategyKind>().unwrap(), kind);
        }
        assert!("oauth".parse::<AuthStrategyKind>().is_err());
    }

    #[test]
    fn factory_builds_matching_strategy() {
        let http = HttpCommandClient::new(Client::new(), Duration::from_secs(5));
        for kind in [
            AuthStrategyKind::None,
            AuthStrategyKind::Gateway,
            AuthStrategyKind::Native,
        ] {
            let strategy = strategy_for(kind, http.clone(), "test");
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.name(), kind.name());
        }
    }

    #[test]
    fn bearer_headers_skip_missing_token() {
        assert!(bearer_headers(None).is_empty());
        assert_eq!(
            bearer_headers(Some("t")).get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
    }
}
