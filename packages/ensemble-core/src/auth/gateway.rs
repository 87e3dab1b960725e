//! Reverse-proxy gateway authentication (HTTP basic auth).

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use super::{ensure_kind, AuthHeaders, AuthStrategy, AuthStrategyKind, Credentials, StoredCredentials};
use crate::error::{EnsembleError, EnsembleResult};
use crate::protocol_constants::CMD_SERVER_INFO;
use crate::transport::HttpCommandClient;

/// Static username/password pair sent as a basic `Authorization` header.
#[derive(Clone)]
pub struct GatewayAuth {
    http: HttpCommandClient,
}

impl GatewayAuth {
    #[must_use]
    pub fn new(http: HttpCommandClient) -> Self {
        Self { http }
    }

    fn basic_headers(username: &str, password: &str) -> AuthHeaders {
        let encoded = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
        AuthHeaders::from([("Authorization".to_string(), format!("Basic {}", encoded))])
    }

    async fn check_reachable(&self, server_url: &str, headers: &AuthHeaders) -> EnsembleResult<()> {
        self.http
            .send(server_url, CMD_SERVER_INFO, Value::Null, headers)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AuthStrategy for GatewayAuth {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::Gateway
    }

    /// Builds the credential pair and checks the gateway lets it through.
    async fn login(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> EnsembleResult<Credentials> {
        if username.is_empty() {
            return Err(EnsembleError::Auth("gateway username is empty".into()));
        }

        self.check_reachable(server_url, &Self::basic_headers(username, password))
            .await?;
        log::info!("[Auth] Gateway login accepted for {}", username);

        Ok(Credentials::Gateway {
            server_url: server_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn validate_credentials(&self, server_url: &str, credentials: &Credentials) -> bool {
        if ensure_kind(self.kind(), credentials).is_err() {
            return false;
        }
        match self
            .check_reachable(server_url, &self.transport_headers(credentials))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::info!("[Auth] Gateway credentials rejected: {}", e);
                false
            }
        }
    }

    fn transport_headers(&self, credentials: &Credentials) -> AuthHeaders {
        match credentials {
            Credentials::Gateway {
                username, password, ..
            } => Self::basic_headers(username, password),
            _ => AuthHeaders::new(),
        }
    }

    fn streaming_headers(&self, credentials: &Credentials) -> AuthHeaders {
        self.transport_headers(credentials)
    }

    fn serialize(&self, credentials: &Credentials) -> EnsembleResult<StoredCredentials> {
        ensure_kind(self.kind(), credentials)?;
        let mut stored = StoredCredentials::new(self.kind());
        stored.put("server_url", credentials.server_url());
        if let Credentials::Gateway {
            username, password, ..
        } = credentials
        {
            stored.put("username", username);
            stored.put("password", password);
        }
        Ok(stored)
    }

    fn deserialize(&self, stored: &StoredCredentials) -> EnsembleResult<Credentials> {
        stored.expect_strategy(self.kind())?;
        Ok(Credentials::Gateway {
            server_url: stored.require("server_url")?,
            username: stored.require("username")?,
            password: stored.get("password").unwrap_or_default(),
        })
    }
}
