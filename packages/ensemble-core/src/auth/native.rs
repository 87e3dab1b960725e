//! The media server's own token authentication.
//!
//! Login is two-phase:
//!
//! 1. `auth/login` with username/password returns a short-lived access token.
//! 2. `auth/create_token` with that access token mints a long-lived token for
//!    silent reconnects. This step is best-effort: if it fails the access
//!    token alone is used for the session.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    bearer_headers, ensure_kind, AuthHeaders, AuthStrategy, AuthStrategyKind, Credentials,
    StoredCredentials,
};
use crate::error::{EnsembleError, EnsembleResult};
use crate::protocol_constants::{CMD_AUTH_CREATE_TOKEN, CMD_AUTH_LOGIN, CMD_SERVER_INFO};
use crate::transport::HttpCommandClient;

/// Username/password login against the server's auth commands.
#[derive(Clone)]
pub struct NativeAuth {
    http: HttpCommandClient,
    client_name: String,
}

impl NativeAuth {
    /// # Arguments
    /// * `http` - HTTP command client
    /// * `client_name` - Label the server stores alongside the long-lived token
    #[must_use]
    pub fn new(http: HttpCommandClient, client_name: &str) -> Self {
        Self {
            http,
            client_name: client_name.to_string(),
        }
    }

    async fn create_long_lived_token(
        &self,
        server_url: &str,
        access_token: &str,
    ) -> EnsembleResult<String> {
        let result = self
            .http
            .send(
                server_url,
                CMD_AUTH_CREATE_TOKEN,
                json!({ "name": self.client_name }),
                &bearer_headers(Some(access_token)),
            )
            .await?;

        extract_token(&result, &["token", "long_lived_token", "access_token"]).ok_or_else(|| {
            EnsembleError::Protocol(format!(
                "{} response has no token: {}",
                CMD_AUTH_CREATE_TOKEN, result
            ))
        })
    }
}

/// Reads a token from a bare string result or the first matching object key.
fn extract_token(result: &Value, keys: &[&str]) -> Option<String> {
    match result {
        Value::String(token) if !token.is_empty() => Some(token.clone()),
        Value::Object(obj) => keys
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_str))
            .find(|token| !token.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl AuthStrategy for NativeAuth {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::Native
    }

    async fn login(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> EnsembleResult<Credentials> {
        let result = self
            .http
            .send(
                server_url,
                CMD_AUTH_LOGIN,
                json!({ "username": username, "password": password }),
                &AuthHeaders::new(),
            )
            .await?;

        let access_token = extract_token(&result, &["access_token", "token"])
            .ok_or_else(|| EnsembleError::Auth("login response has no access token".into()))?;
        log::info!("[Auth] Native login accepted for {}", username);

        let long_lived_token = match self.create_long_lived_token(server_url, &access_token).await
        {
            Ok(token) => Some(token),
            Err(e) => {
                log::warn!(
                    "[Auth] Long-lived token creation failed, continuing with access token: {}",
                    e
                );
                None
            }
        };

        Ok(Credentials::Native {
            server_url: server_url.to_string(),
            username: Some(username.to_string()).filter(|u| !u.is_empty()),
            access_token,
            long_lived_token,
        })
    }

    /// Calls `server/info` with the preferred token.
    ///
    /// Any non-error JSON response is valid; error payloads and non-200
    /// statuses are not.
    async fn validate_credentials(&self, server_url: &str, credentials: &Credentials) -> bool {
        if ensure_kind(self.kind(), credentials).is_err() {
            return false;
        }
        let Some(token) = credentials.token() else {
            return false;
        };

        match self
            .http
            .send(
                server_url,
                CMD_SERVER_INFO,
                Value::Null,
                &bearer_headers(Some(token)),
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                log::info!("[Auth] Stored token rejected: {}", e);
                false
            }
        }
    }

    fn transport_headers(&self, credentials: &Credentials) -> AuthHeaders {
        match credentials {
            Credentials::Native { .. } => bearer_headers(credentials.token()),
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
        if let Credentials::Native {
            username,
            access_token,
            long_lived_token,
            ..
        } = credentials
        {
            stored.put_opt("username", username.as_deref());
            stored.put("access_token", access_token);
            stored.put_opt("long_lived_token", long_lived_token.as_deref());
        }
        Ok(stored)
    }

    fn deserialize(&self, stored: &StoredCredentials) -> EnsembleResult<Credentials> {
        stored.expect_strategy(self.kind())?;
        let long_lived_token = stored.get("long_lived_token");
        // A blob holding only the long-lived token is still usable.
        let access_token = match stored.get("access_token") {
            Some(token) => token,
            None => long_lived_token
                .clone()
                .ok_or_else(|| EnsembleError::Auth("stored native credentials have no token".into()))?,
        };

        Ok(Credentials::Native {
            server_url: stored.require("server_url")?,
            username: stored.get("username"),
            access_token,
            long_lived_token,
        })
    }
}
