//! Strategy for servers without authentication.

use async_trait::async_trait;

use super::{
    bearer_headers, ensure_kind, AuthHeaders, AuthStrategy, AuthStrategyKind, Credentials,
    StoredCredentials,
};
use crate::error::EnsembleResult;

/// No login step; headers come straight from stored values.
#[derive(Debug, Clone, Default)]
pub struct NoAuth;

impl NoAuth {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthStrategy for NoAuth {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::None
    }

    async fn login(
        &self,
        server_url: &str,
        _username: &str,
        _password: &str,
    ) -> EnsembleResult<Credentials> {
        Ok(Credentials::None {
            server_url: server_url.to_string(),
            token: None,
        })
    }

    async fn validate_credentials(&self, _server_url: &str, credentials: &Credentials) -> bool {
        ensure_kind(self.kind(), credentials).is_ok()
    }

    fn transport_headers(&self, credentials: &Credentials) -> AuthHeaders {
        match credentials {
            Credentials::None { token, .. } => bearer_headers(token.as_deref()),
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
        stored.put_opt("token", credentials.token());
        Ok(stored)
    }

    fn deserialize(&self, stored: &StoredCredentials) -> EnsembleResult<Credentials> {
        stored.expect_strategy(self.kind())?;
        Ok(Credentials::None {
            server_url: stored.require("server_url")?,
            token: stored.get("token"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn login_needs_no_network() {
        let creds = NoAuth::new()
            .login("http://unreachable.invalid", "", "")
            .await
            .unwrap();
        assert_eq!(creds.kind(), AuthStrategyKind::None);
        assert!(NoAuth::new().transport_headers(&creds).is_empty());
    }

    #[test]
    fn static_token_becomes_bearer_header() {
        let creds = Credentials::None {
            server_url: "http://host".into(),
            token: Some("static".into()),
        };
        let headers = NoAuth::new().streaming_headers(&creds);
        assert_eq!(headers["Authorization"], "Bearer static");
    }

    #[test]
    fn serialize_round_trip() {
        let strategy = NoAuth::new();
        for token in [None, Some("static".to_string()), Some(String::new())] {
            let creds = Credentials::None {
                server_url: "http://host:8095".into(),
                token,
            };
            let stored = strategy.serialize(&creds).unwrap();
            assert_eq!(stored.strategy, "none");
            assert_eq!(strategy.deserialize(&stored).unwrap(), creds);
        }
    }
}
