//! HTTP command client for out-of-band operations.
//!
//! Login, token creation and token validation run before (or outside of)
//! the WebSocket session, so they go through the server's HTTP endpoint,
//! which accepts the same `{command, args}` shape.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::auth::AuthHeaders;
use crate::error::{EnsembleError, EnsembleResult};
use crate::protocol::{unwrap_response, CommandMessage};
use crate::utils::api_url;

/// Sends commands to the HTTP API endpoint.
#[derive(Clone)]
pub struct HttpCommandClient {
    client: Client,
    timeout: Duration,
}

impl HttpCommandClient {
    /// Creates a client sharing the given connection pool.
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Sends `command` and returns the unwrapped result.
    ///
    /// # Arguments
    /// * `server_url` - Normalized server base URL
    /// * `command` - Command name (e.g. `auth/login`)
    /// * `args` - Command arguments (`Value::Null` for none)
    /// * `headers` - Authentication headers produced by the active strategy
    ///
    /// # Errors
    /// - `Auth` for 401/403 responses or auth-coded payloads
    /// - `Transport`/`Timeout` for connection failures and 5xx responses
    /// - `Protocol` for other non-success statuses or non-JSON bodies
    pub async fn send(
        &self,
        server_url: &str,
        command: &str,
        args: Value,
        headers: &AuthHeaders,
    ) -> EnsembleResult<Value> {
        let url = api_url(server_url);
        let message = CommandMessage::new(command, args);

        log::debug!("[HTTP] {} -> {}", command, url);

        let mut request = self
            .client
            .post(&url)
            .json(&message)
            .timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let start = std::time::Instant::now();
        let res = request.send().await;
        log::debug!(
            "[HTTP] {} completed in {:?}: {:?}",
            command,
            start.elapsed(),
            res.as_ref().map(|r| r.status())
        );

        let res = res?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(command, status, body));
        }

        let body: Value = res.json().await?;
        unwrap_response(body)
    }
}

fn status_error(command: &str, status: StatusCode, body: String) -> EnsembleError {
    let details = format!("{} returned HTTP {}: {}", command, status.as_u16(), body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EnsembleError::Auth(details),
        s if s.is_server_error() => EnsembleError::Transport(details),
        _ => EnsembleError::Protocol(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client() -> HttpCommandClient {
        HttpCommandClient::new(Client::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn sends_command_shape_and_unwraps_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "command": "server/info"
            })))
            .with_status(200)
            .with_body(r#"{"result":{"server_id":"abc"}}"#)
            .create_async()
            .await;

        let result = client()
            .send(
                &server.url(),
                "server/info",
                Value::Null,
                &AuthHeaders::from([("Authorization".to_string(), "Bearer tok".to_string())]),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"server_id": "abc"}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_unauthorized_status_to_auth() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api")
            .with_status(401)
            .create_async()
            .await;

        let err = client()
            .send(&server.url(), "server/info", Value::Null, &AuthHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnsembleError::Auth(_)));
    }

    #[tokio::test]
    async fn maps_server_failure_to_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api")
            .with_status(502)
            .create_async()
            .await;

        let err = client()
            .send(&server.url(), "players/all", Value::Null, &AuthHeaders::new())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
