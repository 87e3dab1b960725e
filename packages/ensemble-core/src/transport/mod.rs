//! Connection to the media server.
//!
//! - `session` - persistent WebSocket session, handshake and command dispatch
//! - `http` - HTTP command client for out-of-band auth operations
//! - `state` - connection state machine
//!
//! Higher layers depend on the [`CommandTransport`] trait rather than on the
//! concrete session so they can be exercised against mocks.

mod http;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod test_server;

use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpCommandClient;
pub use session::{ServerEvent, SessionAuth, TransportConfig, TransportSession};
pub use state::ConnectionState;

use crate::error::EnsembleResult;

/// Request/response command dispatch.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends `command` with `args` and waits for its result.
    ///
    /// # Errors
    /// `NotConnected` outside an established session; `Transport`,
    /// `Timeout` or `Protocol` for failures while the command is in flight;
    /// server-side error payloads map to `NotFound`, `Auth` or `Server`.
    async fn send(&self, command: &str, args: Value) -> EnsembleResult<Value>;
}
