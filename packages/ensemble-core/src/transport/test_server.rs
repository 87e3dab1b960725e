//! In-process media server speaking the command protocol, for tests.
//!
//! Commands understood:
//! - `auth` - accepts the token `good`
//! - `echo` - returns its args
//! - `notify` - pushes a `player_updated` event for `kitchen`, then returns null
//! - `silence` - never answers
//! - `close` - closes the socket
//! - `players/all`, `players/get` - serve a fixed two-player list
//! - anything under `players/cmd/` or `player_queues/` - returns null

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

fn players() -> Value {
    json!([
        {"player_id": "kitchen", "name": "Kitchen", "available": true, "powered": true,
         "volume_level": 30, "state": "playing", "provider": "sonos"},
        {"player_id": "bedroom", "name": "Bedroom", "available": true, "powered": true,
         "volume_level": 10, "state": "idle", "provider": "sonos"},
        {"player_id": "ghost", "name": "This Device", "available": false}
    ])
}

/// Starts the server and returns its `http://` URL. Accepts any number of
/// connections until the test runtime shuts down.
pub async fn spawn(requires_auth: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(serve(tcp, requires_auth));
        }
    });

    format!("http://{}", addr)
}

async fn serve(tcp: TcpStream, requires_auth: bool) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    let greeting = json!({
        "server_id": "test-server",
        "server_version": "2.7.0",
        "requires_auth": requires_auth,
    });
    if ws.send(Message::text(greeting.to_string())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let cmd: Value = serde_json::from_str(text.as_str()).unwrap();
        let id = cmd["message_id"].clone();
        let command = cmd["command"].as_str().unwrap_or_default().to_string();

        let reply = match command.as_str() {
            "auth" if cmd["args"]["token"] == "good" => {
                json!({"message_id": id, "result": {"user": "alice"}})
            }
            "auth" => json!({"message_id": id, "error_code": 999, "details": "invalid token"}),
            "echo" => json!({"message_id": id, "result": cmd["args"]}),
            "notify" => {
                let event = json!({
                    "event": "player_updated",
                    "object_id": "kitchen",
                    "data": {"player_id": "kitchen", "name": "Kitchen", "available": true,
                             "volume_level": 55, "state": "paused"}
                });
                if ws.send(Message::text(event.to_string())).await.is_err() {
                    return;
                }
                json!({"message_id": id, "result": null})
            }
            "silence" => continue,
            "close" => {
                let _ = ws.close(None).await;
                return;
            }
            "players/all" => json!({"message_id": id, "result": players()}),
            "players/get" => {
                let wanted = cmd["args"]["player_id"].clone();
                match players()
                    .as_array()
                    .and_then(|all| all.iter().find(|p| p["player_id"] == wanted).cloned())
                {
                    Some(player) => json!({"message_id": id, "result": player}),
                    None => json!({"message_id": id, "error_code": 4, "details": "player not found"}),
                }
            }
            c if c.starts_with("players/cmd/") || c.starts_with("player_queues/") => {
                json!({"message_id": id, "result": null})
            }
            _ => json!({"message_id": id, "error_code": 999, "details": "unknown command"}),
        };

        if ws.send(Message::text(reply.to_string())).await.is_err() {
            return;
        }
    }
}
