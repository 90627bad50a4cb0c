//! Real-time channel. Each socket gets a connection id; inbound frames become
//! commands and outbound frames come from the hub.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use ride_core::commands::Command;
use ride_core::ecs::ConnectionId;
use ride_core::protocol::{ClientMessage, ServerEvent};
use tracing::{debug, info, warn};

use crate::state::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Parses one text frame. Failures become the `ride:error` frame sent back.
pub fn parse_frame(text: &str) -> Result<Command, ServerEvent> {
    serde_json::from_str::<ClientMessage>(text)
        .map(ClientMessage::into_command)
        .map_err(|err| ServerEvent::Error {
            command: "message",
            message: format!("Unrecognised message: {err}"),
        })
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound) = state.hub.register();
    info!(connection = %connection, clients = state.hub.len(), "client connected");
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => on_text(&state, &connection, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(connection = %connection, error = %err, "socket read failed");
                break;
            }
        }
    }

    if state
        .dispatch
        .send(Some(connection.clone()), Command::Disconnect)
        .is_err()
    {
        warn!(connection = %connection, "dispatch loop gone, disconnect dropped");
    }
    state.hub.unregister(&connection);
    writer.abort();
    info!(connection = %connection, "client disconnected");
}

fn on_text(state: &AppState, connection: &ConnectionId, text: &str) {
    match parse_frame(text) {
        Ok(command) => {
            if state.dispatch.send(Some(connection.clone()), command).is_err() {
                warn!(connection = %connection, "dispatch loop gone, command dropped");
            }
        }
        Err(reply) => {
            debug!(connection = %connection, "unparseable frame");
            state.hub.send(connection, &reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_events_become_commands() {
        let command = parse_frame(
            r#"{"event":"driver:available","data":{"driverId":"d1","location":{"lat":48.85,"lng":2.35}}}"#,
        )
        .expect("driver:available parses");
        assert!(matches!(command, Command::DriverAvailable { .. }));
    }

    #[test]
    fn garbage_gets_an_error_frame() {
        let reply = parse_frame("{not json").expect_err("rejected");
        assert_eq!(reply.name(), "ride:error");

        let unknown = parse_frame(r#"{"event":"ride:teleport","data":{}}"#).expect_err("rejected");
        assert!(matches!(unknown, ServerEvent::Error { command: "message", .. }));
    }
}
