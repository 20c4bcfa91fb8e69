//! WebSocket connection bootstrap.
//!
//! `GET /ws/chat?id=<id>` authorizes the claimed id against the directory,
//! upgrades the connection, registers a client with the hub and starts its
//! read and write pumps. Nothing is upgraded or allocated for an unknown id.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};
use parley_hub::{create_client, read_pump, write_pump, ClientId, ClientState, Frame};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AppState};

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Claimed client id.
    pub id: ClientId,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(state): State<AppState>,
    params: Result<Query<ConnectParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Query(ConnectParams { id }) = match params {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "Rejected connection with bad query");
            return ApiError::BadRequest(e.body_text()).into_response();
        }
    };

    if !state.directory.contains(id) {
        warn!(client_id = id, "User not found");
        return ApiError::UnknownUser(id).into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            warn!(client_id = id, error = %e, "Not a WebSocket upgrade");
            return e.into_response();
        }
    };

    debug!(client_id = id, state = %ClientState::Connecting, "Upgrading connection");
    ws.max_message_size(state.keepalive.max_message_size)
        .on_failed_upgrade(move |e| warn!(client_id = id, error = %e, "Upgrade failed"))
        .on_upgrade(move |socket| serve_connection(socket, id, state))
}

/// Register an upgraded connection and start its pumps.
async fn serve_connection(socket: WebSocket, id: ClientId, state: AppState) {
    let (client, handle, outbound) = create_client(id, state.outbound_capacity);
    let session = handle.session;

    if let Err(e) = state.hub.register(client).await {
        error!(client_id = id, session = %session, error = %e, "Failed to register client");
        return;
    }
    info!(
        client_id = id,
        session = %session,
        state = %ClientState::Registered,
        "WebSocket client connected"
    );

    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = stream.map(|message| message.map(from_message));

    tokio::spawn(write_pump(handle.clone(), sink, outbound, state.keepalive));
    tokio::spawn(read_pump(
        handle,
        stream,
        state.hub,
        state.directory,
        state.keepalive,
    ));
    debug!(client_id = id, session = %session, state = %ClientState::Active, "Pumps started");
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}
