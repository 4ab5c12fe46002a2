use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, close_code},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::{
    Hub,
    error::BrokerError,
    hub::Outgoing,
    protocol::ClientEvent,
};

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(State(hub): State<Hub>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| {
        let (conn, mut outgoing) = hub.connect().await;
        let (mut sender, mut receiver) = stream.split();

        let mut send_task = tokio::spawn(async move {
            while let Some(out) = outgoing.recv().await {
                let msg = match out {
                    Outgoing::Event(event) => match serde_json::to_string(&event) {
                        Ok(text) => Message::Text(text.into()),
                        Err(err) => {
                            warn!(%conn, error = %err, "dropping unserializable event");
                            continue;
                        }
                    },
                    Outgoing::Close => {
                        let frame = CloseFrame { code: close_code::POLICY, reason: Utf8Bytes::from_static("banned") };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let recv_hub = hub.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    // pings are answered by axum; binary frames are not part of the protocol
                    _ => continue,
                };
                match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => recv_hub.dispatch(conn, event).await,
                    Err(err) => {
                        debug!(%conn, error = %err, "malformed frame");
                        recv_hub.reject(conn, &BrokerError::Malformed(err.to_string())).await;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        };

        hub.disconnect(conn).await;
    })
}
