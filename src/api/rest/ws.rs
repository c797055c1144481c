use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::verify::VerificationEvent;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FeedFilter {
    #[serde(rename = "deliveryID")]
    pub delivery_id: Option<Uuid>,
}

impl FeedFilter {
    fn admits(&self, event: &VerificationEvent) -> bool {
        self.delivery_id
            .is_none_or(|delivery_id| event.verify.delivery_id == delivery_id)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    filter: Option<Query<FeedFilter>>,
) -> impl IntoResponse {
    let filter = filter.map(|Query(filter)| filter).unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: FeedFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.verification_events_tx.subscribe());

    info!(delivery_id = ?filter.delivery_id, "verification feed client connected");

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "verification feed client lagged");
                    continue;
                }
            };
            if !filter.admits(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize verification event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("verification feed client disconnected");
}
