use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::tokens::TokenPolicy;
use crate::models::verify::VerificationEvent;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub token_policy: TokenPolicy,
    pub verification_events_tx: broadcast::Sender<VerificationEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let (verification_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Self {
            store: Store::new(),
            token_policy: TokenPolicy::from_config(config),
            verification_events_tx,
            metrics: Metrics::new(),
        }
    }
}
