//! Application state shared by the running duel

use std::sync::Arc;

use crate::config::{Config, StoreBackendKind};
use crate::game::r#match::MatchConfig;
use crate::store::{MemoryDocument, RtdbDocument};

/// The document store a run talks through
#[derive(Clone)]
pub enum StoreBackend {
    Memory(MemoryDocument),
    Rtdb(RtdbDocument),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: StoreBackend,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let backend = match &config.backend {
            StoreBackendKind::Memory => StoreBackend::Memory(MemoryDocument::new()),
            StoreBackendKind::Rtdb { url, auth } => StoreBackend::Rtdb(RtdbDocument::new(url, auth.clone())),
        };

        Self {
            config: Arc::new(config),
            backend,
        }
    }

    /// Match parameters for the configured local player
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            room_code: self.config.room_code.clone(),
            player_name: self.config.player_name.clone(),
            player_handle: self.config.player_handle.clone(),
            seed: self.config.bot_seed,
            frame_rate: self.config.frame_rate,
        }
    }
}
