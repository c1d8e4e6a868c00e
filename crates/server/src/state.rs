//! Application state shared across handlers

use std::sync::Arc;

use voiceline_config::Settings;
use voiceline_pipeline::Providers;

use crate::agents::AgentStore;
use crate::cache::AudioCache;
use crate::session::SessionRegistry;

const MAX_SESSIONS: usize = 100;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionRegistry>,
    pub agents: Arc<AgentStore>,
    pub cache: Arc<AudioCache>,
    pub providers: Providers,
}

impl AppState {
    pub fn new(settings: Settings, providers: Providers) -> Self {
        let cache = Arc::new(AudioCache::new(&settings.cache));
        Self {
            settings: Arc::new(settings),
            sessions: Arc::new(SessionRegistry::new(MAX_SESSIONS)),
            agents: Arc::new(AgentStore::with_samples()),
            cache,
            providers,
        }
    }
}
