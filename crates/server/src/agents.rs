//! Read-only agent store
//!
//! Agent definitions are managed by an external CRUD layer; this store
//! exposes the records the dialog core needs, seeded with sample agents
//! for development.

use parking_lot::RwLock;
use std::collections::HashMap;

use voiceline_core::AgentProfile;
use voiceline_pipeline::AgentLookup;

/// In-memory read-only agent records.
pub struct AgentStore {
    agents: RwLock<HashMap<String, AgentProfile>>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Store seeded with the sample agents.
    pub fn with_samples() -> Self {
        let store = Self::new();
        for profile in sample_agents() {
            store.agents.write().insert(profile.id.clone(), profile);
        }
        store
    }

    pub fn insert(&self, profile: AgentProfile) {
        self.agents.write().insert(profile.id.clone(), profile);
    }

    pub fn list(&self) -> Vec<AgentProfile> {
        let mut agents: Vec<AgentProfile> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}

impl Default for AgentStore {
    fn default() -> Self {
        Self::with_samples()
    }
}

impl AgentLookup for AgentStore {
    fn get(&self, agent_id: &str) -> Option<AgentProfile> {
        self.agents.read().get(agent_id).cloned()
    }
}

fn sample_agents() -> Vec<AgentProfile> {
    vec![
        AgentProfile {
            id: "bozidar".to_string(),
            name: "Bozidar".to_string(),
            voice: "vincent".to_string(),
            speed: 1.0,
            greeting: "Hello! I'm Bozidar. How can I help you today?".to_string(),
            system_prompt: "You are Bozidar, a helpful and professional assistant.".to_string(),
            tone: "professional".to_string(),
            llm_model: String::new(),
            knowledge: String::new(),
            guardrails_enabled: false,
            current_date_enabled: true,
            caller_info_enabled: true,
            timezone: "(GMT-08:00) Pacific Time (US & Canada)".to_string(),
        },
        AgentProfile {
            id: "untitled".to_string(),
            name: "Untitled Agent".to_string(),
            voice: "vincent".to_string(),
            speed: 1.0,
            greeting: "Hi there! How can I assist you?".to_string(),
            system_prompt: "You are a friendly conversational assistant.".to_string(),
            tone: "chatty".to_string(),
            llm_model: String::new(),
            knowledge: String::new(),
            guardrails_enabled: false,
            current_date_enabled: true,
            caller_info_enabled: true,
            timezone: "(GMT-08:00) Pacific Time (US & Canada)".to_string(),
        },
    ]
}
