// Agent Registry: immutable identity -> hierarchy level lookup

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    CAMPAIGN_MANAGER, CMO, COMPETITIVE_ANALYST, CONTENT_WRITER, DATA_ANALYST, MARKETING_STRATEGIST,
    SEO_SPECIALIST, SOCIAL_MEDIA_MANAGER,
};
use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// 1 is the top of the hierarchy; larger numbers report upward.
    pub level: u32,
    #[serde(default)]
    pub title: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            level,
            title: None,
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
}

/// Built once at startup and shared behind an `Arc`. There is no way to add or
/// remove agents afterwards.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new(agents: impl IntoIterator<Item = Agent>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for agent in agents {
            if agent.level == 0 {
                return Err(RegistryError::InvalidLevel(agent.id));
            }
            if map.contains_key(&agent.id) {
                return Err(RegistryError::DuplicateAgent(agent.id));
            }
            map.insert(agent.id.clone(), agent);
        }
        Ok(Self { agents: map })
    }

    /// Load a non-empty JSON array of `{ "id", "level", "title"? }` objects.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let agents: Vec<Agent> = serde_json::from_str(&raw)?;
        let registry = Self::new(agents)?;
        if registry.is_empty() {
            return Err(RegistryError::Empty);
        }
        info!(
            path = %path.as_ref().display(),
            agents = registry.len(),
            "Agent registry loaded"
        );
        Ok(registry)
    }

    /// The marketing team roster the dashboard ships with.
    pub fn marketing_roster() -> Self {
        let roster = [
            Agent::new(CMO, 1).titled("Chief Marketing Officer"),
            Agent::new(MARKETING_STRATEGIST, 2).titled("Marketing Strategist"),
            Agent::new(CAMPAIGN_MANAGER, 2).titled("Campaign Manager"),
            Agent::new(COMPETITIVE_ANALYST, 3).titled("Competitive Intelligence Analyst"),
            Agent::new(CONTENT_WRITER, 3).titled("Content Writer"),
            Agent::new(DATA_ANALYST, 3).titled("Performance Data Analyst"),
            Agent::new(SEO_SPECIALIST, 3).titled("SEO Specialist"),
            Agent::new(SOCIAL_MEDIA_MANAGER, 3).titled("Social Media Manager"),
        ];
        Self {
            agents: roster.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn level(&self, id: &str) -> Option<u32> {
        self.agents.get(id).map(|a| a.level)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Top of the hierarchy first, then by id.
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        let mut agents: Vec<&Agent> = self.agents.values().collect();
        agents.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
        agents.into_iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
