use std::fs;
use std::path::Path;

use anyhow::Context;
use callguard_protocol::{ChannelId, UserId};
use serde::Deserialize;

/// Session configuration, loaded from a TOML file or built in code.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Our own participant id.
    pub self_user_id: UserId,

    /// Voice channel this session encrypts.
    pub channel_id: ChannelId,

    /// Auth session handed to the engine when the coordinator creates it.
    #[serde(default)]
    pub auth_session_id: Option<String>,
}

impl SessionConfig {
    pub fn new(self_user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            self_user_id,
            channel_id,
            auth_session_id: None,
        }
    }

    pub fn with_auth_session_id(mut self, auth_session_id: impl Into<String>) -> Self {
        self.auth_session_id = Some(auth_session_id.into());
        self
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read session config: {}", path.display()))?;
        Ok(toml::from_str(&content)?)
    }
}
