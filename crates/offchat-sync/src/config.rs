//! # Chat Configuration
//!
//! Configuration management for a chat node.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     OFFCHAT_DISPLAY_NAME="Alice's Phone"                               │
//! │     OFFCHAT_AUTO_ACCEPT=true                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/offline-chat/chat.toml (Linux)                           │
//! │     ~/Library/Application Support/com.offchat.offline-chat/chat.toml   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # chat.toml
//! [identity]
//! display_name = "Alice's Phone"
//!
//! [session]
//! service_type = "offline-chat"
//! invitation_timeout_secs = 30
//! auto_accept_invitations = false
//! command_buffer = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use offchat_core::PROTOCOL_SERVICE_TYPE;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Identity
// =============================================================================

/// Who this node is to its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display name shown to peers and stamped on composed messages.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "Offline Chat User".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            display_name: default_display_name(),
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Discovery and session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Discovery service name. Peers only find each other on equal values.
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Seconds an inbound invitation waits for an answer before it is
    /// declined.
    #[serde(default = "default_invitation_timeout")]
    pub invitation_timeout_secs: u64,

    /// Accept every invitation without asking the UI.
    #[serde(default)]
    pub auto_accept_invitations: bool,

    /// Capacity of the node's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_service_type() -> String {
    PROTOCOL_SERVICE_TYPE.to_string()
}

fn default_invitation_timeout() -> u64 {
    30
}

fn default_command_buffer() -> usize {
    64
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            service_type: default_service_type(),
            invitation_timeout_secs: default_invitation_timeout(),
            auto_accept_invitations: false,
            command_buffer: default_command_buffer(),
        }
    }
}

// =============================================================================
// Main Chat Configuration
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub session: SessionSettings,
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config with the given display name.
    pub fn with_display_name(name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.identity.display_name = name.into();
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (chat.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading chat config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load chat config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::ConfigSaveFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| SyncError::ConfigSaveFailed(format!("{}: {}", path.display(), e)))?;

        info!(?path, "Chat config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.identity.display_name.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "display_name must not be empty".into(),
            ));
        }

        if !is_valid_service_type(&self.session.service_type) {
            return Err(SyncError::InvalidConfig(format!(
                "service_type must be 1-15 lowercase letters, digits or hyphens, got: '{}'",
                self.session.service_type
            )));
        }

        if self.session.invitation_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "invitation_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.command_buffer == 0 {
            return Err(SyncError::InvalidConfig(
                "command_buffer must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides read through `lookup` (the process environment in
    /// [`ChatConfig::load`]).
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("OFFCHAT_DISPLAY_NAME") {
            debug!(display_name = %name, "Overriding display name from environment");
            self.identity.display_name = name;
        }

        if let Some(service) = lookup("OFFCHAT_SERVICE_TYPE") {
            self.session.service_type = service;
        }

        if let Some(secs) = lookup("OFFCHAT_INVITATION_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.session.invitation_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring non-numeric invitation timeout"),
            }
        }

        if let Some(flag) = lookup("OFFCHAT_AUTO_ACCEPT") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.session.auto_accept_invitations = true,
                "0" | "false" | "no" | "off" => self.session.auto_accept_invitations = false,
                _ => warn!(value = %flag, "Unknown auto-accept value in environment"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "offchat", "offline-chat")
            .map(|dirs| dirs.config_dir().join("chat.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }

    /// Invitation acceptance window.
    pub fn invitation_timeout(&self) -> Duration {
        Duration::from_secs(self.session.invitation_timeout_secs)
    }
}

/// Discovery frameworks accept 1-15 characters of `[a-z0-9-]`.
fn is_valid_service_type(value: &str) -> bool {
    (1..=15).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
