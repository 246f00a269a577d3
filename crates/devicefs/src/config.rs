//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::env;

/// Env var that forces bulk enumeration on or off.
pub const BULK_ENUMERATION_ENV: &str = "DEVICEFS_BULK_ENUMERATION";

/// Identifies the managing application to the device when opening a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub revision: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            major_version: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor_version: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            revision: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

/// User-facing settings document. Every field is optional, missing ones fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineSettings {
    client: Option<ClientInfo>,
    bulk_enumeration: Option<bool>,
}

/// Configuration for device handles.
/// Priority: environment variables > user settings > defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sent to the device on connect.
    pub client: ClientInfo,
    /// Use bulk property retrieval when the device supports it. Off means always per-object.
    pub bulk_enumeration: bool,
}

impl EngineConfig {
    /// Load configuration from environment variables only (fallback).
    pub fn from_env() -> Self {
        Self::from_settings_and_env(None, None)
    }

    /// Load configuration with priority: env vars > user settings > defaults.
    pub fn from_settings_and_env(client: Option<ClientInfo>, setting_bulk: Option<bool>) -> Self {
        // Priority for bulk_enumeration:
        // 1. DEVICEFS_BULK_ENUMERATION env var
        // 2. User setting (bulkEnumeration)
        // 3. Default: on
        let bulk_enumeration = resolve_bool(env::var(BULK_ENUMERATION_ENV).ok().as_deref(), setting_bulk, true);

        Self {
            client: client.unwrap_or_default(),
            bulk_enumeration,
        }
    }

    /// Parses a JSON settings document, then applies env overrides.
    ///
    /// Example: `{"client": {"name": "Reader", "majorVersion": 2, "minorVersion": 1, "revision": 0},
    /// "bulkEnumeration": false}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let settings: EngineSettings = serde_json::from_str(json)?;
        Ok(Self::from_settings_and_env(settings.client, settings.bulk_enumeration))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Env value wins if it parses, then the setting, then the default.
fn resolve_bool(env_value: Option<&str>, setting: Option<bool>, default: bool) -> bool {
    env_value.and_then(parse_flag).or(setting).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
