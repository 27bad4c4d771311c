//! Session configuration.

use live_wire::{Content, LiveGenerationConfig, Setup};
use serde_json::Value;
use std::time::Duration;

use crate::endpoint::ApiConfig;

/// Default bound on opening the connection
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Identity of the calling app
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppInfo {
    /// API key sent with every connection
    pub api_key: String,
    /// App identifier, sent only when data collection is enabled
    pub app_id: String,
    /// App version, sent only when data collection is enabled
    pub app_version: Option<String>,
    /// Whether app identity headers may be sent
    pub data_collection_enabled: bool,
    /// Request single-use attestation tokens
    pub limited_use_attestation: bool,
}

/// Everything a live session needs to connect and set itself up
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionConfig {
    /// Fully qualified model resource name, see [`ApiConfig::model_resource_name`]
    pub model: String,
    /// Backend and endpoint
    pub api: ApiConfig,
    /// Calling app
    pub app: AppInfo,
    /// Bound on opening the connection
    pub request_timeout: Duration,
    /// Generation parameters
    pub generation_config: Option<LiveGenerationConfig>,
    /// System instruction for the session
    pub system_instruction: Option<Content>,
    /// Tool declarations
    pub tools: Option<Vec<Value>>,
    /// Tool configuration
    pub tool_config: Option<Value>,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            api: ApiConfig::default(),
            app: AppInfo::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            generation_config: None,
            system_instruction: None,
            tools: None,
            tool_config: None,
        }
    }
}

impl LiveSessionConfig {
    /// Configuration for `model` in `project_id` on the given backend
    pub fn new(api: ApiConfig, project_id: &str, model: &str) -> Self {
        Self {
            model: api.model_resource_name(project_id, model),
            api,
            ..Self::default()
        }
    }

    /// SETUP body sent as the first frame of every connection
    pub fn setup(&self) -> Setup {
        Setup::new(
            self.model.clone(),
            self.generation_config.as_ref(),
            self.system_instruction.clone(),
            self.tools.clone(),
            self.tool_config.clone(),
        )
    }
}
