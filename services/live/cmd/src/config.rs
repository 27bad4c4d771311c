//! Configuration handling for the live service.
//!
//! Settings come from the shared YAML config file, then `LIVE_*` environment
//! variables, then command line flags (applied in `main`).

use anyhow::{bail, Context, Result};
use live_session::{ApiConfig, ApiVersion, AppInfo, Backend, LiveSessionConfig};
use live_wire::{AudioTranscriptionConfig, Content, LiveGenerationConfig, Modality, SpeechConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Live service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveServiceConfig {
    /// Project hosting the model
    pub project_id: String,
    /// Model name, e.g. "gemini-2.0-flash-live-preview-04-09"
    pub model: String,
    /// "vertex" or "google"
    pub backend: String,
    /// Vertex AI location
    pub location: String,
    /// "v1beta" or "v1"
    pub api_version: String,
    /// API host
    pub endpoint: String,
    /// API key
    pub api_key: String,
    /// App identifier
    pub app_id: String,
    /// App version
    pub app_version: Option<String>,
    /// Send app identity headers
    pub data_collection: bool,
    /// Bound on opening the connection
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// "text" or "audio"
    pub response_modality: String,
    /// Prebuilt voice for audio responses
    pub voice: Option<String>,
    /// Ask for transcripts of the model's audio
    pub output_transcription: bool,
    /// System instruction text
    pub system_instruction: Option<String>,
}

impl Default for LiveServiceConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            model: "gemini-2.0-flash-live-preview-04-09".to_string(),
            backend: "vertex".to_string(),
            location: "us-central1".to_string(),
            api_version: "v1beta".to_string(),
            endpoint: live_session::endpoint::DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            app_id: String::new(),
            app_version: None,
            data_collection: false,
            request_timeout: live_session::DEFAULT_REQUEST_TIMEOUT,
            response_modality: "text".to_string(),
            voice: None,
            output_transcription: false,
            system_instruction: None,
        }
    }
}

/// Serialize durations as humantime strings ("180s")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    live: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

const KEY_PREFIX: &str = "services.live.";

impl LiveServiceConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    config.apply_root_config(root)?;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final live configuration: project={}, model={}, backend={}, endpoint={}",
            config.project_id, config.model, config.backend, config.endpoint
        );
        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) -> Result<()> {
        let values = root
            .services
            .and_then(|services| services.live)
            .and_then(|live| live.config)
            .unwrap_or_default();

        for (key, value) in values {
            match key.strip_prefix(KEY_PREFIX) {
                Some(field) => self.set(field, value)?,
                None => warn!("Ignoring configuration key outside {}: {}", KEY_PREFIX, key),
            }
        }
        Ok(())
    }

    /// Apply `LIVE_*` overrides; `lookup` reads one variable
    pub fn apply_environment_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        const FIELDS: [&str; 8] = [
            "project_id",
            "model",
            "backend",
            "location",
            "endpoint",
            "api_key",
            "app_id",
            "request_timeout",
        ];

        for field in FIELDS {
            let variable = format!("LIVE_{}", field.to_uppercase());
            if let Some(value) = lookup(&variable) {
                self.set(field, value)
                    .with_context(|| format!("invalid value in {}", variable))?;
                if field == "api_key" {
                    info!("API key overridden by environment");
                } else {
                    info!("{} overridden by environment", field);
                }
            }
        }
        Ok(())
    }

    fn set(&mut self, field: &str, value: String) -> Result<()> {
        match field {
            "project_id" => self.project_id = value,
            "model" => self.model = value,
            "backend" => self.backend = value,
            "location" => self.location = value,
            "api_version" => self.api_version = value,
            "endpoint" => self.endpoint = value,
            "api_key" => self.api_key = value,
            "app_id" => self.app_id = value,
            "app_version" => self.app_version = Some(value),
            "data_collection" => self.data_collection = value.eq_ignore_ascii_case("true"),
            "request_timeout" => {
                self.request_timeout = humantime::parse_duration(&value)
                    .with_context(|| format!("invalid request_timeout {:?}", value))?
            }
            "response_modality" => self.response_modality = value,
            "voice" => self.voice = Some(value),
            "output_transcription" => {
                self.output_transcription = value.eq_ignore_ascii_case("true")
            }
            "system_instruction" => self.system_instruction = Some(value),
            other => warn!("Ignoring unknown configuration key: {}", other),
        }
        Ok(())
    }

    /// Build the library session configuration
    pub fn session_config(&self) -> Result<LiveSessionConfig> {
        if self.project_id.is_empty() {
            bail!("project_id is required");
        }

        let backend = match self.backend.as_str() {
            "vertex" | "vertexai" => Backend::VertexAi {
                location: self.location.clone(),
            },
            "google" | "googleai" => Backend::GoogleAi,
            other => bail!("unknown backend {:?}, expected \"vertex\" or \"google\"", other),
        };
        let version = match self.api_version.as_str() {
            "v1beta" => ApiVersion::V1Beta,
            "v1" => ApiVersion::V1,
            other => bail!("unknown api_version {:?}", other),
        };
        let modality = match self.response_modality.as_str() {
            "text" => Modality::Text,
            "audio" => Modality::Audio,
            other => bail!("unsupported response_modality {:?}", other),
        };

        let api = ApiConfig {
            backend,
            version,
            endpoint: self.endpoint.clone(),
        };
        let generation = LiveGenerationConfig {
            response_modalities: Some(vec![modality]),
            speech_config: self.voice.as_deref().map(SpeechConfig::prebuilt),
            output_audio_transcription: self
                .output_transcription
                .then(AudioTranscriptionConfig::default),
            ..Default::default()
        };

        Ok(LiveSessionConfig {
            app: AppInfo {
                api_key: self.api_key.clone(),
                app_id: self.app_id.clone(),
                app_version: self.app_version.clone(),
                data_collection_enabled: self.data_collection,
                limited_use_attestation: false,
            },
            request_timeout: self.request_timeout,
            generation_config: Some(generation),
            system_instruction: self
                .system_instruction
                .as_deref()
                .map(|text| Content::new("system", vec![live_wire::Part::text(text)])),
            ..LiveSessionConfig::new(api, &self.project_id, &self.model)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LiveServiceConfig::default();
        assert_eq!(config.backend, "vertex");
        assert_eq!(config.location, "us-central1");
        assert_eq!(config.request_timeout, Duration::from_secs(180));
        assert!(!config.data_collection);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  live:
    enabled: true
    executable: ./redb-live
    config:
      services.live.project_id: "demo-project"
      services.live.backend: "google"
      services.live.request_timeout: "30s"
      services.live.data_collection: "true"
      services.live.response_modality: "audio"
      services.live.voice: "Kore"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = LiveServiceConfig::default();
        let root: RootConfig = serde_yaml::from_str(yaml_content).unwrap();
        config.apply_root_config(root).unwrap();

        assert_eq!(config.project_id, "demo-project");
        assert_eq!(config.backend, "google");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.data_collection);

        let loaded = LiveServiceConfig::load_from_file(temp_file.path()).unwrap();
        assert!(!loaded.model.is_empty());

        let session = config.session_config().unwrap();
        assert_eq!(
            session.model,
            "projects/demo-project/models/gemini-2.0-flash-live-preview-04-09"
        );
        assert_eq!(session.request_timeout, Duration::from_secs(30));
        let generation = session.generation_config.unwrap();
        assert_eq!(generation.response_modalities, Some(vec![Modality::Audio]));
        assert!(generation.speech_config.is_some());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = LiveServiceConfig::load_from_file("/nonexistent/redb-live.yaml");
        assert!(config.is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("LIVE_PROJECT_ID", "env-project"),
            ("LIVE_API_KEY", "secret"),
            ("LIVE_REQUEST_TIMEOUT", "2m"),
        ]
        .into_iter()
        .collect();

        let mut config = LiveServiceConfig::default();
        config
            .apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.project_id, "env-project");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.request_timeout, Duration::from_secs(120));

        let bad: HashMap<&str, &str> = [("LIVE_REQUEST_TIMEOUT", "soon")].into_iter().collect();
        assert!(config
            .apply_environment_overrides(|key| bad.get(key).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_session_config_validation() {
        let config = LiveServiceConfig::default();
        assert!(config.session_config().is_err());

        let config = LiveServiceConfig {
            project_id: "demo".to_string(),
            backend: "mars".to_string(),
            ..LiveServiceConfig::default()
        };
        assert!(config.session_config().is_err());

        let config = LiveServiceConfig {
            project_id: "demo".to_string(),
            ..LiveServiceConfig::default()
        };
        let session = config.session_config().unwrap();
        assert_eq!(
            session.model,
            "projects/demo/locations/us-central1/publishers/google/models/gemini-2.0-flash-live-preview-04-09"
        );
    }
}
