//! Backend selection, endpoint URLs and connection headers.

use std::fmt;
use tracing::error;
use url::Url;

use crate::auth::TokenProviders;
use crate::config::LiveSessionConfig;
use crate::error::TransportError;
use crate::transport::ConnectRequest;

/// Default API host
pub const DEFAULT_ENDPOINT: &str = "firebasevertexai.googleapis.com";

/// Value of the `x-goog-api-client` header
pub const API_CLIENT_TAG: &str = concat!("gl-rust fire/", env!("CARGO_PKG_VERSION"));

/// Which model backend serves the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Gemini Developer API
    GoogleAi,
    /// Vertex AI in a specific location
    VertexAi {
        /// Location such as "us-central1"
        location: String,
    },
}

impl Default for Backend {
    fn default() -> Self {
        Backend::VertexAi {
            location: "us-central1".to_string(),
        }
    }
}

/// API surface version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVersion {
    /// Beta surface; the live API is only served here
    #[default]
    V1Beta,
    /// Stable surface
    V1,
}

impl ApiVersion {
    /// Path segment for this version
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1Beta => "v1beta",
            ApiVersion::V1 => "v1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to reach the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Backend serving the model
    pub backend: Backend,
    /// API version
    pub version: ApiVersion,
    /// Host name, with or without an `https://` prefix
    pub endpoint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            version: ApiVersion::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl ApiConfig {
    fn host(&self) -> &str {
        self.endpoint
            .strip_prefix("https://")
            .unwrap_or(&self.endpoint)
            .trim_end_matches('/')
    }

    /// WebSocket URL of the bidirectional generate-content service
    pub fn websocket_url(&self) -> Result<Url, TransportError> {
        let host = self.host();
        let raw = match &self.backend {
            Backend::VertexAi { location } => format!(
                "wss://{}/ws/google.firebase.vertexai.{}.LlmBidiService/BidiGenerateContent/locations/{}",
                host, self.version, location
            ),
            Backend::GoogleAi => format!(
                "wss://{}/ws/google.firebase.vertexai.{}.GenerativeService/BidiGenerateContent",
                host, self.version
            ),
        };
        Url::parse(&raw).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid live API URL {}: {}", raw, e))
        })
    }

    /// Fully qualified model resource name sent in SETUP
    pub fn model_resource_name(&self, project_id: &str, model: &str) -> String {
        match &self.backend {
            Backend::VertexAi { location } => format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                project_id, location, model
            ),
            Backend::GoogleAi => format!("projects/{}/models/{}", project_id, model),
        }
    }
}

/// Build the connection request, fetching tokens from the configured providers
///
/// Token failures are logged and the corresponding header is left out.
pub async fn connect_request(
    config: &LiveSessionConfig,
    tokens: &TokenProviders,
) -> Result<ConnectRequest, TransportError> {
    let url = config.api.websocket_url()?;
    let mut request = ConnectRequest::new(url, config.request_timeout)
        .header("x-goog-api-key", config.app.api_key.as_str())
        .header("x-goog-api-client", API_CLIENT_TAG)
        .header("Content-Type", "application/json");

    if let Some(provider) = &tokens.attestation {
        match provider
            .attestation_token(config.app.limited_use_attestation)
            .await
        {
            Ok(token) => request = request.header("X-Firebase-AppCheck", token),
            Err(e) => error!("Failed to fetch attestation token: {}", e),
        }
    }

    if let Some(provider) = &tokens.identity {
        match provider.identity_token(false).await {
            Ok(Some(token)) => {
                request = request.header("Authorization", format!("Firebase {}", token))
            }
            Ok(None) => {}
            Err(e) => error!("Failed to fetch identity token: {}", e),
        }
    }

    if config.app.data_collection_enabled {
        request = request.header("X-Firebase-AppId", config.app.app_id.as_str());
        if let Some(version) = &config.app.app_version {
            request = request.header("X-Firebase-AppVersion", version.as_str());
        }
    }

    Ok(request)
}
