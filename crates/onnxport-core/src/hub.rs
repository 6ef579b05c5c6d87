//! Model hub lookups.
//!
//! The only thing the converter needs from the hub is a model's
//! `config.json`, to derive the spatial input size the model was trained
//! with. Local snapshot directories carry the same file on disk.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::HubConfig;
use crate::detect::SourceFormat;
use crate::error::{OnnxportError, Result};

static REPO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,95}/[A-Za-z0-9][A-Za-z0-9._-]{0,95}$")
        .expect("repo id regex must compile")
});

/// Check that `id` looks like `owner/name`.
pub fn validate_repo_id(id: &str) -> Result<()> {
    if !REPO_ID.is_match(id) || id.contains("..") || id.contains("--") {
        return Err(OnnxportError::InvalidHubId(format!(
            "'{id}' is neither an existing path nor an owner/name hub identifier"
        )));
    }
    Ok(())
}

/// Input size from a model configuration.
///
/// Looks at `image_size`, then `vision_config.image_size`; a list yields its
/// first element.
pub fn image_size_from_config(config: &Value) -> Option<u32> {
    let size = config
        .get("image_size")
        .or_else(|| config.get("vision_config").and_then(|v| v.get("image_size")))?;

    let size = match size {
        Value::Array(items) => items.first()?,
        other => other,
    };
    size.as_u64().and_then(|n| u32::try_from(n).ok()).filter(|&n| n > 0)
}

/// Read `config.json` from a local snapshot directory, if present.
pub async fn read_local_config(dir: &Path) -> Result<Option<Value>> {
    let path = dir.join(HubConfig::CONFIG_FILENAME);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            let value = serde_json::from_str(&text).map_err(|e| OnnxportError::Json {
                message: format!("Failed to parse {}: {}", path.display(), e),
                source: Some(e),
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OnnxportError::io("reading model config", &path, e)),
    }
}

/// HTTP client for the model hub.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HubClient {
    pub fn new(endpoint: Url, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HubConfig::REQUEST_TIMEOUT)
            .user_agent(HubConfig::USER_AGENT)
            .build()
            .map_err(|e| OnnxportError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// Build from `HF_ENDPOINT` and `HF_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var(HubConfig::ENDPOINT_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| HubConfig::DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint).map_err(|e| OnnxportError::Validation {
            field: HubConfig::ENDPOINT_ENV_VAR.to_string(),
            message: format!("invalid URL '{endpoint}': {e}"),
        })?;
        let token = std::env::var(HubConfig::TOKEN_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty());

        Self::new(endpoint, token)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `<endpoint>/<owner>/<name>/resolve/main/config.json`
    pub fn config_url(&self, repo_id: &str) -> Result<Url> {
        validate_repo_id(repo_id)?;

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| OnnxportError::Validation {
                field: "endpoint".to_string(),
                message: format!("{} cannot be used as a base URL", self.endpoint),
            })?
            .pop_if_empty()
            .extend(repo_id.split('/'))
            .extend(["resolve", HubConfig::DEFAULT_REVISION, HubConfig::CONFIG_FILENAME]);
        Ok(url)
    }

    /// Fetch and parse a model's `config.json`.
    pub async fn fetch_config(&self, repo_id: &str) -> Result<Value> {
        let url = self.config_url(repo_id)?;
        debug!("Fetching {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| OnnxportError::Network {
            message: format!("Hub request failed: {}", e),
            cause: Some(e.to_string()),
        })?;

        if !response.status().is_success() {
            return Err(OnnxportError::Network {
                message: format!("Hub returned {} for {}", response.status(), url),
                cause: None,
            });
        }

        response.json().await.map_err(|e| OnnxportError::Json {
            message: format!("Failed to parse {}: {}", url, e),
            source: None,
        })
    }
}

/// Best-effort input size for a hub-style reference.
///
/// Returns `None` when the configuration is missing, unreachable or has no
/// usable size; the export then derives the size itself or falls back to the
/// default. Lookup failures are logged, never returned.
pub async fn resolve_input_size(
    client: Option<&HubClient>,
    reference: &str,
    format: SourceFormat,
) -> Option<u32> {
    let config = match format {
        SourceFormat::HubLocalDirectory => read_local_config(Path::new(reference)).await,
        SourceFormat::HubIdentifier => match client {
            Some(client) => client.fetch_config(reference).await.map(Some),
            None => Ok(None),
        },
        _ => Ok(None),
    };

    match config {
        Ok(Some(config)) => {
            let size = image_size_from_config(&config);
            debug!("Input size from model config for {}: {:?}", reference, size);
            size
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Could not read model config for {}: {}", reference, e);
            None
        }
    }
}
