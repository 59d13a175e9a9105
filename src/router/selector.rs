//! Provider registry and model routing.

use std::sync::Arc;

use crate::config::{Config, ConfigError, ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::provider::{OpenAiClient, OpenAiFlavor, ProviderClient, VeoClient, VideoJobs};

use super::capabilities::{CapabilityTable, ModelCapabilities};

/// Route segment that selects the provider from the model name.
pub const AUTO_PROVIDER: &str = "auto";

/// A configured provider with the clients it exposes.
#[derive(Clone)]
pub struct ProviderHandle {
    pub name: String,
    pub kind: ProviderKind,
    /// Model-name substrings routed here.
    pub models: Vec<String>,
    pub default: bool,
    client: Option<Arc<dyn ProviderClient>>,
    video: Option<Arc<dyn VideoJobs>>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("models", &self.models)
            .field("default", &self.default)
            .field("client", &self.client.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

impl ProviderHandle {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            models: Vec::new(),
            default: false,
            client: None,
            video: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_video(mut self, video: Arc<dyn VideoJobs>) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Build a handle and its HTTP clients from config.
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let url = config.effective_url().ok_or_else(|| {
            ConfigError::Validation(format!("Provider '{}' has empty URL", config.name))
        })?;

        let handle = Self::new(&config.name, config.kind).with_models(config.models.clone());
        let handle = if config.default {
            handle.as_default()
        } else {
            handle
        };

        let handle = match config.kind {
            ProviderKind::Openai | ProviderKind::Azure => {
                let flavor = if config.kind == ProviderKind::Azure {
                    OpenAiFlavor::Azure
                } else {
                    OpenAiFlavor::OpenAi
                };
                let client = Arc::new(
                    OpenAiClient::new(&config.name, flavor, url, config.api_key.clone(), http)
                        .with_api_version(config.api_version.clone())
                        .with_video_api_version(config.video_api_version.clone())
                        .with_deployments(config.deployments.clone()),
                );
                // Only Azure exposes the jobs-based video API.
                let handle = handle.with_client(client.clone());
                if flavor == OpenAiFlavor::Azure {
                    handle.with_video(client)
                } else {
                    handle
                }
            }
            ProviderKind::Gemini => handle.with_video(Arc::new(VeoClient::new(
                &config.name,
                url,
                config.api_key.clone(),
                http,
            ))),
        };
        Ok(handle)
    }

    /// Request/response client, if this provider has one.
    pub fn client(&self) -> Result<&Arc<dyn ProviderClient>> {
        self.client.as_ref().ok_or_else(|| Error::Unsupported {
            provider: self.name.clone(),
            capability: "chat, responses, embeddings, images and speech".to_string(),
        })
    }

    /// Video job client, if this provider has one.
    pub fn video(&self) -> Result<&Arc<dyn VideoJobs>> {
        self.video.as_ref().ok_or_else(|| Error::Unsupported {
            provider: self.name.clone(),
            capability: "video generation".to_string(),
        })
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Whether `model` is served here: the default provider and providers
    /// without a model list accept anything.
    pub fn accepts(&self, model: &str) -> bool {
        self.default || self.models.is_empty() || self.claims(model)
    }

    fn claims(&self, model: &str) -> bool {
        self.models.iter().any(|m| model.contains(m.as_str()))
    }
}

/// Provider registry plus the model capability table.
#[derive(Debug, Clone)]
pub struct Router {
    providers: Vec<ProviderHandle>,
    capabilities: CapabilityTable,
}

impl Router {
    pub fn new(providers: Vec<ProviderHandle>, capabilities: CapabilityTable) -> Self {
        Self {
            providers,
            capabilities,
        }
    }

    /// Build every configured provider, sharing one HTTP client.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        let providers = config
            .providers
            .iter()
            .map(|p| ProviderHandle::from_config(p, http.clone()))
            .collect::<Result<Vec<_>>>()?;
        let capabilities = CapabilityTable::new(&config.capabilities)?;
        Ok(Self::new(providers, capabilities))
    }

    /// Look up a provider by route name.
    pub fn provider(&self, name: &str) -> Result<&ProviderHandle> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))
    }

    /// Pick the provider for `model`: the first one whose model list
    /// contains a substring of it, else the default provider.
    pub fn route(&self, model: &str) -> Result<&ProviderHandle> {
        if let Some(provider) = self.providers.iter().find(|p| p.claims(model)) {
            tracing::debug!(model = %model, provider = %provider.name, "Routed by model name");
            return Ok(provider);
        }
        self.providers
            .iter()
            .find(|p| p.default)
            .ok_or_else(|| Error::NoProviders {
                model: model.to_string(),
            })
    }

    /// Resolve a route segment (a provider name or `auto`) for `model`.
    pub fn resolve(&self, segment: &str, model: &str) -> Result<&ProviderHandle> {
        if segment == AUTO_PROVIDER {
            return self.route(model);
        }
        let provider = self.provider(segment)?;
        if !model.is_empty() && !provider.accepts(model) {
            return Err(Error::BadRequest(format!(
                "The endpoint '{}' is not supported for the model '{}'",
                provider.name, model
            )));
        }
        Ok(provider)
    }

    pub fn capabilities(&self, model: &str) -> ModelCapabilities {
        self.capabilities.resolve(model)
    }

    /// Get all configured providers.
    pub fn providers(&self) -> &[ProviderHandle] {
        &self.providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_router() -> Router {
        Router::new(
            vec![
                ProviderHandle::new("openai", ProviderKind::Openai).as_default(),
                ProviderHandle::new("azureopenai", ProviderKind::Azure)
                    .with_models(vec!["sora".to_string()]),
                ProviderHandle::new("deepseek", ProviderKind::Openai)
                    .with_models(vec!["deepseek".to_string()]),
                ProviderHandle::new("gemini", ProviderKind::Gemini)
                    .with_models(vec!["veo".to_string()]),
            ],
            CapabilityTable::default(),
        )
    }

    #[test]
    fn test_route_by_substring() {
        let router = test_router();
        assert_eq!(router.route("sora").unwrap().name, "azureopenai");
        assert_eq!(router.route("deepseek-chat").unwrap().name, "deepseek");
        assert_eq!(router.route("veo-3.0-generate-preview").unwrap().name, "gemini");
    }

    #[test]
    fn test_route_falls_back_to_default() {
        let router = test_router();
        assert_eq!(router.route("gpt-4o").unwrap().name, "openai");
    }

    #[test]
    fn test_route_without_default_fails() {
        let router = Router::new(
            vec![ProviderHandle::new("deepseek", ProviderKind::Openai)
                .with_models(vec!["deepseek".to_string()])],
            CapabilityTable::default(),
        );
        assert!(matches!(
            router.route("gpt-4o"),
            Err(Error::NoProviders { .. })
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let router = test_router();
        assert!(matches!(
            router.provider("nope"),
            Err(Error::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_foreign_model() {
        let router = test_router();
        assert!(router.resolve("deepseek", "deepseek-chat").is_ok());
        assert!(matches!(
            router.resolve("deepseek", "gpt-4o"),
            Err(Error::BadRequest(_))
        ));
        // The default provider takes any model.
        assert!(router.resolve("openai", "sora").is_ok());
        assert_eq!(router.resolve("auto", "sora").unwrap().name, "azureopenai");
    }

    #[test]
    fn test_missing_client_is_unsupported() {
        let router = test_router();
        let gemini = router.provider("gemini").unwrap();
        assert!(matches!(gemini.client(), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_from_config_wires_clients() {
        let config = Config::parse_str(
            r#"
            [server]
            [[providers]]
            name = "openai"
            kind = "openai"
            default = true
            [[providers]]
            name = "azureopenai"
            kind = "azure"
            url = "https://example.openai.azure.com"
            [[providers]]
            name = "gemini"
            kind = "gemini"
        "#,
        )
        .unwrap();
        let router = Router::from_config(&config, reqwest::Client::new()).unwrap();

        let openai = router.provider("openai").unwrap();
        assert!(openai.has_client() && !openai.has_video());
        let azure = router.provider("azureopenai").unwrap();
        assert!(azure.has_client() && azure.has_video());
        let gemini = router.provider("gemini").unwrap();
        assert!(!gemini.has_client() && gemini.has_video());
    }
}
