//! Per-model capability table.
//!
//! Every decision that depends on the model name is made here, once per
//! request. Built-in rules come first; `[[capabilities]]` rules from the
//! config are applied after them and override field by field.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{CapabilityRule, ConfigError};

/// Realtime API generation a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiGeneration {
    /// `realtime/sessions`, beta event names.
    #[default]
    Preview,
    /// `realtime/client_secrets`, GA event names.
    Ga,
}

/// Role used for the injected system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemRole {
    #[default]
    System,
    Assistant,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::System => "system",
            SystemRole::Assistant => "assistant",
        }
    }
}

/// What the proxy needs to know about a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModelCapabilities {
    /// Chat requests carry `modalities: ["text", "audio"]`.
    pub supports_audio: bool,
    /// Responses requests carry `truncation: "auto"`.
    pub supports_truncation: bool,
    pub api_generation: ApiGeneration,
    pub system_role: SystemRole,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    supports_audio: Option<bool>,
    supports_truncation: Option<bool>,
    api_generation: Option<ApiGeneration>,
    system_role: Option<SystemRole>,
}

impl CompiledRule {
    fn compile(rule: &CapabilityRule) -> Result<Self, ConfigError> {
        let pattern = Regex::new(&format!("(?i){}", rule.pattern)).map_err(|e| {
            ConfigError::Validation(format!(
                "Invalid capability pattern '{}': {}",
                rule.pattern, e
            ))
        })?;
        Ok(Self {
            pattern,
            supports_audio: rule.supports_audio,
            supports_truncation: rule.supports_truncation,
            api_generation: rule.api_generation,
            system_role: rule.system_role,
        })
    }

    fn apply(&self, caps: &mut ModelCapabilities) {
        if let Some(v) = self.supports_audio {
            caps.supports_audio = v;
        }
        if let Some(v) = self.supports_truncation {
            caps.supports_truncation = v;
        }
        if let Some(v) = self.api_generation {
            caps.api_generation = v;
        }
        if let Some(v) = self.system_role {
            caps.system_role = v;
        }
    }
}

fn builtin_rules() -> Vec<CapabilityRule> {
    let rule = |pattern: &str| CapabilityRule {
        pattern: pattern.to_string(),
        supports_audio: None,
        supports_truncation: None,
        api_generation: None,
        system_role: None,
    };
    vec![
        CapabilityRule {
            supports_audio: Some(true),
            ..rule("audio")
        },
        CapabilityRule {
            supports_truncation: Some(true),
            ..rule("computer")
        },
        CapabilityRule {
            api_generation: Some(ApiGeneration::Ga),
            ..rule("^(gpt-realtime|gpt-5-)")
        },
        CapabilityRule {
            system_role: Some(SystemRole::Assistant),
            ..rule("^o1")
        },
    ]
}

/// Ordered capability rules.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    rules: Vec<CompiledRule>,
}

impl CapabilityTable {
    /// Built-in rules followed by `overrides`.
    pub fn new(overrides: &[CapabilityRule]) -> Result<Self, ConfigError> {
        let rules = builtin_rules()
            .iter()
            .chain(overrides)
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Resolve the capabilities of `model`.
    pub fn resolve(&self, model: &str) -> ModelCapabilities {
        let mut caps = ModelCapabilities::default();
        for rule in self.rules.iter().filter(|r| r.pattern.is_match(model)) {
            rule.apply(&mut caps);
        }
        caps
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::new(&[]).expect("built-in capability rules compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_model_has_defaults() {
        let caps = CapabilityTable::default().resolve("gpt-4o");
        assert_eq!(caps, ModelCapabilities::default());
    }

    #[test]
    fn test_audio_model() {
        let table = CapabilityTable::default();
        assert!(table.resolve("gpt-4o-audio-preview").supports_audio);
        assert!(table.resolve("GPT-4O-AUDIO").supports_audio);
    }

    #[test]
    fn test_computer_use_truncation() {
        let caps = CapabilityTable::default().resolve("computer-use-preview");
        assert!(caps.supports_truncation);
        assert!(!caps.supports_audio);
    }

    #[test]
    fn test_realtime_generation() {
        let table = CapabilityTable::default();
        assert_eq!(table.resolve("gpt-realtime").api_generation, ApiGeneration::Ga);
        assert_eq!(table.resolve("gpt-5-mini").api_generation, ApiGeneration::Ga);
        assert_eq!(
            table
                .resolve("gpt-4o-mini-realtime-preview-2024-12-17")
                .api_generation,
            ApiGeneration::Preview
        );
    }

    #[test]
    fn test_o1_uses_assistant_role() {
        let table = CapabilityTable::default();
        assert_eq!(table.resolve("o1-pro").system_role, SystemRole::Assistant);
        assert_eq!(table.resolve("o1").system_role, SystemRole::Assistant);
        assert_eq!(table.resolve("o4-mini").system_role, SystemRole::System);
    }

    #[test]
    fn test_override_wins_over_builtin() {
        let overrides = vec![CapabilityRule {
            pattern: "audio-lite".to_string(),
            supports_audio: Some(false),
            supports_truncation: None,
            api_generation: None,
            system_role: None,
        }];
        let table = CapabilityTable::new(&overrides).unwrap();
        assert!(!table.resolve("gpt-audio-lite").supports_audio);
        assert!(table.resolve("gpt-4o-audio-preview").supports_audio);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = vec![CapabilityRule {
            pattern: "[".to_string(),
            supports_audio: None,
            supports_truncation: None,
            api_generation: None,
            system_role: None,
        }];
        assert!(CapabilityTable::new(&overrides).is_err());
    }
}
