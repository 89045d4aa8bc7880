//! Static model catalog: ids, context windows, unit prices, provider
//! dialects, and the per-provider snapshot remap table.

use std::collections::HashMap;

use tariff_protocol::Dialect;

pub const GATEWAY_PROVIDER: &str = "openrouter";

/// Immutable catalog entry. Prices are USD per million tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: String,
    pub provider: String,
    pub context_window: u64,
    pub input_price: f64,
    pub output_price: f64,
    pub agentic: bool,
}

impl Model {
    fn new(
        id: &str,
        context_window: u64,
        input_price: f64,
        output_price: f64,
        agentic: bool,
    ) -> Self {
        let provider = id.split('/').next().unwrap_or_default().to_string();
        Self {
            id: id.to_string(),
            provider,
            context_window,
            input_price,
            output_price,
            agentic,
        }
    }

    /// The id without its provider prefix.
    pub fn name(&self) -> &str {
        self.id.split_once('/').map(|(_, name)| name).unwrap_or(&self.id)
    }
}

/// Short name -> dated snapshot, applied when talking to the provider
/// directly. Provider-specific trivia kept as data.
const SNAPSHOT_REMAPS: &[(&str, &str)] = &[
    ("anthropic/claude-3-5-haiku", "claude-3-5-haiku-20241022"),
    ("anthropic/claude-sonnet-4", "claude-sonnet-4-20250514"),
    ("anthropic/claude-opus-4", "claude-opus-4-20250514"),
];

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<Model>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new(models: Vec<Model>) -> Self {
        let index = models
            .iter()
            .enumerate()
            .map(|(i, model)| (model.id.clone(), i))
            .collect();
        Self { models, index }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            Model::new("openai/gpt-4o-mini", 128_000, 0.15, 0.60, true),
            Model::new("openai/gpt-4o", 128_000, 2.50, 10.00, true),
            Model::new("openai/o3-mini", 200_000, 1.10, 4.40, false),
            Model::new("anthropic/claude-3-5-haiku", 200_000, 0.80, 4.00, false),
            Model::new("anthropic/claude-sonnet-4", 200_000, 3.00, 15.00, true),
            Model::new("anthropic/claude-opus-4", 200_000, 15.00, 75.00, true),
            Model::new("google/gemini-2.0-flash", 1_048_576, 0.10, 0.40, false),
            Model::new("google/gemini-2.5-pro", 1_048_576, 1.25, 10.00, true),
            Model::new("deepseek/deepseek-chat", 65_536, 0.27, 1.10, false),
            Model::new("deepseek/deepseek-reasoner", 65_536, 0.55, 2.19, false),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&Model> {
        self.index.get(id).map(|&i| &self.models[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Provider-native model name: snapshot remap if one exists, else the
    /// id with its provider prefix stripped.
    pub fn native_name(&self, id: &str) -> String {
        if let Some((_, remapped)) = SNAPSHOT_REMAPS.iter().find(|(from, _)| *from == id) {
            return (*remapped).to_string();
        }
        id.split_once('/')
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Which dialect a provider speaks natively.
pub fn native_dialect(provider: &str) -> Option<Dialect> {
    match provider {
        "openai" | "deepseek" | GATEWAY_PROVIDER => Some(Dialect::OpenAiChat),
        "anthropic" => Some(Dialect::Messages),
        "google" => Some(Dialect::GenerateContent),
        _ => None,
    }
}

pub fn provider_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "google" => Some("https://generativelanguage.googleapis.com/v1beta"),
        GATEWAY_PROVIDER => Some("https://openrouter.ai/api/v1"),
        _ => None,
    }
}
