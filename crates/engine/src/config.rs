use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LLM_MODEL_ID: &str = "onnx-community/Llama-3.2-1B-Instruct-q4f16";

/// Task a model configuration is built for.
///
/// Serialized names match the values persisted under the `model_config` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTask {
    TextGeneration,
    MultimodalLlm,
    SpeechToText,
    Reasoning,
    TextToSpeech,
}

impl ModelTask {
    pub const ALL: [ModelTask; 5] = [
        Self::TextGeneration,
        Self::MultimodalLlm,
        Self::SpeechToText,
        Self::Reasoning,
        Self::TextToSpeech,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text-generation",
            Self::MultimodalLlm => "multimodal-llm",
            Self::SpeechToText => "speech-to-text",
            Self::Reasoning => "reasoning",
            Self::TextToSpeech => "text-to-speech",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Fp32,
    Fp16,
    Q8,
    Q4,
    Q4f16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Webgpu,
    Wasm,
}

/// A setting that is either shared by every sub-graph of a model or
/// configured per component (`language_model`, `image_decode`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerComponent<T> {
    Uniform(T),
    Components(BTreeMap<String, T>),
}

impl<T: Copy> PerComponent<T> {
    pub fn components<const N: usize>(entries: [(&str, T); N]) -> Self {
        Self::Components(
            entries
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    /// Resolves the value used for one component.
    pub fn for_component(&self, component: &str) -> Option<T> {
        match self {
            Self::Uniform(value) => Some(*value),
            Self::Components(map) => map.get(component).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub task: ModelTask,
    pub model_id: String,
    pub dtype: PerComponent<DataType>,
    pub device: PerComponent<DeviceType>,
    #[serde(default)]
    pub use_external_data_format: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::text_generation(DEFAULT_LLM_MODEL_ID, false)
    }
}

impl ModelConfig {
    pub fn text_generation(model_id: impl Into<String>, use_external_data_format: bool) -> Self {
        Self {
            task: ModelTask::TextGeneration,
            model_id: model_id.into(),
            dtype: PerComponent::Uniform(DataType::Q4f16),
            device: PerComponent::Uniform(DeviceType::Webgpu),
            use_external_data_format,
        }
    }

    pub fn with_task(mut self, task: ModelTask) -> Self {
        self.task = task;
        self
    }
}

/// Sampling parameters forwarded verbatim to the inference library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub do_sample: bool,
    pub top_k: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub max_new_tokens: u32,
    pub repetition_penalty: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            do_sample: true,
            top_k: 3,
            temperature: 0.7,
            top_p: 0.9,
            max_new_tokens: 256,
            repetition_penalty: 1.15,
        }
    }
}
