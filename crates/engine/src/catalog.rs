use super::config::{DataType, DeviceType, ModelConfig, ModelTask, PerComponent};

/// Prefix that switches a multimodal request from answering to image synthesis.
pub const IMAGE_GENERATION_COMMAND_PREFIX: &str = "/image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub task: ModelTask,
    pub models: Vec<ModelConfig>,
}

impl ModelCatalog {
    pub fn find(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|model| model.model_id == model_id)
    }

    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models.first()
    }
}

/// Lists the models offered for one task.
///
/// `fp16_supported` reflects whether the GPU adapter exposes `shader-f16`;
/// the multimodal and text-to-speech dtypes fall back to wider types without it.
pub fn models_for_task(task: ModelTask, fp16_supported: bool) -> ModelCatalog {
    let models = match task {
        ModelTask::TextGeneration => text_generation_models(),
        ModelTask::MultimodalLlm => multimodal_models(fp16_supported),
        ModelTask::SpeechToText => speech_to_text_models(),
        ModelTask::Reasoning => reasoning_models(),
        ModelTask::TextToSpeech => text_to_speech_models(fp16_supported),
    };

    ModelCatalog { task, models }
}

fn text_generation_models() -> Vec<ModelConfig> {
    [
        ("onnx-community/Llama-3.2-1B-Instruct-q4f16", false),
        ("onnx-community/Llama-3.2-3B-Instruct", true),
        ("onnx-community/gemma-2-2b-jpn-it", true),
        ("onnx-community/Phi-3.5-mini-instruct-onnx-web", true),
        ("HuggingFaceTB/SmolLM2-1.7B-Instruct", false),
        ("onnx-community/Qwen2.5-0.5B-Instruct", false),
        ("onnx-community/Qwen2.5-1.5B-Instruct", false),
        ("onnx-community/Qwen2.5-Coder-3B-Instruct", true),
        ("onnx-community/Qwen2.5-Coder-1.5B-Instruct", false),
    ]
    .into_iter()
    .map(|(model_id, external)| ModelConfig::text_generation(model_id, external))
    .collect()
}

fn multimodal_models(fp16_supported: bool) -> Vec<ModelConfig> {
    let dtype = if fp16_supported {
        PerComponent::components([
            ("prepare_inputs_embeds", DataType::Q4),
            ("language_model", DataType::Q4f16),
            ("lm_head", DataType::Fp16),
            ("gen_head", DataType::Fp16),
            ("gen_img_embeds", DataType::Fp16),
            ("image_decode", DataType::Fp32),
        ])
    } else {
        PerComponent::components([
            ("prepare_inputs_embeds", DataType::Fp32),
            ("language_model", DataType::Q4),
            ("lm_head", DataType::Fp32),
            ("gen_head", DataType::Fp32),
            ("gen_img_embeds", DataType::Fp32),
            ("image_decode", DataType::Fp32),
        ])
    };

    // prepare_inputs_embeds stays on wasm until the webgpu kernel is usable.
    let device = PerComponent::components([
        ("prepare_inputs_embeds", DeviceType::Wasm),
        ("language_model", DeviceType::Webgpu),
        ("lm_head", DeviceType::Webgpu),
        ("gen_head", DeviceType::Webgpu),
        ("gen_img_embeds", DeviceType::Webgpu),
        ("image_decode", DeviceType::Webgpu),
    ]);

    vec![ModelConfig {
        task: ModelTask::MultimodalLlm,
        model_id: "onnx-community/Janus-1.3B-ONNX".to_string(),
        dtype,
        device,
        use_external_data_format: false,
    }]
}

fn speech_to_text_models() -> Vec<ModelConfig> {
    vec![ModelConfig {
        task: ModelTask::SpeechToText,
        model_id: "onnx-community/whisper-base".to_string(),
        dtype: PerComponent::components([
            ("encoder_model", DataType::Fp32),
            ("decoder_model_merged", DataType::Q4),
        ]),
        device: PerComponent::Uniform(DeviceType::Webgpu),
        use_external_data_format: false,
    }]
}

fn reasoning_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::text_generation("onnx-community/DeepSeek-R1-Distill-Qwen-1.5B-ONNX", false)
            .with_task(ModelTask::Reasoning),
    ]
}

fn text_to_speech_models(fp16_supported: bool) -> Vec<ModelConfig> {
    let dtype = if fp16_supported {
        DataType::Q4f16
    } else {
        DataType::Q4
    };

    vec![ModelConfig {
        task: ModelTask::TextToSpeech,
        model_id: "onnx-community/OuteTTS-0.2-500M".to_string(),
        dtype: PerComponent::Uniform(dtype),
        device: PerComponent::Uniform(DeviceType::Webgpu),
        use_external_data_format: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_matches_its_task() {
        for task in [
            ModelTask::TextGeneration,
            ModelTask::MultimodalLlm,
            ModelTask::SpeechToText,
            ModelTask::Reasoning,
            ModelTask::TextToSpeech,
        ] {
            let catalog = models_for_task(task, true);
            assert!(!catalog.models.is_empty(), "{task} has no models");
            assert!(catalog.models.iter().all(|model| model.task == task));
        }
    }

    #[test]
    fn default_text_model_is_first_entry() {
        let catalog = models_for_task(ModelTask::TextGeneration, false);
        assert_eq!(
            catalog.default_model().map(|model| model.model_id.as_str()),
            Some(crate::config::DEFAULT_LLM_MODEL_ID)
        );
        assert!(
            catalog
                .find("onnx-community/Llama-3.2-3B-Instruct")
                .is_some_and(|model| model.use_external_data_format)
        );
    }

    #[test]
    fn multimodal_dtypes_widen_without_fp16() {
        let with_fp16 = models_for_task(ModelTask::MultimodalLlm, true);
        let without_fp16 = models_for_task(ModelTask::MultimodalLlm, false);

        let lm_head = |catalog: &ModelCatalog| {
            catalog
                .default_model()
                .and_then(|model| model.dtype.for_component("lm_head"))
        };
        assert_eq!(lm_head(&with_fp16), Some(DataType::Fp16));
        assert_eq!(lm_head(&without_fp16), Some(DataType::Fp32));
    }
}
