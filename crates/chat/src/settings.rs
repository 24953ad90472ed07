use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use tempfile::NamedTempFile;

use sidechat_engine::{GenerationConfig, ModelConfig, ModelTask, models_for_task};

pub const SETTINGS_DIRECTORY_NAME: &str = "sidechat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Persisted model and sampling choices, keyed the way the options page stores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub model_config: ModelConfig,
    #[serde(default)]
    pub generation_config: GenerationConfig,
}

impl ChatSettings {
    /// Model to run for `task`.
    ///
    /// The stored model wins when it was configured for the same task; otherwise
    /// the catalog default for that task is used.
    pub fn model_for_task(&self, task: ModelTask) -> ModelConfig {
        if self.model_config.task == task {
            return self.model_config.clone();
        }
        if task == ModelTask::TextGeneration {
            return ModelConfig::default();
        }

        models_for_task(task, false)
            .default_model()
            .cloned()
            .unwrap_or_else(|| ModelConfig::default().with_task(task))
    }

    fn normalized(mut self) -> Self {
        self.model_config.model_id = self.model_config.model_id.trim().to_string();
        if self.model_config.model_id.is_empty() {
            tracing::warn!("blank model id in settings, falling back to default model");
            self.model_config = ModelConfig::default();
        }

        // Zero would make every request stop before its first token.
        if self.generation_config.max_new_tokens == 0 {
            self.generation_config.max_new_tokens = GenerationConfig::default().max_new_tokens;
        }

        self
    }
}

/// Read access to the settings consulted at the start of each session.
pub trait SettingsSource: Send + Sync {
    fn snapshot(&self) -> Arc<ChatSettings>;
}

impl SettingsSource for ChatSettings {
    fn snapshot(&self) -> Arc<ChatSettings> {
        Arc::new(self.clone())
    }
}

/// Settings file shared with the options page.
///
/// Readers take lock-free snapshots; writers replace the file through a temp
/// file in the same directory before publishing the new snapshot.
pub struct SettingsStore {
    current: ArcSwap<ChatSettings>,
    path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".sidechat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            current: ArcSwap::from_pointee(read_settings(&path)),
            path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.current.load_full()
    }

    /// Makes `model_id` the active model and saves the choice.
    ///
    /// The id is looked up in every task's catalog, so the stored config also
    /// carries that model's task, dtypes and devices.
    pub fn select_model(
        &self,
        model_id: &str,
        fp16_supported: bool,
    ) -> SettingsResult<ModelConfig> {
        let model_id = model_id.trim();
        let model_config = ModelTask::ALL
            .into_iter()
            .find_map(|task| models_for_task(task, fp16_supported).find(model_id).cloned())
            .context(UnknownModelSnafu {
                stage: "select-model",
                model_id,
            })?;

        self.commit(ChatSettings {
            model_config: model_config.clone(),
            ..ChatSettings::clone(&self.settings())
        })?;
        tracing::info!(model_id, task = %model_config.task, "model selected");
        Ok(model_config)
    }

    pub fn set_generation_config(&self, generation_config: GenerationConfig) -> SettingsResult<()> {
        self.commit(ChatSettings {
            generation_config,
            ..ChatSettings::clone(&self.settings())
        })
    }

    fn commit(&self, settings: ChatSettings) -> SettingsResult<()> {
        let settings = settings.normalized();
        write_settings(&self.path, &settings)?;
        self.current.store(Arc::new(settings));
        Ok(())
    }
}

impl SettingsSource for SettingsStore {
    fn snapshot(&self) -> Arc<ChatSettings> {
        self.settings()
    }
}

/// Defaults merged with whatever the file provides. A missing file reads as
/// empty; an unreadable one falls back to defaults.
fn read_settings(path: &Path) -> ChatSettings {
    Figment::from(Serialized::defaults(ChatSettings::default()))
        .merge(Json::file(path))
        .extract::<ChatSettings>()
        .map(ChatSettings::normalized)
        .unwrap_or_else(|error| {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "unreadable settings, using defaults"
            );
            ChatSettings::default()
        })
}

fn write_settings(path: &Path, settings: &ChatSettings) -> SettingsResult<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).context(CreateDirectorySnafu {
        stage: "create-settings-directory",
        path: directory,
    })?;

    let mut staged = NamedTempFile::new_in(directory).context(StageFileSnafu {
        stage: "stage-settings-file",
        path: directory,
    })?;
    serde_json::to_writer_pretty(&mut staged, settings).context(EncodeSnafu {
        stage: "encode-settings",
    })?;
    staged.persist(path).context(PersistSnafu {
        stage: "persist-settings-file",
        path,
    })?;

    tracing::debug!(path = %path.display(), "settings saved");
    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("no catalog model named '{model_id}' on `{stage}`"))]
    UnknownModel {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("cannot create {} on `{stage}`: {source}", path.display()))]
    CreateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot stage a settings file in {} on `{stage}`: {source}", path.display()))]
    StageFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot replace {} on `{stage}`: {source}", path.display()))]
    Persist {
        stage: &'static str,
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use sidechat_engine::DataType;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(*store.settings(), ChatSettings::default());
    }

    #[test]
    fn selected_model_is_saved_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());

        let selected = store
            .select_model("onnx-community/whisper-base", false)
            .unwrap();
        assert_eq!(selected.task, ModelTask::SpeechToText);
        assert_eq!(store.settings().model_config, selected);
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);

        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().model_config, selected);
        assert_eq!(
            reloaded.settings().generation_config,
            GenerationConfig::default()
        );
    }

    #[test]
    fn unknown_model_leaves_settings_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone());

        let error = store.select_model("acme/not-a-model", false).unwrap_err();
        assert!(matches!(error, SettingsError::UnknownModel { .. }));
        assert_eq!(*store.settings(), ChatSettings::default());
        assert!(!path.exists());
    }

    #[test]
    fn generation_config_is_normalized_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone());

        store
            .set_generation_config(GenerationConfig {
                temperature: 0.2,
                max_new_tokens: 0,
                ..GenerationConfig::default()
            })
            .unwrap();

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.generation_config.temperature, 0.2);
        assert_eq!(
            reloaded.generation_config.max_new_tokens,
            GenerationConfig::default().max_new_tokens
        );
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"model_config":{"task":"text-generation","model_id":"onnx-community/Qwen2.5-0.5B-Instruct","dtype":"q4","device":"webgpu"}}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(
            settings.model_config.model_id,
            "onnx-community/Qwen2.5-0.5B-Instruct"
        );
        assert_eq!(
            settings.model_config.dtype.for_component("model"),
            Some(DataType::Q4)
        );
        assert_eq!(settings.generation_config, GenerationConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ChatSettings::default());
    }

    #[test]
    fn model_for_other_task_uses_task_default() {
        let settings = ChatSettings::default();
        assert_eq!(
            settings.model_for_task(ModelTask::TextGeneration),
            settings.model_config
        );

        let speech = settings.model_for_task(ModelTask::SpeechToText);
        assert_eq!(speech.task, ModelTask::SpeechToText);
    }
}
