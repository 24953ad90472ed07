use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu, ensure};

use sidechat::{
    ChatEventKind, ChatSettings, ControllerError, MessageStatus, SessionController, SessionHandle,
    SessionState, SettingsError, SettingsSource, SettingsStore, SubmitRequest, THINKING_LABEL,
};
use sidechat_engine::{EngineFailure, ModelTask, RasterImage, ScriptStep, ScriptedEngine};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    settings_path: Option<PathBuf>,
    select_model: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    StreamingReply,
    CancelBeforeDelta,
    BusyRejection,
    ModelLoading,
    LoadFailure,
    ImageGeneration,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "streaming_reply" => Some(Self::StreamingReply),
            "cancel_before_delta" => Some(Self::CancelBeforeDelta),
            "busy_rejection" => Some(Self::BusyRejection),
            "model_loading" => Some(Self::ModelLoading),
            "load_failure" => Some(Self::LoadFailure),
            "image_generation" => Some(Self::ImageGeneration),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::StreamingReply => "streaming_reply",
            Self::CancelBeforeDelta => "cancel_before_delta",
            Self::BusyRejection => "busy_rejection",
            Self::ModelLoading => "model_loading",
            Self::LoadFailure => "load_failure",
            Self::ImageGeneration => "image_generation",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("--select-model needs --settings to know where to save"))]
    SelectionWithoutSettings { stage: &'static str },
    #[snafu(display("settings update failed: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("controller rejected request: {source}"))]
    Controller {
        stage: &'static str,
        source: ControllerError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    let settings: Arc<ChatSettings> = match args.settings_path {
        Some(path) => {
            println!("settings_path={}", path.display());
            let store = SettingsStore::new(path);
            if let Some(model_id) = &args.select_model {
                let selected = store.select_model(model_id, false).context(SettingsSnafu {
                    stage: "select-model",
                })?;
                println!("selected_model={}", selected.model_id);
                println!("selected_task={}", selected.task);
            }
            store.snapshot()
        }
        None => {
            ensure!(
                args.select_model.is_none(),
                SelectionWithoutSettingsSnafu {
                    stage: "select-model"
                }
            );
            Arc::new(ChatSettings::default())
        }
    };

    match args.scenario {
        Scenario::StreamingReply => run_streaming_reply(&settings).await,
        Scenario::CancelBeforeDelta => run_cancel_before_delta(&settings).await,
        Scenario::BusyRejection => run_busy_rejection(&settings).await,
        Scenario::ModelLoading => run_model_loading(&settings).await,
        Scenario::LoadFailure => run_load_failure(&settings).await,
        Scenario::ImageGeneration => run_image_generation(&settings).await,
        Scenario::All => run_all(&settings).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut settings_path = None;
    let mut select_model = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--settings" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-settings-value",
                    arg: "--settings",
                })?;
                settings_path = Some(PathBuf::from(value));
            }
            "--select-model" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-select-model-value",
                    arg: "--select-model",
                })?;
                select_model = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        settings_path,
        select_model,
    })
}

fn controller(steps: Vec<ScriptStep>, settings: ChatSettings) -> SessionController {
    SessionController::new(Arc::new(ScriptedEngine::new(steps)), Arc::new(settings))
}

fn text_settings(settings: &ChatSettings) -> ChatSettings {
    ChatSettings {
        model_config: settings.model_for_task(ModelTask::TextGeneration),
        generation_config: settings.generation_config.clone(),
    }
}

fn submit(
    controller: &mut SessionController,
    text: &str,
    stage: &'static str,
) -> RunnerResult<SessionHandle> {
    controller
        .submit(SubmitRequest::new(text))
        .context(ControllerSnafu { stage })
}

fn check(
    condition: bool,
    stage: &'static str,
    scenario: &'static str,
    reason: &str,
) -> RunnerResult<()> {
    if condition {
        return Ok(());
    }
    ScenarioFailedSnafu {
        stage,
        scenario,
        reason: reason.to_string(),
    }
    .fail()
}

async fn run_streaming_reply(settings: &ChatSettings) -> RunnerResult<()> {
    let mut controller = controller(
        vec![ScriptStep::token("Hi"), ScriptStep::token(" there")],
        text_settings(settings),
    );
    submit(&mut controller, "Hello", "scenario-streaming-reply-submit")?;
    let state = controller.run_until_idle().await;

    let reply = controller.log().last().map(|message| message.content.clone());
    let metadata = controller
        .log()
        .last()
        .and_then(|message| message.metadata.clone())
        .unwrap_or_default();
    println!("reply={}", reply.as_deref().unwrap_or_default());
    println!("metadata={metadata}");
    check(
        state == Some(SessionState::Completed) && reply.as_deref() == Some("Hi there"),
        "scenario-streaming-reply",
        "streaming_reply",
        "reply did not complete with the streamed text",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_cancel_before_delta(settings: &ChatSettings) -> RunnerResult<()> {
    let mut controller = controller(
        vec![
            ScriptStep::load("model.onnx", 1024, 2),
            ScriptStep::token("late"),
        ],
        text_settings(settings),
    );
    let handle = submit(&mut controller, "Hello", "scenario-cancel-submit")?;
    let cancelled = controller.cancel(handle);
    controller.drain_workers().await;

    let reply = controller.log().last().cloned();
    let kept_placeholder = reply
        .as_ref()
        .is_some_and(|message| message.content == THINKING_LABEL);
    let status_cancelled = reply
        .as_ref()
        .is_some_and(|message| message.status == MessageStatus::Cancelled);
    println!("cancelled={cancelled}");
    println!("busy_after_cancel={}", controller.is_busy());
    check(
        cancelled && kept_placeholder && status_cancelled && !controller.is_busy(),
        "scenario-cancel-before-delta",
        "cancel_before_delta",
        "cancel did not close the pending message before any delta",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_busy_rejection(settings: &ChatSettings) -> RunnerResult<()> {
    let mut controller = controller(
        vec![
            ScriptStep::token("Hi"),
            ScriptStep::Pause(Duration::from_millis(20)),
            ScriptStep::token("!"),
        ],
        text_settings(settings),
    );
    submit(&mut controller, "Hello", "scenario-busy-first-submit")?;
    controller.pump().await;

    let rejected = controller
        .submit(SubmitRequest::new("again"))
        .is_err_and(|error| error.is_busy());
    println!("busy_rejected={rejected}");
    let state = controller.run_until_idle().await;
    check(
        rejected && state == Some(SessionState::Completed) && controller.log().len() == 2,
        "scenario-busy-rejection",
        "busy_rejection",
        "second submit was not rejected while streaming",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_model_loading(settings: &ChatSettings) -> RunnerResult<()> {
    let mut controller = controller(
        vec![
            ScriptStep::load("onnx/model_q4f16.onnx", 4096, 4),
            ScriptStep::load("tokenizer.json", 512, 1),
            ScriptStep::token("ready"),
        ],
        text_settings(settings),
    );
    let mut events = controller.subscribe();
    submit(&mut controller, "Hello", "scenario-model-loading-submit")?;
    controller.run_until_idle().await;

    let mut progress_events = 0;
    let mut ready_events = 0;
    while let Ok(event) = events.try_recv() {
        match event.kind {
            ChatEventKind::ModelLoadProgress { .. } => progress_events += 1,
            ChatEventKind::ModelReady => ready_events += 1,
            _ => {}
        }
    }
    println!("progress_events={progress_events}");
    println!("ready_events={ready_events}");
    // The first file empties the download set, so later files never re-fire ready.
    check(
        progress_events == 7 && ready_events == 1,
        "scenario-model-loading",
        "model_loading",
        "unexpected download progress sequence",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_load_failure(settings: &ChatSettings) -> RunnerResult<()> {
    let mut controller = controller(
        vec![
            ScriptStep::load("onnx/model_q4f16.onnx", 4096, 1),
            ScriptStep::Fail(EngineFailure::load("404 for onnx/model_q4f16.onnx")),
        ],
        text_settings(settings),
    );
    submit(&mut controller, "Hello", "scenario-load-failure-submit")?;
    let state = controller.run_until_idle().await;

    let failed = matches!(state, Some(SessionState::Failed { .. }));
    let error_status = controller
        .log()
        .last()
        .is_some_and(|message| matches!(message.status, MessageStatus::Error(_)));
    println!("failed={failed}");
    check(
        failed && error_status && controller.log().is_closed(),
        "scenario-load-failure",
        "load_failure",
        "load failure did not close the pending message",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_image_generation(settings: &ChatSettings) -> RunnerResult<()> {
    let image = RasterImage {
        width: 2,
        height: 2,
        channels: 3,
        data: vec![128; 12],
    };
    let multimodal = ChatSettings {
        model_config: settings.model_for_task(ModelTask::MultimodalLlm),
        generation_config: settings.generation_config.clone(),
    };
    let mut controller = controller(
        vec![ScriptStep::ImageTokens { total: 8 }, ScriptStep::Image(image)],
        multimodal,
    );
    submit(&mut controller, "/image a lighthouse at dusk", "scenario-image-submit")?;
    let state = controller.run_until_idle().await;

    let has_image = controller
        .log()
        .last()
        .is_some_and(|message| message.image.is_some());
    println!("image_ready={has_image}");
    check(
        state == Some(SessionState::Completed) && has_image,
        "scenario-image-generation",
        "image_generation",
        "image was not attached to the reply",
    )?;

    println!("runner_ok=true");
    Ok(())
}

async fn run_all(settings: &ChatSettings) -> RunnerResult<()> {
    run_streaming_reply(settings).await?;
    run_cancel_before_delta(settings).await?;
    run_busy_rejection(settings).await?;
    run_model_loading(settings).await?;
    run_load_failure(settings).await?;
    run_image_generation(settings).await?;
    println!("all_passed=true");
    Ok(())
}
