//! Session state and the capability-gated command dispatcher.
//!
//! One model is resident at a time. `load-model` replaces the session
//! atomically: a failed load leaves the previous model untouched. Which
//! commands are legal depends on the session state (unloaded vs loaded) and
//! on the capability list the caller declared at load time — the dispatcher
//! never introspects the loaded model to decide what it can do.

use crate::analysis::{
    analysis_prompt, parse_analysis_response, parse_transcript_response, transcript_prompt,
    AnalysisResult, TranscriptResult,
};
use crate::audio::decode_mono_16k;
use crate::backend::{GenerationRequest, InferenceBackend, LoadedModel, SamplingOptions};
use crate::config::{truncate_chars, SidecarConfig};
use crate::download;
use crate::error::{Result, SidecarError};
use crate::extract::extract_string_list;
use crate::protocol::{parse_command, ChatTurn, Command, CommandName, Reply};
use serde_json::{json, Value};
use std::path::Path;

/// What the read loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Destination for outbound replies and progress events.
///
/// The production sink writes one JSON line per reply and flushes; tests
/// collect replies into a buffer.
pub trait ReplySink {
    fn emit(&mut self, reply: &Reply) -> Result<()>;
}

/// The resident model plus the metadata declared when it was loaded.
pub struct ActiveModel {
    pub handle: Box<dyn LoadedModel>,
    pub name: String,
    pub capabilities: Vec<String>,
}

impl ActiveModel {
    fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Session state: at most one resident model.
#[derive(Default)]
struct Session {
    active: Option<ActiveModel>,
}

/// Routes parsed commands to handlers, holding the session and backend.
pub struct Dispatcher<B: InferenceBackend> {
    backend: B,
    config: SidecarConfig,
    session: Session,
}

impl<B: InferenceBackend> Dispatcher<B> {
    pub fn new(backend: B, config: SidecarConfig) -> Self {
        Self {
            backend,
            config,
            session: Session::default(),
        }
    }

    /// Process one inbound JSON object: emit every reply it produces and
    /// report whether the loop should continue.
    ///
    /// Handler failures become `error` replies; the returned `Err` is
    /// reserved for sink write failures, which mean the peer is gone.
    pub async fn dispatch(&mut self, raw: &Value, sink: &mut dyn ReplySink) -> Result<Flow> {
        let command = match parse_command(raw) {
            Ok(command) => command,
            Err(message) => {
                let echo = raw
                    .get("command")
                    .and_then(Value::as_str)
                    .and_then(CommandName::parse);
                sink.emit(&Reply::error(echo, message))?;
                return Ok(Flow::Continue);
            }
        };
        let name = command.name();
        let flow = if matches!(command, Command::Shutdown) {
            Flow::Shutdown
        } else {
            Flow::Continue
        };
        tracing::debug!(command = name.as_str(), "dispatching");
        let reply = match self.handle(command, sink).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(command = name.as_str(), error = %e, "command failed");
                Reply::error(Some(name), e.to_string())
            }
        };
        sink.emit(&reply)?;
        Ok(flow)
    }

    async fn handle(&mut self, command: Command, sink: &mut dyn ReplySink) -> Result<Reply> {
        match command {
            Command::CheckAvailability => Ok(self.check_availability()),
            Command::LoadModel {
                model_path,
                capabilities,
            } => self.load_model(model_path, capabilities).await,
            Command::GenerateTags { content } => self.generate_tags(content).await,
            Command::Summarize { content } => self.summarize(content).await,
            Command::Chat { messages } => self.chat(messages).await,
            Command::GenerateTranscript { audio_path } => {
                self.generate_transcript(audio_path).await
            }
            Command::CopilotAnalyze {
                audio_path,
                context,
            } => self.copilot_analyze(audio_path, context).await,
            Command::DownloadModel {
                repo_id,
                destination,
            } => self.download_model(repo_id, destination, sink),
            Command::ModelInfo => self.model_info(),
            Command::Shutdown => {
                Ok(Reply::response(CommandName::Shutdown).field("success", json!(true)))
            }
        }
    }

    /// Never mutates session state; reflects true backend availability.
    fn check_availability(&self) -> Reply {
        let reply = Reply::response(CommandName::CheckAvailability);
        match self.backend.probe() {
            Ok(()) => reply.field("available", json!(true)),
            Err(e) => reply
                .field("available", json!(false))
                .field("error", json!(e.to_string())),
        }
    }

    async fn load_model(
        &mut self,
        model_path: String,
        capabilities: Option<Vec<String>>,
    ) -> Result<Reply> {
        if model_path.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing model_path".to_owned()));
        }
        // A loaded session always has at least one capability; an explicit
        // empty list means the same as an absent one.
        let capabilities = match capabilities {
            Some(list) if !list.is_empty() => list,
            _ => vec!["text".to_owned()],
        };
        let wants_audio = capabilities.iter().any(|c| c == "audio");

        let load = if wants_audio {
            self.backend.load_multimodal(&model_path).await
        } else {
            self.backend.load_text(&model_path).await
        };
        // The previous session stays resident until the new load succeeds.
        let handle = load.map_err(|e| {
            SidecarError::Model(format!("Failed to load model: {e}"))
        })?;

        let name = Path::new(&model_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.clone());
        tracing::info!(model = %name, capabilities = ?capabilities, "model loaded");
        self.session.active = Some(ActiveModel {
            handle,
            name: name.clone(),
            capabilities: capabilities.clone(),
        });
        Ok(Reply::response(CommandName::LoadModel)
            .field("model_name", json!(name))
            .field("capabilities", json!(capabilities)))
    }

    fn require_model(&self) -> Result<&ActiveModel> {
        self.session
            .active
            .as_ref()
            .ok_or_else(|| SidecarError::Protocol("No model loaded".to_owned()))
    }

    fn require_audio_model(&self, missing_capability_message: &str) -> Result<&ActiveModel> {
        let model = self.require_model()?;
        if !model.supports("audio") {
            return Err(SidecarError::Protocol(
                missing_capability_message.to_owned(),
            ));
        }
        Ok(model)
    }

    async fn generate_tags(&self, content: String) -> Result<Reply> {
        let model = self.require_model()?;
        if content.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing content".to_owned()));
        }
        let generation = &self.config.generation;
        let excerpt = truncate_chars(&content, generation.max_content_chars);
        let prompt = format!(
            "Generate up to {} short topical tags for the following content. \
             Respond with only a JSON array of tag strings.\n\nContent: {excerpt}",
            generation.max_tags
        );
        let text = model
            .handle
            .generate(&GenerationRequest::prompt(prompt, generation.tags_max_tokens))
            .await?;
        let mut tags = extract_string_list(&text);
        tags.truncate(generation.max_tags);
        Ok(Reply::response(CommandName::GenerateTags).field("tags", json!(tags)))
    }

    async fn summarize(&self, content: String) -> Result<Reply> {
        let model = self.require_model()?;
        if content.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing content".to_owned()));
        }
        let generation = &self.config.generation;
        let excerpt = truncate_chars(&content, generation.max_content_chars);
        let prompt = format!(
            "Summarize the following content in one or two sentences. \
             Respond with only the summary.\n\nContent: {excerpt}"
        );
        let text = model
            .handle
            .generate(&GenerationRequest::prompt(
                prompt,
                generation.summary_max_tokens,
            ))
            .await?;
        Ok(Reply::response(CommandName::Summarize).field("summary", json!(text.trim())))
    }

    async fn chat(&self, messages: Vec<ChatTurn>) -> Result<Reply> {
        let model = self.require_model()?;
        if messages.is_empty() {
            return Err(SidecarError::Protocol("No messages provided".to_owned()));
        }
        let generation = &self.config.generation;
        let request = GenerationRequest {
            messages: messages.iter().map(Into::into).collect(),
            max_tokens: generation.chat_max_tokens,
            sampling: Some(SamplingOptions {
                temperature: generation.chat_temperature,
                top_p: generation.chat_top_p,
                repetition_penalty: generation.chat_repetition_penalty,
                repetition_window: generation.chat_repetition_window,
            }),
        };
        let text = model.handle.generate(&request).await?;
        Ok(Reply::response(CommandName::Chat).field("response", json!(text.trim())))
    }

    async fn generate_transcript(&self, audio_path: String) -> Result<Reply> {
        let model =
            self.require_audio_model("Loaded model does not support audio transcription")?;
        if audio_path.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing audio_path".to_owned()));
        }
        let samples = decode_mono_16k(Path::new(&audio_path))?;
        let result = if samples.is_empty() {
            TranscriptResult::empty()
        } else {
            model.handle.reset_scratch();
            let request =
                GenerationRequest::prompt(transcript_prompt(), self.config.generation.audio_max_tokens);
            let text = model.handle.generate_with_audio(&request, &samples).await?;
            parse_transcript_response(&text)
        };
        Ok(Reply::response(CommandName::GenerateTranscript)
            .field("language", json!(result.language))
            .field("transcript", json!(result.transcript)))
    }

    async fn copilot_analyze(&self, audio_path: String, context: String) -> Result<Reply> {
        let model = self.require_audio_model("Model does not support audio analysis")?;
        if audio_path.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing audio_path".to_owned()));
        }
        let samples = decode_mono_16k(Path::new(&audio_path))?;
        let result = if samples.is_empty() {
            // Nothing to analyze; the running summary passes through intact.
            AnalysisResult::passthrough(&context)
        } else {
            model.handle.reset_scratch();
            let request = GenerationRequest::prompt(
                analysis_prompt(&context),
                self.config.generation.audio_max_tokens,
            );
            let text = model.handle.generate_with_audio(&request, &samples).await?;
            parse_analysis_response(&text)
        };
        let mut reply = Reply::response(CommandName::CopilotAnalyze);
        if let Value::Object(fields) = serde_json::to_value(&result)
            .map_err(|e| SidecarError::Protocol(format!("Failed to encode analysis: {e}")))?
        {
            for (key, value) in fields {
                reply = reply.field(&key, value);
            }
        }
        Ok(reply)
    }

    fn download_model(
        &self,
        repo_id: String,
        destination: String,
        sink: &mut dyn ReplySink,
    ) -> Result<Reply> {
        if repo_id.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing repo_id".to_owned()));
        }
        if destination.trim().is_empty() {
            return Err(SidecarError::Protocol("Missing destination".to_owned()));
        }
        let report = download::download_repo(
            &repo_id,
            Path::new(&destination),
            &self.config.download,
            |percent, downloaded_mb| {
                let mut event = Reply::progress(CommandName::DownloadModel)
                    .field("downloaded_mb", json!(round1(downloaded_mb)));
                if let Some(p) = percent {
                    event = event.field("progress", json!(round1(p)));
                }
                if let Err(e) = sink.emit(&event) {
                    tracing::warn!(error = %e, "failed to emit download progress");
                }
            },
        )?;
        tracing::info!(
            repo = %repo_id,
            files = report.files,
            bytes = report.bytes,
            "download complete"
        );
        Ok(Reply::response(CommandName::DownloadModel)
            .field("success", json!(true))
            .field(
                "destination",
                json!(report.destination.display().to_string()),
            ))
    }

    fn model_info(&self) -> Result<Reply> {
        let model = self.require_model()?;
        Ok(Reply::response(CommandName::ModelInfo)
            .field("model_name", json!(model.name))
            .field("param_count", json!(model.handle.param_count_estimate())))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
