//! `mistralrs` implementation of the inference seam.
//!
//! Text-only models load through [`GgufModelBuilder`]; multimodal models
//! (text + audio, e.g. Qwen Omni family) load through
//! [`VisionModelBuilder`] and receive audio as an in-memory WAV attachment.
//! The loader choice is made by the caller from declared capabilities, never
//! by inspecting weights here.

use crate::backend::{GenerationRequest, InferenceBackend, LoadedModel, Role};
use crate::error::{Result, SidecarError};
use async_trait::async_trait;
use mistralrs::{
    AudioInput, GgufModelBuilder, Model, PagedAttentionMetaBuilder, RequestBuilder,
    TextMessageRole, VisionMessages, VisionModelBuilder,
};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

/// Sample rate of audio handed to the backend.
const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Backend factory backed by `mistralrs`.
#[derive(Debug, Default)]
pub struct MistralBackend;

impl MistralBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InferenceBackend for MistralBackend {
    fn probe(&self) -> Result<()> {
        // mistralrs (candle + gemm) needs a 64-bit host; everything else is
        // discovered at load time.
        if cfg!(target_pointer_width = "32") {
            return Err(SidecarError::Backend(
                "unsupported host architecture: mistralrs requires a 64-bit target".to_owned(),
            ));
        }
        Ok(())
    }

    async fn load_text(&self, model_path: &str) -> Result<Box<dyn LoadedModel>> {
        let (model_dir, gguf_file) = resolve_gguf_path(model_path)?;
        info!(dir = %model_dir, file = %gguf_file, "loading text model");

        let weight_bytes = file_size(Path::new(&model_dir).join(&gguf_file).as_path());

        let model = GgufModelBuilder::new(&model_dir, vec![gguf_file])
            .with_logging()
            .with_paged_attn(|| PagedAttentionMetaBuilder::default().build())
            .map_err(|e| SidecarError::Backend(format!("paged attention config failed: {e}")))?
            .build()
            .await
            .map_err(|e| SidecarError::Backend(format!("model build failed: {e}")))?;

        info!("text model loaded");
        Ok(Box::new(MistralModel {
            model,
            weight_bytes,
        }))
    }

    async fn load_multimodal(&self, model_path: &str) -> Result<Box<dyn LoadedModel>> {
        if !Path::new(model_path).exists() {
            return Err(SidecarError::Model(format!(
                "model path not found: {model_path}"
            )));
        }
        info!(path = %model_path, "loading multimodal model");

        let weight_bytes = dir_weight_bytes(Path::new(model_path));

        let model = VisionModelBuilder::new(model_path)
            .with_logging()
            .build()
            .await
            .map_err(|e| SidecarError::Backend(format!("multimodal model build failed: {e}")))?;

        info!("multimodal model loaded");
        Ok(Box::new(MistralModel {
            model,
            weight_bytes,
        }))
    }
}

/// A resident `mistralrs` model (text or multimodal).
struct MistralModel {
    model: Model,
    /// Total weight bytes on disk, for the `model-info` estimate.
    weight_bytes: u64,
}

#[async_trait]
impl LoadedModel for MistralModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut builder = RequestBuilder::new();
        for message in &request.messages {
            builder = builder.add_message(convert_role(message.role), &message.content);
        }
        builder = builder.set_sampler_max_len(request.max_tokens);

        if let Some(sampling) = request.sampling {
            builder = builder
                .set_sampler_temperature(sampling.temperature)
                .set_sampler_topp(sampling.top_p)
                // mistralrs penalties are additive around 0 (OpenAI style);
                // the configured penalty is multiplicative around 1. There is
                // no trailing-window knob, so `repetition_window` has no
                // mapping here and the penalty applies over the full context.
                .set_sampler_frequency_penalty(sampling.repetition_penalty - 1.0);
        }

        let response = self
            .model
            .send_chat_request(builder)
            .await
            .map_err(|e| SidecarError::Backend(format!("generation failed: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default();
        Ok(text)
    }

    async fn generate_with_audio(
        &self,
        request: &GenerationRequest,
        samples: &[f32],
    ) -> Result<String> {
        let prompt = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let wav_bytes = render_wav(samples)?;
        let audio = AudioInput::from_bytes(&wav_bytes)
            .map_err(|e| SidecarError::Audio(format!("failed to stage audio: {e}")))?;

        let messages = VisionMessages::new()
            .add_multimodal_message(
                TextMessageRole::User,
                prompt,
                Vec::<image::DynamicImage>::new(),
                vec![audio],
                &self.model,
            )
            .map_err(|e| SidecarError::Backend(format!("failed to build audio message: {e}")))?;

        let response = self
            .model
            .send_chat_request(messages)
            .await
            .map_err(|e| SidecarError::Backend(format!("audio generation failed: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default();
        Ok(text)
    }

    fn reset_scratch(&self) {
        // mistralrs scopes KV cache and staged multimodal inputs to one
        // request; there is no cross-call scratch to clear.
    }

    fn param_count_estimate(&self) -> u64 {
        // Rough estimate assuming a 16-bit baseline per parameter.
        self.weight_bytes / 2
    }
}

fn convert_role(role: Role) -> TextMessageRole {
    match role {
        Role::System => TextMessageRole::System,
        Role::User => TextMessageRole::User,
        Role::Assistant => TextMessageRole::Assistant,
    }
}

/// Resolve a caller-supplied path to `(directory, gguf filename)`.
///
/// Accepts either a `.gguf` file path or a directory containing one.
fn resolve_gguf_path(model_path: &str) -> Result<(String, String)> {
    let path = Path::new(model_path);
    if !path.exists() {
        return Err(SidecarError::Model(format!(
            "model path not found: {model_path}"
        )));
    }

    if path.is_file() {
        let dir = path
            .parent()
            .ok_or_else(|| SidecarError::Model(format!("invalid model path: {model_path}")))?;
        let file = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| SidecarError::Model(format!("invalid model filename: {model_path}")))?;
        return Ok((dir.to_string_lossy().into_owned(), file.to_owned()));
    }

    let mut gguf_files: Vec<String> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext == "gguf")
                .unwrap_or(false)
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    gguf_files.sort();

    match gguf_files.into_iter().next() {
        Some(file) => Ok((model_path.to_owned(), file)),
        None => Err(SidecarError::Model(format!(
            "no .gguf files found in {model_path}"
        ))),
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Sum of weight-file bytes in a model directory (best effort).
fn dir_weight_bytes(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext == "safetensors" || ext == "gguf" || ext == "bin")
                .unwrap_or(false)
        })
        .map(|entry| file_size(&entry.path()))
        .sum()
}

/// Render mono 16 kHz f32 samples as an in-memory 16-bit WAV.
fn render_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: AUDIO_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| SidecarError::Audio(format!("failed to create wav writer: {e}")))?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = (clamped * f32::from(i16::MAX)).round() as i16;
            writer
                .write_sample(value)
                .map_err(|e| SidecarError::Audio(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SidecarError::Audio(format!("failed to finalize wav: {e}")))?;
    }
    Ok(bytes)
}
