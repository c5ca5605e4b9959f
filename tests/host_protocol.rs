//! End-to-end protocol tests: drive the real read loop over in-memory
//! streams with a scripted backend and assert on the emitted JSON lines.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sibyl::backend::{GenerationRequest, InferenceBackend, LoadedModel};
use sibyl::bridge::run_loop;
use sibyl::{Dispatcher, Result, SidecarConfig, SidecarError};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared view into everything the scripted backend observed.
#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    audio_calls: AtomicUsize,
    resets: AtomicUsize,
    multimodal_error: Option<String>,
}

impl Script {
    fn push_reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(text.to_owned());
    }
}

struct ScriptedModel {
    script: Arc<Script>,
}

#[async_trait]
impl LoadedModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.script
            .prompts
            .lock()
            .unwrap()
            .push(request.messages[0].content.clone());
        Ok(self
            .script
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn generate_with_audio(
        &self,
        request: &GenerationRequest,
        _samples: &[f32],
    ) -> Result<String> {
        self.script.audio_calls.fetch_add(1, Ordering::SeqCst);
        self.generate(request).await
    }

    fn reset_scratch(&self) {
        self.script.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn param_count_estimate(&self) -> u64 {
        2_000_000_000
    }
}

struct ScriptedBackend {
    script: Arc<Script>,
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn load_text(&self, _model_path: &str) -> Result<Box<dyn LoadedModel>> {
        Ok(Box::new(ScriptedModel {
            script: self.script.clone(),
        }))
    }

    async fn load_multimodal(&self, _model_path: &str) -> Result<Box<dyn LoadedModel>> {
        match &self.script.multimodal_error {
            Some(msg) => Err(SidecarError::Backend(msg.clone())),
            None => Ok(Box::new(ScriptedModel {
                script: self.script.clone(),
            })),
        }
    }
}

fn scripted() -> (ScriptedBackend, Arc<Script>) {
    let script = Arc::new(Script::default());
    (
        ScriptedBackend {
            script: script.clone(),
        },
        script,
    )
}

async fn run_session(backend: ScriptedBackend, lines: &[Value]) -> Vec<Value> {
    let input = lines
        .iter()
        .map(|v| format!("{v}\n"))
        .collect::<String>();
    let mut dispatcher = Dispatcher::new(backend, SidecarConfig::default());
    let mut out: Vec<u8> = Vec::new();
    run_loop(&mut dispatcher, input.as_bytes(), &mut out)
        .await
        .unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// Two-sample s16le PCM fixture, decoded as mono 16 kHz.
fn pcm_fixture() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::with_suffix(".pcm").unwrap();
    file.write_all(&[0x00, 0x40, 0x00, 0xC0]).unwrap();
    file
}

#[tokio::test]
async fn full_text_session() {
    let (backend, script) = scripted();
    script.push_reply(r#"Here you go: ["rust", "sidecars"]"#);
    script.push_reply("A short summary.");
    script.push_reply("Hello back!");

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/qwen3-4b"}),
            json!({"command": "generate-tags", "content": "an article about rust sidecars"}),
            json!({"command": "summarize", "content": "long text"}),
            json!({"command": "chat", "messages": [{"role": "user", "content": "hi"}]}),
            json!({"command": "model-info"}),
            json!({"command": "shutdown"}),
        ],
    )
    .await;

    assert_eq!(replies.len(), 6);
    assert_eq!(replies[0]["model_name"], "qwen3-4b");
    assert_eq!(replies[0]["capabilities"], json!(["text"]));
    assert_eq!(replies[1]["tags"], json!(["rust", "sidecars"]));
    assert_eq!(replies[2]["summary"], "A short summary.");
    assert_eq!(replies[3]["response"], "Hello back!");
    assert_eq!(replies[4]["model_name"], "qwen3-4b");
    assert_eq!(replies[4]["param_count"], 2_000_000_000u64);
    assert_eq!(replies[5]["success"], true);
}

#[tokio::test]
async fn malformed_and_unknown_lines_keep_the_loop_alive() {
    let (backend, _) = scripted();
    let input = "{broken\n{\"command\": \"frobnicate\"}\n{\"command\": \"check-availability\"}\n";
    let mut dispatcher = Dispatcher::new(backend, SidecarConfig::default());
    let mut out: Vec<u8> = Vec::new();
    run_loop(&mut dispatcher, input.as_bytes(), &mut out)
        .await
        .unwrap();
    let replies: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(replies.len(), 3);
    assert!(replies[0]["error"].as_str().unwrap().starts_with("Invalid JSON:"));
    assert_eq!(replies[1]["error"], "Unknown command: frobnicate");
    assert_eq!(replies[2]["available"], true);
}

#[tokio::test]
async fn gating_before_and_after_text_load() {
    let (backend, _) = scripted();
    let replies = run_session(
        backend,
        &[
            json!({"command": "summarize", "content": "x"}),
            json!({"command": "load-model", "model_path": "/models/text-only", "capabilities": ["text"]}),
            json!({"command": "generate-transcript", "audio_path": "/tmp/a.wav"}),
            json!({"command": "copilot-analyze", "audio_path": "/tmp/a.wav"}),
        ],
    )
    .await;

    assert_eq!(replies[0]["error"], "No model loaded");
    assert_eq!(replies[1]["type"], "response");
    assert_eq!(
        replies[2]["error"],
        "Loaded model does not support audio transcription"
    );
    assert_eq!(replies[3]["error"], "Model does not support audio analysis");
}

#[tokio::test]
async fn failed_audio_load_leaves_prior_session_serving() {
    let script = Arc::new(Script {
        multimodal_error: Some("no multimodal backend".to_owned()),
        ..Script::default()
    });
    script.push_reply("still here");
    let backend = ScriptedBackend {
        script: script.clone(),
    };

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/text"}),
            json!({"command": "load-model", "model_path": "/models/omni", "capabilities": ["audio", "text"]}),
            json!({"command": "summarize", "content": "x"}),
        ],
    )
    .await;

    assert_eq!(replies[0]["type"], "response");
    assert_eq!(replies[1]["type"], "error");
    assert!(replies[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to load model:"));
    assert_eq!(replies[2]["summary"], "still here");
}

#[tokio::test]
async fn copilot_cycles_thread_context_through_the_caller() {
    let (backend, script) = scripted();
    script.push_reply(r#"{"updated_summary": "cycle one", "key_points": ["kickoff"]}"#);
    script.push_reply(r#"{"updated_summary": "cycle two"}"#);
    let audio = pcm_fixture();
    let path = audio.path().to_string_lossy().into_owned();

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/omni", "capabilities": ["audio", "text"]}),
            json!({"command": "copilot-analyze", "audio_path": path, "context": ""}),
            json!({"command": "copilot-analyze", "audio_path": path, "context": "cycle one"}),
        ],
    )
    .await;

    assert_eq!(replies[1]["updated_summary"], "cycle one");
    assert_eq!(replies[1]["key_points"], json!(["kickoff"]));
    assert_eq!(replies[2]["updated_summary"], "cycle two");

    // Cycle 1 used the initial template, cycle 2 embedded the prior summary.
    let prompts = script.prompts.lock().unwrap();
    assert!(prompts[0].starts_with("This is the start of a conversation."));
    assert!(prompts[1].starts_with("Previous conversation summary:\ncycle one"));
    assert_eq!(script.resets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_audio_passthrough_skips_the_backend() {
    let (backend, script) = scripted();
    let empty = tempfile::NamedTempFile::with_suffix(".pcm").unwrap();
    let path = empty.path().to_string_lossy().into_owned();

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/omni", "capabilities": ["audio"]}),
            json!({"command": "copilot-analyze", "audio_path": path, "context": "X"}),
            json!({"command": "generate-transcript", "audio_path": path}),
        ],
    )
    .await;

    assert_eq!(replies[1]["updated_summary"], "X");
    assert_eq!(replies[1]["decisions"], json!([]));
    assert_eq!(replies[2]["language"], "unknown");
    assert_eq!(replies[2]["transcript"], "");
    assert_eq!(script.audio_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transcript_degrades_on_non_json_model_output() {
    let (backend, script) = scripted();
    script.push_reply("I heard someone say hello.");
    let audio = pcm_fixture();
    let path = audio.path().to_string_lossy().into_owned();

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/omni", "capabilities": ["audio"]}),
            json!({"command": "generate-transcript", "audio_path": path}),
        ],
    )
    .await;

    assert_eq!(replies[1]["type"], "response");
    assert_eq!(replies[1]["language"], "unknown");
    assert_eq!(replies[1]["transcript"], "I heard someone say hello.");
}

#[tokio::test]
async fn tag_extraction_falls_back_on_bare_lists() {
    let (backend, script) = scripted();
    script.push_reply("rust, audio, sidecar");

    let replies = run_session(
        backend,
        &[
            json!({"command": "load-model", "model_path": "/models/text"}),
            json!({"command": "generate-tags", "content": "stuff"}),
        ],
    )
    .await;

    assert_eq!(replies[1]["tags"], json!(["rust", "audio", "sidecar"]));
}

#[tokio::test]
async fn check_availability_is_idempotent_and_stateless() {
    let (backend, _) = scripted();
    let replies = run_session(
        backend,
        &[
            json!({"command": "check-availability"}),
            json!({"command": "check-availability"}),
            json!({"command": "model-info"}),
        ],
    )
    .await;

    assert_eq!(replies[0]["available"], true);
    assert_eq!(replies[1]["available"], true);
    // Probing never loaded anything.
    assert_eq!(replies[2]["error"], "No model loaded");
}

struct PanickingModel;

#[async_trait]
impl LoadedModel for PanickingModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        panic!("handler blew up");
    }

    async fn generate_with_audio(
        &self,
        _request: &GenerationRequest,
        _samples: &[f32],
    ) -> Result<String> {
        panic!("handler blew up");
    }

    fn reset_scratch(&self) {}

    fn param_count_estimate(&self) -> u64 {
        0
    }
}

struct PanickingBackend;

#[async_trait]
impl InferenceBackend for PanickingBackend {
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn load_text(&self, _model_path: &str) -> Result<Box<dyn LoadedModel>> {
        Ok(Box::new(PanickingModel))
    }

    async fn load_multimodal(&self, _model_path: &str) -> Result<Box<dyn LoadedModel>> {
        Ok(Box::new(PanickingModel))
    }
}

#[tokio::test]
async fn panicking_handler_becomes_error_reply_and_loop_survives() {
    let input = concat!(
        "{\"command\": \"load-model\", \"model_path\": \"/models/text\"}\n",
        "{\"command\": \"summarize\", \"content\": \"boom\"}\n",
        "{\"command\": \"check-availability\"}\n",
    );
    let mut dispatcher = Dispatcher::new(PanickingBackend, SidecarConfig::default());
    let mut out: Vec<u8> = Vec::new();
    run_loop(&mut dispatcher, input.as_bytes(), &mut out)
        .await
        .unwrap();
    let replies: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["type"], "response");
    assert_eq!(replies[1]["type"], "error");
    assert!(replies[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("Internal fault:"));
    assert_eq!(replies[1]["trace"], "handler blew up");
    // The loop is still alive after the fault.
    assert_eq!(replies[2]["available"], true);
}

#[tokio::test]
async fn shutdown_stops_processing_buffered_commands() {
    let (backend, _) = scripted();
    let replies = run_session(
        backend,
        &[
            json!({"command": "shutdown"}),
            json!({"command": "check-availability"}),
        ],
    )
    .await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["command"], "shutdown");
}
