//! Wire types for the sidecar command protocol.
//!
//! One JSON object per line in each direction. Inbound objects carry a
//! `command` discriminator plus command-specific fields; outbound objects
//! carry `type` (`response`, `error`, or `progress`), usually an echo of the
//! originating `command`, and flat result fields. The protocol is strictly
//! half-duplex: one command yields one logical reply (plus zero or more
//! `progress` lines for downloads) before the next command is read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command set understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    CheckAvailability,
    LoadModel,
    GenerateTags,
    Summarize,
    Chat,
    GenerateTranscript,
    CopilotAnalyze,
    DownloadModel,
    ModelInfo,
    Shutdown,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckAvailability => "check-availability",
            Self::LoadModel => "load-model",
            Self::GenerateTags => "generate-tags",
            Self::Summarize => "summarize",
            Self::Chat => "chat",
            Self::GenerateTranscript => "generate-transcript",
            Self::CopilotAnalyze => "copilot-analyze",
            Self::DownloadModel => "download-model",
            Self::ModelInfo => "model-info",
            Self::Shutdown => "shutdown",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "check-availability" => Some(Self::CheckAvailability),
            "load-model" => Some(Self::LoadModel),
            "generate-tags" => Some(Self::GenerateTags),
            "summarize" => Some(Self::Summarize),
            "chat" => Some(Self::Chat),
            "generate-transcript" => Some(Self::GenerateTranscript),
            "copilot-analyze" => Some(Self::CopilotAnalyze),
            "download-model" => Some(Self::DownloadModel),
            "model-info" => Some(Self::ModelInfo),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// One turn of a chat conversation as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A typed inbound command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    CheckAvailability,
    LoadModel {
        model_path: String,
        #[serde(default)]
        capabilities: Option<Vec<String>>,
    },
    GenerateTags {
        content: String,
    },
    Summarize {
        content: String,
    },
    Chat {
        messages: Vec<ChatTurn>,
    },
    GenerateTranscript {
        audio_path: String,
    },
    CopilotAnalyze {
        audio_path: String,
        #[serde(default)]
        context: String,
    },
    DownloadModel {
        repo_id: String,
        destination: String,
    },
    ModelInfo,
    Shutdown,
}

impl Command {
    /// The command's wire name.
    #[must_use]
    pub fn name(&self) -> CommandName {
        match self {
            Self::CheckAvailability => CommandName::CheckAvailability,
            Self::LoadModel { .. } => CommandName::LoadModel,
            Self::GenerateTags { .. } => CommandName::GenerateTags,
            Self::Summarize { .. } => CommandName::Summarize,
            Self::Chat { .. } => CommandName::Chat,
            Self::GenerateTranscript { .. } => CommandName::GenerateTranscript,
            Self::CopilotAnalyze { .. } => CommandName::CopilotAnalyze,
            Self::DownloadModel { .. } => CommandName::DownloadModel,
            Self::ModelInfo => CommandName::ModelInfo,
            Self::Shutdown => CommandName::Shutdown,
        }
    }
}

/// Parse a raw JSON object into a typed [`Command`].
///
/// Unknown command names and missing required fields come back as
/// human-readable messages for an `error` reply; they never panic and never
/// terminate the read loop.
pub fn parse_command(raw: &Value) -> std::result::Result<Command, String> {
    let name = match raw.get("command").and_then(Value::as_str) {
        Some(name) => name,
        None => return Err("Missing command field".to_owned()),
    };
    if CommandName::parse(name).is_none() {
        return Err(format!("Unknown command: {name}"));
    }
    serde_json::from_value(raw.clone()).map_err(|e| format!("Invalid {name} command: {e}"))
}

/// Outbound message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Response,
    Error,
    Progress,
}

/// One outbound line: a flat JSON object with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'static str>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Reply {
    /// Build a success reply for the given command.
    #[must_use]
    pub fn response(command: CommandName) -> Self {
        Self {
            kind: ReplyKind::Response,
            command: Some(command.as_str()),
            fields: Map::new(),
        }
    }

    /// Build an error reply, optionally echoing the originating command.
    #[must_use]
    pub fn error(command: Option<CommandName>, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("error".to_owned(), Value::String(message.into()));
        Self {
            kind: ReplyKind::Error,
            command: command.map(CommandName::as_str),
            fields,
        }
    }

    /// Build an error reply carrying a diagnostic trace.
    ///
    /// The trace is for debugging only and is not part of the stable
    /// contract; it is attached exclusively to catch-all faults.
    #[must_use]
    pub fn error_with_trace(
        command: Option<CommandName>,
        message: impl Into<String>,
        trace: impl Into<String>,
    ) -> Self {
        let mut reply = Self::error(command, message);
        reply
            .fields
            .insert("trace".to_owned(), Value::String(trace.into()));
        reply
    }

    /// Build a progress event for the given command.
    #[must_use]
    pub fn progress(command: CommandName) -> Self {
        Self {
            kind: ReplyKind::Progress,
            command: Some(command.as_str()),
            fields: Map::new(),
        }
    }

    /// Attach a result field.
    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }
}
