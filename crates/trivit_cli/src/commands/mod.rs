//! CLI command implementations.

pub mod decode;
pub mod simulate;

use thiserror::Error;
use trivit_sync_protocol::MessageKind;

/// Errors raised by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Output format other than `text` or `json`.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),

    /// Hex input with odd length or non-hex characters.
    #[error("input is not valid hex")]
    InvalidHex,

    /// A scenario step that cannot be carried out.
    #[error("scenario step {step}: {reason}")]
    Scenario {
        /// Zero-based step index.
        step: usize,
        /// What went wrong.
        reason: String,
    },
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a `--format` argument.
    pub fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Wire names of every message kind.
pub fn supported_messages() -> Vec<&'static str> {
    MessageKind::ALL.iter().map(MessageKind::wire_name).collect()
}
