use std::fmt::Display;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type used throughout sluice
pub type Result<T> = ::std::result::Result<T, Error>;

/// Number of leading bytes of a malformed row kept for diagnostics
const FRAGMENT_LEN: usize = 32;

/// Errors raised while wiring or running an instruction set
#[derive(Debug, Error)]
pub enum Error {
    /// Pipe, socket or process I/O failure
    #[error("i/o error: {0}")]
    Io(io::Error),

    /// Malformed row bytes
    #[error("failed to decode row ({reason}): {fragment:?}")]
    Decode {
        /// What the decoder rejected
        reason: String,
        /// Leading bytes of the offending row
        fragment: Vec<u8>,
    },

    /// A row could not be serialized
    #[error("failed to encode row: {0}")]
    Encode(String),

    /// The instruction set cannot be executed as declared
    #[error("invalid instruction {instruction}: {reason}")]
    Config {
        /// Name of the offending instruction
        instruction: String,
        /// Why it cannot run
        reason: String,
    },

    /// Connecting to a shard location failed
    #[error("failed to dial {address} for shard {shard}: {source}")]
    Dial {
        /// Address dialed
        address: String,
        /// Shard the connection was for
        shard: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// An external process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// An external process exited unsuccessfully
    #[error("`{command}` exited with {status}")]
    Process {
        /// Command line
        command: String,
        /// Exit status reported by the process
        status: ExitStatus,
    },

    /// A sibling task failed and the pipeline is shutting down
    #[error("pipeline cancelled")]
    Cancelled,

    /// Failure of one instruction, tagged with its name
    #[error("{instruction} failed: {source}")]
    Instruction {
        /// Instruction or dial task name
        instruction: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// Options or instruction sets that are not valid json
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a decode error carrying a truncated copy of the offending bytes.
    pub fn decode<E: Display>(reason: E, data: &[u8]) -> Self {
        let end = data.len().min(FRAGMENT_LEN);
        Error::Decode {
            reason: reason.to_string(),
            fragment: data[..end].to_vec(),
        }
    }

    /// Builds a configuration error for the named instruction.
    pub fn config<S: Into<String>>(instruction: &str, reason: S) -> Self {
        Error::Config {
            instruction: instruction.to_owned(),
            reason: reason.into(),
        }
    }

    /// True when this error only reflects the cancellation of the pipeline.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Instruction { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let cancelled = e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<Error>())
            .map(|inner| inner.is_cancelled())
            .unwrap_or(false);

        if cancelled {
            Error::Cancelled
        } else {
            Error::Io(e)
        }
    }
}

/// io::Error used by pipes once the pipeline has been cancelled
pub(crate) fn cancelled_io() -> io::Error {
    io::Error::new(io::ErrorKind::Other, Error::Cancelled)
}
