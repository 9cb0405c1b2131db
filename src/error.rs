use thiserror::Error;

/// Error taxonomy for the dictionary-compression core.
///
/// Hot-path errors never propagate to other requests: compress failures fall
/// back to storing the value uncompressed, decompress failures are surfaced
/// to the caller for the item to be discarded. Background-thread errors
/// (trainer, GC, sampler) are logged rate-limited and counted, never panic.
#[derive(Error, Debug, Clone)]
pub enum DcError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("codec error (code {0})")]
    CodecError(i32),

    #[error("unknown dictionary id {0}")]
    UnknownDict(u16),

    #[error("out of memory")]
    Oom,

    #[error("io error: {0}")]
    Io(String),

    #[error("no dictionary id available (all 1..65535 in use or quarantined)")]
    IdExhaustion,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl From<std::io::Error> for DcError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::OutOfMemory {
            DcError::Oom
        } else {
            DcError::Io(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DcError>;

/// Reason a value bypassed dictionary compression. Not an error: callers
/// record it as a counter and store the value uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BelowMin,
    AboveMax,
    Incompressible,
    Disabled,
}
