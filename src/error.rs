use thiserror::Error;

/// Library-level error type. One variant per error kind in the design doc;
/// each carries the structured context callers need to render a useful
/// message or decide whether to retry.
#[derive(Error, Debug)]
pub enum SxError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("configuration on source and destination disagree: {0}")]
    ConfigMismatch(String),

    #[error("retention expression error at position {position} (near \"{token}\"): {message}")]
    RetentionParse {
        message: String,
        token: String,
        position: usize,
    },

    #[error("command failed on {endpoint}: {argv:?} exited with status {exit_code}: {stderr_tail}")]
    Endpoint {
        endpoint: String,
        argv: Vec<String>,
        exit_code: i32,
        stderr_tail: String,
    },

    #[error("filesystem operation failed: {0}")]
    Filesystem(String),

    #[error("transfer failed in stage \"{stage}\" with exit code {exit_code}")]
    Transfer { stage: String, exit_code: i32 },

    #[error("snapshot name collision: {0}")]
    NameCollision(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

pub type Result<T> = std::result::Result<T, SxError>;

impl SxError {
    /// Process exit code this error should surface as, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            SxError::Interrupted => 130,
            _ => 1,
        }
    }

    /// Bound a captured stderr blob to a reasonable tail for error messages.
    pub fn bounded_tail(raw: &[u8], max_bytes: usize) -> String {
        let text = String::from_utf8_lossy(raw);
        if text.len() <= max_bytes {
            text.into_owned()
        } else {
            let start = text.len() - max_bytes;
            // avoid splitting a multi-byte char
            let start = (start..text.len())
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(text.len());
            format!("...{}", &text[start..])
        }
    }
}
