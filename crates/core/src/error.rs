//! Error surface of the shard search core.
//!
//! Construction errors (bad regex, too-short patterns, unknown languages) fail
//! the call before any document is visited; shard read errors propagate from
//! the content provider. Cancellation and bound-exceeded are normal
//! termination paths and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The query contained a regular expression that does not parse or compile.
    #[error("invalid regex `{pattern}`: {message}")]
    Regex { pattern: String, message: String },

    /// A content substring atom shorter than the trigram width cannot bind to
    /// the posting lists.
    #[error("pattern `{0}` is shorter than the trigram width")]
    PatternTooShort(String),

    /// A language atom survived simplification but the shard has no byte
    /// assigned for it.
    #[error("unknown language `{0}`")]
    UnknownLanguage(String),

    /// The underlying shard reader failed.
    #[error("shard read failed: {0}")]
    Shard(String),
}

pub type Result<T> = std::result::Result<T, Error>;
