//! Typed errors at each component boundary. Binary-level glue (server
//! `main`, route handlers) keeps using `Box<dyn std::error::Error + Send +
//! Sync>`, matching the teacher's own idiom — this crate only introduces
//! `thiserror` enums where a caller needs to match on the failure kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(#[source] anyhow_free::AnyError),
    #[error("failed to spawn child: {0}")]
    Spawn(#[source] anyhow_free::AnyError),
    #[error("failed to clone pty reader: {0}")]
    CloneReader(#[source] anyhow_free::AnyError),
    #[error("failed to take pty writer: {0}")]
    TakeWriter(#[source] anyhow_free::AnyError),
    #[error("empty shell command")]
    EmptyCommand,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to open recording file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write recording: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to serialize recording metadata: {0}")]
    Metadata(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload envelope truncated")]
    Truncated,
    #[error("unsupported upload tag {0:#x}")]
    UnsupportedTag(u8),
    #[error("filename is empty")]
    EmptyFilename,
    #[error("filename contains a path separator or is otherwise unsafe: {0}")]
    UnsafeFilename(String),
    #[error("upload exceeds the configured size limit")]
    TooLarge,
    #[error("filename is not valid UTF-8")]
    InvalidFilenameEncoding,
    #[error("io error writing upload: {0}")]
    Io(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("cookie is malformed")]
    Malformed,
    #[error("cookie signature does not match")]
    BadSignature,
    #[error("cookie nonce is not valid hex/base64")]
    BadNonce,
}

/// A tiny local shim so `PtyError` variants can wrap `portable_pty`'s boxed
/// `anyhow::Error`-shaped failures without pulling in `anyhow` itself (the
/// teacher never depends on it). `portable_pty`'s public API returns
/// `anyhow::Result`, but we only need `Display`/`Error`, which this
/// newtype provides over the boxed error string.
pub mod anyhow_free {
    use std::fmt;

    #[derive(Debug)]
    pub struct AnyError(pub String);

    impl fmt::Display for AnyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for AnyError {}

    impl AnyError {
        /// Build an `AnyError` from anything `Display`. Not a `From` impl:
        /// a blanket `From<E>` here would collide with the standard
        /// library's reflexive `From<T> for T` once `E = AnyError`.
        pub fn from_err<E: fmt::Display>(e: E) -> Self {
            AnyError(e.to_string())
        }
    }
}
