//! Error taxonomy for the Andromeda client engine.
//!
//! Every fallible operation in this crate returns `Result<T, AndromedaError>`.
//! The variants mirror the semantic kinds in the design's error-handling
//! section: transport, protocol, auth, access, filesystem and resource
//! errors each get their own leaf enum so call sites can match narrowly,
//! and `AndromedaError` aggregates them for the top-level `Result`.

use thiserror::Error;

/// Configuration and CLI-usage errors. User-visible.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("missing required option: {0}")]
    MissingOption(String),
    #[error("bad value for option {option}: {value}")]
    BadValue { option: String, value: String },
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by a [`crate::runner::Runner`] while transporting one API call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("endpoint returned HTTP {status}")]
    Endpoint { status: u16 },
    #[error("subprocess exited with status {0}")]
    NonZeroExit(i32),
    #[error("invalid runner usage: {0}")]
    InvalidUsage(String),
}

/// Errors raised while interpreting a backend JSON response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON response: {0}")]
    MalformedJson(String),
    #[error("response missing required field: {0}")]
    MissingField(String),
    #[error("read size mismatch: wanted {wanted}, got {got}")]
    ReadSize { wanted: u64, got: u64 },
}

/// Authentication-flow errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Required,
    #[error("authentication failed")]
    Failed,
    #[error("two-factor authentication code required")]
    TwoFactorRequired,
}

/// Access-control errors, mapped at the host bridge to EACCES/EROFS.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access denied: {0}")]
    Denied(String),
    #[error("read-only: {0}")]
    ReadOnly(String),
}

/// Filesystem-semantic errors, mapped at the host bridge to POSIX errno.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("not a file")]
    NotFile,
    #[error("not a folder")]
    NotFolder,
    #[error("duplicate item")]
    DuplicateItem,
    #[error("write type unsupported")]
    WriteType,
    #[error("modification of this item is not permitted")]
    Modify,
    #[error("cannot delete the mount root")]
    DeleteRoot,
    #[error("item is in use and cannot be removed from the tree right now")]
    ItemBusy,
    #[error("backend error code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("operation is unsupported by this backend")]
    Unsupported,
}

/// Cache-capacity errors. Raising one of these indicates eviction failed to
/// keep up; it is always a logic error, never an expected outcome.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("page cache capacity exceeded for file")]
    PageCacheExhausted,
}

/// Top-level error type returned by the engine's public API.
#[derive(Debug, Error)]
pub enum AndromedaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

pub type Result<T> = std::result::Result<T, AndromedaError>;

impl AndromedaError {
    /// Maps this error to the POSIX errno the host bridge should return to
    /// the kernel. Lives here (rather than in the bridge binary) only as a
    /// convenience default; a bridge is free to special-case further.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            AndromedaError::Config(_) => libc::EINVAL,
            AndromedaError::Transport(TransportError::Connection(_))
            | AndromedaError::Transport(TransportError::Timeout(_)) => libc::EHOSTUNREACH,
            AndromedaError::Transport(_) => libc::EIO,
            AndromedaError::Protocol(_) => libc::EIO,
            AndromedaError::Auth(_) => libc::EACCES,
            AndromedaError::Access(AccessError::Denied(_)) => libc::EACCES,
            AndromedaError::Access(AccessError::ReadOnly(_)) => libc::EROFS,
            AndromedaError::Fs(FsError::NotFound) => libc::ENOENT,
            AndromedaError::Fs(FsError::NotFile) => libc::ENOTBLK,
            AndromedaError::Fs(FsError::NotFolder) => libc::ENOTDIR,
            AndromedaError::Fs(FsError::DuplicateItem) => libc::EEXIST,
            AndromedaError::Fs(FsError::WriteType) => libc::ENOTSUP,
            AndromedaError::Fs(FsError::Modify) => libc::EPERM,
            AndromedaError::Fs(FsError::DeleteRoot) => libc::EBUSY,
            AndromedaError::Fs(FsError::ItemBusy) => libc::EBUSY,
            AndromedaError::Fs(FsError::Unsupported) => libc::ENOTSUP,
            AndromedaError::Fs(FsError::Api { .. }) => libc::EIO,
            AndromedaError::Resource(_) => libc::ENOMEM,
        }
    }
}
