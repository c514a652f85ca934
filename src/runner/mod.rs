//! Transport of one API call: form input in, opaque response body out.
//!
//! [`Runner`] is the narrow seam between [`crate::backend::BackendSession`]
//! and the outside world. Two implementations are provided: [`http::HttpRunner`]
//! (posts multipart form data over HTTP, with retry) and
//! [`subprocess::SubprocessRunner`] (invokes a local script). Both enforce a
//! configurable timeout and never hold a folder or item lock while awaiting.

pub mod http;
pub mod subprocess;

use std::collections::HashMap;
use std::time::Duration;

use crate::error::TransportError;

/// A single named input file attached to a call (at most one is accepted by
/// the subprocess runner).
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One API call: an `app`/`action` pair, string parameters, and optional
/// file attachments.
#[derive(Debug, Clone, Default)]
pub struct Input {
    pub app: String,
    pub action: String,
    pub params: HashMap<String, String>,
    pub files: HashMap<String, InputFile>,
}

impl Input {
    pub fn new(app: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            action: action.into(),
            params: HashMap::new(),
            files: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, key: impl Into<String>, file: InputFile) -> Self {
        self.files.insert(key.into(), file);
        self
    }
}

/// Transport of one API call. Implementors must not retain any lock across
/// the `await` point inside `run` — callers rely on that to keep folder
/// locks released during network I/O (design §4.6/§5).
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Executes one call and returns the raw response body.
    async fn run(&self, input: Input) -> Result<Vec<u8>, TransportError>;

    /// The configured read/write timeout for this runner.
    fn timeout(&self) -> Duration;
}
