//! One authenticated session against the Andromeda API server.
//!
//! `BackendSession` owns the session/auth state and turns typed method calls
//! into [`crate::runner::Input`] calls dispatched through a
//! [`crate::runner::Runner`], classifying every response with
//! [`classify::parse_envelope`]. Grounded in
//! `original_source/src/lib/andromeda/Backend.hpp`: every `Backend::*` method
//! there has a corresponding method here, modulo the C++ file's additional
//! metadata-database bookkeeping (out of scope, design §1).

pub mod classify;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::CacheMode;
use crate::error::{AndromedaError, AuthError, ProtocolError, TransportError};
use crate::runner::{Input, InputFile, Runner};

/// Size of each chunk handed to a `ReadFile` sink callback. Chosen small
/// enough that a single backend read routinely spans several chunks,
/// exercising the page-reassembly logic in [`crate::filedata::page_backend`]
/// even against a backend that has no fragmentation of its own.
const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    session_key: Option<String>,
    username: Option<String>,
    account_id: Option<String>,
    created_session: bool,
}

/// One session against the backend API. Cheap to clone (wraps an `Arc`
/// internally via its `Runner`); the session/auth state is shared behind a
/// lock so concurrent calls can all see the same credentials.
pub struct BackendSession {
    runner: Arc<dyn Runner>,
    app: String,
    cache_mode: CacheMode,
    state: Mutex<SessionState>,
}

impl BackendSession {
    pub fn new(runner: Arc<dyn Runner>, app: impl Into<String>, cache_mode: CacheMode) -> Self {
        Self {
            runner,
            app: app.into(),
            cache_mode,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Injects session credentials into every outgoing call: the session
    /// id/key pair if one is established, else a `auth_sudouser` fallback
    /// naming a stored username (design §4.2 "Injection").
    fn input(&self, action: &str) -> Input {
        let mut input = Input::new(self.app.clone(), action);
        let state = self.state.lock();
        if let (Some(id), Some(key)) = (&state.session_id, &state.session_key) {
            input = input.with_param("auth_sessionid", id.clone()).with_param("auth_sessionkey", key.clone());
        } else if let Some(username) = &state.username {
            input = input.with_param("auth_sudouser", username.clone());
        }
        input
    }

    async fn call(&self, input: Input) -> Result<Value, AndromedaError> {
        let body = match self.runner.run(input).await {
            Ok(body) => body,
            // A raw HTTP-layer status (no JSON envelope to parse at all)
            // still gets the same access/not-found classification an
            // envelope-level failure would, instead of falling through to
            // the generic transport-error EIO mapping.
            Err(TransportError::Endpoint { status }) => return Err(classify::classify_transport_status(status)),
            Err(e) => return Err(e.into()),
        };
        classify::parse_envelope(&body)
    }

    fn is_mutating(action: &str) -> bool {
        matches!(
            action,
            "createfile"
                | "createfolder"
                | "uploadfile"
                | "deletefile"
                | "deletefolder"
                | "renamefile"
                | "renamefolder"
                | "movefile"
                | "movefolder"
                | "writefile"
                | "truncatefile"
        )
    }

    /// Dispatches a mutating call, or — in [`CacheMode::Memory`] — returns a
    /// synthesized success envelope without touching the runner at all. This
    /// is the hook the test harness uses to exercise the item tree and page
    /// cache without a live backend (design §4.2 "Memory mode").
    async fn call_mutating(&self, action: &str, input: Input, synthetic: Value) -> Result<Value, AndromedaError> {
        debug_assert!(Self::is_mutating(action));
        if self.cache_mode == CacheMode::Memory {
            return Ok(synthetic);
        }
        self.call(input).await
    }

    /// Authenticates with username/password, optionally supplying a
    /// two-factor code up front. On success stores the session id/key for
    /// subsequent calls.
    pub async fn authenticate(&self, username: &str, password: &str, twofactor: Option<&str>) -> Result<(), AndromedaError> {
        let mut input = self
            .input("authenticate")
            .with_param("username", username)
            .with_param("password", password);
        if let Some(code) = twofactor {
            input = input.with_param("auth_twofactor", code);
        }
        let data = self.call(input).await?;
        let session_id = data
            .get("client")
            .and_then(|c| c.get("session").and_then(|s| s.get("id")))
            .and_then(|v| v.as_str())
            .ok_or(AndromedaError::Auth(AuthError::Failed))?
            .to_string();
        let session_key = data
            .get("client")
            .and_then(|c| c.get("session").and_then(|s| s.get("authkey")))
            .and_then(|v| v.as_str())
            .ok_or(AndromedaError::Auth(AuthError::Failed))?
            .to_string();
        let account_id = data.get("account").and_then(|a| a.get("id")).and_then(|v| v.as_str()).map(|s| s.to_string());

        let mut state = self.state.lock();
        state.session_id = Some(session_id);
        state.session_key = Some(session_key);
        state.username = Some(username.to_string());
        state.account_id = account_id;
        state.created_session = true;
        Ok(())
    }

    /// Adopts an already-established session id/key pair instead of logging
    /// in fresh (`--sessionid`/`--sessionkey`, design §6), then fetches the
    /// account the session belongs to to learn its username/account id.
    pub async fn pre_authenticate(&self, session_id: impl Into<String>, session_key: impl Into<String>) -> Result<(), AndromedaError> {
        {
            let mut state = self.state.lock();
            state.session_id = Some(session_id.into());
            state.session_key = Some(session_key.into());
            state.created_session = false;
        }

        let data = self.call(self.input("getaccount")).await?;
        let account_id = data
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("id".to_string())))?
            .to_string();
        let username = data
            .get("username")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("username".to_string())))?
            .to_string();

        let mut state = self.state.lock();
        state.account_id = Some(account_id);
        state.username = Some(username);
        Ok(())
    }

    /// Closes a session this instance itself created via [`Self::authenticate`].
    /// A no-op for pre-authenticated (adopted) sessions, mirroring the
    /// original's refusal to log out credentials it did not establish.
    pub async fn close_session(&self) -> Result<(), AndromedaError> {
        let should_close = self.state.lock().created_session;
        if !should_close {
            return Ok(());
        }
        self.call(self.input("deleteclient")).await?;
        let mut state = self.state.lock();
        state.session_id = None;
        state.session_key = None;
        state.created_session = false;
        Ok(())
    }

    pub async fn get_config(&self) -> Result<Value, AndromedaError> {
        self.call(self.input("getconfig")).await
    }

    pub async fn get_account_limits(&self) -> Result<Value, AndromedaError> {
        self.call(self.input("getlimits")).await
    }

    pub async fn get_filesystem(&self, fsid: Option<&str>) -> Result<Value, AndromedaError> {
        let mut input = self.input("getfilesystem");
        if let Some(id) = fsid {
            input = input.with_param("filesystem", id);
        }
        self.call(input).await
    }

    pub async fn get_filesystems(&self) -> Result<Value, AndromedaError> {
        self.call(self.input("getfilesystems")).await
    }

    pub async fn get_adopted(&self) -> Result<Value, AndromedaError> {
        self.call(self.input("listadopted")).await
    }

    /// Lists the contents of a folder (`None` means the filesystem root).
    pub async fn get_folder(&self, folder_id: Option<&str>) -> Result<Value, AndromedaError> {
        let mut input = self.input("getfolder");
        if let Some(id) = folder_id {
            input = input.with_param("folder", id);
        }
        self.call(input).await
    }

    /// Fetches a filesystem's root folder listing by filesystem id. Same
    /// wire action as [`Self::get_folder`], keyed by `filesystem` instead
    /// of `folder`, used to bootstrap each child of a `Filesystems` listing.
    pub async fn get_fsroot(&self, fsid: &str) -> Result<Value, AndromedaError> {
        let input = self.input("getfolder").with_param("filesystem", fsid);
        self.call(input).await
    }

    pub async fn create_file(&self, parent_id: &str, name: &str) -> Result<Value, AndromedaError> {
        let input = self.input("createfile").with_param("parent", parent_id).with_param("name", name);
        self.call_mutating("createfile", input, json!({"id": format!("new-{name}"), "size": 0})).await
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Value, AndromedaError> {
        let input = self.input("createfolder").with_param("parent", parent_id).with_param("name", name);
        self.call_mutating("createfolder", input, json!({"id": format!("new-{name}")})).await
    }

    /// Uploads an entire small file in one call (used for the first flush of
    /// a file created at a nonzero index, and for backends whose write mode
    /// forbids incremental `WriteFile`).
    pub async fn upload_file(&self, parent_id: &str, name: &str, bytes: Vec<u8>) -> Result<Value, AndromedaError> {
        let size = bytes.len() as u64;
        let input = self
            .input("uploadfile")
            .with_param("parent", parent_id)
            .with_param("name", name)
            .with_file("file", InputFile { name: name.to_string(), bytes });
        self.call_mutating("uploadfile", input, json!({"id": format!("new-{name}"), "size": size})).await
    }

    /// Writes `data` starting at `offset` into an existing file.
    pub async fn write_file(&self, file_id: &str, offset: u64, data: Vec<u8>) -> Result<Value, AndromedaError> {
        let size = data.len() as u64;
        let input = self
            .input("writefile")
            .with_param("file", file_id)
            .with_param("offset", offset.to_string())
            .with_file("data", InputFile { name: "data".to_string(), bytes: data });
        self.call_mutating("writefile", input, json!({"bytes": size})).await
    }

    pub async fn truncate_file(&self, file_id: &str, size: u64) -> Result<Value, AndromedaError> {
        let input = self.input("truncatefile").with_param("file", file_id).with_param("size", size.to_string());
        self.call_mutating("truncatefile", input, json!({"size": size})).await
    }

    /// Reads `length` bytes starting at `offset`, feeding fixed-size chunks
    /// to `sink` as they become available. Returns the total bytes sunk.
    ///
    /// The original streams fragments straight off the HTTP response body;
    /// here the whole body is buffered by the [`Runner`] first and then
    /// re-chunked, so the fragment boundaries `sink` sees are an artifact of
    /// [`READ_CHUNK_BYTES`] rather than the wire, but the reassembly
    /// contract downstream (in [`crate::filedata::page_backend`]) is the
    /// same either way.
    pub async fn read_file<F: FnMut(u64, &[u8])>(&self, file_id: &str, offset: u64, length: u64, mut sink: F) -> Result<u64, AndromedaError> {
        if length == 0 {
            return Ok(0);
        }
        let input = self
            .input("readfile")
            .with_param("file", file_id)
            .with_param("offset", offset.to_string())
            .with_param("length", length.to_string());
        let body = self.runner.run(input).await?;
        let mut sunk = 0u64;
        for chunk in body.chunks(READ_CHUNK_BYTES) {
            sink(offset + sunk, chunk);
            sunk += chunk.len() as u64;
        }
        Ok(sunk)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), AndromedaError> {
        let input = self.input("deletefile").with_param("file", file_id);
        self.call_mutating("deletefile", input, json!({})).await?;
        Ok(())
    }

    pub async fn delete_folder(&self, folder_id: &str) -> Result<(), AndromedaError> {
        let input = self.input("deletefolder").with_param("folder", folder_id);
        self.call_mutating("deletefolder", input, json!({})).await?;
        Ok(())
    }

    pub async fn rename_file(&self, file_id: &str, name: &str, overwrite: bool) -> Result<Value, AndromedaError> {
        let input = self
            .input("renamefile")
            .with_param("file", file_id)
            .with_param("name", name)
            .with_param("overwrite", overwrite.to_string());
        self.call_mutating("renamefile", input, json!({"name": name})).await
    }

    pub async fn rename_folder(&self, folder_id: &str, name: &str, overwrite: bool) -> Result<Value, AndromedaError> {
        let input = self
            .input("renamefolder")
            .with_param("folder", folder_id)
            .with_param("name", name)
            .with_param("overwrite", overwrite.to_string());
        self.call_mutating("renamefolder", input, json!({"name": name})).await
    }

    pub async fn move_file(&self, file_id: &str, parent_id: &str, overwrite: bool) -> Result<Value, AndromedaError> {
        let input = self
            .input("movefile")
            .with_param("file", file_id)
            .with_param("parent", parent_id)
            .with_param("overwrite", overwrite.to_string());
        self.call_mutating("movefile", input, json!({"parent": parent_id})).await
    }

    pub async fn move_folder(&self, folder_id: &str, parent_id: &str, overwrite: bool) -> Result<Value, AndromedaError> {
        let input = self
            .input("movefolder")
            .with_param("folder", folder_id)
            .with_param("parent", parent_id)
            .with_param("overwrite", overwrite.to_string());
        self.call_mutating("movefolder", input, json!({"parent": parent_id})).await
    }
}
