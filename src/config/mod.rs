//! Server capabilities and per-filesystem policy.
//!
//! `Config` holds server-wide capabilities loaded once from the backend's
//! config endpoint; `FSConfig` holds the per-filesystem policy derived from
//! the filesystem's storage type and the account's limits (design §3).

pub mod options;

use serde::Deserialize;

/// Server-wide capabilities, as returned by `BackendSession::get_config`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: false,
            version: String::new(),
        }
    }
}

/// The overwrite mode a filesystem supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// No overwrite of existing bytes; only appending a brand new file.
    None,
    /// Writes must start exactly at the file's current end.
    Append,
    /// Arbitrary-offset writes are allowed.
    Random,
}

/// Per-filesystem policy: chunk size, read-only flag, and write mode.
///
/// Derived from the filesystem's storage type (`S3` implies [`WriteMode::None`],
/// `FTP` implies [`WriteMode::Append`]) and then downgraded by the account's
/// reported `randomwrite` feature limit, mirroring the original
/// `FSConfig::FSConfig(data, lims)` constructor exactly.
#[derive(Debug, Clone, Copy)]
pub struct FSConfig {
    chunksize: u64,
    read_only: bool,
    write_mode: WriteMode,
}

impl FSConfig {
    /// Builds an `FSConfig` from the filesystem metadata JSON (`data`) and
    /// the account limits JSON (`lims`), as returned by
    /// `BackendSession::get_filesystem` / `get_account_limits`.
    pub fn from_json(
        data: &serde_json::Value,
        lims: &serde_json::Value,
    ) -> Result<Self, crate::error::ProtocolError> {
        use crate::error::ProtocolError;

        if data.is_null() {
            return Ok(Self {
                chunksize: 0,
                read_only: false,
                write_mode: WriteMode::Random,
            });
        }

        let chunksize = data
            .get("chunksize")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let read_only = data
            .get("readonly")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| ProtocolError::MissingField("readonly".to_string()))?;

        let sttype = data
            .get("sttype")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProtocolError::MissingField("sttype".to_string()))?;

        let mut write_mode = match sttype {
            "S3" => WriteMode::None,
            "FTP" => WriteMode::Append,
            _ => WriteMode::Random,
        };

        if write_mode == WriteMode::Random {
            if let Some(allow_random) = lims
                .get("features")
                .and_then(|f| f.get("randomwrite"))
                .and_then(|v| v.as_bool())
            {
                if !allow_random {
                    write_mode = WriteMode::Append;
                }
            }
        }

        Ok(Self {
            chunksize,
            read_only,
            write_mode,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunksize
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }
}

/// Cache-mode selector (design §4.2 "Memory mode", §6 `--cachemode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    None,
    /// Every mutating backend call is replaced with a synthesized response.
    /// Used by the test harness.
    Memory,
    #[default]
    Normal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s3_storage_forces_write_mode_none() {
        let data = json!({"chunksize": 0, "readonly": false, "sttype": "S3"});
        let lims = json!({});
        let cfg = FSConfig::from_json(&data, &lims).unwrap();
        assert_eq!(cfg.write_mode(), WriteMode::None);
    }

    #[test]
    fn ftp_storage_forces_append() {
        let data = json!({"chunksize": 0, "readonly": false, "sttype": "FTP"});
        let lims = json!({});
        let cfg = FSConfig::from_json(&data, &lims).unwrap();
        assert_eq!(cfg.write_mode(), WriteMode::Append);
    }

    #[test]
    fn random_write_downgraded_by_account_limits() {
        let data = json!({"chunksize": 0, "readonly": false, "sttype": "LOCAL"});
        let lims = json!({"features": {"randomwrite": false}});
        let cfg = FSConfig::from_json(&data, &lims).unwrap();
        assert_eq!(cfg.write_mode(), WriteMode::Append);
    }

    #[test]
    fn random_write_allowed_by_default() {
        let data = json!({"chunksize": 0, "readonly": false, "sttype": "LOCAL"});
        let lims = json!({});
        let cfg = FSConfig::from_json(&data, &lims).unwrap();
        assert_eq!(cfg.write_mode(), WriteMode::Random);
    }
}
