//! CLI flag table (design §6) and config-file ingestion.
//!
//! This is deliberately thin: the host front-end (argument parsing, help
//! and version emission beyond what `clap` derives for free) is out of
//! scope for the core engine. What we specify here is the flag surface the
//! engine's constructors need filled in, expressed as a `clap::Parser` so
//! the mapping from flags to [`super::Config`]/[`super::FSConfig`]/
//! [`crate::filedata::page_cache::PageCacheOptions`] is mechanical.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use super::CacheMode;

#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheModeArg {
    None,
    Memory,
    Normal,
}

impl From<CacheModeArg> for CacheMode {
    fn from(value: CacheModeArg) -> Self {
        match value {
            CacheModeArg::None => CacheMode::None,
            CacheModeArg::Memory => CacheMode::Memory,
            CacheModeArg::Normal => CacheMode::Normal,
        }
    }
}

/// Which kind of Andromeda object to mount: an entire super-root listing
/// every filesystem, a single filesystem, or a single folder within one.
#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountItemType {
    #[default]
    SuperRoot,
    Filesystem,
    Folder,
}

/// Command-line options, matching the flag table in design §6.
///
/// Unknown flags are rejected by `clap` itself with its standard
/// usage-error exit code (2), matching the design's exit-code table.
#[derive(Debug, Parser, Clone)]
#[command(name = "andromeda-fuse", version, about = "Mount an Andromeda backend as a local filesystem")]
pub struct Options {
    /// Debug level 0..5
    #[arg(short = 'd', long = "debug", default_value_t = 0)]
    pub debug_level: u8,

    /// Remote HTTP endpoint (host/path)
    #[arg(short = 's', long = "apiurl")]
    pub api_url: Option<String>,

    /// Local script endpoint
    #[arg(short = 'p', long = "apipath")]
    pub api_path: Option<String>,

    #[arg(short = 'u', long = "username")]
    pub username: Option<String>,

    #[arg(long = "password")]
    pub password: Option<String>,

    #[arg(long = "sessionid")]
    pub session_id: Option<String>,

    #[arg(long = "sessionkey")]
    pub session_key: Option<String>,

    /// Mount a folder by ID (empty means the default folder)
    #[arg(long = "folder")]
    pub folder: Option<Option<String>>,

    /// Mount a filesystem by ID (empty means the default filesystem)
    #[arg(long = "filesystem")]
    pub filesystem: Option<Option<String>>,

    /// Local mount directory
    #[arg(short = 'm', long = "mount")]
    pub mount: Option<PathBuf>,

    /// Forwarded verbatim to the host kernel bridge
    #[arg(short = 'o', long = "option")]
    pub bridge_options: Vec<String>,

    #[arg(short = 'r', long = "read-only")]
    pub read_only: bool,

    /// Page size, accepts a `K`/`M`/`G`/`T` suffix (default 128K)
    #[arg(long = "pagesize", value_parser = parse_byte_size, default_value = "128K")]
    pub page_size: u64,

    /// Folder refresh TTL in seconds
    #[arg(long = "dir-refresh", default_value_t = 15)]
    pub dir_refresh_secs: u64,

    #[arg(long = "read-ahead")]
    pub read_ahead_ms: Option<u64>,

    #[arg(long = "read-max-cache-frac")]
    pub read_max_cache_frac: Option<u64>,

    #[arg(long = "read-ahead-buffer")]
    pub read_ahead_buffer: Option<u64>,

    #[arg(long = "cachemode", default_value = "normal")]
    pub cache_mode: CacheModeArg,

    /// Parallel runner pool size
    #[arg(long = "backend-runners", default_value_t = 4)]
    pub backend_runners: usize,

    #[arg(long = "max-retries", default_value_t = 0)]
    pub max_retries: u32,

    #[arg(long = "retry-time", default_value_t = 1)]
    pub retry_time_secs: u64,

    #[arg(long = "http-user")]
    pub http_user: Option<String>,

    #[arg(long = "http-pass")]
    pub http_pass: Option<String>,

    #[arg(long = "proxy-host")]
    pub proxy_host: Option<String>,

    #[arg(long = "proxy-port")]
    pub proxy_port: Option<u16>,

    #[arg(long = "hproxy-user")]
    pub hproxy_user: Option<String>,

    #[arg(long = "hproxy-pass")]
    pub hproxy_pass: Option<String>,

    #[arg(long = "no-chmod")]
    pub no_chmod: bool,

    #[arg(long = "no-chown")]
    pub no_chown: bool,

    /// Optional TOML config file; flags above override values loaded from it
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,
}

fn parse_byte_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let (digits, suffix) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let base: u64 = digits.parse().map_err(|_| format!("bad size: {raw}"))?;
    let multiplier = match suffix.to_ascii_uppercase().as_str() {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024u64 * 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix: {other}")),
    };
    Ok(base * multiplier)
}

/// A config-file-ingestible subset of [`Options`], merged under CLI flags
/// (CLI flags always win).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileOptions {
    pub debug_level: Option<u8>,
    pub api_url: Option<String>,
    pub api_path: Option<String>,
    pub username: Option<String>,
    pub mount: Option<PathBuf>,
    pub page_size: Option<u64>,
    pub dir_refresh_secs: Option<u64>,
    pub cache_mode: Option<CacheModeArg>,
    pub backend_runners: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_time_secs: Option<u64>,
}

/// Loads a TOML config file from `path`. Absence of the file is not an
/// error at this layer — callers that require one should check first.
pub fn load_file_options(path: &std::path::Path) -> Result<FileOptions, crate::error::ConfigError> {
    use crate::error::ConfigError;

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_suffixes() {
        assert_eq!(parse_byte_size("128K").unwrap(), 128 * 1024);
        assert_eq!(parse_byte_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
    }

    #[test]
    fn byte_size_rejects_unknown_suffix() {
        assert!(parse_byte_size("128Q").is_err());
    }
}
