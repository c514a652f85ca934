//! Maps a backend JSON response envelope (`{ok, code, message, appdata}`)
//! and raw transport-level HTTP status codes to the typed error taxonomy,
//! following the table in design §4.2.

use crate::error::{AccessError, AndromedaError, AuthError, FsError, ProtocolError, TransportError};

/// Classifies a non-2xx HTTP status returned directly by a [`crate::runner::Runner`]
/// (before any JSON body is even parsed), per design §4.1's Runner error table.
pub fn classify_transport_status(status: u16) -> AndromedaError {
    match status {
        403 => AndromedaError::Access(AccessError::Denied(format!("HTTP {status}"))),
        404 => AndromedaError::Fs(FsError::NotFound),
        other => AndromedaError::Transport(TransportError::Endpoint { status: other }),
    }
}

/// Classifies a parsed `{ok:false, code, message}` envelope into the most
/// specific error subtype, per the table in design §4.2.
pub fn classify_api_error(code: i64, message: &str) -> AndromedaError {
    match code {
        400 if message.contains("FILESYSTEM_MISMATCH") || message.contains("STORAGE_FOLDERS_UNSUPPORTED") => {
            AndromedaError::Fs(FsError::Unsupported)
        }
        400 if message.contains("ACCOUNT_CRYPTO_NOT_UNLOCKED") => {
            AndromedaError::Access(AccessError::Denied(message.to_string()))
        }
        403 if message.contains("AUTHENTICATION_FAILED") => AndromedaError::Auth(AuthError::Failed),
        403 if message.contains("TWOFACTOR_REQUIRED") => AndromedaError::Auth(AuthError::TwoFactorRequired),
        403 if message.contains("READ_ONLY_DATABASE") || message.contains("READ_ONLY_FILESYSTEM") => {
            AndromedaError::Access(AccessError::ReadOnly(message.to_string()))
        }
        403 => AndromedaError::Access(AccessError::Denied(message.to_string())),
        404 => AndromedaError::Fs(FsError::NotFound),
        other => AndromedaError::Fs(FsError::Api {
            code: other,
            message: message.to_string(),
        }),
    }
}

/// Parses the standard Andromeda JSON envelope, returning `appdata` on
/// `ok: true` and the classified error otherwise.
pub fn parse_envelope(body: &[u8]) -> Result<serde_json::Value, AndromedaError> {
    let parsed: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AndromedaError::Protocol(ProtocolError::MalformedJson(e.to_string())))?;

    let ok = parsed
        .get("ok")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("ok".to_string())))?;

    if ok {
        Ok(parsed.get("appdata").cloned().unwrap_or(serde_json::Value::Null))
    } else {
        let code = parsed
            .get("code")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("code".to_string())))?;
        let message = parsed.get("message").and_then(|v| v.as_str()).unwrap_or("");
        Err(classify_api_error(code, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_factor_required_is_auth_error() {
        let body = br#"{"ok":false,"code":403,"message":"TWOFACTOR_REQUIRED"}"#;
        match parse_envelope(body) {
            Err(AndromedaError::Auth(AuthError::TwoFactorRequired)) => {}
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn not_found_maps_by_code_alone() {
        let body = br#"{"ok":false,"code":404,"message":"whatever"}"#;
        match parse_envelope(body) {
            Err(AndromedaError::Fs(FsError::NotFound)) => {}
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn read_only_filesystem_maps_to_access_error() {
        let body = br#"{"ok":false,"code":403,"message":"READ_ONLY_FILESYSTEM"}"#;
        match parse_envelope(body) {
            Err(AndromedaError::Access(AccessError::ReadOnly(_))) => {}
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn success_returns_appdata() {
        let body = br#"{"ok":true,"code":200,"appdata":{"id":"abc"}}"#;
        let data = parse_envelope(body).unwrap();
        assert_eq!(data["id"], "abc");
    }
}
