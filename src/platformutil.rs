//! Platform shims, grounded in `original_source/src/lib/andromeda/PlatformUtil.{hpp,cpp}`.
//!
//! Kept deliberately small: the bulk of `PlatformUtil.cpp` deals with
//! interactive terminal/password-prompt handling for the CLI front-end,
//! which is out of scope here (design §1). What the engine itself needs is
//! the calling process's uid/gid (used to stamp freshly created items) and
//! the current time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the (uid, gid) of the current process, used to stamp attributes
/// on items the engine creates locally before the backend assigns real
/// ownership metadata.
pub fn current_uid_gid() -> (u32, u32) {
    // SAFETY: getuid/getgid take no arguments and cannot fail.
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// Seconds since the Unix epoch, saturating to zero if the clock is somehow
/// before it.
pub fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_gid_are_readable() {
        let (uid, gid) = current_uid_gid();
        // No assertion on specific values (depends on the environment the
        // test runs as) — just that the call doesn't panic and returns.
        let _ = (uid, gid);
    }

    #[test]
    fn unix_time_is_plausible() {
        // Any time after 2020-01-01.
        assert!(unix_time_now() > 1_577_836_800);
    }
}
