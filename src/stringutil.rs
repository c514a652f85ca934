//! Small string helpers shared across the item tree and backend modules.
//!
//! Grounded in `original_source/src/lib/andromeda/StringUtil.{hpp,cpp}`,
//! trimmed to the handful of operations this crate actually needs (path
//! splitting for iterative tree descent, and octal-permission formatting
//! for the filesystem bridge).

/// Splits a `/`-separated relative path into its non-empty components,
/// ignoring any leading, trailing, or duplicated separators.
///
/// ```
/// use andromedafs_core::stringutil::split_path;
/// assert_eq!(split_path("/a//b/c/"), vec!["a", "b", "c"]);
/// assert_eq!(split_path(""), Vec::<&str>::new());
/// ```
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Joins a parent path and a child name with a single `/`, treating an
/// empty parent as the root.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Formats a permission bitmask as a three-digit octal string, e.g. `644`.
pub fn format_octal_perm(mode: u32) -> String {
    format!("{:o}", mode & 0o777)
}

/// Parses a three-digit octal permission string, falling back to `default`
/// on any malformed input.
pub fn parse_octal_perm(raw: &str, default: u16) -> u16 {
    u16::from_str_radix(raw, 8).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_strips_separators() {
        assert_eq!(split_path("/a//b/c/"), vec!["a", "b", "c"]);
        assert_eq!(split_path(""), Vec::<&str>::new());
        assert_eq!(split_path("solo"), vec!["solo"]);
    }

    #[test]
    fn join_path_handles_empty_parent() {
        assert_eq!(join_path("", "file.txt"), "file.txt");
        assert_eq!(join_path("dir", "file.txt"), "dir/file.txt");
    }

    #[test]
    fn octal_perm_round_trips() {
        let formatted = format_octal_perm(0o644);
        assert_eq!(formatted, "644");
        assert_eq!(parse_octal_perm(&formatted, 0), 0o644);
    }

    #[test]
    fn malformed_octal_perm_falls_back() {
        assert_eq!(parse_octal_perm("xyz", 0o755), 0o755);
    }
}
