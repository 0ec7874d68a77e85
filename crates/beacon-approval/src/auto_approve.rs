//! Auto-approval policy: decide whether a pending permission request can be
//! resolved without asking the user, given the session's permission mode.
//!
//! Pure function, no I/O — same inputs always produce the same output.

use beacon_core::Decision;

/// Built-in tool names considered read-only (safe to auto-approve under
/// `read-only` mode).
const BUILTIN_READ_ONLY_TOOLS: &[&str] =
    &["read_file", "list_directory", "grep", "glob", "git-status", "git-diff-numstat"];

/// Built-in tool names always approved under `default` mode.
const BUILTIN_ALWAYS_TOOLS: &[&str] = &["read_file", "list_directory"];

/// Caller-supplied extensions to the built-in hint tables.
#[derive(Debug, Clone, Default)]
pub struct AutoApprovalOverrides {
    /// Additional tool names always approved under `default` mode.
    pub always_tool_names: Vec<String>,
    /// Additional tool-call ids always approved under `default` mode (exact
    /// match or substring, per the originating caller's convention).
    pub always_tool_ids: Vec<String>,
    /// Tool names that must never be auto-approved under `read-only` mode,
    /// even if they also appear in the built-in read-only table.
    pub write_tool_names: Vec<String>,
}

/// Resolve whether `tool_name`/`tool_call_id` can be auto-approved under
/// `permission_mode`. Returns `None` when the caller must be asked.
#[must_use]
pub fn resolve_auto_approval(
    permission_mode: &str,
    tool_name: &str,
    tool_call_id: &str,
    overrides: Option<&AutoApprovalOverrides>,
) -> Option<Decision> {
    match permission_mode {
        "yolo" => Some(Decision::ApprovedForSession),
        "safe-yolo" => Some(Decision::Approved),
        "read-only" => {
            let is_write = overrides.is_some_and(|o| o.write_tool_names.iter().any(|t| t == tool_name));
            if !is_write && BUILTIN_READ_ONLY_TOOLS.contains(&tool_name) {
                Some(Decision::Approved)
            } else {
                None
            }
        },
        "default" => {
            let always_by_name = BUILTIN_ALWAYS_TOOLS.contains(&tool_name)
                || overrides.is_some_and(|o| o.always_tool_names.iter().any(|t| t == tool_name));
            let always_by_id =
                overrides.is_some_and(|o| o.always_tool_ids.iter().any(|id| id == tool_call_id));
            if always_by_name || always_by_id {
                Some(Decision::Approved)
            } else {
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yolo_always_approves_for_session() {
        assert_eq!(
            resolve_auto_approval("yolo", "bash", "id1", None),
            Some(Decision::ApprovedForSession)
        );
    }

    #[test]
    fn safe_yolo_always_approves_once() {
        assert_eq!(
            resolve_auto_approval("safe-yolo", "bash", "id1", None),
            Some(Decision::Approved)
        );
    }

    #[test]
    fn read_only_approves_known_read_tools_only() {
        assert_eq!(
            resolve_auto_approval("read-only", "read_file", "id1", None),
            Some(Decision::Approved)
        );
        assert_eq!(resolve_auto_approval("read-only", "bash", "id1", None), None);
    }

    #[test]
    fn read_only_write_override_suppresses_approval() {
        let overrides = AutoApprovalOverrides {
            write_tool_names: vec!["read_file".to_string()],
            ..Default::default()
        };
        assert_eq!(
            resolve_auto_approval("read-only", "read_file", "id1", Some(&overrides)),
            None
        );
    }

    #[test]
    fn default_mode_requires_a_hint_match() {
        assert_eq!(resolve_auto_approval("default", "bash", "id1", None), None);
        assert_eq!(
            resolve_auto_approval("default", "read_file", "id1", None),
            Some(Decision::Approved)
        );
    }

    #[test]
    fn default_mode_override_by_name_or_id() {
        let overrides = AutoApprovalOverrides {
            always_tool_names: vec!["custom_tool".to_string()],
            always_tool_ids: vec!["special-id".to_string()],
            ..Default::default()
        };
        assert_eq!(
            resolve_auto_approval("default", "custom_tool", "anything", Some(&overrides)),
            Some(Decision::Approved)
        );
        assert_eq!(
            resolve_auto_approval("default", "bash", "special-id", Some(&overrides)),
            Some(Decision::Approved)
        );
    }

    #[test]
    fn unknown_mode_always_asks() {
        assert_eq!(resolve_auto_approval("unknown", "read_file", "id1", None), None);
    }

    #[test]
    fn resolver_is_pure() {
        let a = resolve_auto_approval("default", "read_file", "id1", None);
        let b = resolve_auto_approval("default", "read_file", "id1", None);
        assert_eq!(a, b);
    }
}
