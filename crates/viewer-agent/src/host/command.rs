//! Viewer command helpers: canonicalization and mutation classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Commands starting with these prefixes only query state; everything
/// else is assumed to mutate the scene and triggers snapshot validation.
const READ_ONLY_PREFIXES: &[&str] = &["get_", "count_", "iterate", "indicate", "help"];

fn pdb_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9][A-Za-z0-9]{3}$").expect("valid regex"))
}

/// Outcome of executing one viewer command against live host state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub feedback_lines: Vec<String>,
}

impl CommandOutcome {
    pub fn success<S: Into<String>>(command: S, feedback_lines: Vec<String>) -> Self {
        Self {
            ok: true,
            command: command.into(),
            error: None,
            feedback_lines,
        }
    }

    pub fn failure<S: Into<String>, E: Into<String>>(
        command: S,
        error: E,
        feedback_lines: Vec<String>,
    ) -> Self {
        Self {
            ok: false,
            command: command.into(),
            error: Some(error.into()),
            feedback_lines,
        }
    }
}

/// Rewrite `load <PDBID>` to `fetch <PDBID>`: a bare four-char PDB id is
/// not a local file, the model almost always means a remote fetch.
/// Returns the command to run plus a user-facing note when rewritten.
pub fn canonicalize_command(command: &str) -> (String, Option<String>) {
    let stripped = command.trim().to_string();
    if stripped.len() > 5
        && stripped.is_char_boundary(5)
        && stripped[..5].eq_ignore_ascii_case("load ")
    {
        let arg = stripped[5..].trim();
        if pdb_id_re().is_match(arg)
            && !arg.contains('.')
            && !arg.contains('/')
            && !arg.contains('\\')
        {
            let fixed = format!("fetch {}", arg);
            let note = format!("translated load {} -> fetch {}", arg, arg);
            return (fixed, Some(note));
        }
    }
    (stripped, None)
}

/// Whether a command may mutate viewer state.
pub fn is_state_changing(command: &str) -> bool {
    let text = command.trim().to_lowercase();
    let Some(first) = text.split_whitespace().next() else {
        return false;
    };
    !READ_ONLY_PREFIXES
        .iter()
        .any(|prefix| first.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_pdb_id_becomes_fetch() {
        let (fixed, note) = canonicalize_command("load 1ubq");
        assert_eq!(fixed, "fetch 1ubq");
        assert!(note.unwrap().contains("1ubq"));
    }

    #[test]
    fn load_file_path_is_untouched() {
        let (fixed, note) = canonicalize_command("load /tmp/structure.pdb");
        assert_eq!(fixed, "load /tmp/structure.pdb");
        assert!(note.is_none());

        let (fixed, note) = canonicalize_command("load model.cif");
        assert_eq!(fixed, "load model.cif");
        assert!(note.is_none());
    }

    #[test]
    fn non_load_commands_pass_through() {
        let (fixed, note) = canonicalize_command("  show spheres  ");
        assert_eq!(fixed, "show spheres");
        assert!(note.is_none());
    }

    #[test]
    fn read_only_prefixes_are_not_state_changing() {
        assert!(!is_state_changing("get_names objects"));
        assert!(!is_state_changing("count_atoms sele"));
        assert!(!is_state_changing("help color"));
        assert!(!is_state_changing("   "));
    }

    #[test]
    fn mutating_commands_are_state_changing() {
        assert!(is_state_changing("show spheres"));
        assert!(is_state_changing("fetch 1ubq"));
        assert!(is_state_changing("delete all"));
    }
}
