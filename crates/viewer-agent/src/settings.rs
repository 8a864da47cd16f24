//! Runtime toggles read from the process environment.
//!
//! All parsing is tolerant: a malformed value falls back to the default
//! instead of failing startup.

use std::env;

pub const ENV_REASONING_DEFAULT: &str = "PYMOL_AI_REASONING_DEFAULT";
pub const ENV_AGENT_MODE: &str = "PYMOL_AI_AGENT_MODE";
pub const ENV_CONVERSATION_MODE: &str = "PYMOL_AI_CONVERSATION_MODE";
pub const ENV_TRACE_STREAM: &str = "PYMOL_AI_TRACE_STREAM";
pub const ENV_MAX_STEPS: &str = "PYMOL_AI_MAX_STEPS";
pub const ENV_TOOL_RESULT_MAX_CHARS: &str = "PYMOL_AI_TOOL_RESULT_MAX_CHARS";
pub const ENV_SCREENSHOT_WIDTH: &str = "PYMOL_AI_SCREENSHOT_WIDTH";
pub const ENV_SCREENSHOT_HEIGHT: &str = "PYMOL_AI_SCREENSHOT_HEIGHT";
pub const ENV_SCREENSHOT_VALIDATE_REQUIRED: &str = "PYMOL_AI_SCREENSHOT_VALIDATE_REQUIRED";
pub const ENV_STATE_MAX_OBJECTS: &str = "PYMOL_AI_STATE_MAX_OBJECTS";
pub const ENV_STATE_MAX_SELECTIONS: &str = "PYMOL_AI_STATE_MAX_SELECTIONS";

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.trim() {
            "1" => true,
            "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// What the chat input box feeds by default: the model, or raw viewer
/// commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Ai,
    Cli,
}

/// Per-process runtime settings, captured once at resolution time.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub input_mode: InputMode,
    pub reasoning_visible: bool,
    pub trace_stream: bool,
    pub max_agent_steps: usize,
    pub tool_result_max_chars: usize,
    pub screenshot_width: u32,
    pub screenshot_height: u32,
    pub snapshot_validate_required: bool,
    pub state_max_objects: usize,
    pub state_max_selections: usize,
    pub max_history_turns: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Ai,
            reasoning_visible: false,
            trace_stream: true,
            max_agent_steps: 16,
            tool_result_max_chars: 4096,
            screenshot_width: 1024,
            screenshot_height: 0,
            snapshot_validate_required: true,
            state_max_objects: 30,
            state_max_selections: 20,
            max_history_turns: 80,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            input_mode: match env::var(ENV_CONVERSATION_MODE).as_deref().map(str::trim) {
                Ok("cli") => InputMode::Cli,
                _ => InputMode::Ai,
            },
            reasoning_visible: env_flag(ENV_REASONING_DEFAULT, defaults.reasoning_visible),
            trace_stream: env_flag(ENV_TRACE_STREAM, defaults.trace_stream),
            max_agent_steps: env_usize(ENV_MAX_STEPS, defaults.max_agent_steps).max(1),
            tool_result_max_chars: env_usize(
                ENV_TOOL_RESULT_MAX_CHARS,
                defaults.tool_result_max_chars,
            ),
            screenshot_width: env_usize(ENV_SCREENSHOT_WIDTH, defaults.screenshot_width as usize)
                as u32,
            screenshot_height: env_usize(ENV_SCREENSHOT_HEIGHT, defaults.screenshot_height as usize)
                as u32,
            snapshot_validate_required: env_flag(
                ENV_SCREENSHOT_VALIDATE_REQUIRED,
                defaults.snapshot_validate_required,
            ),
            state_max_objects: env_usize(ENV_STATE_MAX_OBJECTS, defaults.state_max_objects),
            state_max_selections: env_usize(
                ENV_STATE_MAX_SELECTIONS,
                defaults.state_max_selections,
            ),
            max_history_turns: defaults.max_history_turns,
        }
    }
}
