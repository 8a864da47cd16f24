//! Detection of a model stuck re-issuing the same tool call.

use std::collections::VecDeque;

use serde_json::Value;

use crate::registry::TOOL_CAPTURE_SNAPSHOT;

const DEFAULT_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct DoomLoopWarning {
    pub tool_name: String,
    pub call_count: usize,
}

/// Tracks the last few tool calls; when `threshold` consecutive calls
/// are byte-identical (name plus canonical arguments) a warning fires.
/// Snapshot captures are exempt since repeated validation is normal.
pub struct DoomLoopDetector {
    threshold: usize,
    recent: VecDeque<(String, String)>,
}

impl Default for DoomLoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl DoomLoopDetector {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(2);
        Self {
            threshold,
            recent: VecDeque::with_capacity(threshold),
        }
    }

    pub fn add_call(&mut self, tool_name: &str, arguments: &Value) -> Option<DoomLoopWarning> {
        if tool_name == TOOL_CAPTURE_SNAPSHOT {
            return None;
        }

        // serde_json's default map keeps keys sorted, so to_string is a
        // canonical form.
        let signature = (tool_name.to_string(), arguments.to_string());
        if self.recent.len() == self.threshold {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);

        if self.recent.len() < self.threshold {
            return None;
        }
        let first = &self.recent[0];
        if self.recent.iter().all(|item| item == first) {
            return Some(DoomLoopWarning {
                tool_name: tool_name.to_string(),
                call_count: self.threshold,
            });
        }
        None
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn three_identical_calls_trigger_warning() {
        let mut detector = DoomLoopDetector::default();
        let args = json!({"command": "show cartoon"});
        assert!(detector.add_call("run_host_command", &args).is_none());
        assert!(detector.add_call("run_host_command", &args).is_none());
        let warning = detector.add_call("run_host_command", &args).unwrap();
        assert_eq!(warning.tool_name, "run_host_command");
        assert_eq!(warning.call_count, 3);
    }

    #[test]
    fn differing_arguments_reset_the_pattern() {
        let mut detector = DoomLoopDetector::default();
        assert!(detector
            .add_call("run_host_command", &json!({"command": "show cartoon"}))
            .is_none());
        assert!(detector
            .add_call("run_host_command", &json!({"command": "show sticks"}))
            .is_none());
        assert!(detector
            .add_call("run_host_command", &json!({"command": "show cartoon"}))
            .is_none());
    }

    #[test]
    fn snapshot_calls_are_exempt() {
        let mut detector = DoomLoopDetector::default();
        let args = json!({});
        for _ in 0..5 {
            assert!(detector.add_call(TOOL_CAPTURE_SNAPSHOT, &args).is_none());
        }
    }

    #[test]
    fn key_order_does_not_defeat_detection() {
        let mut detector = DoomLoopDetector::default();
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert!(detector.add_call("t", &a).is_none());
        assert!(detector.add_call("t", &b).is_none());
        assert!(detector.add_call("t", &a).is_some());
    }

    #[test]
    fn clear_forgets_history() {
        let mut detector = DoomLoopDetector::default();
        let args = json!({"command": "zoom"});
        detector.add_call("run_host_command", &args);
        detector.add_call("run_host_command", &args);
        detector.clear();
        assert!(detector.add_call("run_host_command", &args).is_none());
    }
}
