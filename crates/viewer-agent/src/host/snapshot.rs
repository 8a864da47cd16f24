//! Viewer state summaries and snapshot capture payloads.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compact summary of the live viewer, attached to model prompts and
/// snapshot tool results so the model can reason about scene state
/// without another round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerState {
    pub objects: Vec<String>,
    pub enabled_objects: Vec<String>,
    pub selections: Vec<String>,
    pub selection_counts: BTreeMap<String, i64>,
    pub view: Vec<f64>,
    pub viewport: (u32, u32),
}

impl ViewerState {
    /// Apply the configured size caps before the summary leaves the host
    /// thread.
    pub fn truncated(mut self, max_objects: usize, max_selections: usize) -> Self {
        self.objects.truncate(max_objects);
        self.enabled_objects.truncate(max_objects);
        self.selections.truncate(max_selections);
        let kept: Vec<String> = self.selections.clone();
        self.selection_counts.retain(|name, _| kept.contains(name));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Result of one snapshot capture: encoded image (when rendering
/// succeeded) plus the always-present state summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `data:image/png;base64,...` form consumed by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,
    pub meta: SnapshotMeta,
    pub state: ViewerState,
}

impl SnapshotResult {
    pub fn captured(png: &[u8], viewport: (u32, u32), state: ViewerState) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        SnapshotResult {
            ok: true,
            error: None,
            image_data_url: Some(format!("data:image/png;base64,{}", encoded)),
            meta: SnapshotMeta {
                width: viewport.0,
                height: viewport.1,
                bytes: png.len(),
            },
            state,
        }
    }

    /// Render failed; the state summary still lets the model validate.
    pub fn state_only<E: Into<String>>(error: E, state: ViewerState) -> Self {
        SnapshotResult {
            ok: false,
            error: Some(error.into()),
            image_data_url: None,
            meta: SnapshotMeta::default(),
            state,
        }
    }

    /// Split the data URL into (base64 payload, mime type) for providers
    /// that want raw image blocks.
    pub fn image_parts(&self) -> Option<(&str, &str)> {
        let url = self.image_data_url.as_deref()?;
        let rest = url.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime = header.split(';').next().filter(|m| !m.is_empty())?;
        Some((data, mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(objects: usize, selections: usize) -> ViewerState {
        let mut state = ViewerState::default();
        for i in 0..objects {
            state.objects.push(format!("obj{}", i));
        }
        for i in 0..selections {
            let name = format!("sel{}", i);
            state.selection_counts.insert(name.clone(), i as i64);
            state.selections.push(name);
        }
        state
    }

    #[test]
    fn truncation_caps_objects_and_selections() {
        let state = state_with(10, 10).truncated(3, 2);
        assert_eq!(state.objects.len(), 3);
        assert_eq!(state.selections.len(), 2);
        assert_eq!(state.selection_counts.len(), 2);
    }

    #[test]
    fn captured_snapshot_builds_data_url() {
        let result = SnapshotResult::captured(b"\x89PNG", (640, 480), ViewerState::default());
        assert!(result.ok);
        let url = result.image_data_url.as_deref().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(result.meta.bytes, 4);
        assert_eq!(result.meta.width, 640);

        let (data, mime) = result.image_parts().unwrap();
        assert_eq!(mime, "image/png");
        assert!(!data.is_empty());
    }

    #[test]
    fn state_only_snapshot_carries_error() {
        let result = SnapshotResult::state_only("render failed", ViewerState::default());
        assert!(!result.ok);
        assert!(result.image_data_url.is_none());
        assert_eq!(result.error.as_deref(), Some("render failed"));
    }
}
