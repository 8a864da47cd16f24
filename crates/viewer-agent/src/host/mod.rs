//! Bridge between the agent runtime and the live viewer.
//!
//! Host applications of this kind are single-threaded for state
//! mutation, so the viewer is treated as an actor: the bridge spawns one
//! dedicated thread that owns the [`ViewerHost`], and every call is a
//! request/reply over a channel. This serializes all mutating access,
//! keeps failures structured, and never lets a bad command take the
//! session down.

pub mod command;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{AgentError, AgentResult};
pub use command::{canonicalize_command, is_state_changing, CommandOutcome};
pub use snapshot::{SnapshotResult, ViewerState};

const RECENT_RESULTS_CAP: usize = 20;
const RECENT_ERROR_MAX_CHARS: usize = 240;

/// The host application's command-execution and render surface.
///
/// Implementations run on the bridge's host thread and may freely hold
/// non-`Sync` viewer state. A failed command must come back as a
/// `CommandOutcome` with `ok = false`, not a panic.
pub trait ViewerHost: Send {
    fn execute(&mut self, command: &str) -> CommandOutcome;
    /// Encode the current render state as a PNG at the requested
    /// capture size. A zero dimension means derive that axis from the
    /// current viewport. Must not mutate scene state.
    fn render_png(&mut self, width: u32, height: u32) -> Result<Vec<u8>, String>;
    fn viewport(&self) -> (u32, u32);
    fn state(&self) -> ViewerState;
}

/// Abbreviated record of a recent tool execution, included in state
/// summaries so the model sees what it already tried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentToolResult {
    pub command: String,
    pub ok: bool,
    pub error: String,
}

enum HostRequest {
    Execute {
        command: String,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Snapshot {
        width: u32,
        height: u32,
        reply: oneshot::Sender<SnapshotResult>,
    },
    StateSummary {
        reply: oneshot::Sender<(ViewerState, Vec<RecentToolResult>)>,
    },
}

/// Size caps applied to state summaries before they leave the host
/// thread.
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    pub max_objects: usize,
    pub max_selections: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            max_objects: 30,
            max_selections: 20,
        }
    }
}

/// Handle to the viewer actor. Cloneable; all clones funnel into the
/// same single-consumer loop, so host calls are mutually exclusive.
#[derive(Clone)]
pub struct HostBridge {
    tx: std_mpsc::Sender<HostRequest>,
}

impl HostBridge {
    /// Spawn the host thread that takes ownership of the viewer.
    pub fn spawn(viewer: Box<dyn ViewerHost>, limits: StateLimits) -> Self {
        let (tx, rx) = std_mpsc::channel::<HostRequest>();
        thread::Builder::new()
            .name("viewer-host".to_string())
            .spawn(move || host_loop(viewer, rx, limits))
            .expect("failed to spawn viewer host thread");
        Self { tx }
    }

    /// Run one viewer command synchronously against current state.
    ///
    /// The returned outcome is structured: a rejected or failed command
    /// reports through `ok`/`error`, never through `Err`. `Err` only
    /// means the host thread itself is gone.
    pub async fn execute(&self, command: &str) -> AgentResult<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostRequest::Execute {
                command: command.to_string(),
                reply,
            })
            .map_err(|_| host_gone())?;
        rx.await.map_err(|_| host_gone())
    }

    /// Capture the current render state plus a state summary, at the
    /// requested capture size (zero derives an axis from the viewport).
    pub async fn snapshot(&self, width: u32, height: u32) -> AgentResult<SnapshotResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostRequest::Snapshot {
                width,
                height,
                reply,
            })
            .map_err(|_| host_gone())?;
        rx.await.map_err(|_| host_gone())
    }

    /// State summary plus the recent-tool-result ring, for prompt
    /// construction.
    pub async fn state_summary(&self) -> AgentResult<(ViewerState, Vec<RecentToolResult>)> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostRequest::StateSummary { reply })
            .map_err(|_| host_gone())?;
        rx.await.map_err(|_| host_gone())
    }
}

fn host_gone() -> AgentError {
    AgentError::HostCommandFailure("viewer host thread is not running".to_string())
}

fn host_loop(
    mut viewer: Box<dyn ViewerHost>,
    rx: std_mpsc::Receiver<HostRequest>,
    limits: StateLimits,
) {
    let mut recent: VecDeque<RecentToolResult> = VecDeque::with_capacity(RECENT_RESULTS_CAP);

    while let Ok(request) = rx.recv() {
        match request {
            HostRequest::Execute { command, reply } => {
                let outcome = viewer.execute(&command);
                debug!(command = %outcome.command, ok = outcome.ok, "host command executed");
                if recent.len() == RECENT_RESULTS_CAP {
                    recent.pop_front();
                }
                recent.push_back(RecentToolResult {
                    command: outcome.command.clone(),
                    ok: outcome.ok,
                    error: outcome
                        .error
                        .clone()
                        .unwrap_or_default()
                        .chars()
                        .take(RECENT_ERROR_MAX_CHARS)
                        .collect(),
                });
                // Receiver may have been dropped on cancellation; the
                // command still ran to completion against host state.
                let _ = reply.send(outcome);
            }
            HostRequest::Snapshot {
                width,
                height,
                reply,
            } => {
                let state = viewer
                    .state()
                    .truncated(limits.max_objects, limits.max_selections);
                let result = match viewer.render_png(width, height) {
                    Ok(png) => SnapshotResult::captured(&png, viewer.viewport(), state),
                    Err(error) => {
                        warn!(%error, "snapshot render failed; returning state-only result");
                        SnapshotResult::state_only(error, state)
                    }
                };
                let _ = reply.send(result);
            }
            HostRequest::StateSummary { reply } => {
                let state = viewer
                    .state()
                    .truncated(limits.max_objects, limits.max_selections);
                let _ = reply.send((state, recent.iter().cloned().collect()));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted viewer for bridge and session tests.
    pub struct FakeViewer {
        pub fail_commands: bool,
        pub fail_render: bool,
        pub executed: Arc<AtomicUsize>,
        pub last_capture: Arc<Mutex<Option<(u32, u32)>>>,
    }

    impl FakeViewer {
        pub fn new() -> Self {
            Self {
                fail_commands: false,
                fail_render: false,
                executed: Arc::new(AtomicUsize::new(0)),
                last_capture: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl ViewerHost for FakeViewer {
        fn execute(&mut self, command: &str) -> CommandOutcome {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail_commands {
                CommandOutcome::failure(command, "parser returned failure", vec![])
            } else {
                CommandOutcome::success(command, vec![format!("Executed: {}", command)])
            }
        }

        fn render_png(&mut self, width: u32, height: u32) -> Result<Vec<u8>, String> {
            *self.last_capture.lock().unwrap() = Some((width, height));
            if self.fail_render {
                Err("no framebuffer".to_string())
            } else {
                Ok(b"\x89PNG-fake".to_vec())
            }
        }

        fn viewport(&self) -> (u32, u32) {
            (800, 600)
        }

        fn state(&self) -> ViewerState {
            ViewerState {
                objects: vec!["1ubq".to_string()],
                enabled_objects: vec!["1ubq".to_string()],
                selections: vec!["sele".to_string()],
                selection_counts: [("sele".to_string(), 76)].into_iter().collect(),
                view: vec![1.0, 0.0, 0.0],
                viewport: (800, 600),
            }
        }
    }

    #[tokio::test]
    async fn execute_returns_structured_success() {
        let bridge = HostBridge::spawn(Box::new(FakeViewer::new()), StateLimits::default());
        let outcome = bridge.execute("show spheres").await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.command, "show spheres");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn failed_command_is_captured_not_raised() {
        let mut viewer = FakeViewer::new();
        viewer.fail_commands = true;
        let bridge = HostBridge::spawn(Box::new(viewer), StateLimits::default());
        let outcome = bridge.execute("bogus_command").await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("parser returned failure"));
    }

    #[tokio::test]
    async fn snapshot_encodes_image_and_state() {
        let bridge = HostBridge::spawn(Box::new(FakeViewer::new()), StateLimits::default());
        let snap = bridge.snapshot(1024, 0).await.unwrap();
        assert!(snap.ok);
        assert!(snap
            .image_data_url
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(snap.state.objects, vec!["1ubq".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_render_failure_degrades_to_state_only() {
        let mut viewer = FakeViewer::new();
        viewer.fail_render = true;
        let bridge = HostBridge::spawn(Box::new(viewer), StateLimits::default());
        let snap = bridge.snapshot(1024, 0).await.unwrap();
        assert!(!snap.ok);
        assert!(snap.image_data_url.is_none());
        assert_eq!(snap.state.selections, vec!["sele".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_forwards_capture_size_to_renderer() {
        let viewer = FakeViewer::new();
        let last_capture = viewer.last_capture.clone();
        let bridge = HostBridge::spawn(Box::new(viewer), StateLimits::default());
        bridge.snapshot(640, 480).await.unwrap();
        assert_eq!(*last_capture.lock().unwrap(), Some((640, 480)));
    }

    #[tokio::test]
    async fn recent_results_ring_feeds_state_summary() {
        let bridge = HostBridge::spawn(Box::new(FakeViewer::new()), StateLimits::default());
        bridge.execute("fetch 1ubq").await.unwrap();
        bridge.execute("show cartoon").await.unwrap();
        let (_, recent) = bridge.state_summary().await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].command, "fetch 1ubq");
        assert!(recent[1].ok);
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized_and_all_complete() {
        let viewer = FakeViewer::new();
        let executed = viewer.executed.clone();
        let bridge = HostBridge::spawn(Box::new(viewer), StateLimits::default());

        let a = bridge.clone();
        let b = bridge.clone();
        let (ra, rb) = tokio::join!(a.execute("show spheres"), b.execute("hide everything"));
        assert!(ra.unwrap().ok);
        assert!(rb.unwrap().ok);
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }
}
