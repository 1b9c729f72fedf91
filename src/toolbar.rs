use crate::client::{RewriteMode, ToneReport};
use crate::page::Rect;
use crate::surface::Surface;
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long focus may wander (e.g. onto the toolbar's own buttons) before
/// the toolbar actually hides.
pub const HIDE_GRACE: Duration = Duration::from_millis(200);

/// Vertical gap between the anchor element and the toolbar.
const ANCHOR_GAP: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Snapshot of the toolbar for the embedder to draw. The controller is the
/// single writer; embedders read a clone per frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolbarState {
    pub visible: bool,
    pub anchor: Option<Surface>,
    pub position: Position,
    pub busy_action: Option<RewriteMode>,
    pub tone: Option<ToneReport>,
}

/// Hidden/Shown state machine for the floating action toolbar.
///
/// Showing recomputes the position from the anchor's current bounds.
/// Hiding goes through a grace timer so that focus moving from the
/// surface onto the toolbar itself does not flicker it away; focus
/// returning to a qualifying surface aborts the pending hide.
pub struct ToolbarController {
    state: Arc<Mutex<ToolbarState>>,
    grace: Mutex<Option<JoinHandle<()>>>,
}

fn hide_state(state: &Mutex<ToolbarState>) {
    let mut state = state.lock().unwrap();
    state.visible = false;
    state.anchor = None;
    state.tone = None;
}

impl ToolbarController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ToolbarState::default())),
            grace: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ToolbarState {
        self.state.lock().unwrap().clone()
    }

    pub fn anchor(&self) -> Option<Surface> {
        self.state.lock().unwrap().anchor.clone()
    }

    /// Show the toolbar anchored under `surface`. Cancels any pending hide.
    pub fn show(&self, surface: Surface, bounds: Rect) {
        self.cancel_hide();
        let mut state = self.state.lock().unwrap();
        if state.anchor.as_ref().map(|a| a.node) != Some(surface.node) {
            state.tone = None;
        }
        state.visible = true;
        state.position = Position {
            x: bounds.x,
            y: bounds.y + bounds.height + ANCHOR_GAP,
        };
        state.anchor = Some(surface);
    }

    /// Arm the grace timer; the toolbar hides when it fires.
    pub fn schedule_hide(&self) {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(HIDE_GRACE).await;
            hide_state(&state);
        });
        let mut grace = self.grace.lock().unwrap();
        if let Some(prev) = grace.replace(handle) {
            prev.abort();
        }
    }

    pub fn cancel_hide(&self) {
        if let Some(prev) = self.grace.lock().unwrap().take() {
            prev.abort();
        }
    }

    /// Hide immediately. A rewrite already in flight keeps its busy latch;
    /// its completion path clears it.
    pub fn hide_now(&self) {
        hide_state(&self.state);
    }

    /// Claim the busy latch for `action`. Returns false while any action
    /// is still in flight.
    pub fn try_begin(&self, action: RewriteMode) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(current) = state.busy_action {
            debug!(
                "toolbar: {} requested while {} in flight, ignoring",
                action.as_str(),
                current.as_str()
            );
            return false;
        }
        state.busy_action = Some(action);
        true
    }

    /// Release the busy latch. Every completion path of an action, success
    /// or failure, must come through here.
    pub fn finish(&self, action: RewriteMode) {
        let mut state = self.state.lock().unwrap();
        if state.busy_action == Some(action) {
            state.busy_action = None;
        }
    }

    pub fn set_tone(&self, tone: Option<ToneReport>) {
        self.state.lock().unwrap().tone = tone;
    }

    /// Drop timers on teardown.
    pub fn shutdown(&self) {
        self.cancel_hide();
    }
}

impl Default for ToolbarController {
    fn default() -> Self {
        Self::new()
    }
}
