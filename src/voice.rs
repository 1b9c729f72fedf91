use crate::audio::{CaptureHandle, Microphone};
use crate::error::AssistError;
use crate::surface::Surface;
use log::debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// Lifecycle state for the dictation pipeline.
///
/// Every entry point (toolbar button, embedder shortcut) checks this before
/// starting or stopping, so a new recording cannot begin while the async
/// transcribe and insert tail of the previous one is still running.
pub struct PipelineState(AtomicU8);

impl PipelineState {
    pub const IDLE: u8 = 0;
    pub const RECORDING: u8 = 1;
    pub const STOPPING: u8 = 2;
    pub const TRANSCRIBING: u8 = 3;

    pub fn new() -> Self {
        Self(AtomicU8::new(Self::IDLE))
    }

    /// Try to transition Idle → Recording. Returns false if not idle.
    pub fn try_start(&self) -> bool {
        self.0
            .compare_exchange(
                Self::IDLE,
                Self::RECORDING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Try to transition Recording → Stopping. Returns false if not recording.
    pub fn try_stop(&self) -> bool {
        self.0
            .compare_exchange(
                Self::RECORDING,
                Self::STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Try to transition Stopping → Transcribing. Returns false otherwise.
    pub fn begin_transcribe(&self) -> bool {
        self.0
            .compare_exchange(
                Self::STOPPING,
                Self::TRANSCRIBING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Reset to Idle from any state. Called when the pipeline finishes or
    /// is torn down.
    pub fn reset(&self) {
        self.0.store(Self::IDLE, Ordering::SeqCst);
    }

    pub fn current(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// The surface and selection captured when recording started. Insertion
/// targets these, not whatever has focus by the time transcription lands.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedTarget {
    pub surface: Surface,
    pub selection: (usize, usize),
}

/// Process-wide exclusive dictation session: at most one capture exists at
/// any time, guarded by [`PipelineState`].
pub struct VoiceSession {
    state: PipelineState,
    capture: Mutex<Option<Box<dyn CaptureHandle>>>,
    target: Mutex<Option<CapturedTarget>>,
}

impl VoiceSession {
    pub fn new() -> Self {
        Self {
            state: PipelineState::new(),
            capture: Mutex::new(None),
            target: Mutex::new(None),
        }
    }

    pub fn current(&self) -> u8 {
        self.state.current()
    }

    pub fn is_recording(&self) -> bool {
        self.state.current() == PipelineState::RECORDING
    }

    /// Open the microphone and enter Recording. A toggle while any later
    /// phase is still running is a silent no-op (`Ok(false)`); an open
    /// failure returns the pipeline to Idle and reports `Device`.
    pub fn start(
        &self,
        microphone: &dyn Microphone,
        target: CapturedTarget,
    ) -> Result<bool, AssistError> {
        if !self.state.try_start() {
            debug!(
                "voice: start requested in state {}, ignoring",
                self.state.current()
            );
            return Ok(false);
        }
        match microphone.open() {
            Ok(handle) => {
                *self.capture.lock().unwrap() = Some(handle);
                *self.target.lock().unwrap() = Some(target);
                Ok(true)
            }
            Err(e) => {
                self.state.reset();
                Err(AssistError::Device(e.to_string()))
            }
        }
    }

    /// Enter Stopping and hand the capture back for finalization. `None`
    /// when not recording.
    pub fn begin_stop(&self) -> Option<(Box<dyn CaptureHandle>, CapturedTarget)> {
        if !self.state.try_stop() {
            debug!(
                "voice: stop requested in state {}, ignoring",
                self.state.current()
            );
            return None;
        }
        let capture = self.capture.lock().unwrap().take();
        let target = self.target.lock().unwrap().take();
        match (capture, target) {
            (Some(capture), Some(target)) => Some((capture, target)),
            _ => {
                // Start half-completed; nothing to finalize.
                self.state.reset();
                None
            }
        }
    }

    /// Enter Transcribing once the capture has been finalized.
    pub fn begin_transcribe(&self) -> bool {
        self.state.begin_transcribe()
    }

    /// Return to Idle and drop any live capture, releasing the device.
    pub fn reset(&self) {
        self.capture.lock().unwrap().take();
        self.target.lock().unwrap().take();
        self.state.reset();
    }
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::new()
    }
}
