use log::{info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How loud a notification should be. The host shell decides what each
/// level looks like; we only classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

impl Notifier for std::sync::Arc<dyn Notifier> {
    fn notify(&self, severity: Severity, message: &str) {
        (**self).notify(severity, message)
    }
}

/// Default sink that routes notifications into the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warning | Severity::Error => warn!("{}", message),
        }
    }
}

const DEDUPE_WINDOW: Duration = Duration::from_secs(30);

/// Wraps another notifier and suppresses repeats of the same message
/// within a 30 second window, so a flapping backend does not produce a
/// notification storm.
pub struct DedupeNotifier<N: Notifier> {
    inner: N,
    window: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl<N: Notifier> DedupeNotifier<N> {
    pub fn new(inner: N) -> Self {
        Self::with_window(inner, DEDUPE_WINDOW)
    }

    pub fn with_window(inner: N, window: Duration) -> Self {
        Self {
            inner,
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }
}

impl<N: Notifier> Notifier for DedupeNotifier<N> {
    fn notify(&self, severity: Severity, message: &str) {
        let now = Instant::now();
        let mut seen = self.last_seen.lock().unwrap();
        if let Some(prev) = seen.get(message) {
            if now.duration_since(*prev) < self.window {
                return;
            }
        }
        seen.insert(message.to_string(), now);
        // Keep the map from growing without bound across long sessions.
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        drop(seen);
        self.inner.notify(severity, message);
    }
}
