use crate::annotate;
use crate::audio::{samples_to_wav, Microphone};
use crate::client::{AssistClient, RewriteMode};
use crate::debounce::DebounceScheduler;
use crate::error::AssistError;
use crate::notify::{DedupeNotifier, Notifier, Severity};
use crate::page::{NodeId, PageEvent, SharedPage};
use crate::settings::{Settings, SettingsStore};
use crate::surface::{self, flattened_text, Surface};
use crate::toolbar::{ToolbarController, ToolbarState};
use crate::voice::{CapturedTarget, VoiceSession};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The injected context object. One `Engine` exists per page; everything
/// the assistant does flows through it, and it is the only writer of the
/// process-wide state (active surface, settings snapshot, pipelines).
///
/// Cheap to clone; clones share the same inner state. Event handlers and
/// async completions must run inside a tokio runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    page: SharedPage,
    store: SettingsStore,
    settings: Mutex<Settings>,
    client: Mutex<Arc<AssistClient>>,
    active: Mutex<Option<Surface>>,
    debounce: DebounceScheduler,
    toolbar: ToolbarController,
    session: VoiceSession,
    microphone: Box<dyn Microphone>,
    notifier: Arc<dyn Notifier>,
    // Configuration nagging is throttled; action failures always surface.
    config_notices: DedupeNotifier<Arc<dyn Notifier>>,
}

impl Engine {
    pub fn new(
        page: SharedPage,
        store: SettingsStore,
        microphone: Box<dyn Microphone>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, AssistError> {
        let settings = store.load_or_create();
        let client = AssistClient::new(&settings)?;
        let notifier: Arc<dyn Notifier> = Arc::from(notifier);
        Ok(Self {
            inner: Arc::new(Inner {
                page,
                store,
                settings: Mutex::new(settings),
                client: Mutex::new(Arc::new(client)),
                active: Mutex::new(None),
                debounce: DebounceScheduler::new(),
                toolbar: ToolbarController::new(),
                session: VoiceSession::new(),
                microphone,
                notifier: notifier.clone(),
                config_notices: DedupeNotifier::new(notifier),
            }),
        })
    }

    pub fn settings(&self) -> Settings {
        self.inner.settings.lock().unwrap().clone()
    }

    pub fn active_surface(&self) -> Option<Surface> {
        self.inner.active.lock().unwrap().clone()
    }

    pub fn toolbar_state(&self) -> ToolbarState {
        self.inner.toolbar.state()
    }

    fn client(&self) -> Arc<AssistClient> {
        self.inner.client.lock().unwrap().clone()
    }

    fn notify(&self, severity: Severity, message: &str) {
        self.inner.notifier.notify(severity, message);
    }

    /// Entry point for host page events. Runs within one callback turn;
    /// anything slow is handed off to the debounce slot or a spawned task.
    pub fn handle_event(&self, event: PageEvent) {
        let settings = self.settings();
        if !settings.enabled {
            return;
        }
        match event {
            PageEvent::Input { target } => self.on_input(target, &settings),
            PageEvent::FocusIn { target } => self.on_focus_in(target, &settings),
            PageEvent::FocusOut { .. } => self.on_focus_out(&settings),
        }
    }

    fn on_input(&self, target: NodeId, settings: &Settings) {
        let surface = {
            let page = self.inner.page.lock().unwrap();
            surface::classify(&page, target, settings)
        };
        let surface = match surface {
            Some(s) => s,
            None => return,
        };
        *self.inner.active.lock().unwrap() = Some(surface.clone());

        let engine = self.clone();
        self.inner.debounce.schedule(
            Duration::from_millis(settings.debounce_ms),
            async move {
                engine.run_check(surface).await;
            },
        );
    }

    fn on_focus_in(&self, target: NodeId, settings: &Settings) {
        let classified = {
            let page = self.inner.page.lock().unwrap();
            surface::classify(&page, target, settings).map(|s| (s.clone(), page.bounds(s.node)))
        };
        let (surface, bounds) = match classified {
            Some(x) => x,
            None => return,
        };
        *self.inner.active.lock().unwrap() = Some(surface.clone());
        if settings.show_toolbar {
            self.inner.toolbar.show(surface, bounds);
        }
    }

    fn on_focus_out(&self, settings: &Settings) {
        if settings.show_toolbar {
            self.inner.toolbar.schedule_hide();
        }
    }

    /// Debounced analysis pass: snapshot the text, ask the service, paint.
    /// The renderer re-validates the snapshot, so a response landing after
    /// further edits is dropped whole.
    async fn run_check(&self, surface: Surface) {
        let snapshot = {
            let page = self.inner.page.lock().unwrap();
            if !page.is_attached(surface.node) {
                debug!("check: surface {} detached, skipping", surface.node);
                return;
            }
            flattened_text(&page, surface.kind, surface.node)
        };
        let language = self.settings().language;

        match self.client().check(&snapshot, &language).await {
            Ok(issues) => {
                let mut page = self.inner.page.lock().unwrap();
                if let Some(stats) = annotate::render(&mut page, &surface, &issues, &snapshot) {
                    debug!(
                        "check: painted {} issue(s), skipped {}",
                        stats.placed, stats.skipped
                    );
                }
            }
            Err(e @ AssistError::Configuration) => {
                self.inner
                    .config_notices
                    .notify(Severity::Warning, &e.notification_text());
            }
            Err(e) => warn!("background check failed: {}", e),
        }
    }

    /// Toolbar rewrite action: replace the anchor's whole text with the
    /// service's rewrite, then dispatch a synthetic edit so the new text
    /// gets checked. Races with user edits resolve in the user's favor.
    pub async fn rewrite(&self, mode: RewriteMode) {
        let surface = match self.inner.toolbar.anchor().or_else(|| self.active_surface()) {
            Some(s) => s,
            None => return,
        };
        if !self.inner.toolbar.try_begin(mode) {
            return;
        }
        let result = self.rewrite_surface(&surface, mode).await;
        self.inner.toolbar.finish(mode);
        if let Err(e) = result {
            self.notify(Severity::Error, &e.notification_text());
        }
    }

    async fn rewrite_surface(
        &self,
        surface: &Surface,
        mode: RewriteMode,
    ) -> Result<(), AssistError> {
        let snapshot = {
            let page = self.inner.page.lock().unwrap();
            if !page.is_attached(surface.node) {
                return Ok(());
            }
            flattened_text(&page, surface.kind, surface.node)
        };
        if snapshot.trim().is_empty() {
            return Ok(());
        }

        let rewritten = self.client().rewrite(&snapshot, mode).await?;

        {
            let mut page = self.inner.page.lock().unwrap();
            if !page.is_attached(surface.node)
                || flattened_text(&page, surface.kind, surface.node) != snapshot
            {
                debug!("rewrite: surface {} changed underneath, dropping", surface.node);
                return Ok(());
            }
            annotate::clear(&mut page, surface);
            surface::replace_text(&mut page, surface, &rewritten);
        }
        self.handle_event(PageEvent::Input {
            target: surface.node,
        });
        Ok(())
    }

    /// Refresh the toolbar's tone readout for its current anchor. A passive
    /// feature: failures are logged, never notified.
    pub async fn refresh_tone(&self) {
        let surface = match self.inner.toolbar.anchor() {
            Some(s) => s,
            None => return,
        };
        let snapshot = {
            let page = self.inner.page.lock().unwrap();
            if !page.is_attached(surface.node) {
                return;
            }
            flattened_text(&page, surface.kind, surface.node)
        };
        if snapshot.trim().is_empty() {
            self.inner.toolbar.set_tone(None);
            return;
        }
        match self.client().tone(&snapshot).await {
            Ok(report) => {
                let anchored = self.inner.toolbar.anchor().map(|a| a.node) == Some(surface.node);
                if anchored {
                    self.inner.toolbar.set_tone(Some(report));
                }
            }
            Err(e) => debug!("tone request failed: {}", e),
        }
    }

    /// Start or stop dictation. A toggle while the previous session is
    /// still finalizing or transcribing is a no-op.
    pub async fn toggle_voice(&self) {
        if self.inner.session.is_recording() {
            self.finish_recording().await;
        } else {
            self.start_recording();
        }
    }

    fn start_recording(&self) {
        let surface = match self.active_surface() {
            Some(s) => s,
            None => {
                self.notify(
                    Severity::Info,
                    "Focus a text field to start dictation.",
                );
                return;
            }
        };
        let selection = {
            let page = self.inner.page.lock().unwrap();
            if !page.is_attached(surface.node) {
                debug!("dictation: surface {} detached, refusing", surface.node);
                return;
            }
            surface::selection(&page, &surface)
        };
        let target = CapturedTarget { surface, selection };
        match self
            .inner
            .session
            .start(self.inner.microphone.as_ref(), target)
        {
            Ok(true) => debug!("dictation: recording started"),
            Ok(false) => {}
            Err(e) => self.notify(Severity::Error, &e.notification_text()),
        }
    }

    async fn finish_recording(&self) {
        let (capture, target) = match self.inner.session.begin_stop() {
            Some(pair) => pair,
            None => return,
        };
        let samples = tokio::task::spawn_blocking(move || capture.finish())
            .await
            .unwrap_or_default();
        if !self.inner.session.begin_transcribe() {
            self.inner.session.reset();
            return;
        }
        let result = self.transcribe_and_insert(samples, target).await;
        self.inner.session.reset();
        if let Err(e) = result {
            self.notify(Severity::Error, &e.notification_text());
        }
    }

    async fn transcribe_and_insert(
        &self,
        samples: Vec<f32>,
        target: CapturedTarget,
    ) -> Result<(), AssistError> {
        if samples.is_empty() {
            debug!("dictation: no samples captured, nothing to insert");
            return Ok(());
        }
        let wav = samples_to_wav(&samples).map_err(|e| AssistError::Device(e.to_string()))?;
        let language = self.settings().language;
        let text = self.client().transcribe(wav, &language).await?;
        if text.is_empty() {
            return Ok(());
        }
        let inserted = {
            let mut page = self.inner.page.lock().unwrap();
            surface::insert_at_selection(&mut page, &target.surface, &text, target.selection)
        };
        if inserted {
            self.handle_event(PageEvent::Input {
                target: target.surface.node,
            });
        }
        Ok(())
    }

    /// Re-read the settings store after an external change notification.
    /// Disabling the assistant suspends all visible state immediately.
    pub fn reload_settings(&self) {
        let fresh = self.inner.store.load_or_create();
        match AssistClient::new(&fresh) {
            Ok(client) => *self.inner.client.lock().unwrap() = Arc::new(client),
            Err(e) => warn!("settings reload: keeping previous HTTP client: {}", e),
        }
        let enabled = fresh.enabled;
        *self.inner.settings.lock().unwrap() = fresh;
        if !enabled {
            self.suspend();
        }
    }

    fn suspend(&self) {
        self.inner.debounce.cancel();
        self.inner.toolbar.cancel_hide();
        self.inner.toolbar.hide_now();
        self.inner.session.reset();
        let surface = self.inner.active.lock().unwrap().take();
        if let Some(surface) = surface {
            let mut page = self.inner.page.lock().unwrap();
            if page.is_attached(surface.node) {
                annotate::clear(&mut page, &surface);
            }
        }
    }

    /// Page unload path: stop timers, release the device, remove paint.
    pub fn teardown(&self) {
        self.suspend();
        self.inner.toolbar.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::{FixedMicrophone, UnavailableMicrophone};
    use crate::notify::test_support::RecordingNotifier;
    use crate::page::{shared, NodeId, PageDom, Rect};
    use crate::settings::{get_default_settings, SettingsStore, SETTINGS_FILE_NAME};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        engine: Engine,
        page: SharedPage,
        notifier: RecordingNotifier,
        _dir: TempDir,
    }

    fn build_engine(settings: Settings, microphone: Box<dyn Microphone>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));
        store.save(&settings);

        let page = shared(PageDom::new());
        let notifier = RecordingNotifier::default();
        let engine = Engine::new(
            page.clone(),
            store,
            microphone,
            Box::new(notifier.clone()),
        )
        .unwrap();
        Harness {
            engine,
            page,
            notifier,
            _dir: dir,
        }
    }

    fn fast_settings(endpoint: &str) -> Settings {
        let mut settings = get_default_settings();
        settings.endpoint = endpoint.to_string();
        settings.api_token = "secret".to_string();
        settings.debounce_ms = 30;
        settings
    }

    fn editable(page: &SharedPage, text: &str) -> NodeId {
        let mut page = page.lock().unwrap();
        let root = page.root();
        let div = page.append_element(root, "div");
        page.set_attr(div, "contenteditable", "true");
        page.append_text(div, text);
        div
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_input_paints_annotations_after_debounce() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .and(header("X-Local-Auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [
                    {"start": 8, "end": 11, "message": "Possible typo", "replacements": ["the"]}
                ],
                "time_ms": 12,
                "language_used": "en-US",
                "text_length": 17
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "This is teh text.");

        h.engine.handle_event(PageEvent::Input { target: div });
        settle().await;

        let page = h.page.lock().unwrap();
        let marked: Vec<NodeId> = page
            .children(div)
            .into_iter()
            .filter(|&c| page.tag(c) == Some("mark"))
            .collect();
        assert_eq!(marked.len(), 1);
        assert_eq!(page.text_content(marked[0]), "teh");
        assert_eq!(page.text_content(div), "This is teh text.");
    }

    #[tokio::test]
    async fn test_rapid_edits_collapse_to_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .expect(1)
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "draft");

        for _ in 0..4 {
            h.engine.handle_event(PageEvent::Input { target: div });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        settle().await;
    }

    #[tokio::test]
    async fn test_disabled_engine_ignores_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .expect(0)
            .mount(&server)
            .await;

        let mut settings = fast_settings(&server.uri());
        settings.enabled = false;
        let h = build_engine(settings, Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "draft");

        h.engine.handle_event(PageEvent::Input { target: div });
        settle().await;
        assert!(!h.engine.toolbar_state().visible);
    }

    #[tokio::test]
    async fn test_focus_shows_toolbar_and_blur_hides_after_grace() {
        let server = MockServer::start().await;
        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "text");
        h.page
            .lock()
            .unwrap()
            .set_bounds(div, Rect::new(10.0, 20.0, 200.0, 30.0));

        h.engine.handle_event(PageEvent::FocusIn { target: div });
        assert!(h.engine.toolbar_state().visible);

        h.engine.handle_event(PageEvent::FocusOut { target: div });
        assert!(h.engine.toolbar_state().visible);
        settle().await;
        assert!(!h.engine.toolbar_state().visible);
    }

    #[tokio::test]
    async fn test_refocus_within_grace_keeps_toolbar_visible() {
        let server = MockServer::start().await;
        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "text");

        h.engine.handle_event(PageEvent::FocusIn { target: div });
        h.engine.handle_event(PageEvent::FocusOut { target: div });
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.engine.handle_event(PageEvent::FocusIn { target: div });

        settle().await;
        assert!(h.engine.toolbar_state().visible);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_text_and_triggers_recheck() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rewrite"))
            .and(body_json(json!({"text": "helo world", "mode": "fix"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "Hello world"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .expect(1)
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "helo world");

        h.engine.handle_event(PageEvent::FocusIn { target: div });
        h.engine.rewrite(RewriteMode::Fix).await;
        settle().await;

        assert_eq!(h.page.lock().unwrap().text_content(div), "Hello world");
        assert!(h.engine.toolbar_state().busy_action.is_none());
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_failure_notifies_and_releases_latch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rewrite"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "text to fix");

        h.engine.handle_event(PageEvent::FocusIn { target: div });
        h.engine.rewrite(RewriteMode::Formal).await;

        assert_eq!(h.notifier.messages().len(), 1);
        assert!(h.notifier.messages()[0].contains("HTTP 500"));
        assert!(h.engine.toolbar_state().busy_action.is_none());
        assert_eq!(h.page.lock().unwrap().text_content(div), "text to fix");
    }

    #[tokio::test]
    async fn test_rewrite_result_dropped_when_text_changed_underneath() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rewrite"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"text": "REWRITTEN"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "original");
        h.engine.handle_event(PageEvent::FocusIn { target: div });

        let engine = h.engine.clone();
        let pending = tokio::spawn(async move { engine.rewrite(RewriteMode::Concise).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let mut page = h.page.lock().unwrap();
            let text_node = page.text_nodes(div)[0];
            page.set_text(text_node, "user kept typing");
        }
        pending.await.unwrap();

        assert_eq!(h.page.lock().unwrap().text_content(div), "user kept typing");
    }

    #[tokio::test]
    async fn test_voice_round_trip_inserts_at_recorded_selection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transcribe"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "dictated words"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .mount(&server)
            .await;

        let mic = FixedMicrophone {
            samples: vec![0.1; 1600],
        };
        let h = build_engine(fast_settings(&server.uri()), Box::new(mic));
        let input = {
            let mut page = h.page.lock().unwrap();
            let root = page.root();
            let input = page.append_element(root, "input");
            page.set_attr(input, "value", "before  after");
            page.set_selection(input, 7, 7);
            input
        };

        h.engine.handle_event(PageEvent::FocusIn { target: input });
        h.engine.toggle_voice().await;

        // The caret moves while recording; insertion must use the recorded spot.
        h.page.lock().unwrap().set_selection(input, 0, 0);
        h.engine.toggle_voice().await;
        settle().await;

        assert_eq!(
            h.page.lock().unwrap().attr(input, "value").as_deref(),
            Some("before dictated words after")
        );
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_voice_without_surface_is_refused() {
        let server = MockServer::start().await;
        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));

        h.engine.toggle_voice().await;
        assert_eq!(h.notifier.messages().len(), 1);
        assert!(h.notifier.messages()[0].contains("Focus a text field"));
    }

    #[tokio::test]
    async fn test_voice_device_failure_notifies_and_recovers() {
        let server = MockServer::start().await;
        let h = build_engine(
            fast_settings(&server.uri()),
            Box::new(UnavailableMicrophone),
        );
        let div = editable(&h.page, "text");

        h.engine.handle_event(PageEvent::FocusIn { target: div });
        h.engine.toggle_voice().await;

        assert_eq!(h.notifier.messages().len(), 1);
        assert!(h.notifier.messages()[0].contains("Microphone unavailable"));
        // Still idle: the next toggle attempts a fresh start, not a stop.
        h.engine.toggle_voice().await;
        assert_eq!(h.notifier.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_token_notifies_once_for_repeated_checks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .expect(0)
            .mount(&server)
            .await;

        let mut settings = fast_settings(&server.uri());
        settings.api_token = String::new();
        let h = build_engine(settings, Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "text one");

        h.engine.handle_event(PageEvent::Input { target: div });
        settle().await;
        h.engine.handle_event(PageEvent::Input { target: div });
        settle().await;

        assert_eq!(h.notifier.messages().len(), 1);
        assert!(h.notifier.messages()[0].contains("not configured"));
    }

    #[tokio::test]
    async fn test_reload_settings_disabling_clears_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [{"start": 0, "end": 4, "message": "x"}]
            })))
            .mount(&server)
            .await;

        let h = build_engine(fast_settings(&server.uri()), Box::new(FixedMicrophone { samples: vec![] }));
        let div = editable(&h.page, "teh text");
        h.engine.handle_event(PageEvent::FocusIn { target: div });
        h.engine.handle_event(PageEvent::Input { target: div });
        settle().await;
        assert!(h.engine.toolbar_state().visible);

        let mut disabled = h.engine.settings();
        disabled.enabled = false;
        let store = SettingsStore::new(h._dir.path().join(SETTINGS_FILE_NAME));
        store.save(&disabled);
        h.engine.reload_settings();

        assert!(!h.engine.toolbar_state().visible);
        assert!(h.engine.active_surface().is_none());
        let page = h.page.lock().unwrap();
        assert!(page
            .children(div)
            .iter()
            .all(|&c| page.tag(c) != Some("mark")));
    }
}
