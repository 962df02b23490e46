use std::sync::Arc;

use eframe::egui::{vec2, Color32, Rect, Rounding, Sense, Stroke, Ui};
use egui_modal::Modal;
use futures::StreamExt;
use itertools::Itertools;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    capture::{scan_symbologies, CaptureService, CaptureSession, MetadataBatch},
    feedback::FeedbackCue,
};

use super::state_worker::StateWorker;

const FAILURE_TITLE: &str = "Scanning not supported";
const FAILURE_BODY: &str = "Your device does not support scanning a code from an item. \
    Please use a device with a camera.";

/// One-method contract for receiving a decoded value. The scanner screen
/// holds this as a shared handle and never owns the receiving screen.
pub(crate) trait ScanResultSink: Send + Sync {
    fn on_scan_result(&self, text: String);
}

impl<F: Fn(String) + Send + Sync> ScanResultSink for F {
    fn on_scan_result(&self, text: String) {
        self(text)
    }
}

/// Lifecycle of one scanner activation. Reactivation starts over from a
/// fresh `Idle` state; there is no way back to `Scanning` from the
/// terminal-bound phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    Idle,
    Scanning,
    Found,
    Failure,
    Dismissed,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) phase: Phase,
    session: Option<CaptureSession>,
    failure_message: Option<String>,
    present_failure: bool,
}

#[derive(Debug)]
pub(crate) enum Action {
    /// The screen became the visible screen.
    Activate,
    /// Pipeline configuration finished.
    Configured(eyre::Result<CaptureSession>),
    /// The pipeline delivered decoded objects, or failed mid-stream.
    MetadataDecoded(eyre::Result<MetadataBatch>),
    /// The window regained focus while this screen is visible.
    Resume,
    /// The window lost focus while this screen is visible.
    Pause,
    /// The user asked to leave, or a scan concluded.
    Dismiss,
}

pub(crate) struct ScannerScreen {
    pub(crate) worker: StateWorker<Action>,
    pub(crate) service: Arc<dyn CaptureService>,
    pub(crate) feedback: Arc<dyn FeedbackCue>,
    pub(crate) result_sink: Arc<dyn ScanResultSink>,
}

impl ScannerScreen {
    pub(crate) fn update(&self, state: &mut State, action: Action) {
        self.worker.apply(state, action, |state, action| match action {
            Action::Activate => {
                if state.phase != Phase::Idle {
                    tracing::warn!(phase = ?state.phase, "ignoring activation outside idle");
                    return;
                }

                let service = self.service.clone();

                self.worker.perform(async move {
                    Action::Configured(
                        CaptureSession::configure(service.as_ref(), scan_symbologies()).await,
                    )
                });
            }
            Action::Configured(Ok(mut session)) => {
                if state.phase != Phase::Idle {
                    // The user already left; the pipeline must not outlive
                    // the screen.
                    tracing::debug!("dropping pipeline configured after the screen was left");
                    return;
                }

                if let Some(events) = session.take_events() {
                    self.worker.stream(async move {
                        ReceiverStream::new(events).map(Action::MetadataDecoded)
                    });
                }

                session.start();
                state.session = Some(session);
                state.phase = Phase::Scanning;
            }
            Action::Configured(Err(report)) => {
                tracing::error!("could not configure capture pipeline: {report:?}");
                state.phase = Phase::Failure;
                state.failure_message = Some(report.to_string());
                state.present_failure = true;
            }
            Action::MetadataDecoded(Ok(objects)) => {
                if state.phase != Phase::Scanning {
                    tracing::debug!("ignoring decoded metadata outside scanning");
                    return;
                }

                // One decode per activation: halt the pipeline before
                // looking at the batch.
                if let Some(session) = &state.session {
                    session.stop();
                }
                state.phase = Phase::Found;

                // Only the first object in a batch is considered.
                match objects.into_iter().next().and_then(|object| object.value) {
                    Some(value) => {
                        self.feedback.scan_succeeded();
                        self.result_sink.on_scan_result(value);
                    }
                    None => {
                        tracing::debug!("decoded object carried no value, dismissing without result");
                    }
                }

                self.worker.send(Action::Dismiss);
            }
            Action::MetadataDecoded(Err(report)) => {
                if state.phase != Phase::Scanning {
                    return;
                }

                tracing::error!("capture pipeline failed: {report:?}");

                // Stop before surfacing the failure; the session never
                // outlives this activation.
                if let Some(session) = state.session.take() {
                    session.stop();
                }

                state.phase = Phase::Failure;
                state.failure_message = Some(report.to_string());
                state.present_failure = true;
            }
            Action::Resume => {
                if state.phase == Phase::Scanning {
                    if let Some(session) = &state.session {
                        session.start();
                    }
                }
            }
            Action::Pause => {
                if let Some(session) = &state.session {
                    session.stop();
                }
            }
            Action::Dismiss => {
                // Stopped before the screen reports itself dismissed, on
                // success and failure paths alike.
                if let Some(session) = state.session.take() {
                    session.stop();
                }
                state.phase = Phase::Dismissed;
            }
        });
    }

    pub(crate) fn render(&self, state: &mut State, ui: &mut Ui) {
        let modal = Modal::new(ui.ctx(), "scanner_failure");

        modal.show(|ui| {
            modal.title(ui, FAILURE_TITLE);
            modal.frame(ui, |ui| {
                modal.body(ui, FAILURE_BODY);
            });
            modal.buttons(ui, |ui| {
                modal.button(ui, "OK");
            });
        });

        if state.present_failure {
            state.present_failure = false;
            modal.open();
        }

        ui.vertical_centered(|ui| {
            ui.add_space(20.0);
            self.viewfinder(state, ui);
            ui.add_space(10.0);

            match state.phase {
                Phase::Idle => {
                    ui.label("Opening capture device…");
                }
                Phase::Scanning => {
                    if let Some(session) = &state.session {
                        ui.label(format!("Scanning on {}", session.device().name));
                    }
                    ui.label(format!(
                        "Looking for {}",
                        scan_symbologies().iter().map(|s| s.to_string()).join(", ")
                    ));
                }
                Phase::Found => {
                    ui.label("Code found");
                }
                Phase::Failure => {
                    if let Some(message) = &state.failure_message {
                        ui.label(message.as_str());
                    }
                }
                Phase::Dismissed => (),
            }

            ui.add_space(10.0);

            if ui.button("Cancel").clicked() {
                self.worker.send(Action::Dismiss);
            }
        });
    }

    fn viewfinder(&self, state: &State, ui: &mut Ui) {
        let (rect, _) = ui.allocate_exact_size(vec2(320.0, 240.0), Sense::hover());
        let painter = ui.painter_at(rect);

        painter.rect_filled(rect, Rounding::same(4.0), Color32::BLACK);

        if state.phase == Phase::Scanning {
            let reticle = Rect::from_center_size(rect.center(), vec2(240.0, 120.0));
            painter.rect_stroke(reticle, Rounding::same(2.0), Stroke::new(2.0, Color32::GREEN));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        capture::{
            mock::{PipelineHandles, Script, ScriptedCaptureService},
            MetadataObject, Symbology,
        },
        feedback::testing::RecordingCue,
    };

    use super::*;

    fn object(symbology: Symbology, value: Option<&str>) -> MetadataObject {
        MetadataObject {
            symbology,
            value: value.map(str::to_string),
        }
    }

    struct Harness {
        screen: ScannerScreen,
        state: State,
        rx: mpsc::UnboundedReceiver<Action>,
        results: Arc<Mutex<Vec<String>>>,
        cue: Arc<RecordingCue>,
        handles: Arc<Mutex<Option<PipelineHandles>>>,
    }

    impl Harness {
        fn new(service: ScriptedCaptureService) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker =
                StateWorker::new(tokio::runtime::Handle::current(), tx, CancellationToken::new());
            let handles = service.handles();
            let results = Arc::new(Mutex::new(Vec::new()));
            let cue = Arc::new(RecordingCue::default());

            let result_sink: Arc<dyn ScanResultSink> = {
                let results = results.clone();
                Arc::new(move |text: String| results.lock().unwrap().push(text))
            };

            Harness {
                screen: ScannerScreen {
                    worker,
                    service: Arc::new(service),
                    feedback: cue.clone(),
                    result_sink,
                },
                state: State::default(),
                rx,
                results,
                cue,
                handles,
            }
        }

        fn apply(&mut self, action: Action) {
            self.screen.update(&mut self.state, action);
        }

        async fn next_action(&mut self) -> Action {
            tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for action")
                .expect("action channel closed")
        }

        async fn step(&mut self) {
            let action = self.next_action().await;
            self.apply(action);
        }

        /// Activate and drive the screen into `Scanning`.
        async fn activate(&mut self) {
            self.apply(Action::Activate);
            self.step().await;
            assert_eq!(self.state.phase, Phase::Scanning);
        }

        fn pipeline(&self) -> PipelineHandles {
            self.handles
                .lock()
                .unwrap()
                .take()
                .expect("no pipeline was attached")
        }

        fn results(&self) -> Vec<String> {
            self.results.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn scanned_value_reaches_the_sink_untransformed() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![object(
            Symbology::Pdf417,
            Some("ABC123"),
        )])]));

        harness.activate().await;
        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Found);
        assert_eq!(harness.results(), ["ABC123"]);
        assert_eq!(harness.cue.count(), 1);
    }

    #[tokio::test]
    async fn session_is_stopped_before_the_screen_dismisses() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![object(
            Symbology::Ean13,
            Some("5901234123457"),
        )])]));

        harness.activate().await;
        let pipeline = harness.pipeline();

        harness.step().await;

        // Halted as soon as the decode landed, before the dismissal runs.
        assert_eq!(harness.state.phase, Phase::Found);
        assert!(!*pipeline.running.borrow());

        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Dismissed);
        assert!(pipeline.token.is_cancelled());
    }

    #[tokio::test]
    async fn pipeline_is_configured_for_the_scan_symbologies() {
        let mut harness = Harness::new(ScriptedCaptureService::new(Vec::new()));

        harness.activate().await;

        assert_eq!(harness.pipeline().symbologies, scan_symbologies());
    }

    #[tokio::test]
    async fn valueless_decode_dismisses_without_a_result() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![object(
            Symbology::Ean13,
            None,
        )])]));

        harness.activate().await;
        harness.step().await;
        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Dismissed);
        assert!(harness.results().is_empty());
        assert_eq!(harness.cue.count(), 0);
    }

    #[tokio::test]
    async fn only_the_first_object_in_a_batch_counts() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![
            object(Symbology::Ean8, None),
            object(Symbology::Pdf417, Some("SECOND")),
        ])]));

        harness.activate().await;
        harness.step().await;

        assert!(harness.results().is_empty());
        assert_eq!(harness.cue.count(), 0);
    }

    #[tokio::test]
    async fn missing_device_presents_the_failure_notification() {
        let mut harness = Harness::new(ScriptedCaptureService::without_device());

        harness.apply(Action::Activate);
        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Failure);
        assert!(harness.state.present_failure);
        assert!(harness.results().is_empty());
    }

    #[tokio::test]
    async fn attach_failure_presents_the_failure_notification() {
        let mut harness = Harness::new(ScriptedCaptureService::failing_attach("input is busy"));

        harness.apply(Action::Activate);
        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Failure);
        assert_eq!(harness.state.failure_message.as_deref(), Some("input is busy"));
    }

    #[tokio::test]
    async fn runtime_capture_errors_take_the_failure_path() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Err(eyre::eyre!(
            "device unplugged"
        ))]));

        harness.activate().await;
        let pipeline = harness.pipeline();

        harness.step().await;

        assert_eq!(harness.state.phase, Phase::Failure);
        assert!(harness.state.present_failure);
        assert!(pipeline.token.is_cancelled());
        assert!(harness.results().is_empty());
    }

    #[tokio::test]
    async fn pause_and_resume_gate_the_pipeline_idempotently() {
        let script: Script = vec![Ok(vec![object(Symbology::Ean13, Some("late"))])];
        let mut harness = Harness::new(ScriptedCaptureService::new(script));

        harness.activate().await;
        let pipeline = harness.pipeline();

        harness.apply(Action::Pause);
        harness.apply(Action::Pause);
        assert!(!*pipeline.running.borrow());

        harness.apply(Action::Resume);
        harness.apply(Action::Resume);
        assert!(*pipeline.running.borrow());
        assert_eq!(harness.state.phase, Phase::Scanning);
    }

    #[tokio::test]
    async fn dismissing_while_configuring_never_leaves_a_pipeline_running() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![object(
            Symbology::Ean13,
            Some("too late"),
        )])]));

        harness.apply(Action::Activate);
        harness.apply(Action::Dismiss);
        assert_eq!(harness.state.phase, Phase::Dismissed);

        // Configuration finishes after the user already left.
        harness.step().await;

        let pipeline = harness.pipeline();
        assert!(pipeline.token.is_cancelled());
        assert!(harness.results().is_empty());
    }

    #[tokio::test]
    async fn reactivation_scans_again_from_a_fresh_state() {
        let service = ScriptedCaptureService::with_scripts(vec![
            vec![Ok(vec![object(Symbology::Ean13, Some("first"))])],
            vec![Ok(vec![object(Symbology::Ean13, Some("second"))])],
        ]);
        let mut harness = Harness::new(service);

        harness.activate().await;
        harness.step().await;
        harness.step().await;
        assert_eq!(harness.state.phase, Phase::Dismissed);

        harness.state = State::default();
        assert_eq!(harness.state.phase, Phase::Idle);

        harness.activate().await;
        harness.step().await;
        harness.step().await;

        assert_eq!(harness.results(), ["first", "second"]);
    }

    #[tokio::test]
    async fn metadata_after_found_is_ignored() {
        let mut harness = Harness::new(ScriptedCaptureService::new(vec![Ok(vec![object(
            Symbology::Ean13,
            Some("kept"),
        )])]));

        harness.activate().await;
        harness.step().await;
        assert_eq!(harness.state.phase, Phase::Found);

        // A second batch that slipped through must not produce a second
        // result or another cue.
        harness.apply(Action::MetadataDecoded(Ok(vec![object(
            Symbology::Ean13,
            Some("dropped"),
        )])));

        assert_eq!(harness.results(), ["kept"]);
        assert_eq!(harness.cue.count(), 1);
    }
}
