use std::sync::Arc;

use eframe::{egui::CentralPanel, run_native, App, NativeOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    capture::{engine::EngineCaptureService, CaptureService},
    config::Config,
    feedback::{FeedbackCue, LogCue},
};

use self::state_worker::StateWorker;

mod main_screen;
mod scanner_screen;
mod state_worker;

/// Screens the navigation stack can hold. `Main` is always at the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Main,
    Scanner,
}

#[derive(Debug)]
struct State {
    nav: Vec<Screen>,
    main: main_screen::State,
    scanner: scanner_screen::State,
}

impl Default for State {
    fn default() -> Self {
        Self {
            nav: vec![Screen::Main],
            main: main_screen::State::default(),
            scanner: scanner_screen::State::default(),
        }
    }
}

#[derive(Debug)]
enum Action {
    Main(main_screen::Action),
    Scanner(scanner_screen::Action),
}

struct Application {
    state: State,
    worker: StateWorker<Action>,
    rx: mpsc::UnboundedReceiver<Action>,
    focused: bool,

    main_screen: main_screen::MainScreen,
    scanner_screen: scanner_screen::ScannerScreen,
}

impl Application {
    fn new(
        worker: StateWorker<Action>,
        rx: mpsc::UnboundedReceiver<Action>,
        service: Arc<dyn CaptureService>,
        feedback: Arc<dyn FeedbackCue>,
    ) -> Self {
        // The scanner screen holds the result callback as a non-owning
        // handle; delivering a value just routes it back onto the action
        // queue.
        let result_sink: Arc<dyn scanner_screen::ScanResultSink> = {
            let main_worker = worker.scoped(Action::Main);
            Arc::new(move |text: String| main_worker.send(main_screen::Action::ScanResult(text)))
        };

        Application {
            state: State::default(),
            main_screen: main_screen::MainScreen {
                worker: worker.scoped(Action::Main),
            },
            scanner_screen: scanner_screen::ScannerScreen {
                worker: worker.scoped(Action::Scanner),
                service,
                feedback,
                result_sink,
            },
            worker,
            rx,
            focused: true,
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Main(action) => {
                let tapped = matches!(action, main_screen::Action::ScanTapped);

                self.main_screen.update(&mut self.state.main, action);

                if tapped {
                    self.push_scanner();
                }
            }
            Action::Scanner(action) => {
                let dismissed = matches!(action, scanner_screen::Action::Dismiss);

                self.scanner_screen.update(&mut self.state.scanner, action);

                // Pop only after the screen has shut its pipeline down.
                if dismissed && self.state.nav.last() == Some(&Screen::Scanner) {
                    self.state.nav.pop();
                }
            }
        }
    }

    fn push_scanner(&mut self) {
        if self.state.nav.last() == Some(&Screen::Scanner) {
            // Already on top; the stack absorbs repeated taps.
            return;
        }

        // Every activation starts over from idle.
        self.state.scanner = scanner_screen::State::default();
        self.state.nav.push(Screen::Scanner);
        self.worker
            .send(Action::Scanner(scanner_screen::Action::Activate));
    }
}

impl App for Application {
    fn update(&mut self, ctx: &eframe::egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(action) = self.rx.try_recv() {
            self.handle_action(action);
        }

        // Losing and regaining window focus is the desktop analog of the
        // screen disappearing and reappearing.
        let focused = ctx.input(|i| i.viewport().focused.unwrap_or(true));
        if focused != self.focused {
            self.focused = focused;

            if self.state.nav.last() == Some(&Screen::Scanner) {
                let action = if focused {
                    scanner_screen::Action::Resume
                } else {
                    scanner_screen::Action::Pause
                };
                self.worker.send(Action::Scanner(action));
            }
        }

        CentralPanel::default().show(ctx, |ui| match self.state.nav.last() {
            Some(Screen::Scanner) => self.scanner_screen.render(&mut self.state.scanner, ui),
            _ => self.main_screen.render(&mut self.state.main, ui),
        });

        ctx.request_repaint();
    }
}

pub(crate) fn show_ui() -> eyre::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let config = rt.block_on(Config::load_or_init()).unwrap_or_else(|err| {
        tracing::warn!("could not load config, using defaults: {err:?}");
        Config::default()
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let worker = StateWorker::new(rt.handle().clone(), tx, token.clone());

    let service: Arc<dyn CaptureService> = Arc::new(EngineCaptureService::new(
        config.capture_device.clone(),
        config.baud_rate,
    ));
    let feedback: Arc<dyn FeedbackCue> = Arc::new(LogCue);

    run_native(
        "camscan",
        NativeOptions::default(),
        Box::new(move |cc| {
            worker.set_egui_ctx(cc.egui_ctx.clone());
            Box::new(Application::new(worker, rx, service, feedback))
        }),
    )
    .map_err(|err| eyre::eyre!("egui error: {err}"))?;

    token.cancel();

    Ok(())
}
