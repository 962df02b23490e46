use eframe::egui::{Align, RichText, TextEdit, Ui};

use super::state_worker::StateWorker;

/// Text shown before any scan completes.
const PLACEHOLDER_TEXT: &str = "Default";

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) scanned_text: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            scanned_text: PLACEHOLDER_TEXT.to_string(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Action {
    /// The scan button was tapped; navigation is the host's concern.
    ScanTapped,
    /// A decoded value arrived through the result callback.
    ScanResult(String),
}

pub(crate) struct MainScreen {
    pub(crate) worker: StateWorker<Action>,
}

impl MainScreen {
    pub(crate) fn update(&self, state: &mut State, action: Action) {
        self.worker.apply(state, action, |state, action| match action {
            Action::ScanTapped => (),
            Action::ScanResult(text) => {
                // Replace whatever is displayed, placeholder included.
                state.scanned_text = text;
            }
        });
    }

    pub(crate) fn render(&self, state: &mut State, ui: &mut Ui) {
        ui.vertical_centered(|ui| {
            ui.add_space(40.0);

            if ui
                .button(RichText::new("Scan Bar Code").size(25.0))
                .clicked()
            {
                self.worker.send(Action::ScanTapped);
            }

            ui.add_space(20.0);

            ui.add(
                TextEdit::singleline(&mut state.scanned_text)
                    .horizontal_align(Align::Center)
                    .desired_width(260.0),
            );
        });
    }
}
