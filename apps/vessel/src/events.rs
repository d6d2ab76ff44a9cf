//! Event handling and progress display

use console::Style;
use vessel_events::{AppEvent, InstallEvent};
use vessel_types::InstallState;

use crate::logging::log_event;

/// Forwards every event to tracing and, for people, prints install progress
pub struct EventHandler {
    /// Print progress lines to stderr
    progress: bool,
    active: Style,
    done: Style,
    failed: Style,
}

impl EventHandler {
    pub fn new(progress: bool, colors: bool) -> Self {
        let style = |s: Style| s.force_styling(colors);
        Self {
            progress,
            active: style(Style::new().cyan()),
            done: style(Style::new().green()),
            failed: style(Style::new().red().bold()),
        }
    }

    pub fn handle_event(&mut self, event: &AppEvent) {
        log_event(event);
        if !self.progress {
            return;
        }

        if let AppEvent::Install(install) = event {
            match install {
                InstallEvent::StateChanged { id, state } => match state {
                    InstallState::Building => {
                        eprintln!("{} {id}", self.active.apply_to("building"));
                    }
                    InstallState::Frozen => {
                        eprintln!("{} {id}", self.done.apply_to("installed"));
                    }
                    _ => {}
                },
                InstallEvent::Failed { id, failure } => {
                    eprintln!("{} {id}: {}", self.failed.apply_to("failed"), failure.message);
                }
                InstallEvent::Skipped { id, dependency } => {
                    eprintln!(
                        "{} {id} (dependency {dependency} failed)",
                        self.failed.apply_to("skipped")
                    );
                }
                _ => {}
            }
        }
    }
}
