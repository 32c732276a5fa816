use crate::sync::SyncSignal;
use crate::ui::{Icons, theme};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::thread;
use std::time::{Duration, Instant};

/// Progress bar driven by sync signals arriving over a channel. Hidden when
/// stdout is not a terminal.
pub struct SyncProgress {
    bar: ProgressBar,
    started: Instant,
    handle: Option<thread::JoinHandle<Option<SyncSignal>>>,
}

impl SyncProgress {
    pub fn new(entity: &str) -> (Self, crossbeam::channel::Sender<SyncSignal>) {
        let (tx, rx) = crossbeam::channel::unbounded::<SyncSignal>();

        let bar = if console::Term::stdout().is_term() {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(format!("Syncing {}", entity));
        bar.enable_steady_tick(Duration::from_millis(100));

        let bar_clone = bar.clone();
        let handle = thread::spawn(move || {
            let mut last = None;
            for signal in rx {
                match &signal {
                    SyncSignal::Begin { entity, total } if *total > 0 => {
                        bar_clone.set_length(*total);
                        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}") {
                            bar_clone.set_style(style);
                        }
                        bar_clone.set_message(format!("Syncing {}", entity));
                    }
                    SyncSignal::Begin { .. } => {}
                    SyncSignal::Progress { processed, .. } => {
                        bar_clone.set_position(*processed);
                    }
                    SyncSignal::End { processed, .. } => {
                        bar_clone.set_position(*processed);
                        bar_clone.finish_and_clear();
                    }
                }
                last = Some(signal);
            }
            last
        });

        (
            Self {
                bar,
                started: Instant::now(),
                handle: Some(handle),
            },
            tx,
        )
    }

    /// Wait for the signal thread once every sender is dropped and return
    /// the last signal it saw
    pub fn finish(mut self) -> Option<SyncSignal> {
        let last = self.handle.take().and_then(|h| h.join().ok()).flatten();
        self.bar.finish_and_clear();
        println!(
            "{} {}",
            Icons::CLOCK.style(theme().dim.clone()),
            format!("Done in {}", HumanDuration(self.started.elapsed())).style(theme().dim.clone())
        );
        last
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        Self { pb }
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}
