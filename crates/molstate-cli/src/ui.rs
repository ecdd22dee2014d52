use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use molstate::engine::cell::CellStatus;
use molstate::engine::progress::{Progress, ProgressReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::warn;

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

pub struct UiManager {
    mp: Arc<MultiProgress>,
    state: BarState,
    event_receiver: mpsc::Receiver<UiEvent>,
    shutdown_receiver: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

#[derive(Default)]
struct BarState {
    active_bar: Option<ProgressBar>,
    base_message: String,
    failures: u64,
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, event_receiver) = mpsc::channel(1024);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mp = Arc::new(MultiProgress::new());
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            state: BarState::default(),
            event_receiver,
            shutdown_receiver,
            _sentinel_bar,
        };

        (manager, event_sender, shutdown_sender)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.event_receiver.recv() => {
                    self.handle_event(event);
                }
                result = self.shutdown_receiver.changed() => {
                    if result.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }
            }
        }
        while let Ok(event) = self.event_receiver.try_recv() {
            self.handle_event(event);
        }
        if let Some(bar) = self.state.active_bar.take() {
            bar.finish_and_clear();
        }
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => {
                self.mp.println(msg).ok();
            }
            UiEvent::Progress(progress) => self.handle_progress(progress),
        }
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::TransactionStart { edits } => {
                if let Some(bar) = self.state.active_bar.take() {
                    bar.finish_and_clear();
                }

                let name = format!(
                    "Applying transaction ({} edit{})",
                    edits,
                    if edits == 1 { "" } else { "s" }
                );
                let pb = self.mp.add(ProgressBar::new_spinner());
                pb.enable_steady_tick(Duration::from_millis(80));
                pb.set_style(Self::spinner_style());
                pb.set_message(name.clone());

                self.state.active_bar = Some(pb);
                self.state.base_message = name;
                self.state.failures = 0;
            }
            Progress::UpdateStart { total_refs } => {
                if let Some(bar) = self.state.active_bar.as_ref() {
                    bar.set_style(Self::bar_style());
                    bar.set_length(total_refs);
                    bar.set_position(0);
                    bar.disable_steady_tick();
                }
            }
            Progress::RefResolved { status, .. } => {
                if status == CellStatus::Error {
                    self.state.failures += 1;
                }
                if let Some(bar) = self.state.active_bar.as_ref() {
                    bar.inc(1);
                    if self.state.failures > 0 {
                        bar.set_message(format!(
                            "{} ({} failed)",
                            self.state.base_message, self.state.failures
                        ));
                    }
                }
            }
            Progress::UpdateFinish => {
                if let Some(bar) = self.state.active_bar.take() {
                    bar.finish_and_clear();
                }

                let mark = if self.state.failures > 0 { "✗" } else { "✓" };
                self.mp
                    .println(format!("{} {}", mark, self.state.base_message))
                    .ok();

                self.state.base_message.clear();
                self.state.failures = 0;
            }
            Progress::Message(msg) => {
                self.mp.println(format!("  {}", msg)).ok();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("Invalid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<45} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
            .expect("Invalid template")
            .with_key(
                "elapsed",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.elapsed().as_secs_f64());
                },
            )
            .progress_chars("━╸ ")
    }
}

#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn reporter(&self) -> ProgressReporter {
        let sender = self.sender.clone();
        ProgressReporter::with_callback(move |progress: Progress| {
            if let Err(e) = sender.try_send(UiEvent::Progress(progress)) {
                warn!("Failed to send progress update to UI channel: {}", e);
            }
        })
    }
}
