//! Progress reporting driven by the orchestrator's turn events

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use roundtable_application::TurnEvent;
use roundtable_domain::Status;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Renders turn progress
pub trait ProgressNotifier: Send + Sync {
    fn on_event(&self, event: &TurnEvent);
}

/// Feed `events` to `notifier` until the channel closes.
///
/// Lagging only skips frames of the display, so lag is ignored.
pub fn spawn_progress(
    mut events: broadcast::Receiver<TurnEvent>,
    notifier: Arc<dyn ProgressNotifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => notifier.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[derive(Default)]
struct BarState {
    models: usize,
    round: Option<ProgressBar>,
    spinner: Option<ProgressBar>,
}

/// Reports progress with one bar per round and a spinner for judge and synthesis calls
pub struct ProgressReporter {
    multi: MultiProgress,
    state: Mutex<BarState>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(BarState::default()),
        }
    }

    fn round_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BarState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_spinner(&self, state: &mut BarState, prefix: &str, message: String) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(Self::spinner_style());
        pb.set_prefix(prefix.to_string());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        if let Some(previous) = state.spinner.replace(pb) {
            previous.finish_and_clear();
        }
    }

    fn finish_spinner(state: &mut BarState, message: String) {
        if let Some(pb) = state.spinner.take() {
            pb.finish_with_message(message);
        }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier for ProgressReporter {
    fn on_event(&self, event: &TurnEvent) {
        let mut state = self.state();
        match event {
            TurnEvent::TurnStarted { mode, models, .. } => {
                state.models = models.len();
                self.println(format!(
                    "{} {} with {}",
                    "->".cyan(),
                    mode.to_string().bold(),
                    models.join(", ")
                ));
            }
            TurnEvent::RoundStarted {
                round_number,
                label,
                ..
            } => {
                let pb = self.multi.add(ProgressBar::new(state.models as u64));
                pb.set_style(Self::round_style());
                pb.set_prefix(format!("Round {}: {}", round_number, label));
                pb.set_message("Starting...");
                pb.enable_steady_tick(Duration::from_millis(120));
                if let Some(previous) = state.round.replace(pb) {
                    previous.finish_and_clear();
                }
            }
            TurnEvent::StreamStarted { model, .. } => {
                if let Some(pb) = &state.round {
                    pb.set_message(format!("{}...", model));
                }
            }
            TurnEvent::StreamFinished {
                model,
                status,
                carried_forward,
                ..
            } => {
                if let Some(pb) = &state.round {
                    let mark = match (status, carried_forward) {
                        (Status::Complete, _) => "v".green(),
                        (_, true) => "~".yellow(),
                        _ => "x".red(),
                    };
                    pb.set_message(format!("{} {}", mark, model));
                    pb.inc(1);
                }
            }
            TurnEvent::RoundFinished {
                completed, total, ..
            } => {
                if let Some(pb) = state.round.take() {
                    let summary = format!("{}/{} answered", completed, total);
                    let summary = if completed == total {
                        summary.green()
                    } else {
                        summary.yellow()
                    };
                    pb.finish_with_message(summary.to_string());
                }
            }
            TurnEvent::ConvergenceChecked { check, .. } => {
                let verdict = if check.has_converged() {
                    "converged".green()
                } else {
                    "not converged".yellow()
                };
                self.println(format!("  {} judge: {} {}", "->".cyan(), verdict, check.reason));
            }
            TurnEvent::EnsembleAnalyzing { judge } => {
                self.start_spinner(&mut state, "Vote", format!("{} is weighing answers", judge));
            }
            TurnEvent::EnsembleAnalyzed { result } => {
                Self::finish_spinner(
                    &mut state,
                    format!("confidence {}%", result.confidence),
                );
            }
            TurnEvent::SynthesisStarted { model } => {
                self.start_spinner(&mut state, "Synthesis", format!("{} is writing", model));
            }
            TurnEvent::SynthesisFinished { status, error } => {
                let message = match status {
                    Status::Complete => "done".green().to_string(),
                    _ => format!("{} {}", "failed:".red(), error.as_deref().unwrap_or("")),
                };
                Self::finish_spinner(&mut state, message);
            }
            TurnEvent::TurnFailed { kind, message, .. } => {
                if let Some(pb) = state.round.take() {
                    pb.abandon();
                }
                if let Some(pb) = state.spinner.take() {
                    pb.abandon();
                }
                self.println(format!("{} {} ({})", "x".red(), message, kind.as_str()));
            }
            TurnEvent::TitleUpdated { title, .. } => {
                self.println(format!("{} {}", "Title:".dimmed(), title));
            }
            TurnEvent::StreamDelta { .. }
            | TurnEvent::SynthesisDelta { .. }
            | TurnEvent::TurnFinished { .. }
            | TurnEvent::SummaryUpdated { .. } => {}
        }
    }
}

/// Simple text-based progress (no fancy UI)
pub struct SimpleProgress;

impl SimpleProgress {
    /// The line printed for `event`, if any
    pub fn line(event: &TurnEvent) -> Option<String> {
        match event {
            TurnEvent::RoundStarted {
                round_number,
                label,
                ..
            } => Some(format!(
                "{} {}",
                "->".cyan(),
                format!("Round {}: {}", round_number, label).bold()
            )),
            TurnEvent::StreamFinished {
                model,
                status,
                error,
                carried_forward,
                ..
            } => Some(match (status, carried_forward) {
                (Status::Complete, _) => format!("  {} {}", "v".green(), model),
                (_, true) => format!("  {} {} (carried forward)", "~".yellow(), model),
                _ => format!(
                    "  {} {} (failed: {})",
                    "x".red(),
                    model,
                    error.as_deref().unwrap_or("unknown")
                ),
            }),
            TurnEvent::ConvergenceChecked { check, .. } => Some(format!(
                "  judge: {}",
                if check.has_converged() {
                    "converged"
                } else {
                    "not converged"
                }
            )),
            TurnEvent::EnsembleAnalyzing { judge } => Some(format!(
                "{} {} ({})",
                "->".cyan(),
                "Ensemble vote".bold(),
                judge
            )),
            TurnEvent::SynthesisStarted { model } => Some(format!(
                "{} {} ({})",
                "->".cyan(),
                "Synthesis".bold(),
                model
            )),
            TurnEvent::TurnFailed { message, .. } => {
                Some(format!("{} {}", "x".red(), message))
            }
            _ => None,
        }
    }
}

impl ProgressNotifier for SimpleProgress {
    fn on_event(&self, event: &TurnEvent) {
        if let Some(line) = Self::line(event) {
            eprintln!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_domain::{ConvergenceCheck, ErrorKind, TurnMode};

    struct Recorder(Mutex<Vec<&'static str>>);

    impl ProgressNotifier for Recorder {
        fn on_event(&self, event: &TurnEvent) {
            self.0.lock().unwrap().push(event.event_type());
        }
    }

    fn finished(status: Status, carried_forward: bool) -> TurnEvent {
        TurnEvent::StreamFinished {
            round_index: 0,
            stream_index: 0,
            model: "gpt-4o".into(),
            status,
            error: Some("rate limited".into()),
            duration_ms: None,
            carried_forward,
        }
    }

    #[tokio::test]
    async fn test_spawn_progress_forwards_until_closed() {
        let (tx, rx) = broadcast::channel(16);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handle = spawn_progress(rx, recorder.clone());

        tx.send(TurnEvent::SynthesisStarted { model: "m".into() })
            .unwrap();
        tx.send(TurnEvent::SynthesisDelta { delta: "x".into() })
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["synthesis_started", "synthesis_delta"]
        );
    }

    #[test]
    fn test_simple_progress_lines() {
        let line = SimpleProgress::line(&finished(Status::Error, false)).unwrap();
        assert!(line.contains("failed: rate limited"));

        let line = SimpleProgress::line(&finished(Status::Error, true)).unwrap();
        assert!(line.contains("carried forward"));

        let line = SimpleProgress::line(&TurnEvent::ConvergenceChecked {
            round_index: 1,
            check: ConvergenceCheck::not_converged("split", ""),
        })
        .unwrap();
        assert!(line.contains("not converged"));

        assert!(SimpleProgress::line(&TurnEvent::SynthesisDelta { delta: "x".into() }).is_none());
    }

    #[test]
    fn test_reporter_handles_a_whole_turn() {
        let reporter = ProgressReporter::new();
        let events = vec![
            TurnEvent::TurnStarted {
                conversation_id: "c".into(),
                turn_id: "t".into(),
                mode: TurnMode::Debate,
                models: vec!["a".into(), "b".into()],
            },
            TurnEvent::RoundStarted {
                round_index: 0,
                round_number: 1,
                label: "Initial positions".into(),
            },
            finished(Status::Complete, false),
            finished(Status::Error, false),
            TurnEvent::RoundFinished {
                round_index: 0,
                status: Status::Complete,
                completed: 1,
                total: 2,
            },
            TurnEvent::SynthesisStarted { model: "a".into() },
            TurnEvent::TurnFailed {
                turn_id: "t".into(),
                kind: ErrorKind::Cancelled,
                message: "cancelled".into(),
            },
        ];
        for event in &events {
            reporter.on_event(event);
        }
        let state = reporter.state();
        assert_eq!(state.models, 2);
        assert!(state.round.is_none());
        assert!(state.spinner.is_none());
    }
}
