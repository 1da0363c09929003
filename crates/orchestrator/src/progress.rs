//! Spinner shown while a phase runs.
//!
//! The reporter drives its own tick task instead of relying on indicatif's
//! steady tick, so `stop` can cancel it and wait for it to finish. Nothing
//! here feeds back into phase results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TICK: Duration = Duration::from_millis(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Draw to stderr
    #[default]
    Terminal,
    /// Tick without drawing anything
    Hidden,
}

struct Ticker {
    bar: ProgressBar,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    started: Instant,
}

pub struct ProgressReporter {
    mode: ProgressMode,
    tick: Duration,
    label: Arc<Mutex<String>>,
    ticks: Arc<AtomicU64>,
    ticker: Option<Ticker>,
}

impl ProgressReporter {
    pub fn new(mode: ProgressMode) -> Self {
        Self::with_tick(mode, DEFAULT_TICK)
    }

    pub fn with_tick(mode: ProgressMode, tick: Duration) -> Self {
        Self {
            mode,
            tick,
            label: Arc::new(Mutex::new(String::new())),
            ticks: Arc::new(AtomicU64::new(0)),
            ticker: None,
        }
    }

    pub fn hidden() -> Self {
        Self::new(ProgressMode::Hidden)
    }

    /// Start ticking with `label`. A ticker that is still running is
    /// replaced without being finished.
    pub fn start(&mut self, label: impl Into<String>) {
        if let Some(previous) = self.ticker.take() {
            previous.cancel.cancel();
            previous.task.abort();
            previous.bar.finish_and_clear();
        }

        self.set_label(label.into());

        let bar = self.build_bar();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let task = tokio::spawn(tick_loop(
            bar.clone(),
            self.tick,
            Arc::clone(&self.label),
            Arc::clone(&self.ticks),
            cancel.clone(),
            started,
        ));

        self.ticker = Some(Ticker {
            bar,
            cancel,
            task,
            started,
        });
    }

    /// Change the label shown on the next tick.
    pub fn update(&self, label: impl Into<String>) {
        self.set_label(label.into());
    }

    /// Stop ticking and leave `final_label` on screen.
    ///
    /// When this returns the tick task has finished; no further tick runs.
    pub async fn stop(&mut self, final_label: impl Into<String>) -> Duration {
        let Some(ticker) = self.ticker.take() else {
            return Duration::ZERO;
        };

        ticker.cancel.cancel();
        let _ = ticker.task.await;

        let elapsed = ticker.started.elapsed();
        ticker.bar.finish_with_message(final_label.into());
        elapsed
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Ticks rendered since this reporter was created.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn set_label(&self, label: String) {
        if let Ok(mut current) = self.label.lock() {
            *current = label;
        }
    }

    fn build_bar(&self) -> ProgressBar {
        let target = match self.mode {
            ProgressMode::Terminal => ProgressDrawTarget::stderr(),
            ProgressMode::Hidden => ProgressDrawTarget::hidden(),
        };
        let bar = ProgressBar::with_draw_target(None, target);
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel.cancel();
            ticker.task.abort();
        }
    }
}

async fn tick_loop(
    bar: ProgressBar,
    period: Duration,
    label: Arc<Mutex<String>>,
    ticks: Arc<AtomicU64>,
    cancel: CancellationToken,
    started: Instant,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let text = label.lock().map(|l| l.clone()).unwrap_or_default();
                bar.set_message(format!("{} ({:.1}s)", text, started.elapsed().as_secs_f64()));
                bar.tick();
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
