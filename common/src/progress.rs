use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::instrument;

/// What the tracker counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bytes,
    Files,
}

/// Whether the upper bound may still grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Discovering,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub current: u64,
    pub max: u64,
    pub bound: Bound,
}

/// Progress of one top-level operation.
///
/// The walker grows `max` as it lists directories while workers advance `current`, so
/// `current <= max` is only guaranteed once the bound is [`Bound::Final`].
#[derive(Debug)]
pub struct ProgressTracker {
    unit: Unit,
    current: AtomicU64,
    max: AtomicU64,
    finalized: AtomicBool,
    start_time: std::time::Instant,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            current: AtomicU64::new(0),
            max: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            start_time: std::time::Instant::now(),
        }
    }

    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn grow(&self, amount: u64) {
        self.max.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn advance(&self, amount: u64) {
        self.current.fetch_add(amount, Ordering::Relaxed);
    }

    /// No more growth is expected. Called once the walk is done.
    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::Release);
    }

    #[instrument(skip(self))]
    pub fn state(&self) -> ProgressState {
        let bound = if self.finalized.load(Ordering::Acquire) {
            Bound::Final
        } else {
            Bound::Discovering
        };
        let current = self.current.load(Ordering::Relaxed);
        let mut max = self.max.load(Ordering::Relaxed);
        if bound == Bound::Final && current > max {
            tracing::debug!("progress inversion - current: {}, max: {}", current, max);
            max = current;
        }
        ProgressState {
            current,
            max,
            bound,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressType {
    /// Progress bar on a terminal, text updates otherwise
    #[default]
    #[value(alias = "Auto")]
    Auto,
    /// Animated progress bar
    #[value(alias = "ProgressBar")]
    ProgressBar,
    /// Periodic text lines, appropriate for logging
    #[value(alias = "TextUpdates")]
    TextUpdates,
}

impl ProgressType {
    /// Resolves `Auto` depending on whether stderr is a terminal.
    #[must_use]
    pub fn resolve(self) -> Self {
        use std::io::IsTerminal;
        match self {
            ProgressType::Auto if std::io::stderr().is_terminal() => ProgressType::ProgressBar,
            ProgressType::Auto => ProgressType::TextUpdates,
            other => other,
        }
    }

    #[must_use]
    pub fn default_delay(self) -> std::time::Duration {
        match self.resolve() {
            ProgressType::TextUpdates => std::time::Duration::from_secs(10),
            _ => std::time::Duration::from_millis(65),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// Human readable delay between updates, e.g. "200ms" or "10s".
    pub progress_delay: Option<String>,
}

impl ProgressSettings {
    pub fn delay(&self) -> anyhow::Result<std::time::Duration> {
        use anyhow::Context;
        match &self.progress_delay {
            Some(delay) => humantime::parse_duration(delay)
                .with_context(|| format!("invalid progress delay {delay:?}")),
            None => Ok(self.progress_type.default_delay()),
        }
    }
}

/// Formats tracker state as one line of text, with the rate since the previous line.
pub struct ProgressPrinter<'a> {
    tracker: &'a ProgressTracker,
    label: &'a str,
    last_current: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(tracker: &'a ProgressTracker, label: &'a str) -> Self {
        Self {
            tracker,
            label,
            last_current: tracker.state().current,
            last_update: std::time::Instant::now(),
        }
    }

    fn amount(&self, value: u64) -> String {
        match self.tracker.unit() {
            Unit::Bytes => bytesize::ByteSize(value).to_string(),
            Unit::Files => value.to_string(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let state = self.tracker.state();
        let elapsed_secs = (time_now - self.last_update).as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            state.current.saturating_sub(self.last_current) as f64 / elapsed_secs
        } else {
            0.0
        };
        self.last_current = state.current;
        self.last_update = time_now;
        let rate = match self.tracker.unit() {
            Unit::Bytes => format!("{}/s", bytesize::ByteSize(rate as u64)),
            Unit::Files => format!("{rate:.2} files/s"),
        };
        format!(
            "{} {} / {}{} ({}, elapsed {})",
            self.label,
            self.amount(state.current),
            self.amount(state.max),
            if state.bound == Bound::Discovering {
                "+"
            } else {
                ""
            },
            rate,
            humantime::format_duration(std::time::Duration::from_secs(
                self.tracker.elapsed().as_secs()
            )),
        )
    }
}

fn progress_bar(unit: Unit, label: &str) -> indicatif::ProgressBar {
    let template = match unit {
        Unit::Bytes => {
            "{msg} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({binary_bytes_per_sec})"
        }
        Unit::Files => "{msg} [{elapsed_precise}] {wide_bar} {pos}/{len} ({per_sec})",
    };
    let style = indicatif::ProgressStyle::with_template(template)
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
    let bar = indicatif::ProgressBar::with_draw_target(
        Some(0),
        indicatif::ProgressDrawTarget::stderr_with_hz(15),
    );
    bar.set_style(style);
    bar.set_message(label.to_string());
    bar
}

/// Periodically renders a [`ProgressTracker`] until stopped.
pub struct ProgressRenderer {
    stop: tokio_util::sync::CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ProgressRenderer {
    pub fn spawn(
        tracker: std::sync::Arc<ProgressTracker>,
        settings: &ProgressSettings,
        label: &str,
    ) -> anyhow::Result<Self> {
        let delay = settings.delay()?;
        let progress_type = settings.progress_type.resolve();
        let stop = tokio_util::sync::CancellationToken::new();
        let label = label.to_string();
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                match progress_type {
                    ProgressType::TextUpdates => {
                        let mut printer = ProgressPrinter::new(&tracker, &label);
                        while !sleep_or_stop(&stop, delay).await {
                            eprintln!("{}", printer.print());
                        }
                        eprintln!("{}", printer.print());
                    }
                    _ => {
                        let bar = progress_bar(tracker.unit(), &label);
                        loop {
                            let stopped = sleep_or_stop(&stop, delay).await;
                            let state = tracker.state();
                            bar.set_length(state.max);
                            bar.set_position(state.current);
                            if stopped {
                                break;
                            }
                        }
                        bar.finish();
                    }
                }
            })
        };
        Ok(Self { stop, task })
    }

    /// Draws the final state and waits for the renderer to exit.
    pub async fn finish(self) {
        self.stop.cancel();
        if let Err(error) = self.task.await {
            tracing::debug!("progress renderer failed: {}", error);
        }
    }
}

/// Returns true once `stop` is cancelled.
async fn sleep_or_stop(
    stop: &tokio_util::sync::CancellationToken,
    delay: std::time::Duration,
) -> bool {
    tokio::select! {
        () = stop.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn bound_becomes_final() -> Result<()> {
        let tracker = ProgressTracker::new(Unit::Files);
        tracker.grow(2);
        tracker.advance(1);
        let state = tracker.state();
        assert_eq!(state.bound, Bound::Discovering);
        assert_eq!((state.current, state.max), (1, 2));
        tracker.grow(1);
        tracker.advance(2);
        tracker.finalize();
        let state = tracker.state();
        assert_eq!(state.bound, Bound::Final);
        assert_eq!((state.current, state.max), (3, 3));
        Ok(())
    }

    #[test]
    fn current_may_overtake_max_while_discovering() {
        let tracker = ProgressTracker::new(Unit::Bytes);
        tracker.advance(10);
        assert_eq!(tracker.state().max, 0);
        tracker.finalize();
        assert_eq!(tracker.state().max, 10);
    }

    #[test]
    fn threaded_counting() {
        let tracker = ProgressTracker::new(Unit::Files);
        std::thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        tracker.grow(1);
                        tracker.advance(1);
                    }
                });
            }
        });
        tracker.finalize();
        let state = tracker.state();
        assert_eq!((state.current, state.max), (1000, 1000));
    }

    #[test]
    fn printer_marks_growing_bound() {
        let tracker = ProgressTracker::new(Unit::Files);
        tracker.grow(5);
        tracker.advance(2);
        let mut printer = ProgressPrinter::new(&tracker, "copying...");
        let line = printer.print();
        assert!(line.starts_with("copying... 2 / 5+ ("), "{line}");
        tracker.finalize();
        let line = printer.print();
        assert!(line.starts_with("copying... 2 / 5 ("), "{line}");
    }

    #[test]
    fn explicit_delay_is_parsed() -> Result<()> {
        let settings = ProgressSettings {
            progress_type: ProgressType::ProgressBar,
            progress_delay: Some("200ms".to_string()),
        };
        assert_eq!(settings.delay()?, std::time::Duration::from_millis(200));
        let settings = ProgressSettings {
            progress_type: ProgressType::TextUpdates,
            progress_delay: None,
        };
        assert_eq!(settings.delay()?, std::time::Duration::from_secs(10));
        let settings = ProgressSettings {
            progress_type: ProgressType::TextUpdates,
            progress_delay: Some("soon".to_string()),
        };
        assert!(settings.delay().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn renderer_stops_on_finish() -> Result<()> {
        let tracker = std::sync::Arc::new(ProgressTracker::new(Unit::Bytes));
        let settings = ProgressSettings {
            progress_type: ProgressType::TextUpdates,
            progress_delay: Some("5ms".to_string()),
        };
        let renderer = ProgressRenderer::spawn(tracker.clone(), &settings, "uploading...")?;
        tracker.grow(100);
        tracker.advance(100);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tracker.finalize();
        renderer.finish().await;
        Ok(())
    }
}
