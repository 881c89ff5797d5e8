//! Application UI: a spinner for single images and a progress bar for
//! batches, drawn on stderr alongside our logs.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle};

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress indicators.
    bars: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI.
    pub fn init() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::new()),
        }
    }

    /// Hide all our progress indicators, for when we're writing our result
    /// to `stdout`.
    pub fn hide_progress_bars(&self) {
        self.bars.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A writer for `tracing` which doesn't garble our progress indicators.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// A spinner shown while we recognize a single image.
    pub fn new_spinner(&self, labels: &ProgressLabels<'_>) -> ProgressBar {
        let style = ProgressStyle::default_spinner()
            .template("{spinner} {prefix:3}{msg}")
            .expect("bad spinner template");
        let bar = self.add(ProgressBar::new_spinner().with_style(style), labels);
        bar.enable_steady_tick(Duration::from_millis(250));
        bar
    }

    /// A progress bar counting recognized images in a batch.
    pub fn new_image_counter(&self, labels: &ProgressLabels<'_>, images: u64) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template("  {prefix:3}{msg:22} {pos:>4}/{len:4} images {elapsed_precise} {wide_bar:.cyan/blue}")
            .expect("bad progress bar template");
        self.add(ProgressBar::new(images).with_style(style), labels)
    }

    fn add(&self, bar: ProgressBar, labels: &ProgressLabels<'_>) -> ProgressBar {
        let bar = self.bars.add(bar);
        bar.set_prefix(labels.emoji.to_owned());
        bar.set_message(labels.running.to_owned());
        bar.with_finish(ProgressFinish::WithMessage(Cow::Owned(
            labels.finished.to_owned(),
        )))
    }
}

/// What a progress indicator says.
pub struct ProgressLabels<'a> {
    pub emoji: &'a str,
    /// Shown while running.
    pub running: &'a str,
    /// Shown when done.
    pub finished: &'a str,
}

/// Writes to `stderr`, hiding our progress indicators while it does.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.bars.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().flush())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().write_all(buf))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
