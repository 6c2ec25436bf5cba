//! Output multiplexer.
//!
//! Every task writes through a [`PrinterHandle`] into one bounded queue. A
//! single consumer loop, [`Printer::run`], owns the output stream and the
//! grouped buffers.

use crate::engine::OutputSink;
use crate::model::{OutputMode, Report};
use crate::style::{CommandStyle, StyleTable, TimestampFormat};
use async_trait::async_trait;
use bytes::Bytes;
use crossterm::style::{style as styled, Stylize};
use std::collections::BTreeMap;
use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reports in flight before producers start waiting.
pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PrinterConfig {
    pub mode: OutputMode,
    /// Print the child's output only, without labels.
    pub raw: bool,
    pub color: bool,
    /// Put a timestamp in front of every label.
    pub timings: bool,
    pub timestamp: TimestampFormat,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Interleaved,
            raw: false,
            color: true,
            timings: false,
            timestamp: TimestampFormat::default(),
        }
    }
}

/// Producer side of the printer queue.
#[derive(Debug, Clone)]
pub struct PrinterHandle {
    tx: mpsc::Sender<Report>,
}

#[async_trait]
impl OutputSink for PrinterHandle {
    async fn accept(&self, task_id: usize, chunk: Bytes) {
        if self.tx.send(Report::new(task_id, chunk)).await.is_err() {
            debug!(task = task_id, "printer stopped, dropping output");
        }
    }
}

pub struct Printer<W> {
    config: PrinterConfig,
    styles: StyleTable,
    reports: mpsc::Receiver<Report>,
    grouped: BTreeMap<usize, Vec<String>>,
    lines: mpsc::Sender<String>,
    writer: JoinHandle<W>,
}

impl<W: Write + Send + 'static> Printer<W> {
    /// Must be called inside a tokio runtime: the writer side starts here.
    pub fn new(config: PrinterConfig, styles: StyleTable, out: W) -> (Self, PrinterHandle) {
        let (tx, reports) = mpsc::channel(QUEUE_CAPACITY);
        let (lines, writer) = spawn_output_writer(out);
        let printer = Self {
            config,
            styles,
            reports,
            grouped: BTreeMap::new(),
            lines,
            writer,
        };
        (printer, PrinterHandle { tx })
    }

    /// Consume reports until `token` fires or every handle is dropped.
    ///
    /// Grouped buffers are flushed on the way out, one task at a time in id
    /// order. Reports still queued at cancellation are rendered only if they
    /// were already enqueued; producers blocked on a full queue lose theirs.
    /// Returns the writer once everything has been written and flushed.
    pub async fn run(mut self, token: CancellationToken) -> Result<W, JoinError> {
        loop {
            let report = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                report = self.reports.recv() => match report {
                    Some(report) => report,
                    None => break,
                },
            };
            self.dispatch(report).await;
        }

        self.reports.close();
        while let Ok(report) = self.reports.try_recv() {
            self.dispatch(report).await;
        }

        for (task_id, lines) in std::mem::take(&mut self.grouped) {
            debug!(task = task_id, lines = lines.len(), "flushing group");
            for line in lines {
                self.emit(line).await;
            }
        }

        let Printer { lines, writer, .. } = self;
        drop(lines);
        writer.await
    }

    async fn dispatch(&mut self, report: Report) {
        let Some(style) = self.styles.get(report.task_id) else {
            warn!(task = report.task_id, "report for unknown task");
            return;
        };
        if !style.visible {
            return;
        }

        let line = self.render(style, &report.bytes);
        match self.config.mode {
            OutputMode::Interleaved => self.emit(line).await,
            OutputMode::Grouped => self.grouped.entry(report.task_id).or_default().push(line),
        }
    }

    /// Format one report. Output that is not valid UTF-8 becomes a blank line.
    fn render(&self, style: &CommandStyle, bytes: &[u8]) -> String {
        let content = match std::str::from_utf8(bytes) {
            Ok(text) => text.trim(),
            Err(e) => {
                warn!(task = style.task_id, error = %e, "unrenderable output");
                return String::new();
            }
        };
        if self.config.raw {
            return content.to_string();
        }

        let label = if self.config.timings {
            format!("[{}] {}", self.config.timestamp.now(), style.label)
                .trim_end()
                .to_string()
        } else {
            style.label.clone()
        };

        match (label.is_empty(), self.config.color) {
            (true, false) => content.to_string(),
            (true, true) => styled(content).with(style.color).to_string(),
            (false, false) => format!("{label}: {content}"),
            (false, true) => format!(
                "{}: {}",
                styled(&label).with(style.color).bold(),
                styled(content).with(style.color)
            ),
        }
    }

    async fn emit(&self, line: String) {
        if self.lines.send(line).await.is_err() {
            warn!("output writer stopped, dropping line");
        }
    }
}

/// Own `out` on the blocking pool so a slow terminal or pipe never stalls a
/// runtime worker. The writer is handed back once the line channel closes.
fn spawn_output_writer<W: Write + Send + 'static>(
    mut out: W,
) -> (mpsc::Sender<String>, JoinHandle<W>) {
    let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        let mut broken = false;
        while let Some(line) = rx.blocking_recv() {
            if broken {
                continue;
            }
            if let Err(e) = writeln!(out, "{line}") {
                warn!(error = %e, "failed to write output, discarding the rest");
                broken = true;
            }
        }
        if let Err(e) = out.flush() {
            warn!(error = %e, "failed to flush output");
        }
        out
    });
    (tx, handle)
}
