//! Run lifecycle controller.
//!
//! Starts the printer and scheduler, submits one task per command, applies the
//! kill-others policies as completions arrive and waits for everything to wind
//! down before reporting the aggregated exit code.

use super::exit_code::ExitCodes;
use crate::engine::{OutputSink, Scheduler, Task};
use crate::model::{CommandDescriptor, RunConfig};
use crate::printer::{Printer, PrinterConfig};
use crate::style::StyleTable;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one run.
#[derive(Debug)]
pub(crate) struct RunSummary<W> {
    pub exit_code: i32,
    /// The printer's writer, handed back once everything is flushed.
    pub output: W,
    /// Whether the shared token fired, by policy or from outside.
    pub cancelled: bool,
}

/// Run every command to completion or until `token` fires.
///
/// On return no task is still running: cancelled children have been signalled
/// and reaped, and the printer has flushed.
pub(crate) async fn run_commands<W>(
    commands: Vec<CommandDescriptor>,
    cfg: &RunConfig,
    printer_cfg: PrinterConfig,
    styles: StyleTable,
    out: W,
    token: CancellationToken,
) -> Result<RunSummary<W>>
where
    W: Write + Send + 'static,
{
    let total = commands.len();
    info!(
        total,
        max_processes = cfg.max_processes,
        restart_tries = cfg.restart_tries,
        "starting run"
    );

    let (printer, handle) = Printer::new(printer_cfg, styles, out);
    let printer = tokio::spawn(printer.run(token.clone()));

    let mut scheduler = Scheduler::new(cfg.max_processes, total);
    let submitter = scheduler.submitter().context("scheduler has no submitter")?;
    let mut completed = scheduler
        .completed()
        .context("scheduler completion stream already taken")?;
    let scheduler = tokio::spawn(scheduler.start(token.clone()));

    // Tasks hold the only printer handles from here on, so the printer queue
    // closes by itself once every task has been dropped.
    let sink: Arc<dyn OutputSink> = Arc::new(handle);
    for descriptor in commands {
        let task = Task::new(descriptor, cfg, Arc::clone(&sink));
        if !submitter.schedule(task).await {
            warn!("scheduler stopped before every task was submitted");
            break;
        }
    }
    drop(submitter);
    drop(sink);

    let mut codes = ExitCodes::default();
    while codes.len() < total {
        let task = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            task = completed.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let code = task.exit_code();
        codes.record(task.id(), code);
        info!(
            task = task.id(),
            name = %task.descriptor().display_name,
            code,
            "task completed"
        );
        if let Some(err) = task.last_error() {
            debug!(task = task.id(), error = %err, "final attempt failed");
        }

        if cfg.kill_others || (code != 0 && cfg.kill_others_on_fail) {
            info!(task = task.id(), "stopping remaining tasks");
            token.cancel();
        }
    }

    let cancelled = token.is_cancelled();
    // Completions nobody will read still own printer handles.
    drop(completed);

    scheduler.await.context("scheduler task failed")?;
    let output = printer
        .await
        .context("printer task failed")?
        .context("output writer failed")?;

    let exit_code = codes.resolve(cfg.success);
    debug!(exit_code, observed = codes.len(), cancelled, "run finished");
    Ok(RunSummary {
        exit_code,
        output,
        cancelled,
    })
}
