//! Bounded-concurrency admission loop.
//!
//! All bookkeeping (running set, pending queue, completion count) lives inside
//! [`Scheduler::start`]. Submissions reach it over a channel and finished jobs
//! come back through a `JoinSet`, so nothing here is shared or locked.

use crate::engine::Job;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct Scheduler<J> {
    max_processes: usize,
    total: usize,
    submit_tx: Option<mpsc::Sender<J>>,
    submissions: mpsc::Receiver<J>,
    completed_tx: mpsc::Sender<J>,
    completed_rx: Option<mpsc::Receiver<J>>,
    pending: VecDeque<J>,
}

/// Cloneable handle for submitting jobs to a [`Scheduler`].
pub struct Submitter<J> {
    tx: mpsc::Sender<J>,
}

impl<J> Clone for Submitter<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<J: Job> Submitter<J> {
    /// Queue `job` for execution. Returns false once the scheduler has stopped.
    pub async fn schedule(&self, job: J) -> bool {
        self.tx.send(job).await.is_ok()
    }
}

impl<J: Job> Scheduler<J> {
    /// `total` is the number of jobs that will be submitted over the run.
    pub fn new(max_processes: usize, total: usize) -> Self {
        // Sized so that neither submitting every job up front nor forwarding
        // every completion can block.
        let capacity = total.max(1);
        let (submit_tx, submissions) = mpsc::channel(capacity);
        let (completed_tx, completed_rx) = mpsc::channel(capacity);
        Self {
            max_processes: max_processes.max(1),
            total,
            submit_tx: Some(submit_tx),
            submissions,
            completed_tx,
            completed_rx: Some(completed_rx),
            pending: VecDeque::new(),
        }
    }

    pub fn submitter(&self) -> Option<Submitter<J>> {
        self.submit_tx.clone().map(|tx| Submitter { tx })
    }

    /// Stream of finished jobs in completion order. Only the first call gets it.
    ///
    /// The stream ends once `start` has returned and every completion has been read.
    pub fn completed(&mut self) -> Option<mpsc::Receiver<J>> {
        self.completed_rx.take()
    }

    /// Run the admission loop until every job has completed or `token` fires.
    ///
    /// On cancellation nothing more is launched, queued jobs are dropped and
    /// the call waits for jobs already running to observe the token and finish.
    pub async fn start(mut self, token: CancellationToken) {
        // Only external submitters keep the submission channel open from here on.
        self.submit_tx = None;

        let mut running: JoinSet<J> = JoinSet::new();
        let mut completed = 0usize;
        let mut accepting = true;

        while completed < self.total {
            if !accepting && running.is_empty() && self.pending.is_empty() {
                warn!(completed, total = self.total, "submissions closed before every job arrived");
                break;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(running = running.len(), pending = self.pending.len(), "cancelled, no further admissions");
                    break;
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    completed += 1;
                    self.finish(joined).await;
                    debug!(
                        completed,
                        total = self.total,
                        running = running.len(),
                        pending = self.pending.len(),
                        "job finished"
                    );
                    if let Some(next) = self.pending.pop_front() {
                        self.launch(&mut running, next, &token);
                    }
                }
                submitted = self.submissions.recv(), if accepting => match submitted {
                    Some(job) if running.len() < self.max_processes => {
                        self.launch(&mut running, job, &token);
                    }
                    Some(job) => self.pending.push_back(job),
                    None => accepting = false,
                },
            }
        }

        if token.is_cancelled() {
            self.pending.clear();
            while let Some(joined) = running.join_next().await {
                self.finish(joined).await;
            }
        }
    }

    fn launch(&self, running: &mut JoinSet<J>, mut job: J, token: &CancellationToken) {
        let token = token.clone();
        running.spawn(async move {
            job.execute(&token).await;
            job
        });
    }

    async fn finish(&self, joined: Result<J, tokio::task::JoinError>) {
        match joined {
            Ok(job) => {
                // Nobody listening is fine; the run is unwinding.
                let _ = self.completed_tx.send(job).await;
            }
            Err(e) => error!(error = %e, "job aborted before completing"),
        }
    }
}
