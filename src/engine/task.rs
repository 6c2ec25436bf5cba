use crate::engine::{signal, Job, OutputSink};
use crate::error::TaskError;
use crate::model::{CommandDescriptor, KillSignal, RunConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long output is still forwarded once the run has been cancelled.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// One command and its child-process lifecycle.
///
/// `exit_code` and `last_error` are written only by [`Task::run`] and always
/// describe the final attempt.
pub struct Task {
    descriptor: CommandDescriptor,
    retry_limit: u32,
    retry_delay: Duration,
    kill_signal: KillSignal,
    exit_code: i32,
    last_error: Option<TaskError>,
    sink: Arc<dyn OutputSink>,
}

impl Task {
    pub fn new(descriptor: CommandDescriptor, cfg: &RunConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            descriptor,
            retry_limit: cfg.restart_tries,
            retry_delay: cfg.restart_after,
            kill_signal: cfg.kill_signal,
            exit_code: 0,
            last_error: None,
            sink,
        }
    }

    pub fn id(&self) -> usize {
        self.descriptor.id
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    /// Run the command, retrying failed attempts up to the retry limit.
    ///
    /// Returns the exit code of the final attempt. Cancellation stops the
    /// retry loop at once; a child running at that moment is sent the kill
    /// signal and its signalled exit code is kept.
    pub async fn run(&mut self, token: &CancellationToken) -> i32 {
        if token.is_cancelled() {
            self.exit_code = self.kill_signal.exit_code();
            return self.exit_code;
        }

        let attempts = self.retry_limit.max(1);
        for attempt in 1..=attempts {
            debug!(task = self.id(), attempt, attempts, "starting attempt");
            match self.attempt(token).await {
                Ok(()) => {
                    self.exit_code = 0;
                    self.last_error = None;
                    break;
                }
                Err(err) => {
                    self.exit_code = err.exit_code();
                    warn!(task = self.id(), attempt, error = %err, "attempt failed");
                    self.notify(err.to_string()).await;
                    self.last_error = Some(err);
                }
            }

            if token.is_cancelled() || attempt == attempts {
                break;
            }

            if self.retry_delay.is_zero() {
                self.notify(format!("restarting {}", self.descriptor.display_name))
                    .await;
            } else {
                self.notify(format!(
                    "restarting {} in {}",
                    self.descriptor.display_name,
                    humantime::format_duration(self.retry_delay)
                ))
                .await;
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = token.cancelled() => break,
                }
            }
        }

        self.exit_code
    }

    /// Spawn the child once, forward its output and wait for it to exit.
    async fn attempt(&self, token: &CancellationToken) -> Result<(), TaskError> {
        let command = self.descriptor.executable.clone();
        let mut child = Command::new(&self.descriptor.executable)
            .args(&self.descriptor.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TaskError::Launch {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output = async {
            let forwarders = futures::future::join(self.forward(stdout), self.forward(stderr));
            tokio::pin!(forwarders);
            tokio::select! {
                _ = &mut forwarders => {}
                _ = token.cancelled() => {
                    // Descendants of a signalled child may keep the pipes open indefinitely.
                    if tokio::time::timeout(OUTPUT_GRACE, &mut forwarders).await.is_err() {
                        debug!(task = self.id(), "output still open after cancellation, detaching");
                    }
                }
            }
        };

        let wait = async {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };
            match finished {
                Some(status) => status,
                None => {
                    debug!(task = self.id(), signal = %self.kill_signal, "cancelled, signalling child");
                    if let Err(e) = signal::deliver(&mut child, self.kill_signal) {
                        warn!(task = self.id(), error = %e, "failed to signal child");
                    }
                    child.wait().await
                }
            }
        };

        let (status, _) = tokio::join!(wait, output);
        let status = status.map_err(|source| TaskError::Wait {
            command: command.clone(),
            source,
        })?;

        match status_code(status) {
            0 => Ok(()),
            code => Err(TaskError::Exit { command, code }),
        }
    }

    /// Forward one pipe to the sink as it is read. Complete lines go out one
    /// by one; a trailing fragment without a newline is sent straight away.
    async fn forward<R: AsyncRead + Unpin>(&self, pipe: Option<R>) {
        let Some(pipe) = pipe else { return };
        let mut reader = BufReader::new(pipe);
        loop {
            let chunk = match reader.fill_buf().await {
                Ok([]) => break,
                Ok(buf) => Bytes::copy_from_slice(buf),
                Err(e) => {
                    warn!(task = self.id(), error = %e, "failed to read child output");
                    break;
                }
            };
            reader.consume(chunk.len());
            for piece in split_lines(chunk) {
                self.sink.accept(self.id(), piece).await;
            }
        }
    }

    async fn notify(&self, message: String) {
        self.sink.accept(self.id(), Bytes::from(message)).await;
    }
}

#[async_trait]
impl Job for Task {
    async fn execute(&mut self, token: &CancellationToken) {
        self.run(token).await;
    }
}

/// Split after every newline, keeping any unterminated tail as its own piece.
fn split_lines(chunk: Bytes) -> Vec<Bytes> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, byte) in chunk.iter().enumerate() {
        if *byte == b'\n' {
            pieces.push(chunk.slice(start..=i));
            start = i + 1;
        }
    }
    if start < chunk.len() {
        pieces.push(chunk.slice(start..));
    }
    pieces
}

fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::SuccessTerm;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Collect {
        chunks: Mutex<Vec<(usize, String)>>,
    }

    impl Collect {
        fn lines(&self) -> Vec<String> {
            self.chunks
                .lock()
                .unwrap()
                .iter()
                .map(|(_, s)| s.trim_end().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl OutputSink for Collect {
        async fn accept(&self, task_id: usize, chunk: Bytes) {
            let text = String::from_utf8_lossy(&chunk).into_owned();
            self.chunks.lock().unwrap().push((task_id, text));
        }
    }

    fn config(tries: u32, delay: Duration) -> RunConfig {
        RunConfig {
            max_processes: 1,
            restart_tries: tries,
            restart_after: delay,
            kill_signal: KillSignal::Term,
            kill_others: false,
            kill_others_on_fail: false,
            success: SuccessTerm::All,
        }
    }

    fn shell(id: usize, script: &str) -> CommandDescriptor {
        CommandDescriptor {
            id,
            executable: "sh".into(),
            arguments: vec!["-c".into(), script.into()],
            display_name: format!("task{id}"),
        }
    }

    fn attempts_in(dir: &tempfile::TempDir) -> usize {
        std::fs::read_to_string(dir.path().join("attempts"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn forwards_output_in_order() {
        let sink = Arc::new(Collect::default());
        let mut task = Task::new(
            shell(4, "echo one; echo two; echo three"),
            &config(1, Duration::ZERO),
            sink.clone(),
        );

        assert_eq!(task.run(&CancellationToken::new()).await, 0);
        assert!(task.last_error().is_none());
        assert_eq!(sink.lines(), vec!["one", "two", "three"]);
        assert!(sink.chunks.lock().unwrap().iter().all(|(id, _)| *id == 4));
    }

    #[tokio::test]
    async fn stderr_is_forwarded_too() {
        let sink = Arc::new(Collect::default());
        let mut task = Task::new(shell(0, "echo oops >&2"), &config(1, Duration::ZERO), sink.clone());

        task.run(&CancellationToken::new()).await;
        assert_eq!(sink.lines(), vec!["oops"]);
    }

    #[tokio::test]
    async fn always_failing_task_uses_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "echo x >> {0}/attempts; exit $(wc -l < {0}/attempts)",
            dir.path().display()
        );
        let sink = Arc::new(Collect::default());
        let mut task = Task::new(shell(0, &script), &config(3, Duration::ZERO), sink.clone());

        let code = task.run(&CancellationToken::new()).await;

        assert_eq!(attempts_in(&dir), 3);
        assert_eq!(code, 3);
        assert_eq!(task.exit_code(), 3);
        assert!(matches!(
            task.last_error(),
            Some(TaskError::Exit { code: 3, .. })
        ));
        let restarts = sink
            .lines()
            .iter()
            .filter(|l| l.starts_with("restarting"))
            .count();
        assert_eq!(restarts, 2);
    }

    #[tokio::test]
    async fn stops_retrying_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "echo x >> {0}/attempts; [ $(wc -l < {0}/attempts) -ge 2 ]",
            dir.path().display()
        );
        let mut task = Task::new(
            shell(0, &script),
            &config(3, Duration::ZERO),
            Arc::new(Collect::default()),
        );

        assert_eq!(task.run(&CancellationToken::new()).await, 0);
        assert_eq!(attempts_in(&dir), 2);
        assert!(task.last_error().is_none());
    }

    #[tokio::test]
    async fn zero_retry_limit_still_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("echo x >> {}/attempts; exit 4", dir.path().display());
        let mut task = Task::new(
            shell(0, &script),
            &config(0, Duration::ZERO),
            Arc::new(Collect::default()),
        );

        assert_eq!(task.run(&CancellationToken::new()).await, 4);
        assert_eq!(attempts_in(&dir), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_recorded_and_reported() {
        let sink = Arc::new(Collect::default());
        let mut task = Task::new(
            CommandDescriptor {
                id: 0,
                executable: "definitely-not-a-real-command-mlti".into(),
                arguments: vec![],
                display_name: "ghost".into(),
            },
            &config(2, Duration::ZERO),
            sink.clone(),
        );

        assert_eq!(task.run(&CancellationToken::new()).await, 127);
        assert!(matches!(task.last_error(), Some(TaskError::Launch { .. })));
        let errors = sink
            .lines()
            .iter()
            .filter(|l| l.contains("definitely-not-a-real-command-mlti"))
            .count();
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn cancellation_signals_running_child() {
        let token = CancellationToken::new();
        let mut task = Task::new(
            shell(0, "exec sleep 30"),
            &config(5, Duration::ZERO),
            Arc::new(Collect::default()),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let code = task.run(&token).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(code, KillSignal::Term.exit_code());
    }

    #[tokio::test]
    async fn cancellation_interrupts_retry_delay() {
        let token = CancellationToken::new();
        let mut task = Task::new(
            shell(0, "exit 6"),
            &config(5, Duration::from_secs(30)),
            Arc::new(Collect::default()),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        assert_eq!(task.run(&token).await, 6);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn already_cancelled_task_does_not_launch() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let script = format!("echo x >> {}/attempts", dir.path().display());
        let mut task = Task::new(
            shell(0, &script),
            &config(1, Duration::ZERO),
            Arc::new(Collect::default()),
        );

        assert_eq!(task.run(&token).await, KillSignal::Term.exit_code());
        assert_eq!(attempts_in(&dir), 0);
    }

    #[tokio::test]
    async fn cancellation_does_not_wait_for_descendants_holding_output() {
        let token = CancellationToken::new();
        // Without exec the shell forks `sleep`, which inherits the pipes.
        let mut task = Task::new(
            shell(0, "sleep 8; echo done"),
            &config(1, Duration::ZERO),
            Arc::new(Collect::default()),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let code = task.run(&token).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(code, KillSignal::Term.exit_code());
    }

    #[tokio::test]
    async fn output_without_newline_is_forwarded_promptly() {
        let token = CancellationToken::new();
        let sink = Arc::new(Collect::default());
        let mut task = Task::new(
            shell(0, "printf 'ready> '; exec sleep 30"),
            &config(1, Duration::ZERO),
            sink.clone(),
        );
        let run_token = token.clone();
        let running = tokio::spawn(async move { task.run(&run_token).await });

        let started = Instant::now();
        while sink.chunks.lock().unwrap().is_empty() && started.elapsed() < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(sink.chunks.lock().unwrap().first().map(|(_, s)| s.clone()), Some("ready> ".to_string()));

        token.cancel();
        running.await.unwrap();
    }

    #[test]
    fn chunks_split_after_each_newline() {
        let pieces: Vec<Bytes> = split_lines(Bytes::from_static(b"one\ntwo\npart"));
        assert_eq!(
            pieces,
            vec![
                Bytes::from_static(b"one\n"),
                Bytes::from_static(b"two\n"),
                Bytes::from_static(b"part"),
            ]
        );
        assert!(split_lines(Bytes::new()).is_empty());
    }
}
