use crate::error::ConfigError;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One resolved command: what to execute and how to name it.
///
/// Produced once by the command loader. `id` is dense, 0-based and is the only
/// key shared between tasks, reports and styles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub id: usize,
    pub executable: String,
    pub arguments: Vec<String>,
    pub display_name: String,
}

impl CommandDescriptor {
    /// The command line as typed, used in labels and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.clone();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Settings shared by the scheduler, tasks and run coordinator for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Resolved concurrency limit, always >= 1.
    pub max_processes: usize,
    /// Attempts per task, the first run included.
    pub restart_tries: u32,
    pub restart_after: Duration,
    pub kill_signal: KillSignal,
    pub kill_others: bool,
    pub kill_others_on_fail: bool,
    pub success: SuccessTerm,
}

/// Concurrency limit as configured, before it is resolved against the task count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxProcesses {
    /// Run every task at once.
    Unbounded,
    Count(usize),
    /// A share of the task count, e.g. `50%`.
    Percent(f64),
}

impl MaxProcesses {
    /// Parse `--max-processes`. Empty, missing or non-positive values mean no limit.
    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        let value = match raw.map(str::trim) {
            None | Some("") => return Ok(MaxProcesses::Unbounded),
            Some(v) => v,
        };

        if let Some(pct) = value.strip_suffix('%') {
            let pct: f64 = pct
                .trim()
                .parse()
                .map_err(|_| ConfigError::Percentage(value.to_string()))?;
            if !pct.is_finite() || pct < 0.0 {
                return Err(ConfigError::Percentage(value.to_string()));
            }
            return Ok(MaxProcesses::Percent(pct));
        }

        let count: i64 = value
            .parse()
            .map_err(|_| ConfigError::MaxProcesses(value.to_string()))?;
        if count <= 0 {
            Ok(MaxProcesses::Unbounded)
        } else {
            Ok(MaxProcesses::Count(count as usize))
        }
    }

    /// Resolve against the number of tasks. The result is clamped to `1..=total`.
    pub fn resolve(self, total: usize) -> usize {
        let limit = match self {
            MaxProcesses::Unbounded | MaxProcesses::Count(0) => total,
            MaxProcesses::Count(n) => n,
            MaxProcesses::Percent(p) => (total as f64 * p / 100.0).floor() as usize,
        };
        limit.clamp(1, total.max(1))
    }
}

/// How the exit codes of all tasks reduce to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessTerm {
    /// First non-zero code observed, or 0.
    #[default]
    All,
    /// Code of the first submitted task.
    First,
    /// Code of the last task to complete.
    Last,
}

impl SuccessTerm {
    /// Unknown terms fall back to `All`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => SuccessTerm::All,
            "first" => SuccessTerm::First,
            "last" => SuccessTerm::Last,
            other => {
                tracing::warn!(term = other, "unknown success term, using 'all'");
                SuccessTerm::All
            }
        }
    }
}

/// Signal delivered to running children when the run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
    Int,
    Hup,
    Quit,
    Usr1,
    Usr2,
}

impl FromStr for KillSignal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        let signal = match name {
            "TERM" | "15" => KillSignal::Term,
            "KILL" | "9" => KillSignal::Kill,
            "INT" | "2" => KillSignal::Int,
            "HUP" | "1" => KillSignal::Hup,
            "QUIT" | "3" => KillSignal::Quit,
            "USR1" => KillSignal::Usr1,
            "USR2" => KillSignal::Usr2,
            _ => return Err(ConfigError::KillSignal(s.to_string())),
        };
        Ok(signal)
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
            KillSignal::Int => "SIGINT",
            KillSignal::Hup => "SIGHUP",
            KillSignal::Quit => "SIGQUIT",
            KillSignal::Usr1 => "SIGUSR1",
            KillSignal::Usr2 => "SIGUSR2",
        };
        f.write_str(name)
    }
}

/// One chunk of combined stdout/stderr output from a task.
#[derive(Debug, Clone)]
pub struct Report {
    pub task_id: usize,
    pub bytes: Bytes,
}

impl Report {
    pub fn new(task_id: usize, bytes: impl Into<Bytes>) -> Self {
        Self {
            task_id,
            bytes: bytes.into(),
        }
    }
}

/// Printer rendering mode, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Render each report as soon as it is dequeued.
    Interleaved,
    /// Buffer per task and flush everything when the run ends.
    Grouped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(raw: &str, total: usize) -> usize {
        MaxProcesses::parse(Some(raw)).unwrap().resolve(total)
    }

    #[test]
    fn max_processes_resolution() {
        assert_eq!(resolve("50%", 10), 5);
        assert_eq!(resolve("", 4), 4);
        assert_eq!(resolve("0", 4), 4);
        assert_eq!(resolve("-3", 4), 4);
        assert_eq!(resolve("3", 10), 3);
        assert_eq!(MaxProcesses::parse(None).unwrap().resolve(7), 7);
    }

    #[test]
    fn max_processes_never_exceeds_task_count_or_drops_below_one() {
        assert_eq!(resolve("25", 4), 4);
        assert_eq!(resolve("10%", 4), 1);
        assert_eq!(resolve("200%", 3), 3);
        assert_eq!(resolve("2", 0), 1);
    }

    #[test]
    fn malformed_max_processes_is_an_error() {
        assert!(matches!(
            MaxProcesses::parse(Some("lots")),
            Err(ConfigError::MaxProcesses(_))
        ));
        assert!(matches!(
            MaxProcesses::parse(Some("half%")),
            Err(ConfigError::Percentage(_))
        ));
        assert!(matches!(
            MaxProcesses::parse(Some("-5%")),
            Err(ConfigError::Percentage(_))
        ));
    }

    #[test]
    fn success_terms() {
        assert_eq!(SuccessTerm::parse("first"), SuccessTerm::First);
        assert_eq!(SuccessTerm::parse(" LAST "), SuccessTerm::Last);
        assert_eq!(SuccessTerm::parse("all"), SuccessTerm::All);
        assert_eq!(SuccessTerm::parse("command-foo"), SuccessTerm::All);
    }

    #[test]
    fn kill_signal_names() {
        assert_eq!("SIGTERM".parse::<KillSignal>().unwrap(), KillSignal::Term);
        assert_eq!("kill".parse::<KillSignal>().unwrap(), KillSignal::Kill);
        assert_eq!("2".parse::<KillSignal>().unwrap(), KillSignal::Int);
        assert!("SIGWHATEVER".parse::<KillSignal>().is_err());
        assert_eq!(KillSignal::Hup.to_string(), "SIGHUP");
    }

    #[test]
    fn command_line_joins_arguments() {
        let cmd = CommandDescriptor {
            id: 0,
            executable: "npm".into(),
            arguments: vec!["run".into(), "build".into()],
            display_name: "build".into(),
        };
        assert_eq!(cmd.command_line(), "npm run build");
    }
}
