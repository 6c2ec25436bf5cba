use crate::commands::load_commands;
use crate::error::ConfigError;
use crate::model::{KillSignal, MaxProcesses, OutputMode, RunConfig, SuccessTerm};
use crate::orchestrator::run_commands;
use crate::printer::PrinterConfig;
use crate::style::{generate_styles, StyleOptions, TimestampFormat};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use time::UtcOffset;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mlti",
    version,
    about = "Run commands concurrently with multiplexed, labelled output"
)]
pub struct Cli {
    /// Commands to run; `npm:<pattern>` style entries expand to manifest scripts
    #[arg(required = true)]
    pub commands: Vec<String>,

    /// How many commands may run at once: a number or a percentage like `50%` (default: all)
    #[arg(short = 'm', long)]
    pub max_processes: Option<String>,

    /// Display names for the commands, in order
    #[arg(short = 'n', long)]
    pub names: Option<String>,

    /// Separator used to split --names
    #[arg(long, default_value = ",")]
    pub name_separator: String,

    /// Which exit code to report: all, first or last
    #[arg(short = 's', long = "success-terms", alias = "success", default_value = "all")]
    pub success_terms: String,

    /// Print process output only, without labels
    #[arg(short = 'r', long)]
    pub raw: bool,

    /// Disable colors
    #[arg(long)]
    pub no_color: bool,

    /// Comma-separated ids or names whose output is suppressed
    #[arg(long)]
    pub hide: Option<String>,

    /// Buffer output per command and print it when the run ends
    #[arg(short = 'g', long)]
    pub group: bool,

    /// Show a timestamp in every label
    #[arg(long)]
    pub timings: bool,

    /// Label template: index, name, command, none, or a mix like `{index}-{name}`
    #[arg(short = 'p', long, default_value = "name")]
    pub prefix: String,

    /// Truncate labels to this many characters
    #[arg(short = 'l', long)]
    pub prefix_length: Option<usize>,

    /// Comma-separated label colors (`#rrggbb` or a color name), in command order
    #[arg(short = 'c', long)]
    pub prefix_colors: Option<String>,

    /// Timestamp pattern used with --timings
    #[arg(short = 't', long, default_value = TimestampFormat::DEFAULT_PATTERN)]
    pub timestamp_format: String,

    /// Stop every other command when one exits
    #[arg(short = 'k', long)]
    pub kill_others: bool,

    /// Stop every other command when one fails
    #[arg(long)]
    pub kill_others_on_fail: bool,

    /// Signal sent to running commands when the run is stopped
    #[arg(long, default_value = "SIGTERM")]
    pub kill_signal: String,

    /// Attempts per command, the first run included
    #[arg(long, default_value_t = 10)]
    pub restart_tries: u32,

    /// Delay between attempts: seconds, or a duration like `500ms`
    #[arg(long, default_value = "0")]
    pub restart_after: String,

    /// Manifest whose `scripts` table backs shorthand commands
    #[arg(long, default_value = "package.json")]
    pub manifest: PathBuf,
}

pub async fn run(args: Cli, offset: UtcOffset) -> Result<i32> {
    let names = split_list(args.names.as_deref(), &args.name_separator);
    let commands = load_commands(&args.commands, &args.manifest, &names)?;
    let cfg = build_config(&args, commands.len())?;
    let styles = generate_styles(&commands, &style_options(&args))?;
    let printer_cfg = build_printer_config(&args, offset);
    debug!(?cfg, commands = commands.len(), "configuration resolved");

    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());

    let out = std::io::LineWriter::new(std::io::stdout());
    let summary = run_commands(commands, &cfg, printer_cfg, styles, out, token).await?;
    if summary.cancelled {
        info!(exit_code = summary.exit_code, "run stopped early");
    }
    Ok(summary.exit_code)
}

/// Build a `RunConfig` from CLI arguments for a run of `total` commands.
pub fn build_config(args: &Cli, total: usize) -> Result<RunConfig, ConfigError> {
    let max_processes = MaxProcesses::parse(args.max_processes.as_deref())?.resolve(total);
    Ok(RunConfig {
        max_processes,
        restart_tries: args.restart_tries,
        restart_after: parse_delay(&args.restart_after)?,
        kill_signal: args.kill_signal.parse::<KillSignal>()?,
        kill_others: args.kill_others,
        kill_others_on_fail: args.kill_others_on_fail,
        success: SuccessTerm::parse(&args.success_terms),
    })
}

pub fn build_printer_config(args: &Cli, offset: UtcOffset) -> PrinterConfig {
    PrinterConfig {
        mode: if args.group {
            OutputMode::Grouped
        } else {
            OutputMode::Interleaved
        },
        raw: args.raw,
        color: !args.no_color,
        timings: args.timings,
        timestamp: TimestampFormat::new(&args.timestamp_format, offset),
    }
}

pub fn style_options(args: &Cli) -> StyleOptions {
    StyleOptions {
        hide: split_list(args.hide.as_deref(), ","),
        prefix: args.prefix.clone(),
        prefix_length: args.prefix_length,
        colors: split_list(args.prefix_colors.as_deref(), ","),
    }
}

/// Whole seconds, or anything `humantime` understands.
fn parse_delay(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|source| ConfigError::RestartDelay {
        value: raw.to_string(),
        source,
    })
}

/// Split a separated list, keeping empty entries so positions line up.
fn split_list(raw: Option<&str>, separator: &str) -> Vec<String> {
    let Some(list) = raw.filter(|l| !l.is_empty()) else {
        return Vec::new();
    };
    if separator.is_empty() {
        return vec![list.to_string()];
    }
    list.split(separator).map(str::to_string).collect()
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupted, stopping commands");
                        token.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted, stopping commands"),
                _ = sigterm.recv() => info!("terminated, stopping commands"),
            }
            token.cancel();
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping commands");
                token.cancel();
            }
        }
    });
}
