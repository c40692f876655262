//! multiexec CLI
//!
//! Command-line interface for the multiexec daemon

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use eyre::{WrapErr, bail};
use multiexec_api::{DispatchRequest, RunEvent, RunInfo};
use multiexec_client::{DispatchClient, HttpClient, SseLines, TransferTarget};
use multiexec_core::{RunState, expand_ranges, render};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "multiexec")]
#[command(about = "Run a command on many hosts at once", long_about = None)]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "MULTIEXEC_URL", default_value = "http://127.0.0.1:8080", global = true)]
    url: String,

    /// Log filter, e.g. `debug` or `multiexec_client=trace`
    #[arg(long, env = "MULTIEXEC_LOG", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command on every target host
    Run {
        #[command(flatten)]
        target: TargetArgs,
        /// Write a timestamped transcript to this file
        #[arg(long)]
        log: Option<PathBuf>,
        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Copy a file to every target host
    Upload {
        #[command(flatten)]
        target: TargetArgs,
        /// Remote directory (daemon default when omitted)
        #[arg(long)]
        remote_path: Option<String>,
        file: PathBuf,
    },
    /// Upload and run a script on every target host
    Script {
        #[command(flatten)]
        target: TargetArgs,
        /// Run through sudo using the ssh password
        #[arg(long)]
        sudo: bool,
        file: PathBuf,
    },
    /// List active runs
    Runs,
    /// Show one run
    Show { id: Uuid },
    /// Cancel a run
    Cancel { id: Uuid },
    /// Print the hosts a range expands to
    Expand {
        #[arg(required = true)]
        ranges: Vec<String>,
    },
    /// Check the daemon
    Health,
}

/// Which hosts to reach and how to log in
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Single host, comma list or dash range (`10.0.0.1-10`)
    #[arg(short, long, default_value = "")]
    range: String,
    /// File with one host per line, taken as written; replaces `--range`
    #[arg(long)]
    hosts_file: Option<PathBuf>,
    #[arg(short, long, env = "MULTIEXEC_USER")]
    user: String,
    #[arg(short, long, env = "MULTIEXEC_PASS", default_value = "", hide_env_values = true)]
    pass: String,
}

impl TargetArgs {
    fn file_lines(&self) -> Result<Vec<String>> {
        let Some(path) = &self.hosts_file else {
            return Ok(Vec::new());
        };
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read hosts file {}", path.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn check(&self) -> Result<()> {
        if self.range.trim().is_empty() && self.hosts_file.is_none() {
            bail!("no hosts given; use --range or --hosts-file");
        }
        Ok(())
    }

    fn request(&self, command: String) -> Result<DispatchRequest> {
        self.check()?;
        Ok(DispatchRequest {
            host_range: self.range.clone(),
            hosts_file_lines: self.file_lines()?,
            ssh_user: self.user.clone(),
            ssh_pass: self.pass.clone(),
            command,
        })
    }

    fn transfer(&self) -> Result<TransferTarget> {
        self.check()?;
        Ok(TransferTarget {
            ssh_user: self.user.clone(),
            ssh_pass: self.pass.clone(),
            hosts: self.file_lines()?,
            host_range: self.range.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let client = HttpClient::new(&cli.url)?;

    match cli.command {
        Commands::Run {
            target,
            log,
            command,
        } => {
            let request = target.request(command.join(" "))?;
            run(&client, &request, log.as_deref()).await
        }
        Commands::Upload {
            target,
            remote_path,
            file,
        } => {
            let (name, contents) = read_payload(&file)?;
            let lines = client
                .upload_file(&target.transfer()?, &name, contents, remote_path.as_deref())
                .await?;
            print_lines(lines).await
        }
        Commands::Script { target, sudo, file } => {
            let (name, contents) = read_payload(&file)?;
            let lines = client
                .run_script(&target.transfer()?, &name, contents, sudo)
                .await?;
            print_lines(lines).await
        }
        Commands::Runs => {
            let runs = client.list_runs().await?;
            if runs.is_empty() {
                println!("No active runs");
            }
            for info in &runs {
                print_run(info);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { id } => {
            print_run(&client.get_run(id).await?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cancel { id } => {
            let info = client.cancel_run(id).await?;
            println!("Cancel requested");
            print_run(&info);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Expand { ranges } => {
            for host in expand_ranges(&ranges.join(","))? {
                println!("{host}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let health = client.health().await?;
            println!("{}", health.status);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Stream a dispatch to the terminal until the server's `done`
///
/// Ctrl-C asks the daemon to stop the run; a second Ctrl-C leaves without
/// waiting for the final summary.
async fn run(client: &HttpClient, request: &DispatchRequest, log: Option<&Path>) -> Result<ExitCode> {
    let url = client.dispatch_url()?;
    let mut stream = DispatchClient::connect(url.as_str(), request).await?;
    let mut mirror = RunState::default();
    let mut transcript = String::new();

    loop {
        tokio::select! {
            event = stream.recv() => {
                let Some(event) = event else { break };
                if mirror.apply(&event).applied() {
                    show(&event, &mut transcript);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if mirror.cancel_requested() {
                    warn!("leaving without waiting for the run to stop");
                    break;
                }
                eprintln!("Stopping run...");
                mirror.mark_cancel_requested();
                if let Err(e) = stream.stop() {
                    debug!(error = %e, "stop request not sent");
                }
            }
        }
    }

    for event in mirror.transport_closed() {
        show(&event, &mut transcript);
    }
    if !mirror.unresolved().is_empty() {
        let line = format!(
            "Connection lost; outcome unknown for: {}",
            mirror.unresolved().join(", ")
        );
        eprintln!("{line}");
        transcript.push_str(&stamp(&line));
    }

    if let Some(path) = log {
        std::fs::write(path, &transcript)
            .wrap_err_with(|| format!("failed to write log {}", path.display()))?;
    }

    let snapshot = mirror.snapshot();
    if snapshot.failure > 0 || snapshot.pending > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn show(event: &RunEvent, transcript: &mut String) {
    let text = render::describe(event);
    match event {
        RunEvent::Error { .. } => eprintln!("{text}"),
        _ => println!("{text}"),
    }
    for line in text.lines() {
        transcript.push_str(&stamp(line));
    }
}

fn stamp(line: &str) -> String {
    format!("[{}] {line}\n", Local::now().format("%H:%M:%S"))
}

async fn print_lines(mut lines: SseLines) -> Result<ExitCode> {
    let mut failed = false;
    while let Some(line) = lines.next_line().await? {
        failed |= line.contains("] Failed") || line.contains("] Error") || line.contains("] Connect failed");
        println!("{line}");
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn read_payload(path: &Path) -> Result<(String, Vec<u8>)> {
    let contents =
        std::fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("{} has no usable file name", path.display());
    };
    Ok((name.to_string(), contents))
}

fn print_run(info: &RunInfo) {
    let a = &info.aggregate;
    println!(
        "{}  {:<8} {}  started {}  total={} started={} success={} failure={} pending={}",
        info.id,
        format!("{:?}", info.phase),
        info.job,
        info.started_at.format("%Y-%m-%d %H:%M:%S"),
        a.total,
        a.started,
        a.success,
        a.failure,
        a.pending,
    );
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "multiexec", "run", "-u", "admin", "-r", "10.0.0.1-3", "ls", "-la", "/tmp",
        ])
        .unwrap();

        let Commands::Run {
            target, command, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        let request = target.request(command.join(" ")).unwrap();
        assert_eq!(request.command, "ls -la /tmp");
        assert_eq!(request.host_range, "10.0.0.1-3");
        assert_eq!(request.ssh_user, "admin");
        assert!(request.hosts_file_lines.is_empty());
    }

    #[test]
    fn test_hosts_file_lines_are_trimmed() {
        let path = std::env::temp_dir().join(format!("multiexec-cli-hosts-{}", std::process::id()));
        std::fs::write(&path, "10.0.0.1\n\n  web-02.lan  \n").unwrap();
        let target = TargetArgs {
            range: String::new(),
            hosts_file: Some(path.clone()),
            user: "admin".to_string(),
            pass: String::new(),
        };

        let transfer = target.transfer().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(transfer.hosts, vec!["10.0.0.1", "web-02.lan"]);
    }

    #[test]
    fn test_hosts_file_help_promises_no_ranges() {
        let cli = Cli::command();
        let run = cli.find_subcommand("run").unwrap();
        let help = run
            .get_arguments()
            .find(|arg| arg.get_id() == "hosts_file")
            .and_then(|arg| arg.get_help())
            .map(ToString::to_string)
            .unwrap();

        assert!(help.contains("one host per line"));
        assert!(!help.contains("range per line"));
    }

    #[test]
    fn test_missing_hosts_is_rejected() {
        let target = TargetArgs {
            range: " ".to_string(),
            hosts_file: None,
            user: "admin".to_string(),
            pass: String::new(),
        };
        assert!(target.request("uptime".to_string()).is_err());
    }
}
