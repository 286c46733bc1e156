//! SFTP Client Binary
//!
//! Starts `ssh -s <destination> sftp`, speaks SFTP over the child's
//! stdin/stdout and runs one command. Ctrl-C cancels listings and transfers
//! cleanly: outstanding requests are drained and handles closed.
//!
//! Run with: cargo run --bin ferry-sftp-client -- <destination> ls /tmp

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use ferry_sftp::{
    CancellationToken, Client, Config, FileAttrs, LogFormat, LoggingConfig, SshConfig, StatVfs,
    TransferSummary,
};
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Remote host, as accepted by ssh (`[user@]host`)
    destination: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Server port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List directory contents
    Ls {
        /// Remote directory path
        #[arg(default_value = ".")]
        path: String,
    },
    /// Download a file
    Get {
        /// Remote file path
        remote: String,
        /// Local file path
        local: PathBuf,
        /// Copy permissions from the remote file
        #[arg(short, long)]
        preserve: bool,
    },
    /// Upload a file
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote file path
        remote: String,
        /// Send permissions and times of the local file
        #[arg(short, long)]
        preserve: bool,
    },
    /// Create directory
    Mkdir {
        /// Remote directory path
        path: String,
    },
    /// Remove file
    Rm {
        /// Remote file path
        path: String,
    },
    /// Remove directory
    Rmdir {
        /// Remote directory path
        path: String,
    },
    /// Rename file or directory
    Rename {
        /// Old path
        old: String,
        /// New path
        new: String,
    },
    /// Create a symbolic link
    Ln {
        /// Path the link points at
        target: String,
        /// Path of the new link
        link: String,
    },
    /// Show attributes of a remote path
    Stat {
        /// Remote path
        path: String,
        /// Do not follow a final symbolic link
        #[arg(short = 'l', long)]
        no_follow: bool,
    },
    /// Canonicalize a remote path
    Realpath {
        /// Remote path
        path: String,
    },
    /// Show the target of a symbolic link
    Readlink {
        /// Remote link path
        path: String,
    },
    /// Show filesystem usage
    Df {
        /// Remote path on the filesystem
        #[arg(default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Config::default()
    };

    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    if let Some(log_file) = &args.log_file {
        config.logging.file = Some(log_file.clone());
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&mut config.logging);

    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Operation failed");
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install the tracing subscriber. Logs go to stderr unless a file is
/// configured, so stdout only ever carries command output.
fn init_logging(logging: &mut LoggingConfig) -> Option<WorkerGuard> {
    if let Some(parent) = logging.file.as_deref().and_then(Path::parent) {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: Failed to create log directory: {}", e);
                eprintln!("Falling back to stderr logging");
                logging.file = None;
            }
        }
    }

    let filter = || EnvFilter::new(logging.level.clone());

    let Some(log_file) = logging.file.as_deref() else {
        match logging.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init(),
        }
        return None;
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .map_or_else(|| "ferry-sftp-client.log".into(), |n| n.to_string_lossy());
    let file_appender = tracing_appender::rolling::daily(directory, file_name.as_ref());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .init(),
    }

    Some(guard)
}

/// Build the transport command: `ssh [args] [-p port] -s destination subsystem`
fn transport_command(ssh_config: &SshConfig, destination: &str, port: Option<u16>) -> Command {
    let mut ssh = Command::new(&ssh_config.program);
    ssh.args(&ssh_config.args)
        .args(["-o", "ForwardX11 no", "-o", "ClearAllForwardings yes"]);
    if let Some(port) = port {
        ssh.arg("-p").arg(port.to_string());
    }
    ssh.arg("-s")
        .arg(destination)
        .arg(&ssh_config.subsystem)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true);
    // Keep terminal SIGINT away from ssh so Ctrl-C only fires the token
    // and the transport survives long enough to drain and close
    #[cfg(unix)]
    ssh.process_group(0);
    ssh
}

async fn run(args: Args, config: &Config) -> Result<()> {
    let mut ssh = transport_command(&config.ssh, &args.destination, args.port);

    debug!(program = %config.ssh.program, destination = %args.destination, "Starting transport");
    let mut child = ssh
        .spawn()
        .with_context(|| format!("Failed to run {}", config.ssh.program))?;
    let to_server = child.stdin.take().context("ssh stdin not captured")?;
    let from_server = child.stdout.take().context("ssh stdout not captured")?;

    let mut client = Client::init(from_server, to_server, config)
        .await
        .context("Connection to SFTP server failed")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping current operation");
            on_interrupt.cancel();
        }
    });

    let result = execute(&mut client, args.command, args.json, &cancel).await;

    // Closing our end of the pipe lets ssh exit on its own
    drop(client);
    match child.wait().await {
        Ok(status) if !status.success() => debug!(%status, "ssh exited"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Couldn't wait for ssh"),
    }

    result
}

async fn execute<R, W>(
    client: &mut Client<R, W>,
    command: Commands,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match command {
        Commands::Ls { path } => {
            let mut entries = client.read_dir(&path, cancel).await?;
            entries.sort_by(|a, b| a.filename.cmp(&b.filename));
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    if entry.longname.is_empty() {
                        println!("{}", entry.filename);
                    } else {
                        println!("{}", entry.longname);
                    }
                }
            }
        }
        Commands::Get {
            remote,
            local,
            preserve,
        } => {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&local)
                .await
                .with_context(|| format!("Couldn't open local file {}", local.display()))?;
            let summary = client.download(&remote, &mut file, preserve, cancel).await?;
            report("Fetched", &remote, summary, json)?;
        }
        Commands::Put {
            local,
            remote,
            preserve,
        } => {
            let mut file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("Couldn't open local file {}", local.display()))?;
            let summary = client
                .upload(&mut file, &remote, None, preserve, cancel)
                .await?;
            report("Uploaded", &remote, summary, json)?;
        }
        Commands::Mkdir { path } => {
            let attrs = FileAttrs {
                permissions: Some(0o777),
                ..FileAttrs::default()
            };
            client.mkdir(&path, &attrs).await?;
        }
        Commands::Rm { path } => client.remove(&path).await?,
        Commands::Rmdir { path } => client.rmdir(&path).await?,
        Commands::Rename { old, new } => {
            if !client.has_posix_rename() {
                debug!("Server lacks posix-rename, an existing target may be refused");
            }
            client.rename(&old, &new).await?;
        }
        Commands::Ln { target, link } => client.symlink(&target, &link).await?,
        Commands::Stat { path, no_follow } => {
            let attrs = if no_follow {
                client.lstat(&path).await?
            } else {
                client.stat(&path).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&attrs)?);
            } else {
                print_attrs(&path, &attrs);
            }
        }
        Commands::Realpath { path } => {
            let resolved = client.realpath(&path).await?;
            print_path(&resolved, json)?;
        }
        Commands::Readlink { path } => {
            let target = client.readlink(&path).await?;
            print_path(&target, json)?;
        }
        Commands::Df { path } => {
            let st = client.statvfs(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&st)?);
            } else {
                print_statvfs(&st);
            }
        }
    }

    Ok(())
}

fn report(verb: &str, path: &str, summary: TransferSummary, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path,
                "bytes": summary.bytes_transferred,
                "interrupted": summary.interrupted,
            })
        );
    } else if summary.interrupted {
        println!("{} {} interrupted after {} bytes", verb, path, summary.bytes_transferred);
    } else {
        info!(path, bytes = summary.bytes_transferred, "{}", verb);
        println!("{} {} ({} bytes)", verb, path, summary.bytes_transferred);
    }
    Ok(())
}

fn print_path(path: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(path)?);
    } else {
        println!("{}", path);
    }
    Ok(())
}

fn print_attrs(path: &str, attrs: &FileAttrs) {
    println!("  File: {}", path);
    if let Some(size) = attrs.size {
        println!("  Size: {}", size);
    }
    if let Some(perm) = attrs.permissions {
        let kind = if attrs.is_dir() {
            "directory"
        } else if attrs.is_symlink() {
            "symbolic link"
        } else if attrs.is_regular() {
            "regular file"
        } else {
            "other"
        };
        println!("  Mode: {:o} ({})", perm & 0o7777, kind);
    }
    if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
        println!("   Uid: {}  Gid: {}", uid, gid);
    }
    if let Some(mtime) = attrs.mtime {
        let shown = DateTime::from_timestamp(i64::from(mtime), 0)
            .map_or_else(|| mtime.to_string(), |t| t.to_rfc3339());
        println!("Modify: {}", shown);
    }
}

fn print_statvfs(st: &StatVfs) {
    let block = if st.frsize == 0 { st.bsize } else { st.frsize };
    let kib = |blocks: u64| blocks.saturating_mul(block) / 1024;
    let used = st.blocks.saturating_sub(st.bfree);
    let capacity = if st.blocks == 0 {
        0
    } else {
        used.saturating_mul(100) / st.blocks
    };

    println!(
        "{:>12} {:>12} {:>12} {:>12} {:>8}",
        "Size", "Used", "Avail", "(root)", "%Capacity"
    );
    println!(
        "{:>12} {:>12} {:>12} {:>12} {:>7}%",
        kib(st.blocks),
        kib(used),
        kib(st.bavail),
        kib(st.bfree),
        capacity
    );
    if st.is_read_only() {
        println!("(read-only)");
    }
}
