//! uartupdate CLI - Command-line tool for boot-ROM UART loaders.
//!
//! ## Features
//!
//! - Write files or hex words to device memory
//! - Read device memory to a file or the console
//! - Jump to or call code on the device
//! - Discover the serial port and baud rate by sync handshake
//! - Stream status messages from running device code
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uartupdate::{
    CrcWidth, DEFAULT_BAUD, DEFAULT_PORT_NAME, Error as LinkError, LinkSession, NativePort,
    SerialConfig, Timeouts, validate_port_name,
};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Lowest rate the host side is ever configured to.
pub(crate) const MIN_BAUD: u32 = 400;

pub(crate) const EXIT_PORT: i32 = 1;
pub(crate) const EXIT_BAUD: i32 = 2;
pub(crate) const EXIT_SYNC: i32 = 3;
pub(crate) const EXIT_FILE: i32 = 7;
pub(crate) const EXIT_UNSUPPORTED: i32 = 8;
pub(crate) const EXIT_SCAN: i32 = 9;
pub(crate) const EXIT_SIZE: i32 = 16;
pub(crate) const EXIT_COMMAND: i32 = 17;
pub(crate) const EXIT_CANCELLED: i32 = 130;

/// Failures that decide the process exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Port name rejected or the device could not be opened.
    #[error("Cannot open port")]
    Port(#[source] LinkError),

    /// Baud rate could not be applied.
    #[error("Baud rate error: {0}")]
    Baud(String),

    /// Device did not answer the sync handshake.
    #[error("Device not synchronized")]
    Sync(#[source] LinkError),

    /// Input or output file problem.
    #[error("{0}")]
    File(String),

    /// Size argument out of range.
    #[error("{0}")]
    Size(String),

    /// Port or baud discovery failed.
    #[error("Scan failed")]
    Scan(#[source] LinkError),

    /// A device command failed part way.
    #[error("Command failed")]
    Command(#[source] LinkError),

    /// Stopped by Ctrl-C.
    #[error("Operation cancelled")]
    Cancelled,
}

impl CliError {
    /// Process exit code for this failure.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Port(LinkError::Interrupted)
            | Self::Sync(LinkError::Interrupted)
            | Self::Scan(LinkError::Interrupted)
            | Self::Command(LinkError::Interrupted)
            | Self::Cancelled => EXIT_CANCELLED,
            Self::Command(LinkError::Transfer { source, .. })
                if matches!(**source, LinkError::Interrupted) =>
            {
                EXIT_CANCELLED
            },
            Self::Command(e) if e.is_output() => EXIT_FILE,
            Self::Port(LinkError::Unsupported(_)) | Self::Command(LinkError::Unsupported(_)) => {
                EXIT_UNSUPPORTED
            },
            Self::Port(_) => EXIT_PORT,
            Self::Baud(_) => EXIT_BAUD,
            Self::Sync(_) => EXIT_SYNC,
            Self::File(_) => EXIT_FILE,
            Self::Size(_) => EXIT_SIZE,
            Self::Command(e) if e.is_input() => EXIT_SIZE,
            Self::Scan(_) => EXIT_SCAN,
            Self::Command(_) => EXIT_COMMAND,
        }
    }
}

/// Exit code for any error returned from a command.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<CliError>())
        .map_or(1, CliError::exit_code)
}

/// uartupdate - Update devices through their boot-ROM UART loader.
///
/// Environment variables:
///   UARTUPDATE_PORT   - Serial port (default: ttyS0 / COM1)
///   UARTUPDATE_BAUD   - Baud rate (default: 115200, 0 scans for it)
///   UARTUPDATE_CRC    - Frame CRC width (16 or 32)
#[derive(Parser)]
#[command(name = "uartupdate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Addresses and sizes accept decimal or 0x-prefixed hexadecimal.")]
pub(crate) struct Cli {
    /// Serial port name (ttyS<N>, ttyUSB<N> or COM<N>).
    #[arg(short, long, global = true, env = "UARTUPDATE_PORT")]
    port: Option<String>,

    /// Baud rate; 0 scans for working rates instead of running the command.
    #[arg(short, long, global = true, env = "UARTUPDATE_BAUD")]
    baud: Option<u32>,

    /// Frame CRC width (16 or 32).
    #[arg(long, global = true, env = "UARTUPDATE_CRC", value_parser = parse_crc)]
    crc: Option<CrcWidth>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a file or hex words to device memory.
    #[command(visible_alias = "wr")]
    Write {
        /// Target address.
        #[arg(value_parser = parse_u32)]
        address: u32,

        /// Binary file to write.
        #[arg(required_unless_present = "words", conflicts_with = "words")]
        file: Option<PathBuf>,

        /// Whitespace-separated hex words, each written as 4 little-endian bytes.
        #[arg(long)]
        words: Option<String>,
    },

    /// Read device memory to a file or the console.
    #[command(visible_alias = "rd")]
    Read {
        /// Source address.
        #[arg(value_parser = parse_u32)]
        address: u32,

        /// Number of bytes.
        #[arg(value_parser = parse_size)]
        size: usize,

        /// Output file (hex dump to stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Jump to an address; the loader does not return.
    Go {
        /// Entry address.
        #[arg(value_parser = parse_u32)]
        address: u32,
    },

    /// Call code at an address and print its result code.
    Call {
        /// Entry address.
        #[arg(value_parser = parse_u32)]
        address: u32,
    },

    /// Probe serial ports for a device in command mode.
    Scan {
        /// Output the discovered port as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Probe baud rates for a working range.
    ScanBaud {
        /// First rate tried.
        #[arg(long, default_value = "400")]
        low: u32,

        /// Rates at or above this are not tried.
        #[arg(long, default_value = "150000")]
        high: u32,

        /// Output observations as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Switch the device to its high baud rate and follow it.
    SetHighBaud {
        /// Host rate matching the device's high rate.
        #[arg(long)]
        rate: u32,
    },

    /// Copy status messages from running device code into a file.
    Status {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

impl Commands {
    /// Whether the command talks to a synchronized device.
    fn needs_device(&self) -> bool {
        matches!(
            self,
            Self::Write { .. }
                | Self::Read { .. }
                | Self::Go { .. }
                | Self::Call { .. }
                | Self::SetHighBaud { .. }
                | Self::Status { .. }
        )
    }
}

/// Parse a number given in decimal or with a 0x prefix (underscores allowed).
fn parse_u32(s: &str) -> Result<u32, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

/// Parse a byte count; zero is rejected later with the size exit code.
fn parse_size(s: &str) -> Result<usize, String> {
    parse_u32(s).map(|n| n as usize)
}

fn parse_crc(s: &str) -> Result<CrcWidth, String> {
    s.parse().map_err(|e: LinkError| e.to_string())
}

/// Connection settings after merging flags, environment and config files.
pub(crate) struct Settings {
    /// Validated short port name.
    pub(crate) port: String,
    /// Requested rate; 0 means scan.
    pub(crate) baud: u32,
    pub(crate) crc: CrcWidth,
    pub(crate) timeouts: Timeouts,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let port = cli
            .port
            .clone()
            .or_else(|| config.port.connection.serial.clone())
            .unwrap_or_else(|| DEFAULT_PORT_NAME.to_string());
        let port = validate_port_name(&port).map_err(CliError::Port)?.to_string();

        let crc = match (cli.crc, &config.link.crc) {
            (Some(crc), _) => crc,
            (None, Some(text)) => text
                .parse()
                .map_err(|e: LinkError| CliError::File(format!("Invalid config: {e}")))?,
            (None, None) => CrcWidth::default(),
        };

        Ok(Self {
            port,
            baud: cli
                .baud
                .or(config.port.connection.baud)
                .unwrap_or(DEFAULT_BAUD),
            crc,
            timeouts: config.link.timeouts(),
        })
    }

    /// Line settings for opening the port.
    pub(crate) fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(&self.port, self.baud.max(MIN_BAUD))
    }

    /// Open the port without synchronizing.
    pub(crate) fn open(&self) -> Result<LinkSession<NativePort>> {
        let link = LinkSession::open(&self.port, self.serial_config())
            .map_err(CliError::Port)?
            .with_crc(self.crc)
            .with_timeouts(self.timeouts.clone());
        Ok(link)
    }

    /// Open the port and complete the sync handshake.
    pub(crate) fn connect(&self, quiet: bool) -> Result<LinkSession<NativePort>> {
        let mut link = self.open()?;
        if !quiet {
            eprintln!(
                "{} Waiting for device on {} at {} baud",
                style("⏳").yellow(),
                style(&self.port).cyan(),
                link.baud_rate()
            );
        }
        link.synchronize().map_err(CliError::Sync)?;
        if !quiet {
            eprintln!("{} Connected ({})", style("✓").green(), self.crc);
        }
        Ok(link)
    }
}

/// Byte progress bar on stderr, hidden when quiet or not a terminal.
pub(crate) fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "uartupdate v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Cannot install Ctrl-C handler: {e}");
    }
    uartupdate::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => return commands::discover::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            return if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    anyhow::anyhow!(
                        "specify a shell type, e.g.: uartupdate completions bash\n  \
                         Or use `uartupdate completions --install` to auto-install completions."
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            };
        },
        _ => {},
    }

    let settings = Settings::resolve(cli, &config)?;

    if settings.baud == 0 && cli.command.needs_device() {
        return commands::discover::cmd_scan_baud(cli, &settings, MIN_BAUD, 150_000, false);
    }

    match &cli.command {
        Commands::Write {
            address,
            file,
            words,
        } => commands::memory::cmd_write(cli, &settings, *address, file.as_deref(), words.as_deref()),
        Commands::Read {
            address,
            size,
            output,
        } => commands::memory::cmd_read(cli, &settings, *address, *size, output.as_deref()),
        Commands::Go { address } => commands::memory::cmd_go(cli, &settings, *address),
        Commands::Call { address } => commands::memory::cmd_call(cli, &settings, *address),
        Commands::SetHighBaud { rate } => commands::memory::cmd_set_high_baud(cli, &settings, *rate),
        Commands::Status { output } => commands::memory::cmd_status(cli, &settings, output),
        Commands::Scan { json } => commands::discover::cmd_scan(cli, &settings, &mut config, *json),
        Commands::ScanBaud { low, high, json } => {
            commands::discover::cmd_scan_baud(cli, &settings, *low, *high, *json)
        },
        Commands::ListPorts { .. } | Commands::Completions { .. } => Ok(()),
    }
}
