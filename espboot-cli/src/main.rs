//! espboot CLI - Command-line tool for flashing ESP8266-class chips.
//!
//! ## Features
//!
//! - Flash one or more binaries at given addresses
//! - Erase flash regions
//! - List supported board profiles
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use espboot::{
    BoardKind, Flasher, FlashFrequency, FlashMode, FlashParams, FlashSize, SerialConfig,
    SessionConfig,
};
use log::{debug, error};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;

use config::Config;

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// espboot - Flash ESP8266-class chips through their serial boot ROM.
///
/// Environment variables:
///   ESPBOOT_PORT   - Default serial port
///   ESPBOOT_BAUD   - Default baud rate (default: 115200)
///   ESPBOOT_BOARD  - Default board profile (esp12)
#[derive(Parser)]
#[command(name = "espboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "ESPBOOT_PORT")]
    pub port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "ESPBOOT_BAUD")]
    pub baud: Option<u32>,

    /// Board profile [default: esp12].
    #[arg(long, global = true, env = "ESPBOOT_BOARD")]
    pub board: Option<String>,

    /// Flash mode written into image headers (qio, qout, dio, dout).
    #[arg(long, global = true)]
    pub flash_mode: Option<String>,

    /// Flash size written into image headers (4m, 2m, 8m, 16m, 32m, ...).
    #[arg(long, global = true)]
    pub flash_size: Option<String>,

    /// Flash frequency written into image headers (40m, 26m, 20m, 80m).
    #[arg(long, global = true)]
    pub flash_freq: Option<String>,

    /// Give up connecting after this many seconds (0 = never).
    #[arg(long, global = true, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Write binaries to flash, in the order given.
    Flash {
        /// Region to write (format: address:file, can be repeated).
        #[arg(required = true, value_name = "ADDR:FILE", value_parser = parse_region_arg)]
        regions: Vec<(u32, PathBuf)>,

        /// Stay in the boot ROM instead of running the new firmware.
        #[arg(long)]
        no_reboot: bool,
    },

    /// Erase a flash region.
    Erase {
        /// Start of the region.
        #[arg(short, long, value_parser = parse_address_arg)]
        address: u32,

        /// Length of the region in bytes.
        #[arg(short, long, value_parser = parse_address_arg)]
        size: u32,
    },

    /// List supported board profiles.
    Boards {
        /// Output the list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// Parse a region argument in the format "address:file".
fn parse_region_arg(s: &str) -> Result<(u32, PathBuf), String> {
    let Some((address, path)) = s.split_once(':') else {
        return Err(format!(
            "Invalid format: '{s}'. Expected 'address:file' (e.g., '0x00000:boot.bin')"
        ));
    };
    if path.is_empty() {
        return Err(format!("Missing file in '{s}'"));
    }

    let address = parse_address_arg(address)?;
    Ok((address, PathBuf::from(path)))
}

/// Parse an address or size (hex with 0x prefix, or decimal).
fn parse_address_arg(s: &str) -> Result<u32, String> {
    espboot::parse_address(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
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
        "espboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    espboot::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash { regions, no_reboot } => {
            commands::flash::cmd_flash(cli, &config, regions, *no_reboot)
        },
        Commands::Erase { address, size } => {
            commands::erase::cmd_erase(cli, &config, *address, *size)
        },
        Commands::Boards { json } => commands::boards::cmd_boards(*json),
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if was_interrupted() {
        return 130;
    }
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<espboot::Error>() {
        Some(espboot::Error::Cancelled) => 130,
        _ => 1,
    }
}

/// Serial port from the command line, environment or config.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
        .ok_or_else(|| {
            CliError::Usage(
                "No serial port given. Use --port, ESPBOOT_PORT or [connection] serial in espboot.toml"
                    .to_string(),
            )
            .into()
        })
}

/// Settings shared by every command that talks to a board.
pub(crate) struct Target {
    pub board: BoardKind,
    pub flash: FlashParams,
    pub serial: SerialConfig,
    pub session: SessionConfig,
}

impl Target {
    /// Resolve board, flash parameters, port and timing from CLI and config.
    pub(crate) fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let board_name = cli
            .board
            .as_deref()
            .or(config.flash.board.as_deref())
            .unwrap_or("esp12");
        let board: BoardKind = board_name.parse()?;

        let defaults = board.default_flash_params();
        let mode = pick(&cli.flash_mode, &config.flash.mode)
            .map(str::parse::<FlashMode>)
            .transpose()?
            .unwrap_or(defaults.mode);
        let size = pick(&cli.flash_size, &config.flash.size)
            .map(str::parse::<FlashSize>)
            .transpose()?
            .unwrap_or(defaults.size);
        let frequency = pick(&cli.flash_freq, &config.flash.freq)
            .map(str::parse::<FlashFrequency>)
            .transpose()?
            .unwrap_or(defaults.frequency);
        let flash = FlashParams::new(mode, size, frequency);

        let baud = cli
            .baud
            .or(config.connection.baud)
            .unwrap_or(espboot::port::DEFAULT_BAUD);
        let serial = SerialConfig::new(get_port(cli, config)?, baud);

        let connect_timeout = match cli
            .connect_timeout
            .or(config.flash.connect_timeout_secs)
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => SessionConfig::default().connect_timeout,
        };
        let session = SessionConfig::default().with_connect_timeout(connect_timeout);

        Ok(Self {
            board,
            flash,
            serial,
            session,
        })
    }

    /// Open the port and wrap it in a flasher; progress goes to the log.
    pub(crate) fn open(&self) -> Result<Box<dyn Flasher>> {
        debug!("Board {} with flash {}", self.board, self.flash);
        let handler: espboot::EventHandler = Box::new(commands::log_event);
        let flasher = self.board.open_flasher(
            &self.serial,
            Some(self.flash),
            self.session.clone(),
            Some(handler),
        )?;
        Ok(flasher)
    }
}

fn pick<'a>(cli: &'a Option<String>, config: &'a Option<String>) -> Option<&'a str> {
    cli.as_deref().or(config.as_deref())
}

/// Fail with a cancellation error once Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Run `op` and close the flasher whatever the outcome.
pub(crate) fn with_flasher<F>(mut flasher: Box<dyn Flasher>, op: F) -> Result<()>
where
    F: FnOnce(&mut dyn Flasher) -> Result<()>,
{
    let result = op(flasher.as_mut());
    let closed = flasher.close();
    result?;
    closed?;
    Ok(())
}
