//! unrpa CLI - Command-line tool for extracting Ren'Py archives.
//!
//! This is the main entry point for the unrpa command-line application.

use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use unrpa::prelude::*;
use unrpa::rpa::known_names;

/// unrpa - extract files from the RPA archive format
#[derive(Parser, Debug)]
#[command(name = "unrpa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Explain what is being done (repeat for more detail)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "silent")]
    verbose: u8,

    /// No output except errors
    #[arg(short, long)]
    silent: bool,

    /// Only list the contents of the archive
    #[arg(short, long)]
    list: bool,

    /// Extract into this directory instead of the current one
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Create the extraction directory if it does not exist
    #[arg(short, long)]
    mkdir: bool,

    /// Force a specific archive version instead of detecting it
    #[arg(short, long = "force", value_name = "VERSION", help = force_help())]
    force: Option<String>,

    /// Keep extracting when a file fails
    #[arg(long)]
    continue_on_error: bool,

    /// Index offset, for archives whose header cannot be parsed (decimal or 0x hex)
    #[arg(short, long, value_parser = parse_number, requires = "key")]
    offset: Option<u64>,

    /// Index obfuscation key, used together with --offset (decimal or 0x hex)
    #[arg(short, long, value_parser = parse_number, requires = "offset")]
    key: Option<u64>,

    /// The archive to extract
    #[arg(value_name = "FILENAME")]
    filename: PathBuf,
}

fn force_help() -> String {
    format!(
        "Force a specific archive version; may cause extraction to fail. Known versions: {}",
        known_names()
    )
}

/// Validated run configuration.
#[derive(Debug)]
struct Settings {
    archive: PathBuf,
    destination: PathBuf,
    mkdir: bool,
    list: bool,
    verbosity: u8,
    continue_on_error: bool,
    options: OpenOptions,
}

impl Settings {
    /// Check option combinations before any archive I/O happens.
    fn from_cli(cli: &Cli) -> std::result::Result<Self, Error> {
        let verbosity = if cli.silent { 0 } else { cli.verbose.saturating_add(1) };

        let version = cli.force.as_deref().map(Version::from_name).transpose()?;
        let offset_and_key = OffsetKey::from_parts(cli.offset, cli.key)?;

        if cli.list && cli.path.is_some() {
            return Err(Error::InvalidInput(
                "--path is only valid when extracting".to_string(),
            ));
        }
        if cli.mkdir && cli.path.is_none() {
            return Err(Error::InvalidInput(
                "--mkdir is only valid together with --path".to_string(),
            ));
        }
        if let Some(path) = &cli.path {
            if !cli.mkdir && !path.is_dir() {
                return Err(Error::InvalidInput(format!(
                    "no such directory: '{}', use --mkdir to create it",
                    path.display()
                )));
            }
        }
        if cli.list && verbosity == 0 {
            return Err(Error::InvalidInput(
                "--list cannot be combined with --silent".to_string(),
            ));
        }
        if !cli.filename.is_file() {
            return Err(Error::InvalidInput(format!(
                "no such file: '{}'",
                cli.filename.display()
            )));
        }

        let destination = match &cli.path {
            Some(path) => path.clone(),
            None => std::env::current_dir().map_err(Error::Io)?,
        };

        Ok(Self {
            archive: cli.filename.clone(),
            destination,
            mkdir: cli.mkdir,
            list: cli.list,
            verbosity,
            continue_on_error: cli.continue_on_error,
            options: OpenOptions::new()
                .version(version)
                .offset_and_key(offset_and_key),
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;

    init_logging(settings.verbosity);

    if settings.list {
        cmd_list(&settings)?;
    } else {
        cmd_extract(&settings)?;
    }

    Ok(())
}

/// Map verbosity to a tracing filter; `RUST_LOG` takes precedence.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_list(settings: &Settings) -> Result<()> {
    let archive = RpaArchive::open_with(&settings.archive, &settings.options)
        .with_context(|| format!("Failed to open archive {}", settings.archive.display()))?;

    debug!("Listing files:");
    for path in archive.list_paths() {
        println!("{}", path);
    }

    Ok(())
}

fn cmd_extract(settings: &Settings) -> Result<()> {
    info!("Extracting files from {}", settings.archive.display());

    if settings.mkdir {
        debug!("Creating directory structure: {}", settings.destination.display());
        fs::create_dir_all(&settings.destination).with_context(|| {
            format!("Failed to create {}", settings.destination.display())
        })?;
    }

    let start = Instant::now();
    let archive = RpaArchive::open_with(&settings.archive, &settings.options)
        .with_context(|| format!("Failed to open archive {}", settings.archive.display()))?;

    info!(
        "Loaded {} entries from {} archive in {:?}",
        archive.len(),
        archive.version(),
        start.elapsed()
    );

    let tty = std::io::stdout().is_terminal();
    let pb = (tty && settings.verbosity == 1).then(|| {
        let pb = ProgressBar::new(archive.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    });

    let start = Instant::now();
    let report = archive.extract_all(
        &settings.destination,
        |progress| {
            if let Some(pb) = &pb {
                pb.set_position(progress.index as u64);
                pb.set_message(progress.path.to_string());
            }
            debug!(
                "[{:>6.2}%] {}",
                progress.index as f64 * 100.0 / progress.total as f64,
                progress.path
            );
            if !tty && settings.verbosity > 1 {
                println!("{}", progress.path);
            }
        },
        settings.continue_on_error,
    )?;

    if let Some(pb) = &pb {
        pb.finish_with_message("Done");
    }

    if !report.is_complete() {
        warn!(
            "{} of {} files could not be extracted (see errors above)",
            report.failures.len(),
            archive.len()
        );
    }
    info!(
        "Extracted {} files in {:?}",
        report.extracted,
        start.elapsed()
    );

    Ok(())
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(text: &str) -> std::result::Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid number {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("unrpa").chain(args.iter().copied())).unwrap()
    }

    fn archive_file() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".rpa").tempfile().unwrap()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x1F"), Ok(31));
        assert!(parse_number("zz").is_err());
    }

    #[test]
    fn test_defaults() {
        let file = archive_file();
        let cli = parse(&[file.path().to_str().unwrap()]);
        let settings = Settings::from_cli(&cli).unwrap();

        assert_eq!(settings.verbosity, 1);
        assert!(!settings.list);
        assert_eq!(settings.options, OpenOptions::new());
        assert_eq!(settings.destination, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_verbosity_levels() {
        let file = archive_file();
        let path = file.path().to_str().unwrap();

        let settings = Settings::from_cli(&parse(&["-vv", path])).unwrap();
        assert_eq!(settings.verbosity, 3);

        let settings = Settings::from_cli(&parse(&["-s", path])).unwrap();
        assert_eq!(settings.verbosity, 0);
    }

    #[test]
    fn test_offset_and_key_must_be_paired() {
        let file = archive_file();
        let path = file.path().to_str().unwrap();

        assert!(Cli::try_parse_from(["unrpa", "-o", "10", path]).is_err());

        let settings = Settings::from_cli(&parse(&["-o", "0x10", "-k", "5", path])).unwrap();
        assert_eq!(
            settings.options.manual_offset_and_key(),
            Some(OffsetKey::keyed(16, 5))
        );
    }

    #[test]
    fn test_force_version() {
        let file = archive_file();
        let path = file.path().to_str().unwrap();

        let settings = Settings::from_cli(&parse(&["-f", "zix-12b", path])).unwrap();
        assert_eq!(settings.options.forced_version(), Some(Version::Zix12b));

        let err = Settings::from_cli(&parse(&["-f", "RPA-9.0", path])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_conflicting_options() {
        let file = archive_file();
        let path = file.path().to_str().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dir_arg = dir.path().to_str().unwrap();
        let missing = dir.path().join("missing");
        let missing_arg = missing.to_str().unwrap();

        let rejected: [&[&str]; 4] = [
            &["-l", "-p", dir_arg, path],
            &["-m", path],
            &["-p", missing_arg, path],
            &["-l", "-s", path],
        ];
        for args in rejected {
            let err = Settings::from_cli(&parse(args)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "args {:?}", args);
        }

        let settings = Settings::from_cli(&parse(&["-m", "-p", missing_arg, path])).unwrap();
        assert!(settings.mkdir);
        assert_eq!(settings.destination, missing);
    }

    #[test]
    fn test_filename_is_required_positional() {
        use clap::CommandFactory;

        let command = Cli::command();
        let filename = command
            .get_arguments()
            .find(|arg| arg.get_id() == "filename")
            .unwrap();

        assert!(filename.is_required_set());
        assert!(filename.get_env().is_none());
        assert!(Cli::try_parse_from(["unrpa", "-l"]).is_err());
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.rpa");

        let err = Settings::from_cli(&parse(&[missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
