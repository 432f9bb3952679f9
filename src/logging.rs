use anyhow::{Result, anyhow};
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Default)]
pub struct LogOptions<'a> {
    /// INFO and above are appended here as well as shown on the console
    pub info_log: Option<&'a Path>,
    /// ERROR only
    pub error_log: Option<&'a Path>,
    pub verbose: bool,
    /// stdout carries machine-readable output; keep all logs on stderr
    pub json: bool,
}

fn open_log(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(f),
        Err(e) => {
            // no subscriber yet
            eprintln!(
                "failed to open log file {}, using console only: {}",
                path.display(),
                e
            );
            None
        }
    }
}

pub fn init(opts: &LogOptions<'_>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if opts.verbose {
            EnvFilter::new("image_decrypt_tool=debug,warn")
        } else {
            EnvFilter::new("image_decrypt_tool=info,warn")
        }
    });

    let (writer, ansi) = if opts.json {
        (BoxMakeWriter::new(std::io::stderr), std::io::stderr().is_terminal())
    } else {
        // warnings and errors to stderr, the rest to stdout
        (
            BoxMakeWriter::new(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout)),
            std::io::stdout().is_terminal() && std::io::stderr().is_terminal(),
        )
    };
    let console = fmt::layer()
        .with_ansi(ansi)
        .with_target(false)
        .with_writer(writer);

    let info_file = opts.info_log.and_then(open_log).map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
            .with_filter(LevelFilter::INFO)
    });

    let error_file = opts.error_log.and_then(open_log).map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
            .with_filter(LevelFilter::ERROR)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(info_file)
        .with(error_file)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
