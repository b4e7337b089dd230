//! Logger setup for applications embedding the crate.
//!
//! The library itself only emits records through the `log` facade. Binaries and tests that want to
//! see them call [`init_logger`] once at startup.
use std::error::Error;
use std::path::Path;

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = parse_level(log_level);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Parse a level name, falling back to `info` for anything unrecognized.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("TRACE"), log::LevelFilter::Trace);
        assert_eq!(parse_level("off"), log::LevelFilter::Off);
        assert_eq!(parse_level("loud"), log::LevelFilter::Info);
    }

    #[test]
    fn file_logger_creates_parent_and_rejects_second_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");
        init_logger("debug", Some(path.as_path())).unwrap();
        assert!(path.exists());
        log::info!("validation run started");
        log::logger().flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO] - validation run started"));
        assert!(init_logger("info", None).is_err());
    }
}
