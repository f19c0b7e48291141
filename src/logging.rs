use std::error::Error;
use std::path::PathBuf;
use chrono::Utc;
use log::{info, error, debug};
use env_logger::{Builder, Target};

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Timestamped file under `~/.codonmix/logs`.
    File,
    Stderr,
}

/// Initialize logging with a timestamped record format.
/// Returns the log file path when logging to a file.
pub fn init_logging(target: LogTarget) -> Result<Option<PathBuf>, Box<dyn Error>> {
    let mut builder = Builder::from_default_env();
    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(buf,
            "{} [{}] [{}:{}] [{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            std::thread::current().name().unwrap_or("main"),
            record.args()
        )
    });

    let log_file = match target {
        LogTarget::File => {
            let log_dir = log_directory();
            std::fs::create_dir_all(&log_dir)?;
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let log_file = log_dir.join(format!("codonmix_{stamp}.log"));
            builder.target(Target::Pipe(Box::new(std::fs::File::create(&log_file)?)));
            Some(log_file)
        }
        LogTarget::Stderr => {
            builder.target(Target::Stderr);
            None
        }
    };
    builder.try_init()?;

    info!("Logging system initialized");
    if let Some(path) = &log_file {
        info!("Log file: {path:?}");
    }
    Ok(log_file)
}

fn log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codonmix")
        .join("logs")
}

/// Set logging level based on environment variable or default
pub fn set_log_level() {
    let level = std::env::var("CODONMIX_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();

    let env_filter = match level.as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => {
            eprintln!("Invalid log level '{level}', defaulting to 'info'");
            "info"
        }
    };

    std::env::set_var("RUST_LOG", format!("codonmix={env_filter}"));
}

/// Log system information at startup
pub fn log_system_info() {
    info!("=== codonmix {} starting ===", env!("CARGO_PKG_VERSION"));
    info!("Build target: {}", std::env::consts::ARCH);
    info!("Operating system: {}", std::env::consts::OS);
    info!("Current working directory: {:?}", std::env::current_dir().unwrap_or_default());
    info!("Available CPU cores: {}", num_cpus::get());

    debug!("Environment variables:");
    for (key, value) in std::env::vars() {
        if key.starts_with("CODONMIX_") || key == "RUST_LOG" {
            debug!("  {key}: {value}");
        }
    }
}

pub fn log_shutdown() {
    info!("=== codonmix shutting down ===");
    info!("Finished at {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
}

/// Report a fatal error to the log and to stderr.
pub fn log_critical_error(error: &str, context: Option<&str>) {
    match context {
        Some(ctx) => error!("CRITICAL ERROR [{ctx}]: {error}"),
        None => error!("CRITICAL ERROR: {error}"),
    }
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    match context {
        Some(ctx) => eprintln!("[{stamp}] CRITICAL ERROR [{ctx}]: {error}"),
        None => eprintln!("[{stamp}] CRITICAL ERROR: {error}"),
    }
}
