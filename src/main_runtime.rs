use loyalty::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: console output plus an optional daily log file.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.level)));

    let log_dir = config
        .dir
        .clone()
        .or_else(|| std::env::var("LOYALTY_LOG_DIR").ok());

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so writability is checked first.
    let (file_layer, guard) = match log_dir.as_deref().map(prepare_log_dir) {
        Some(Ok(dir)) => {
            let file_appender = tracing_appender::rolling::daily(&dir, "loyalty.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        Some(Err(reason)) => {
            eprintln!("Warning: {}, file logging disabled", reason);
            (None, None)
        }
        None => (None, None),
    };

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/loyalty.log", dir);
    }

    guard
}

fn prepare_log_dir(dir: &str) -> Result<String, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("could not create log directory {} ({})", dir, e))?;

    let probe = std::path::Path::new(dir).join(".loyalty_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
        .map_err(|e| format!("could not write to log directory {} ({})", dir, e))?;
    let _ = std::fs::remove_file(&probe);

    Ok(dir.to_string())
}
