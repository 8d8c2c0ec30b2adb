use crate::numerical::optimization::trust_region_main::IterationRecord;
use chrono::Local;
use csv::Writer;
use simplelog::*;
use std::fs::File;
use std::io;

/// Parse a log level name: "debug", "info", "warn", "error" or "off"/"none"
pub fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" | "none" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// default log file name stamped with the current date and time
pub fn default_log_file_name() -> String {
    let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
    format!("trust_region_log_{}.txt", date_and_time)
}

/// Logger writing to a newly created file
pub fn file_logger(level: LevelFilter, filename: &str) -> io::Result<Box<WriteLogger<File>>> {
    let file = File::create(filename)?;
    Ok(WriteLogger::new(level, Config::default(), file))
}

/// Console logger plus an optional file logger. Ok(false) when logging is off
/// or a global logger is already installed (only the first call in a process wins).
/// A log file that cannot be created is an error and nothing is installed.
pub fn init_logger(level: LevelFilter, log_file: Option<&str>) -> io::Result<bool> {
    if level == LevelFilter::Off {
        return Ok(false);
    }
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));
    if let Some(filename) = log_file {
        loggers.push(file_logger(level, filename)?);
    }
    Ok(CombinedLogger::init(loggers).is_ok())
}

/// Write the iteration history of a run to a CSV file
pub fn save_history_to_csv(history: &[IterationRecord], filename: &str) -> io::Result<()> {
    let file = File::create(filename)?;
    let mut writer = Writer::from_writer(file);
    writer.write_record([
        "iteration",
        "radius",
        "step_norm",
        "predicted_reduction",
        "actual_reduction",
        "ratio",
        "accepted",
        "hit_boundary",
        "step_termination",
        "fallback",
        "value",
        "gradient_norm",
    ])?;
    for record in history {
        writer.write_record(&[
            record.iteration.to_string(),
            record.radius.to_string(),
            record.step_norm.to_string(),
            record.predicted_reduction.to_string(),
            record.actual_reduction.to_string(),
            record.ratio.to_string(),
            record.accepted.to_string(),
            record.hit_boundary.to_string(),
            record.step_termination.to_string(),
            record
                .fallback
                .map(|f| f.to_string())
                .unwrap_or_default(),
            record.value.to_string(),
            record.gradient_norm.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
