#![allow(non_snake_case)]
use RustedTrustRegion::Examples::trust_region_examples::trust_region_examples;
use RustedTrustRegion::Utils::logger::{default_log_file_name, init_logger, parse_log_level};
use log::error;
use simplelog::LevelFilter;

fn main() {
    // usage: RustedTrustRegion [example number] [log level] [file]
    let args: Vec<String> = std::env::args().collect();
    let example = args.get(1).and_then(|s| s.parse::<usize>().ok());
    let level = args
        .get(2)
        .and_then(|s| parse_log_level(s))
        .unwrap_or(LevelFilter::Info);
    let log_file = match args.get(3).map(|s| s.as_str()) {
        Some("file") => Some(default_log_file_name()),
        Some(name) => Some(name.to_string()),
        None => None,
    };
    if let Err(e) = init_logger(level, log_file.as_deref()) {
        // console only, then report the file problem through it
        let _ = init_logger(level, None);
        error!(
            "cannot create log file {}: {}",
            log_file.as_deref().unwrap_or_default(),
            e
        );
    }
    match example {
        Some(i) => trust_region_examples(i),
        None => {
            for i in 0..=5 {
                trust_region_examples(i);
            }
        }
    }
}
