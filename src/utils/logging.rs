use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::Config;

pub struct LoggingGuards {
    _file_guard: WorkerGuard,
    _timing_guard: WorkerGuard,
    _json_file_guard: WorkerGuard,
    _json_timing_guard: WorkerGuard,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Installs the global subscriber.
///
/// `console_output` is false for the interactive session so log lines do not
/// interleave with the conversation on stdout; the file layers are always on.
pub fn init_logging(config: &Config, console_output: bool) -> LoggingGuards {
    let logs_dir = config.log_dir.as_path();
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let file_appender = tracing_appender::rolling::daily(logs_dir, "feedback.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let timing_appender = tracing_appender::rolling::daily(logs_dir, "timing.log");
    let (timing_writer, timing_guard) = tracing_appender::non_blocking(timing_appender);

    let json_file_appender = tracing_appender::rolling::daily(logs_dir, "feedback.jsonl");
    let (json_file_writer, json_file_guard) = tracing_appender::non_blocking(json_file_appender);

    let json_timing_appender = tracing_appender::rolling::daily(logs_dir, "timing.jsonl");
    let (json_timing_writer, json_timing_guard) =
        tracing_appender::non_blocking(json_timing_appender);

    let general_level = parse_log_level(&config.log_level);
    let general_filter = Targets::new()
        .with_default(general_level)
        .with_target("feedback.timing", LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("hyper_util::client::legacy::pool", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("tower_http", LevelFilter::WARN);
    let timing_filter = Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target("feedback.timing", LevelFilter::INFO);
    let stdout_filter = if console_output {
        general_filter.clone()
    } else {
        Targets::new().with_default(LevelFilter::OFF)
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(general_filter.clone());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(timing_writer)
        .with_ansi(false)
        .with_filter(timing_filter.clone());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_file_writer)
        .with_filter(general_filter);
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_timing_writer)
        .with_filter(timing_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(timing_layer)
        .with(json_file_layer)
        .with(json_timing_layer)
        .init();

    LoggingGuards {
        _file_guard: file_guard,
        _timing_guard: timing_guard,
        _json_file_guard: json_file_guard,
        _json_timing_guard: json_timing_guard,
    }
}
