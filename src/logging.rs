//! Structured logging setup, via `log` + `log4rs` (matching the teacher's
//! own logging stack per SPEC_FULL.md §2). A log4rs YAML/TOML fragment
//! supplied by `--log-config`/`CHAT_LOG_CONFIG` is preferred; absent that,
//! a sane stderr default is installed.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Initializes the global logger. Never fails: a broken `--log-config`
/// file falls back to the default rather than preventing the server from
/// starting (a fatal-startup condition per spec.md §7 would be too
/// strict for a logging misconfiguration).
pub fn init(log_config: Option<&Path>) {
    if let Some(path) = log_config {
        match log4rs::init_file(path, Default::default()) {
            Ok(()) => return,
            Err(e) => {
                eprintln!(
                    "failed to load log config {}: {e}; falling back to the stderr default",
                    path.display()
                );
            }
        }
    }
    init_default();
}

fn init_default() {
    let encoder = PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {l} [{T}] {t} - {m}{n}");
    let stdout = ConsoleAppender::builder().encoder(Box::new(encoder)).build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("the built-in default log4rs config is always valid");
    // Only fails if a logger is already installed; fine to ignore in
    // tests that may initialize logging more than once.
    let _ = log4rs::init_config(config);
}
