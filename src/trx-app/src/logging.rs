// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`).
pub fn parse_level(log_level: Option<&str>) -> Option<Level> {
    log_level.and_then(|s| s.parse::<Level>().ok())
}

/// Initialize logging with optional level from config.
/// Falls back to INFO if level is None or invalid.
///
/// Thread names are included: the producer and scheduled dispatch work
/// log from their own named threads.
pub fn init_logging(log_level: Option<&str>) {
    let level = parse_level(log_level).unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_target(false)
        .with_thread_names(true)
        .with_max_level(level)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), Some(Level::DEBUG));
        assert_eq!(parse_level(Some("WARN")), Some(Level::WARN));
        assert_eq!(parse_level(Some("loud")), None);
        assert_eq!(parse_level(None), None);
    }
}
