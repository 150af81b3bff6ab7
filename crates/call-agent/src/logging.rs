//! Logging setup for the call agent binary and embedding applications

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{AgentError, AgentResult};

/// Target used for full datagram dumps when protocol tracing is on
pub const TRACE_TARGET: &str = "mgcp::trace";

/// How the agent's log output is produced
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level applied to every target without its own directive
    pub level: Level,
    /// One JSON object per line instead of text
    pub json: bool,
    /// Source file and line of every record
    pub file_info: bool,
    /// Keep datagram dumps visible even when `level` is above INFO
    pub protocol_trace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            protocol_trace: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_protocol_trace(mut self) -> Self {
        self.protocol_trace = true;
        self
    }

    /// Filter directives added on top of `RUST_LOG`
    pub fn directives(&self) -> Vec<String> {
        let mut directives = vec![self.level.to_string().to_ascii_lowercase()];
        if self.protocol_trace && self.level < Level::INFO {
            directives.push(format!("{}=info", TRACE_TARGET));
        }
        directives
    }

    fn filter(&self) -> AgentResult<EnvFilter> {
        let mut filter = EnvFilter::from_default_env();
        for directive in self.directives() {
            let directive = Directive::from_str(&directive)
                .map_err(|e| AgentError::Config(format!("Invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` directives are honoured on top of the configured level. Fails if
/// a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> AgentResult<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };

    result.map_err(|e| AgentError::Config(format!("Failed to install log subscriber: {}", e)))
}

pub fn parse_log_level(level: &str) -> AgentResult<Level> {
    Level::from_str(level).map_err(|_| AgentError::Config(format!("Invalid log level: {}", level)))
}

pub fn log_welcome(version: &str) {
    tracing::info!("Starting MGCP call agent v{}", version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_protocol_trace_survives_quiet_level() {
        let quiet = LoggingConfig::new(Level::WARN).with_protocol_trace();
        assert_eq!(quiet.directives(), vec!["warn", "mgcp::trace=info"]);

        // INFO and below already let the dumps through
        let verbose = LoggingConfig::new(Level::DEBUG).with_protocol_trace();
        assert_eq!(verbose.directives(), vec!["debug"]);

        assert_eq!(LoggingConfig::new(Level::ERROR).directives(), vec!["error"]);
    }

    #[test]
    fn test_directives_parse() {
        let config = LoggingConfig::new(Level::ERROR).with_protocol_trace().with_file_info();
        assert!(config.file_info);
        assert!(config.filter().is_ok());
    }
}
