//! Log output formats for the listener's stderr stream.

use strum::{Display, EnumString};

/// How each log line is rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers reading supervisor's
    /// stderr capture.
    #[default]
    Json,
    /// Single-line text for reading the listener's log by eye.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;
