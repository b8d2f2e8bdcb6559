//! Glob-based selection of the processes this controller governs.

use std::fmt;
use std::str::FromStr;

use glob::{MatchOptions, Pattern};
use thiserror::Error;

use rubber_supervisor::ProcessInfo;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled program glob such as `web_*` or `workers:*`.
///
/// `*` matches any run of characters including `:` and `/`, and matching is
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPattern {
    source: String,
    pattern: Pattern,
}

impl ProgramPattern {
    /// Compiles `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when `source` is not a valid glob.
    pub fn new(source: &str) -> Result<Self, PatternError> {
        let pattern = Pattern::new(source).map_err(|error| PatternError {
            pattern: source.to_owned(),
            position: error.pos,
            reason: error.msg,
        })?;
        Ok(Self {
            source: source.to_owned(),
            pattern,
        })
    }

    /// The glob as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when `candidate` matches the whole glob.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.pattern.matches_with(candidate, MATCH_OPTIONS)
    }
}

impl FromStr for ProgramPattern {
    type Err = PatternError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::new(source)
    }
}

impl fmt::Display for ProgramPattern {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.source)
    }
}

/// A program glob that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid program pattern '{pattern}' at position {position}: {reason}")]
pub struct PatternError {
    pattern: String,
    position: usize,
    reason: &'static str,
}

/// True when `info`'s bare name or namespec matches any pattern.
#[must_use]
pub fn matches(info: &ProcessInfo, patterns: &[ProgramPattern]) -> bool {
    let namespec = info.namespec();
    patterns
        .iter()
        .any(|pattern| pattern.matches(info.name()) || pattern.matches(&namespec))
}

/// The processes governed by `patterns`, in inventory order.
#[must_use]
pub fn select<'a>(inventory: &'a [ProcessInfo], patterns: &[ProgramPattern]) -> Vec<&'a ProcessInfo> {
    inventory
        .iter()
        .filter(|info| matches(info, patterns))
        .collect()
}
