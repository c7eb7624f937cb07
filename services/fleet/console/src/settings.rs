//! Per-session display settings.

use fleet_router::{DecodedEvent, Direction};
use fleet_wire::MessageType;
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Which representation of an event to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Frame bytes only
    Raw,
    /// Decoded message only
    #[default]
    Decoded,
    /// Both
    Both,
}

impl DisplayMode {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Raw => "raw",
            DisplayMode::Decoded => "decoded",
            DisplayMode::Both => "both",
        }
    }

    /// Whether raw bytes are shown
    pub fn shows_raw(&self) -> bool {
        matches!(self, DisplayMode::Raw | DisplayMode::Both)
    }

    /// Whether the decoded message is shown
    pub fn shows_decoded(&self) -> bool {
        matches!(self, DisplayMode::Decoded | DisplayMode::Both)
    }
}

impl FromStr for DisplayMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(DisplayMode::Raw),
            "decoded" => Ok(DisplayMode::Decoded),
            "both" => Ok(DisplayMode::Both),
            _ => Err(()),
        }
    }
}

/// How much detail each event frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Hex only
    Quiet,
    /// Adds hex dump and partial fields
    #[default]
    Normal,
    /// Adds base64, timestamps and HMAC trailer
    Verbose,
}

impl Verbosity {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
        }
    }
}

impl FromStr for Verbosity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "minimal" => Ok(Verbosity::Quiet),
            "normal" => Ok(Verbosity::Normal),
            "verbose" => Ok(Verbosity::Verbose),
            _ => Err(()),
        }
    }
}

/// Direction filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionFilter {
    /// Device to backend only
    In,
    /// Backend to device only
    Out,
    /// Everything
    #[default]
    Both,
}

impl DirectionFilter {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionFilter::In => "in",
            DirectionFilter::Out => "out",
            DirectionFilter::Both => "both",
        }
    }

    /// Whether events travelling this way pass
    pub fn allows(&self, direction: Direction) -> bool {
        match self {
            DirectionFilter::Both => true,
            DirectionFilter::In => direction == Direction::In,
            DirectionFilter::Out => direction == Direction::Out,
        }
    }
}

impl FromStr for DirectionFilter {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(DirectionFilter::In),
            "out" => Ok(DirectionFilter::Out),
            "both" => Ok(DirectionFilter::Both),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DirectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display settings owned by one console session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Raw, decoded or both
    pub mode: DisplayMode,
    /// Include envelope details
    pub hmac_detail: bool,
    /// Detail level
    pub verbosity: Verbosity,
    /// Hostname pattern
    pub filter: Option<String>,
    /// Direction filter
    pub direction: DirectionFilter,
    /// Message types to show; `None` shows all
    pub message_types: Option<Vec<MessageType>>,
}

impl SessionSettings {
    /// Whether an event passes the filters
    pub fn matches(&self, event: &DecodedEvent) -> bool {
        if !self.direction.allows(event.direction) {
            return false;
        }
        if let Some(pattern) = &self.filter {
            if !hostname_matches(pattern, &event.hostname) {
                return false;
            }
        }
        match &self.message_types {
            Some(types) => types.contains(&event.message_type),
            None => true,
        }
    }
}

/// Case-insensitive hostname match
///
/// Patterns containing `*`, `?` or `[` are globs anchored at both ends;
/// anything else, or a glob that fails to parse, matches as a substring.
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    if pattern.contains(['*', '?', '[']) {
        if let Ok(glob) = Pattern::new(pattern) {
            let options = MatchOptions {
                case_sensitive: false,
                ..MatchOptions::new()
            };
            return glob.matches_with(hostname, options);
        }
    }
    hostname
        .to_ascii_lowercase()
        .contains(&pattern.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.mode, DisplayMode::Decoded);
        assert_eq!(settings.verbosity, Verbosity::Normal);
        assert_eq!(settings.direction, DirectionFilter::Both);
        assert!(!settings.hmac_detail);
        assert!(settings.filter.is_none());
        assert!(settings.message_types.is_none());
    }

    #[test]
    fn test_parse_values() {
        assert_eq!("RAW".parse::<DisplayMode>(), Ok(DisplayMode::Raw));
        assert_eq!("minimal".parse::<Verbosity>(), Ok(Verbosity::Quiet));
        assert_eq!("Out".parse::<DirectionFilter>(), Ok(DirectionFilter::Out));
        assert!("sideways".parse::<DirectionFilter>().is_err());
    }

    #[test]
    fn test_hostname_matches() {
        assert!(hostname_matches("0001", "esg-0001"));
        assert!(hostname_matches("ESG", "esg-0001"));
        assert!(!hostname_matches("0002", "esg-0001"));
        assert!(hostname_matches("esg-*", "esg-0001"));
        assert!(hostname_matches("*-0001", "esg-0001"));
        assert!(hostname_matches("e*0*1", "esg-0001"));
        assert!(!hostname_matches("lab-*", "esg-0001"));
        assert!(hostname_matches("*", "anything"));
    }

    #[test]
    fn test_hostname_glob_classes() {
        assert!(hostname_matches("esg-000?", "esg-0007"));
        assert!(hostname_matches("ESG-000?", "esg-0007"));
        assert!(!hostname_matches("esg-000?", "esg-00071"));
        assert!(hostname_matches("esg-00[0-4]1", "esg-0031"));
        assert!(!hostname_matches("esg-00[0-4]1", "esg-0051"));
        assert!(hostname_matches("esg-[!l]*", "esg-0001"));
        assert!(!hostname_matches("[!e]*", "esg-0001"));

        // Escaped metacharacters match literally
        assert!(hostname_matches("lab[*]1", "lab*1"));
        assert!(!hostname_matches("lab[*]1", "lab-x1"));
        assert!(hostname_matches("lab[?]", "lab?"));
        assert!(!hostname_matches("lab[?]", "labs"));

        // Unparseable glob falls back to substring
        assert!(hostname_matches("d[n", "odd[name"));
        assert!(!hostname_matches("esg-[", "esg-0001"));
    }
}
