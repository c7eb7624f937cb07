//! Process-wide audit switches.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogToggle {
    /// Command and response auditing
    CmdLog,
    /// Alarm auditing
    AlarmLog,
}

impl LogToggle {
    /// Console name
    pub fn as_str(&self) -> &'static str {
        match self {
            LogToggle::CmdLog => "CMDLOG",
            LogToggle::AlarmLog => "ALARMLOG",
        }
    }
}

impl fmt::Display for LogToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogToggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CMDLOG" => Ok(LogToggle::CmdLog),
            "ALARMLOG" => Ok(LogToggle::AlarmLog),
            other => Err(format!("unknown toggle '{}'", other)),
        }
    }
}

/// Audit switches shared by every console session and the audit sink
///
/// Initial values come from configuration; changes are not persisted.
#[derive(Debug, Default)]
pub struct LogToggles {
    cmdlog: AtomicBool,
    alarmlog: AtomicBool,
}

/// Point-in-time copy for status output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleSnapshot {
    /// CMDLOG state
    pub cmdlog: bool,
    /// ALARMLOG state
    pub alarmlog: bool,
}

impl LogToggles {
    /// Create with initial values
    pub fn new(cmdlog: bool, alarmlog: bool) -> Self {
        Self {
            cmdlog: AtomicBool::new(cmdlog),
            alarmlog: AtomicBool::new(alarmlog),
        }
    }

    fn flag(&self, toggle: LogToggle) -> &AtomicBool {
        match toggle {
            LogToggle::CmdLog => &self.cmdlog,
            LogToggle::AlarmLog => &self.alarmlog,
        }
    }

    /// Current value
    pub fn get(&self, toggle: LogToggle) -> bool {
        self.flag(toggle).load(Ordering::Relaxed)
    }

    /// Set a switch, returning the previous value
    pub fn set(&self, toggle: LogToggle, enabled: bool) -> bool {
        self.flag(toggle).swap(enabled, Ordering::Relaxed)
    }

    /// Whether commands and responses are audited
    pub fn cmdlog(&self) -> bool {
        self.get(LogToggle::CmdLog)
    }

    /// Whether alarms are audited
    pub fn alarmlog(&self) -> bool {
        self.get(LogToggle::AlarmLog)
    }

    /// Copy both switches
    pub fn snapshot(&self) -> ToggleSnapshot {
        ToggleSnapshot {
            cmdlog: self.cmdlog(),
            alarmlog: self.alarmlog(),
        }
    }

    /// `NAME=ON` / `NAME=OFF`
    pub fn describe(&self, toggle: LogToggle) -> String {
        format!("{}={}", toggle, if self.get(toggle) { "ON" } else { "OFF" })
    }
}
