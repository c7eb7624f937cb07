//! Console log format: `[timestamp] [service] [level] message`.
//!
//! Events carrying a `component` field are attributed to `fleet-<component>`
//! in the service column; see the `component_*!` macros.

use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const SERVICE_NAME_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 9;

/// Log a message attributed to a component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

pub struct FleetLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl FleetLogFormatter {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            color_enabled: color_supported(),
        }
    }

    #[cfg(test)]
    fn without_color(mut self) -> Self {
        self.color_enabled = false;
        self
    }

    /// Fixed-width service column, truncated with an ellipsis
    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("fleet-{}", comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH)
    }

    fn color_for_level(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn format_line(&self, timestamp: &str, level: &Level, component: Option<&str>, message: &str) -> String {
        let (cyan, reset) = if self.color_enabled {
            (COLOR_CYAN, COLOR_RESET)
        } else {
            ("", "")
        };
        format!(
            "{}[{}] [{}] [{}{}{}] {}{}",
            cyan,
            timestamp,
            self.format_service_name(component),
            self.color_for_level(level),
            self.format_log_level(level),
            reset,
            message,
            reset
        )
    }
}

impl<S, N> FormatEvent<S, N> for FleetLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let line = self.format_line(
            &timestamp,
            event.metadata().level(),
            visitor.component.as_deref(),
            &visitor.message,
        );
        writeln!(writer, "{}", line)
    }
}

/// Pulls `message` and `component` out of an event; other fields are appended
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl FieldVisitor {
    fn push_extra(&mut self, name: &str, value: String) {
        if !self.message.is_empty() {
            self.message.push(' ');
        }
        self.message.push_str(&format!("{}={}", name, value));
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message.insert_str(0, value),
            "component" => self.component = Some(value.to_string()),
            name => self.push_extra(name, value.to_string()),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let unquoted = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);
        match field.name() {
            "message" => self.message.insert_str(0, &unquoted),
            "component" => self.component = Some(unquoted),
            name => self.push_extra(name, unquoted),
        }
    }
}

fn color_supported() -> bool {
    if std::env::var("TERM").map(|t| t == "dumb").unwrap_or(true) {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_column() {
        let formatter = FleetLogFormatter::new("esg-fleet").without_color();
        assert_eq!(formatter.format_service_name(None).trim_end(), "esg-fleet");
        assert_eq!(formatter.format_service_name(None).chars().count(), SERVICE_NAME_WIDTH);
        assert_eq!(
            formatter.format_service_name(Some("console")).trim_end(),
            "fleet-console"
        );

        let long = formatter.format_service_name(Some("a-very-long-component-name"));
        assert_eq!(long.chars().count(), SERVICE_NAME_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_plain_line() {
        let formatter = FleetLogFormatter::new("esg-fleet").without_color();
        let line = formatter.format_line(
            "2025-08-29 17:33:34.000",
            &Level::WARN,
            Some("router"),
            "HMAC verification failed",
        );
        assert_eq!(
            line,
            "[2025-08-29 17:33:34.000] [fleet-router        ] [⚠ WARN   ] HMAC verification failed"
        );
    }
}
