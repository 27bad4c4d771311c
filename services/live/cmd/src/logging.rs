//! Console log format shared with the other redb services.
//!
//! `[timestamp] [service/component] [level] message key=value ...`

use std::fmt::{self, Write as _};
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

/// Event formatter for the live service
pub struct LiveLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log at info level tagged with a component name
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log at warn level tagged with a component name
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log at error level tagged with a component name
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl LiveLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_color(service_name, is_terminal())
    }

    pub fn with_color(service_name: impl Into<String>, color_enabled: bool) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled,
        }
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("{}/{}", self.service_name, component),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(level: &Level) -> String {
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

    fn render(&self, timestamp: &str, level: &Level, fields: &FieldVisitor) -> String {
        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_service_name(fields.component.as_deref()),
            color,
            Self::format_log_level(level),
            reset,
            fields.message
        );
        for (key, value) in &fields.extra {
            let _ = write!(line, " {}={}", key, value);
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for LiveLogFormatter
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
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "{}",
            self.render(&timestamp, event.metadata().level(), &visitor)
        )
    }
}

/// Collects the message, the component tag and any structured fields
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        match field.name() {
            "message" => self.message = rendered,
            "component" => self.component = Some(rendered.trim_matches('"').to_string()),
            name => self.extra.push((name, rendered)),
        }
    }
}

fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_layout() {
        let formatter = LiveLogFormatter::with_color("redb-live", false);
        let fields = FieldVisitor {
            message: "Live session ready".to_string(),
            component: Some("session".to_string()),
            extra: vec![("generation", "1".to_string())],
        };

        let line = formatter.render("2026-01-01 00:00:00.000", &Level::INFO, &fields);
        assert_eq!(
            line,
            "[2026-01-01 00:00:00.000] [redb-live/session   ] [ℹ INFO   ] Live session ready generation=1"
        );
    }

    #[test]
    fn test_long_service_names_are_truncated() {
        let formatter = LiveLogFormatter::with_color("redb-live", false);
        let name = formatter.format_service_name(Some("a-very-long-component"));
        assert_eq!(name.chars().count(), SERVICE_NAME_WIDTH);
        assert!(name.ends_with('…'));
    }
}
