//! Custom log format that displays target before span context, with the
//! emitting decoder mode (when present) pulled into its own colored tag.
//!
//! Default tracing format: `LEVEL span1:span2: target: message`
//! This format:            `LEVEL [mode] target: span1:span2: message`
//!
//! With up to seventeen decoder processes logging concurrently, `mode = %id`
//! buried among the other fields is easy to miss when scanning an
//! interleaved log stream; this formatter gives it a fixed, colored slot.

use std::fmt;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Custom event formatter that puts target before span context and lifts a
/// `mode` field (set by `decoder/runtime.rs` on every lifecycle log) into a
/// bracketed tag.
pub struct TargetFirstFormat;

impl<S, N> FormatEvent<S, N> for TargetFirstFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let level = metadata.level();
        let level_style = match *level {
            tracing::Level::ERROR => "\x1b[1;31m", // Bold red
            tracing::Level::WARN => "\x1b[1;33m",  // Bold yellow
            tracing::Level::INFO => "\x1b[1;36m",  // Bold cyan
            tracing::Level::DEBUG => "\x1b[2;34m", // Dim blue
            tracing::Level::TRACE => "\x1b[2;35m", // Dim magenta
        };
        write!(writer, "{}{:>5}\x1b[0m ", level_style, level)?;

        let mut mode_tag = ModeTagVisitor::default();
        event.record(&mut mode_tag);
        if let Some(mode) = mode_tag.0 {
            write!(writer, "\x1b[1;35m[{mode}]\x1b[0m ")?;
        }

        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;
                first = false;
            }
            if !first {
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Pulls the value of a field named `mode` out of an event, leaving the rest
/// to `ctx.field_format()` as usual (the mode field still appears in the
/// normal `key=value` tail too; the tag is purely a scanning aid).
#[derive(Default)]
struct ModeTagVisitor(Option<String>);

impl Visit for ModeTagVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "mode" && self.0.is_none() {
            self.0 = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "mode" && self.0.is_none() {
            self.0 = Some(value.to_string());
        }
    }
}
