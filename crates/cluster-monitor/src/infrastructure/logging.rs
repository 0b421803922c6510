//! provides logging helpers

use std::env;
use std::fmt::{self};
use std::path::Path;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use utils::logging::LOG_PATH_ENV_VAR;

use crate::infrastructure::dashboards::DASHBOARD_TARGET;

const DEFAULT_DASHBOARD_FILE: &str = "/logs/dashboards.log";

/// Writes only the event message: one JSON bag per line.
struct BagLineFormatter;

#[derive(Default)]
struct MessageVisitor {
    line: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.line.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.line.push_str(&format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for BagLineFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.line)
    }
}

fn is_dashboard_event(target: &str) -> bool {
    target == DASHBOARD_TARGET
}

/// initiate the global tracing subscriber
///
/// Operator logs go to stderr (or `LOG_PATH`); dashboard bags go to a daily
/// rolling file next to `dashboard_file`.
pub fn init<P: AsRef<Path>>(
    dashboard_file: Option<P>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let fmt_layer = utils::logging::get_fmt_layer(log_path);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt_layer = fmt_layer.with_filter(
        env_filter.and(filter::filter_fn(|metadata| {
            !is_dashboard_event(metadata.target())
        })),
    );

    let dashboard_file = dashboard_file
        .as_ref()
        .map(|p| p.as_ref())
        .unwrap_or(Path::new(DEFAULT_DASHBOARD_FILE));
    let appender = match (dashboard_file.parent(), dashboard_file.file_name()) {
        (Some(dir), Some(name)) => RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(name.to_string_lossy().into_owned())
            .max_log_files(3)
            .build(dir)
            .map_err(|e| eprintln!("dashboard log file unavailable: {e}"))
            .ok(),
        _ => None,
    };

    let Some(appender) = appender else {
        registry().with(fmt_layer).init();
        return None;
    };

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let dashboard_layer = layer()
        .event_format(BagLineFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            is_dashboard_event(metadata.target())
        }));

    registry().with(fmt_layer).with(dashboard_layer).init();
    Some(file_guard)
}
