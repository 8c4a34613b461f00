// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter that prefixes every line with the extension's name.
//!
//! ```text
//! [loki-lambda-extension] | INFO | Registered with id 4f3c...
//! [loki-lambda-extension] | ERROR | flush{force=true}: LOKI | Dropping 12 lines ...
//! ```
//!
//! The extension's own output lands in the same log group as the function's,
//! and the prefix is what tells the two apart.

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct Formatter {
    prefix: String,
}

impl Formatter {
    #[must_use]
    pub fn new(extension_name: &str) -> Self {
        Self {
            prefix: format!("[{extension_name}]"),
        }
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
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
        write!(writer, "{} | {} | ", self.prefix, event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter for the extension's own logs. Transport crates are silenced
/// because their debug output would flood the function's log group.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_new(format!(
        "h2=off,hyper=off,hyper_util=off,reqwest=off,rustls=off,{log_level}"
    ))
}
