//! Custom tracing layers for Qubee
//!
//! This module provides the layer that attaches peer and session context to
//! spans, and the JSONL formatting layer used for file output.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonlConfig;
use crate::context::{SessionContextData, SessionContextGuard};

/// Layer that attaches the active session context to every new span
///
/// Downstream layers (and tests) can read it back through
/// [`SessionContextExtension`] on the span's extensions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionContextLayer;

impl SessionContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct SessionContextExtension {
    pub data: SessionContextData,
}

impl<S> Layer<S> for SessionContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(data) = SessionContextGuard::current() {
                span.extensions_mut().insert(SessionContextExtension { data });
            }
        }
    }
}

/// Create a JSONL formatting layer for file output
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_ansi(false)
        .with_writer(writer)
}
