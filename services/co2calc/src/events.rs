//! Structured pipeline events.
//!
//! Every component reports what it did at fixed points of its contract by
//! recording a [`PipelineEvent`] into an [`EventSink`]. The core never
//! configures logging itself; [`TracingSink`] is the bridge to `tracing`.

use serde::Serialize;

use crate::model::RowRejection;
use crate::processor::JoinStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The primary encoding failed and a fallback decoded the file
    EncodingFallback { file: String, encoding: String },
    SchemaResolved { file: String, mapping: String },
    RowRejected(RowRejection),
    FileIncluded {
        file: String,
        rows_kept: usize,
        rows_rejected: usize,
    },
    FileExcluded {
        file: String,
        kind: String,
        reason: String,
    },
    ReferenceLoaded {
        file: String,
        entries: usize,
        rows_rejected: usize,
        duplicate_keys: usize,
        negative_factors: usize,
    },
    DatePartitioned {
        column: String,
        filtering_enabled: bool,
        in_range: usize,
        out_of_range: usize,
        unparsable: usize,
    },
    JoinCompleted(JoinStats),
}

/// Consumer of pipeline events.
pub trait EventSink {
    fn record(&mut self, event: PipelineEvent);
}

impl EventSink for Vec<PipelineEvent> {
    fn record(&mut self, event: PipelineEvent) {
        self.push(event);
    }
}

/// Forwards events to `tracing` with structured fields.
///
/// Per-row rejections are `warn` when `detailed` is set and `debug`
/// otherwise; file and stage summaries are always emitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    pub detailed: bool,
}

impl TracingSink {
    pub fn new(detailed: bool) -> Self {
        Self { detailed }
    }
}

impl EventSink for TracingSink {
    fn record(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::EncodingFallback { file, encoding } => {
                tracing::warn!(%file, %encoding, "primary encoding failed, decoded with fallback");
            }
            PipelineEvent::SchemaResolved { file, mapping } => {
                tracing::info!(%file, %mapping, "column mapping resolved");
            }
            PipelineEvent::RowRejected(r) => {
                if self.detailed {
                    tracing::warn!(
                        file = %r.file,
                        line = r.line,
                        column = %r.column,
                        value = %r.raw_value,
                        reason = ?r.reason,
                        "row rejected"
                    );
                } else {
                    tracing::debug!(
                        file = %r.file,
                        line = r.line,
                        column = %r.column,
                        value = %r.raw_value,
                        reason = ?r.reason,
                        "row rejected"
                    );
                }
            }
            PipelineEvent::FileIncluded {
                file,
                rows_kept,
                rows_rejected,
            } => {
                tracing::info!(%file, rows_kept, rows_rejected, "file loaded");
            }
            PipelineEvent::FileExcluded { file, kind, reason } => {
                tracing::error!(%file, %kind, %reason, "file excluded");
            }
            PipelineEvent::ReferenceLoaded {
                file,
                entries,
                rows_rejected,
                duplicate_keys,
                negative_factors,
            } => {
                tracing::info!(%file, entries, rows_rejected, "reference table loaded");
                if duplicate_keys > 0 {
                    tracing::warn!(%file, duplicate_keys, "reference has duplicate article keys");
                }
                if negative_factors > 0 {
                    tracing::warn!(%file, negative_factors, "reference has negative emission factors");
                }
            }
            PipelineEvent::DatePartitioned {
                column,
                filtering_enabled,
                in_range,
                out_of_range,
                unparsable,
            } => {
                tracing::info!(
                    %column,
                    filtering_enabled,
                    in_range,
                    out_of_range,
                    unparsable,
                    "date partitioning done"
                );
            }
            PipelineEvent::JoinCompleted(stats) => {
                tracing::info!(
                    billing_rows = stats.billing_rows,
                    matched = stats.matched_rows,
                    unmatched = stats.unmatched_rows,
                    dropped = stats.dropped_rows,
                    output = stats.output_rows,
                    total_emission_co2 = stats.total_emission_co2,
                    "emission join done"
                );
            }
        }
    }
}
