//! Outbox topic dispatch.
//!
//! `process_outbox` drains every known topic through its pipeline. An armed
//! failpoint propagates like a process death: claimed messages keep their
//! lease and are reclaimed later, which is what the kill tests rely on.

pub mod correlations_apply;
pub mod drains;
pub mod finance_pack;
pub mod ledger_apply;
pub mod month_close;
pub mod notifications;

use tracing::{info, warn};

use settleproxy_store::{DLQ_PREFIX, OutboxMessage, TopicMatch, topics};

use crate::error::PipelineError;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub max_messages: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self { max_messages: 1000 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub processed: usize,
    pub failed: usize,
    pub dlq: usize,
}

impl ProcessReport {
    fn absorb(&mut self, other: ProcessReport) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.dlq += other.dlq;
    }
}

type Handler = fn(&Runtime, &OutboxMessage) -> Result<Option<String>, PipelineError>;

/// Drain all topics once, in a fixed order.
pub fn process_outbox(
    runtime: &Runtime,
    options: ProcessOptions,
) -> Result<ProcessReport, PipelineError> {
    let pipelines: [(TopicMatch<'_>, Handler); 7] = [
        (
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            ledger_apply::run,
        ),
        (
            TopicMatch::Prefix(topics::NOTIFY_PREFIX),
            notifications::run,
        ),
        (
            TopicMatch::Exact(topics::CORRELATION_APPLY),
            correlations_apply::run,
        ),
        (TopicMatch::Exact(topics::JOB_STATUS_CHANGED), drains::run),
        (TopicMatch::Exact(topics::JOB_SETTLED), drains::run),
        (
            TopicMatch::Exact(topics::MONTH_CLOSE_REQUESTED),
            month_close::run,
        ),
        (
            TopicMatch::Exact(topics::FINANCE_PACK_BUNDLE_ENQUEUE),
            finance_pack::run,
        ),
    ];

    let mut report = ProcessReport::default();
    for (selector, handler) in pipelines {
        report.absorb(drain_topic(runtime, selector, options.max_messages, handler)?);
    }
    Ok(report)
}

fn drain_topic(
    runtime: &Runtime,
    selector: TopicMatch<'_>,
    max_messages: usize,
    handler: Handler,
) -> Result<ProcessReport, PipelineError> {
    let mut report = ProcessReport::default();
    let claimed = runtime
        .store()
        .claim_outbox(selector, max_messages, runtime.worker_name())?;

    for message in claimed {
        match handler(runtime, &message) {
            Ok(note) => {
                runtime
                    .store()
                    .mark_processed(&[message.id], note.as_deref())?;
                report.processed += 1;
            }
            Err(err) if err.is_crash() => return Err(err),
            Err(err)
                if err.is_terminal()
                    || message.attempts >= runtime.store().config().outbox_max_attempts =>
            {
                warn!(
                    outbox_id = message.id,
                    topic = %message.topic,
                    attempts = message.attempts,
                    error = %err,
                    "message dead-lettered"
                );
                runtime
                    .store()
                    .mark_processed(&[message.id], Some(&format!("{DLQ_PREFIX} {err}")))?;
                report.dlq += 1;
            }
            Err(err) => {
                info!(
                    outbox_id = message.id,
                    topic = %message.topic,
                    attempts = message.attempts,
                    error = %err,
                    "message failed, lease cleared"
                );
                runtime.store().mark_failed(&[message.id], &err.to_string())?;
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
