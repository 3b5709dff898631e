//! No-op drains for informational topics (`JOB_STATUS_CHANGED`,
//! `JOB_SETTLED`). The messages exist for external observers; the kernel
//! only needs to retire them.

use settleproxy_store::OutboxMessage;

use crate::error::PipelineError;
use crate::runtime::Runtime;

pub fn run(_runtime: &Runtime, _message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    Ok(None)
}
