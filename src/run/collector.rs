//! Reads the suite result from the page.

use std::time::Duration;

use crate::browser::RemotePage;
use crate::{Error, Result};

/// True once the bootstrap saw the runner's `end` event.
const FINISHED: &str = "Boolean(window.mochaStatus && window.mochaStatus.finished)";
const FAILED: &str = "window.mochaStatus.failed";

/// Wait for the suite to finish, then return its failure count.
///
/// There is no upper bound on the wait: a suite that neither finishes nor
/// raises a page error keeps the run waiting.
pub async fn await_failures(page: &dyn RemotePage, poll_interval: Duration) -> Result<u32> {
    while page.evaluate(FINISHED).await?.as_bool() != Some(true) {
        tokio::time::sleep(poll_interval).await;
    }

    let failed = page.evaluate(FAILED).await?;
    failed
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| Error::Browser(format!("Unexpected failure count: {failed}")))
}
