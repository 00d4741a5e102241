use async_trait::async_trait;
use futures::future::join_all;

use crate::{Error, Result};

/// A resource acquired during a run that must be released at teardown.
///
/// `close` consumes the resource, so it can be closed at most once.
#[async_trait]
pub trait Closable: Send {
    /// Human-readable name for logs: "http server", "browser".
    fn name(&self) -> &str;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Resources acquired by one run, in acquisition order.
#[derive(Default)]
pub struct RunScope {
    closables: Vec<Box<dyn Closable>>,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, closable: Box<dyn Closable>) {
        tracing::debug!("Tracking {}", closable.name());
        self.closables.push(closable);
    }

    pub fn len(&self) -> usize {
        self.closables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closables.is_empty()
    }

    /// Close every tracked resource concurrently and wait for all of them.
    ///
    /// A failing close is logged and does not stop the others. The scope is
    /// empty afterwards, so a second call closes nothing.
    pub async fn close_all(&mut self) -> Vec<Error> {
        let closing = self.closables.drain(..).map(|closable| async move {
            let name = closable.name().to_string();
            closable.close().await.map_err(|e| Error::ResourceClose {
                resource: name,
                reason: e.to_string(),
            })
        });

        let failures: Vec<Error> = join_all(closing)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        for failure in &failures {
            tracing::warn!("{}", failure);
        }
        failures
    }
}
