//! Browser capability interfaces.
//!
//! The run pipeline only talks to a browser through [`BrowserLauncher`] and
//! [`RemotePage`], so the orchestrator can be driven by the Chrome backend in
//! production and by scripted fakes in tests.

pub mod chrome;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::run::Closable;
use crate::Result;

pub use chrome::ChromeLauncher;

/// Browser launch overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserOptions {
    /// Show a browser window instead of running headless.
    pub headed: bool,
    /// Open devtools for the page.
    pub devtools: bool,
    /// Explicit browser binary; the backend auto-detects when unset.
    pub executable: Option<PathBuf>,
}

/// One argument of a console call, as reported by the page.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteArg {
    /// Value serialized directly in the event.
    Inline(serde_json::Value),
    /// Error object; prints as its description (message and stack).
    Error { description: String },
    /// Object that must be fetched from the page by handle.
    Handle { object_id: String },
}

/// A console call emitted by the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMessage {
    /// Protocol name of the console method (`log`, `warning`, `startGroup`, ...).
    pub kind: String,
    pub args: Vec<RemoteArg>,
}

/// The single page of a launched browser.
#[async_trait]
pub trait RemotePage: Send + Sync {
    /// Subscribe to console calls, in emission order.
    async fn console_messages(&self) -> Result<BoxStream<'static, ConsoleMessage>>;

    /// Subscribe to native dialogs (alert/confirm/prompt). Items are dialog messages.
    async fn dialogs(&self) -> Result<BoxStream<'static, String>>;

    /// Dismiss the currently open dialog.
    async fn dismiss_dialog(&self) -> Result<()>;

    /// Subscribe to uncaught page errors and page crashes.
    async fn page_errors(&self) -> Result<BoxStream<'static, String>>;

    /// Fetch the JSON value behind an object handle.
    async fn fetch_value(&self, object_id: &str) -> Result<serde_json::Value>;

    /// Navigate and wait for the page to load.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate an expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;
}

/// A launched browser: the process handle plus its single page.
pub struct LaunchedBrowser {
    pub handle: Box<dyn Closable>,
    pub page: Arc<dyn RemotePage>,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser and open its page. On failure nothing is left running.
    async fn launch(&self, options: &BrowserOptions) -> Result<LaunchedBrowser>;
}
