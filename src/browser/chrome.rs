//! Chrome backend over the DevTools protocol.

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::inspector::{
    EnableParams as InspectorEnableParams, EventTargetCrashed,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    CallFunctionOnParams, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
    RemoteObjectId, RemoteObjectSubtype,
};
use chromiumoxide::Page;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::{BrowserLauncher, BrowserOptions, ConsoleMessage, LaunchedBrowser, RemoteArg, RemotePage};
use crate::run::Closable;
use crate::{Error, Result};

pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &BrowserOptions) -> Result<LaunchedBrowser> {
        let (mut browser, mut handler) = Browser::launch(browser_config(options)?).await?;

        // The protocol connection only makes progress while its handler is polled.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser protocol error: {}", e);
                }
            }
        });

        let page = match initial_page(&mut browser).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::warn!("Failed to close browser after launch error: {}", close_err);
                }
                events.abort();
                return Err(e);
            }
        };
        tracing::debug!("Browser launched (headed: {})", options.headed);

        Ok(LaunchedBrowser {
            handle: Box::new(ChromeHandle { browser, events }),
            page: Arc::new(ChromePage { page }),
        })
    }
}

/// The tab the browser opened with, or a new blank one if it has none yet.
async fn initial_page(browser: &mut Browser) -> Result<Page> {
    if let Some(page) = browser.pages().await?.into_iter().next() {
        return Ok(page);
    }
    Ok(browser.new_page("about:blank").await?)
}

fn browser_config(options: &BrowserOptions) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder();
    if options.headed || options.devtools {
        builder = builder.with_head();
    }
    if options.devtools {
        builder = builder.arg("--auto-open-devtools-for-tabs");
    }
    if let Some(executable) = &options.executable {
        builder = builder.chrome_executable(executable);
    }
    builder.build().map_err(Error::Browser)
}

/// Owns the browser process and its protocol event loop.
struct ChromeHandle {
    browser: Browser,
    events: JoinHandle<()>,
}

#[async_trait]
impl Closable for ChromeHandle {
    fn name(&self) -> &str {
        "browser"
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("Waiting for browser exit failed: {}", e);
        }
        self.events.abort();
        closed?;
        Ok(())
    }
}

struct ChromePage {
    page: Page,
}

#[async_trait]
impl RemotePage for ChromePage {
    async fn console_messages(&self) -> Result<BoxStream<'static, ConsoleMessage>> {
        let events = self.page.event_listener::<EventConsoleApiCalled>().await?;
        Ok(events
            .map(|event| ConsoleMessage {
                kind: event.r#type.as_ref().to_string(),
                args: event.args.iter().map(remote_arg).collect(),
            })
            .boxed())
    }

    async fn dialogs(&self) -> Result<BoxStream<'static, String>> {
        let events = self.page.event_listener::<EventJavascriptDialogOpening>().await?;
        Ok(events.map(|event| event.message.clone()).boxed())
    }

    async fn dismiss_dialog(&self) -> Result<()> {
        self.page.execute(HandleJavaScriptDialogParams::new(false)).await?;
        Ok(())
    }

    async fn page_errors(&self) -> Result<BoxStream<'static, String>> {
        let exceptions = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await?
            .map(|event| {
                let details = &event.exception_details;
                details
                    .exception
                    .as_ref()
                    .and_then(|exception| exception.description.clone())
                    .unwrap_or_else(|| details.text.clone())
            });
        // Inspector events are only sent once the domain is enabled.
        self.page.execute(InspectorEnableParams::default()).await?;
        let crashes = self
            .page
            .event_listener::<EventTargetCrashed>()
            .await?
            .map(|_| "Page crashed!".to_string());
        Ok(stream::select(exceptions, crashes).boxed())
    }

    async fn fetch_value(&self, object_id: &str) -> Result<Value> {
        let params = CallFunctionOnParams::builder()
            .function_declaration("function() { return this; }")
            .object_id(RemoteObjectId::new(object_id))
            .return_by_value(true)
            .build()
            .map_err(Error::Browser)?;
        let response = self.page.execute(params).await?;
        Ok(response.result.result.value.unwrap_or(Value::Null))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self.page.evaluate(expression).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

fn remote_arg(object: &RemoteObject) -> RemoteArg {
    if matches!(object.subtype, Some(RemoteObjectSubtype::Error)) {
        return RemoteArg::Error {
            description: object.description.clone().unwrap_or_default(),
        };
    }
    if let Some(value) = &object.value {
        return RemoteArg::Inline(value.clone());
    }
    match &object.object_id {
        Some(id) => RemoteArg::Handle { object_id: id.inner().clone() },
        // undefined, NaN, Infinity, bigint
        None => RemoteArg::Inline(Value::String(
            object.description.clone().unwrap_or_else(|| "undefined".to_string()),
        )),
    }
}
