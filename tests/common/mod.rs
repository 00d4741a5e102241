#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use mocha_headless::browser::{
    BrowserLauncher, BrowserOptions, ConsoleMessage, LaunchedBrowser, RemoteArg, RemotePage,
};
use mocha_headless::build::{BuildPlan, BuildResult, Bundler, UserBuildConfig, HARNESS_FILE};
use mocha_headless::console::{ConsoleSink, Stream};
use mocha_headless::run::{Closable, RunOptions, TestRun};
use mocha_headless::{Error, Result};

/// Options for a fast, colorless run rooted at `dir`.
pub fn run_options(dir: &Path) -> RunOptions {
    let mut options = RunOptions::new(dir.to_path_buf());
    options.preferred_port = 0;
    options.port_attempts = 1;
    options.colors = Some(false);
    options.poll_interval = Duration::from_millis(10);
    options
}

pub fn test_run(
    options: RunOptions,
    bundler: &Arc<FakeBundler>,
    launcher: &Arc<FakeLauncher>,
    sink: &Arc<RecordingSink>,
) -> TestRun {
    TestRun::new(
        options,
        Arc::clone(bundler) as Arc<dyn Bundler>,
        Arc::clone(launcher) as Arc<dyn BrowserLauncher>,
        Arc::clone(sink) as Arc<dyn ConsoleSink>,
    )
}

pub fn spec_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, "describe('x', () => {})").unwrap();
            path
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Console sink

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(Stream, String)>>,
}

impl RecordingSink {
    pub fn lines(&self, stream: Stream) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn stdout(&self) -> Vec<String> {
        self.lines(Stream::Stdout)
    }

    pub fn stderr(&self) -> Vec<String> {
        self.lines(Stream::Stderr)
    }
}

impl ConsoleSink for RecordingSink {
    fn write_line(&self, stream: Stream, line: &str) {
        self.lines.lock().unwrap().push((stream, line.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Bundler

pub struct FakeBundler {
    config: std::result::Result<UserBuildConfig, String>,
    result: BuildResult,
    pub bundles: AtomicUsize,
    pub last_plan: Mutex<Option<BuildPlan>>,
}

impl FakeBundler {
    pub fn succeeding() -> Self {
        Self::with_result(BuildResult::Success { warnings: None })
    }

    pub fn with_result(result: BuildResult) -> Self {
        Self {
            config: Ok(UserBuildConfig::default()),
            result,
            bundles: AtomicUsize::new(0),
            last_plan: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: UserBuildConfig) -> Self {
        self.config = Ok(config);
        self
    }

    /// Loading the user configuration fails, as for a config file that throws.
    pub fn with_broken_config(mut self, reason: &str) -> Self {
        self.config = Err(reason.to_string());
        self
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bundler for FakeBundler {
    fn name(&self) -> &str {
        "fakepack"
    }

    async fn load_config(&self, path: Option<&Path>, _cwd: &Path) -> Result<UserBuildConfig> {
        let mut config = self.config.clone().map_err(Error::Bundler)?;
        config.path = path.map(Path::to_path_buf);
        Ok(config)
    }

    async fn bundle(&self, plan: &BuildPlan) -> Result<BuildResult> {
        self.bundles.fetch_add(1, Ordering::SeqCst);
        *self.last_plan.lock().unwrap() = Some(plan.clone());
        if let BuildResult::Success { .. } = self.result {
            std::fs::write(
                plan.output_path.join(HARNESS_FILE),
                "<html><head><title>mocha tests</title></head><body></body></html>",
            )?;
        }
        Ok(self.result.clone())
    }
}

// ---------------------------------------------------------------------------
// Browser

/// What the fake page does once navigated.
#[derive(Clone, Default)]
pub struct PageScript {
    pub console: Vec<ConsoleMessage>,
    /// Object handles: id -> (fetch delay, value).
    pub handles: HashMap<String, (Duration, Value)>,
    pub dialogs: Vec<String>,
    pub page_error: Option<String>,
    /// Failure count reported once the suite finishes. `None` never finishes.
    pub failed: Option<u32>,
    /// Delay between navigation and the suite finishing.
    pub suite_duration: Duration,
}

impl PageScript {
    pub fn passing() -> Self {
        Self { failed: Some(0), ..Self::default() }
    }

    pub fn failing(count: u32) -> Self {
        Self { failed: Some(count), ..Self::default() }
    }

    pub fn log(mut self, kind: &str, args: Vec<RemoteArg>) -> Self {
        self.console.push(ConsoleMessage { kind: kind.to_string(), args });
        self
    }

    pub fn handle(mut self, id: &str, delay: Duration, value: Value) -> Self {
        self.handles.insert(id.to_string(), (delay, value));
        self
    }
}

pub fn text(s: &str) -> RemoteArg {
    RemoteArg::Inline(Value::String(s.to_string()))
}

pub struct FakePage {
    script: PageScript,
    console_tx: mpsc::UnboundedSender<ConsoleMessage>,
    console_rx: Mutex<Option<mpsc::UnboundedReceiver<ConsoleMessage>>>,
    dialog_tx: mpsc::UnboundedSender<String>,
    dialog_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    finished: Arc<AtomicBool>,
    pub dismissed: AtomicUsize,
    pub navigated: Mutex<Option<String>>,
    /// Status of the harness page as served over HTTP.
    pub harness_status: Mutex<Option<reqwest::StatusCode>>,
}

impl FakePage {
    fn new(script: PageScript) -> Self {
        let (console_tx, console_rx) = mpsc::unbounded();
        let (dialog_tx, dialog_rx) = mpsc::unbounded();
        let (error_tx, error_rx) = mpsc::unbounded();
        Self {
            script,
            console_tx,
            console_rx: Mutex::new(Some(console_rx)),
            dialog_tx,
            dialog_rx: Mutex::new(Some(dialog_rx)),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
            finished: Arc::new(AtomicBool::new(false)),
            dismissed: AtomicUsize::new(0),
            navigated: Mutex::new(None),
            harness_status: Mutex::new(None),
        }
    }

    fn take<T: Send + 'static>(
        slot: &Mutex<Option<mpsc::UnboundedReceiver<T>>>,
    ) -> Result<BoxStream<'static, T>> {
        slot.lock()
            .unwrap()
            .take()
            .map(StreamExt::boxed)
            .ok_or_else(|| Error::Browser("already subscribed".to_string()))
    }
}

#[async_trait]
impl RemotePage for FakePage {
    async fn console_messages(&self) -> Result<BoxStream<'static, ConsoleMessage>> {
        Self::take(&self.console_rx)
    }

    async fn dialogs(&self) -> Result<BoxStream<'static, String>> {
        Self::take(&self.dialog_rx)
    }

    async fn dismiss_dialog(&self) -> Result<()> {
        self.dismissed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn page_errors(&self) -> Result<BoxStream<'static, String>> {
        Self::take(&self.error_rx)
    }

    async fn fetch_value(&self, object_id: &str) -> Result<Value> {
        let (delay, value) = self
            .script
            .handles
            .get(object_id)
            .cloned()
            .ok_or_else(|| Error::Browser(format!("no object {object_id}")))?;
        tokio::time::sleep(delay).await;
        Ok(value)
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        *self.navigated.lock().unwrap() = Some(url.to_string());
        let status = reqwest::get(url).await.map_err(|e| Error::Browser(e.to_string()))?.status();
        *self.harness_status.lock().unwrap() = Some(status);

        for message in &self.script.console {
            let _ = self.console_tx.unbounded_send(message.clone());
        }
        for dialog in &self.script.dialogs {
            let _ = self.dialog_tx.unbounded_send(dialog.clone());
        }
        if let Some(error) = &self.script.page_error {
            let _ = self.error_tx.unbounded_send(error.clone());
        }
        if self.script.failed.is_some() {
            let finished = Arc::clone(&self.finished);
            let duration = self.script.suite_duration;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                finished.store(true, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        if expression.contains("finished") {
            return Ok(Value::Bool(self.finished.load(Ordering::SeqCst)));
        }
        if expression.contains("failed") {
            return Ok(self.script.failed.map(Value::from).unwrap_or(Value::Null));
        }
        Err(Error::Browser(format!("unexpected expression {expression}")))
    }
}

pub struct FakeBrowserHandle {
    closes: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl Closable for FakeBrowserHandle {
    fn name(&self) -> &str {
        "browser"
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Browser("browser refused to close".to_string()));
        }
        Ok(())
    }
}

pub struct FakeLauncher {
    script: PageScript,
    fail_launch: bool,
    fail_close: bool,
    pub launches: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub options: Mutex<Option<BrowserOptions>>,
    pub page: Mutex<Option<Arc<FakePage>>>,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            fail_launch: false,
            fail_close: false,
            launches: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            options: Mutex::new(None),
            page: Mutex::new(None),
        }
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn page(&self) -> Arc<FakePage> {
        self.page.lock().unwrap().clone().expect("browser was not launched")
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: &BrowserOptions) -> Result<LaunchedBrowser> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options.clone());
        if self.fail_launch {
            return Err(Error::Browser("no browser installed".to_string()));
        }

        let page = Arc::new(FakePage::new(self.script.clone()));
        *self.page.lock().unwrap() = Some(Arc::clone(&page));
        Ok(LaunchedBrowser {
            handle: Box::new(FakeBrowserHandle {
                closes: Arc::clone(&self.closes),
                fail: self.fail_close,
            }),
            page,
        })
    }
}
