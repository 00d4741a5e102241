//! The test-run pipeline: bundle, serve, launch, navigate, collect, tear down.

mod closable;
pub mod collector;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::StreamExt;

use crate::browser::{BrowserLauncher, BrowserOptions, LaunchedBrowser};
use crate::build::{self, BuildResult, BuildWorkspace, Bundler, HARNESS_FILE};
use crate::console::{ConsoleRelay, ConsoleSink, Stream};
use crate::server;
use crate::{Error, Result};

pub use closable::{Closable, RunScope};

/// Upper bound on waiting for relayed console output before teardown.
const RELAY_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of one test run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub preferred_port: u16,
    /// User bundler configuration file.
    pub build_config: Option<PathBuf>,
    pub browser: BrowserOptions,
    /// Leave the server and browser running after the suite ends.
    pub keep_open: bool,
    /// `None` detects color support from the environment.
    pub colors: Option<bool>,
    pub reporter: String,
    pub ui: String,
    /// Per-test timeout in the page; 0 disables it.
    pub timeout_ms: u64,
    /// Root for relative paths and static assets.
    pub working_dir: PathBuf,
    pub port_attempts: u16,
    pub poll_interval: Duration,
}

impl RunOptions {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            preferred_port: 3000,
            build_config: None,
            browser: BrowserOptions::default(),
            keep_open: false,
            colors: None,
            reporter: "spec".to_string(),
            ui: "bdd".to_string(),
            timeout_ms: 2000,
            working_dir,
            port_attempts: 100,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn use_colors(&self) -> bool {
        self.colors
            .unwrap_or_else(|| colored::control::SHOULD_COLORIZE.should_colorize())
    }
}

/// Pipeline state. Each state is entered only from the one before it, except
/// that any failure jumps to `TearingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Building,
    Serving,
    BrowserLaunched,
    Navigating,
    CollectingResults,
    TearingDown,
    Done,
}

impl RunState {
    fn next(self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Building),
            RunState::Building => Some(RunState::Serving),
            RunState::Serving => Some(RunState::BrowserLaunched),
            RunState::BrowserLaunched => Some(RunState::Navigating),
            RunState::Navigating => Some(RunState::CollectingResults),
            RunState::CollectingResults => Some(RunState::TearingDown),
            RunState::TearingDown => Some(RunState::Done),
            RunState::Done => None,
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    AllPassed,
    SomeFailed(u32),
    Errored(Error),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::AllPassed => 0,
            _ => 1,
        }
    }
}

impl From<Result<()>> for RunOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => RunOutcome::AllPassed,
            Err(Error::TestsFailed(count)) => RunOutcome::SomeFailed(count),
            Err(e) => RunOutcome::Errored(e),
        }
    }
}

/// One test run over a set of test files.
pub struct TestRun {
    options: RunOptions,
    bundler: Arc<dyn Bundler>,
    launcher: Arc<dyn BrowserLauncher>,
    sink: Arc<dyn ConsoleSink>,
    scope: RunScope,
    relay: Option<ConsoleRelay>,
    state: RunState,
}

impl TestRun {
    pub fn new(
        options: RunOptions,
        bundler: Arc<dyn Bundler>,
        launcher: Arc<dyn BrowserLauncher>,
        sink: Arc<dyn ConsoleSink>,
    ) -> Self {
        Self {
            options,
            bundler,
            launcher,
            sink,
            scope: RunScope::new(),
            relay: None,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Resources still open: all of them after a keep-open run, none otherwise.
    pub fn open_resources(&self) -> usize {
        self.scope.len()
    }

    /// Run the suite once.
    ///
    /// Teardown always runs before this returns, whatever the outcome, unless
    /// `keep_open` is set. Failing tests surface as [`Error::TestsFailed`].
    pub async fn execute(&mut self, test_files: &[PathBuf]) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(Error::AlreadyStarted);
        }
        let result = self.forward(test_files).await;
        if let Err(e) = &result {
            tracing::debug!("Run failed in {:?}: {}", self.state, e);
        }
        self.teardown().await;
        result
    }

    /// Close resources kept alive by a keep-open run.
    pub async fn close(&mut self) {
        self.scope.close_all().await;
        if let Some(relay) = self.relay.take() {
            relay.detach();
        }
    }

    async fn forward(&mut self, test_files: &[PathBuf]) -> Result<()> {
        if test_files.is_empty() {
            return Err(Error::NoTestFilesFound);
        }

        self.advance(RunState::Building);
        let handler = self.build(test_files).await?;

        self.advance(RunState::Serving);
        let server =
            server::bind(self.options.preferred_port, self.options.port_attempts, handler).await?;
        let port = server.port();
        self.scope.track(Box::new(server));
        self.print(Stream::Stdout, &format!("HTTP server is listening on port {port}"));

        self.advance(RunState::BrowserLaunched);
        let LaunchedBrowser { handle, page } = self.launcher.launch(&self.options.browser).await?;
        self.scope.track(handle);
        // Attach before navigating so early output is not lost.
        self.relay = Some(ConsoleRelay::attach(Arc::clone(&page), Arc::clone(&self.sink)).await?);

        self.advance(RunState::Navigating);
        // Subscribed before navigation: errors thrown while the page loads count.
        let mut page_errors = page.page_errors().await?;
        page.navigate(&format!("http://localhost:{port}/{HARNESS_FILE}")).await?;

        self.advance(RunState::CollectingResults);
        let failed = tokio::select! {
            biased;
            Some(error) = page_errors.next() => Err(Error::PageError(error)),
            failed = collector::await_failures(page.as_ref(), self.options.poll_interval) => failed,
        }?;

        match failed {
            0 => Ok(()),
            count => Err(Error::TestsFailed(count)),
        }
    }

    async fn build(&mut self, test_files: &[PathBuf]) -> Result<Router> {
        let cwd = self.options.working_dir.clone();
        self.print(Stream::Stdout, &format!("Bundling using {}...", self.bundler.name()));

        let workspace = BuildWorkspace::create()?;
        let handler = workspace.handler(&cwd);
        let user_config = self
            .bundler
            .load_config(self.options.build_config.as_deref(), &cwd)
            .await;
        let plan = user_config
            .and_then(|config| build::synthesize(test_files, &config, &self.options, &workspace));
        self.scope.track(Box::new(workspace));

        let result = self.bundler.bundle(&plan?).await?;
        self.print(Stream::Stdout, "Done bundling.");

        match result {
            BuildResult::Failure { errors } => Err(Error::BuildFailure(errors)),
            BuildResult::Success { warnings } => {
                if let Some(warnings) = warnings {
                    self.print(Stream::Stderr, &warnings);
                }
                Ok(handler)
            }
        }
    }

    async fn teardown(&mut self) {
        self.state = RunState::TearingDown;
        if let Some(relay) = &self.relay {
            if tokio::time::timeout(RELAY_SETTLE_TIMEOUT, relay.settle()).await.is_err() {
                tracing::warn!("Console output still pending at teardown");
            }
        }

        if self.options.keep_open {
            tracing::info!("Keeping {} resources open", self.scope.len());
        } else {
            self.close().await;
        }
        self.advance(RunState::Done);
    }

    fn advance(&mut self, next: RunState) {
        debug_assert_eq!(self.state.next(), Some(next), "invalid run transition");
        tracing::debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn print(&self, stream: Stream, text: &str) {
        for line in text.split('\n') {
            self.sink.write_line(stream, line);
        }
    }
}
