use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, CommandFactory, Parser};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use mocha_headless::browser::{BrowserOptions, ChromeLauncher};
use mocha_headless::build::webpack::WebpackBundler;
use mocha_headless::console::StdioSink;
use mocha_headless::run::{RunOptions, RunOutcome, TestRun};
use mocha_headless::{config, discover, Error};

const LOG_ENV: &str = "MOCHA_HEADLESS_LOG";

/// Run mocha test files in a headless browser
#[derive(Parser)]
#[command(name = "mocha-headless", version, about, disable_version_flag = true)]
#[command(override_usage = "mocha-headless [OPTIONS] <GLOB>...")]
struct Cli {
    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Webpack configuration file to bundle with
    #[arg(short = 'c', long = "build-config", alias = "webpack-config", value_name = "FILE")]
    build_config: Option<PathBuf>,

    /// Never-closed, headed browser session with devtools open
    #[arg(short, long)]
    dev: bool,

    /// List found test files
    #[arg(short, long)]
    list_files: bool,

    /// Mocha timeout in ms
    #[arg(short, long, default_value_t = 2000, value_name = "MS")]
    timeout: u64,

    /// Preferred HTTP server port
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Mocha reporter to use [default: spec, html with --dev]
    #[arg(long, value_name = "spec|html|dot|...")]
    reporter: Option<String>,

    /// Mocha user interface
    #[arg(long, default_value = "bdd", value_name = "bdd|tdd|qunit|exports")]
    ui: String,

    /// Turn off colors (default is env detected)
    #[arg(long)]
    no_colors: bool,

    /// Test file globs
    #[arg(value_name = "GLOB")]
    patterns: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.no_colors {
        colored::control::set_override(false);
    }

    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => return report(&Error::Io(e)),
    };
    let settings = config::resolve(&cwd);

    let test_files = match discover::find_test_files(&cli.patterns, &cwd) {
        Ok(files) => files,
        Err(e) => return report(&e),
    };
    if test_files.is_empty() {
        let _ = Cli::command().print_help();
        return report(&Error::NoTestFilesFound);
    }

    println!("Found {} test files in {}", test_files.len(), cwd.display());
    if cli.list_files {
        for file in &test_files {
            println!("- {}", file.display());
        }
    }

    let build_config = match cli.build_config {
        Some(path) => Some(cwd.join(path)),
        None => discover::find_upward(&cwd, discover::DEFAULT_BUILD_CONFIG),
    };
    if let Some(path) = &build_config {
        tracing::debug!("Using build configuration {}", path.display());
    }

    let mut options = RunOptions::new(cwd);
    options.preferred_port = cli.port;
    options.build_config = build_config;
    options.browser = BrowserOptions {
        headed: cli.dev,
        devtools: cli.dev,
        executable: settings.browser_executable,
    };
    options.keep_open = cli.dev;
    options.colors = cli.no_colors.then_some(false);
    options.reporter = cli
        .reporter
        .unwrap_or_else(|| if cli.dev { "html" } else { "spec" }.to_string());
    options.ui = cli.ui;
    options.timeout_ms = cli.timeout;
    options.port_attempts = settings.server_port_attempts;
    options.poll_interval = Duration::from_millis(settings.collector_poll_interval_ms);

    let mut run = TestRun::new(
        options,
        Arc::new(WebpackBundler::new()),
        Arc::new(ChromeLauncher),
        Arc::new(StdioSink),
    );
    let outcome = RunOutcome::from(run.execute(&test_files).await);
    match &outcome {
        RunOutcome::AllPassed => {}
        RunOutcome::SomeFailed(count) => {
            report(&Error::TestsFailed(*count));
        }
        RunOutcome::Errored(e) => {
            report(e);
        }
    }

    if cli.dev {
        println!("Keeping the browser open. Press Ctrl-C to exit.");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to wait for Ctrl-C: {}", e);
        }
        run.close().await;
    }
    outcome.exit_code()
}

fn report(error: &Error) -> i32 {
    eprintln!("{}", error.to_string().red());
    1
}
