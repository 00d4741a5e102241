//! Build orchestration: turns the test files and the user's bundler
//! configuration into a build plan, runs one build pass, and exposes the
//! output over HTTP.

pub mod entry;
pub mod webpack;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::Router;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tower_http::services::ServeDir;

use crate::run::{Closable, RunOptions};
use crate::Result;
use entry::{EntryMap, RawEntry};

pub use webpack::WebpackBundler;

/// Entry holding the in-page bootstrap.
pub const RUNNER_ENTRY: &str = "runner";
/// Entry holding the test files.
pub const UNITS_ENTRY: &str = "units";
/// Generated harness page, relative to the server root.
pub const HARNESS_FILE: &str = "mocha.html";
const HARNESS_TITLE: &str = "mocha tests";

const BOOTSTRAP_FILE: &str = "mocha-setup.js";
const BOOTSTRAP: &str = include_str!("../../static/mocha-setup.js");
const OUTPUT_DIR: &str = "dist";

/// The user's bundler configuration, as described by the bundler backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBuildConfig {
    /// Configuration file the description was loaded from.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub entry: Option<RawEntry>,
    /// Names of the user's plugins, in configuration order.
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// A plugin of the effective build, in application order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PluginSpec {
    /// The user's plugin at `index` in their configuration.
    User { index: usize, name: String },
    /// HTML page loading only `chunks`, in that order.
    Harness { filename: String, title: String, chunks: Vec<String> },
    /// Build-time constants; values are JS literals.
    Define { constants: BTreeMap<String, String> },
}

/// Effective build configuration handed to the bundler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    pub config_path: Option<PathBuf>,
    pub mode: String,
    pub context: PathBuf,
    pub output_path: PathBuf,
    pub entry: EntryMap,
    pub plugins: Vec<PluginSpec>,
    /// Render bundler output with ANSI colors.
    pub colors: bool,
}

/// Outcome of one build pass.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildResult {
    Success { warnings: Option<String> },
    Failure { errors: String },
}

/// An external bundler.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Human-readable name: "webpack".
    fn name(&self) -> &str;

    /// Describe the user configuration at `path`. `None` yields an empty configuration.
    async fn load_config(&self, path: Option<&Path>, cwd: &Path) -> Result<UserBuildConfig>;

    /// Run exactly one build pass for `plan`, writing into `plan.output_path`.
    async fn bundle(&self, plan: &BuildPlan) -> Result<BuildResult>;
}

/// Build-time constants read by the bootstrap script.
pub fn bootstrap_constants(options: &RunOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("__MOCHA_UI__".to_string(), js_literal(&options.ui)),
        ("__MOCHA_COLORS__".to_string(), options.use_colors().to_string()),
        ("__MOCHA_REPORTER__".to_string(), js_literal(&options.reporter)),
        ("__MOCHA_TIMEOUT__".to_string(), options.timeout_ms.to_string()),
    ])
}

fn js_literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Synthesize the effective build from the user's configuration.
///
/// User entries are kept; `runner` and `units` are added (replacing user
/// entries of the same name). User plugins keep their order and are followed
/// by the harness page and the bootstrap constants.
pub fn synthesize(
    test_files: &[PathBuf],
    user: &UserBuildConfig,
    options: &RunOptions,
    workspace: &BuildWorkspace,
) -> Result<BuildPlan> {
    let mut entries = entry::normalize(user.entry.clone())?;
    entries.insert(
        RUNNER_ENTRY.to_string(),
        vec![workspace.runner_path().to_string_lossy().into_owned()],
    );
    entries.insert(
        UNITS_ENTRY.to_string(),
        test_files.iter().map(|f| f.to_string_lossy().into_owned()).collect(),
    );

    let mut plugins: Vec<PluginSpec> = user
        .plugins
        .iter()
        .enumerate()
        .map(|(index, name)| PluginSpec::User { index, name: name.clone() })
        .collect();
    plugins.push(PluginSpec::Harness {
        filename: HARNESS_FILE.to_string(),
        title: HARNESS_TITLE.to_string(),
        chunks: vec![RUNNER_ENTRY.to_string(), UNITS_ENTRY.to_string()],
    });
    plugins.push(PluginSpec::Define { constants: bootstrap_constants(options) });

    Ok(BuildPlan {
        config_path: user.path.clone(),
        mode: user.mode.clone().unwrap_or_else(|| "development".to_string()),
        context: options.working_dir.clone(),
        output_path: workspace.output_dir(),
        entry: entries,
        plugins,
        colors: options.use_colors(),
    })
}

/// Scratch directory of one build: bootstrap script and bundle output.
/// Closing it removes the directory.
pub struct BuildWorkspace {
    dir: TempDir,
}

impl BuildWorkspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("mocha-headless-").tempdir()?;
        std::fs::write(dir.path().join(BOOTSTRAP_FILE), BOOTSTRAP)?;
        std::fs::create_dir(dir.path().join(OUTPUT_DIR))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn runner_path(&self) -> PathBuf {
        self.dir.path().join(BOOTSTRAP_FILE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_DIR)
    }

    /// Serve the bundle output, falling back to files under `static_root`.
    pub fn handler(&self, static_root: &Path) -> Router {
        let files = ServeDir::new(self.output_dir()).fallback(ServeDir::new(static_root));
        Router::new().fallback_service(files)
    }
}

#[async_trait]
impl Closable for BuildWorkspace {
    fn name(&self) -> &str {
        "build workspace"
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| crate::Error::ResourceClose {
                resource: "build workspace".to_string(),
                reason: e.to_string(),
            })??;
        Ok(())
    }
}
