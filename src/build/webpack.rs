//! webpack backend, driven through Node.js.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{BuildPlan, BuildResult, Bundler, UserBuildConfig};
use crate::{Error, Result};

const CONFIG_LOADER: &str = include_str!("../../static/load-config.js");
const DRIVER: &str = include_str!("../../static/webpack-driver.js");

pub struct WebpackBundler {
    node: PathBuf,
}

impl WebpackBundler {
    pub fn new() -> Self {
        Self { node: PathBuf::from("node") }
    }

    /// Use a specific Node.js binary.
    pub fn with_node(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }
}

impl Default for WebpackBundler {
    fn default() -> Self {
        Self::new()
    }
}

/// Last line the driver prints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriverReport {
    has_errors: bool,
    has_warnings: bool,
    text: String,
}

#[async_trait]
impl Bundler for WebpackBundler {
    fn name(&self) -> &str {
        "webpack"
    }

    async fn load_config(&self, path: Option<&Path>, cwd: &Path) -> Result<UserBuildConfig> {
        let Some(path) = path else {
            return Ok(UserBuildConfig::default());
        };
        tracing::debug!("Loading build configuration {}", path.display());

        let output = Command::new(&self.node)
            .arg("-e")
            .arg(CONFIG_LOADER)
            .env("MOCHA_HEADLESS_CONFIG", cwd.join(path))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Bundler(format!("Failed to run {}: {}", self.node.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Bundler(format!(
                "Failed to load {}:\n{}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = last_line(&stdout)
            .ok_or_else(|| Error::Bundler(format!("No description of {}", path.display())))?;
        Ok(serde_json::from_str(line)?)
    }

    async fn bundle(&self, plan: &BuildPlan) -> Result<BuildResult> {
        let input = serde_json::to_vec(plan)?;

        let mut child = Command::new(&self.node)
            .arg("-e")
            .arg(DRIVER)
            .current_dir(&plan.context)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Bundler(format!("Failed to run {}: {}", self.node.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            // Dropping stdin closes it; the driver reads until EOF.
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(Error::Bundler(
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }
        parse_report(&stdout)
    }
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

fn parse_report(stdout: &str) -> Result<BuildResult> {
    let line = last_line(stdout)
        .ok_or_else(|| Error::Bundler("webpack driver printed no report".to_string()))?;
    let report: DriverReport = serde_json::from_str(line)?;

    if report.has_errors {
        return Ok(BuildResult::Failure { errors: report.text });
    }
    let warnings = report.has_warnings.then_some(report.text);
    Ok(BuildResult::Success { warnings })
}
