//! Helm release operations, shelled out to the `helm` CLI.

use std::path::Path;

use belay_core::{Error, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::args::{HelmInstallArgs, HelmListArgs, HelmUninstallArgs};

#[derive(Debug, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chart: String,
}

#[derive(Debug)]
pub enum UninstallOutcome {
    Uninstalled(String),
    /// The release was not found; treated as already satisfied.
    AlreadyGone,
}

struct HelmOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl HelmOutput {
    fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            _ => self.stderr.trim_end().to_string(),
        }
    }
}

async fn run(args: &[String]) -> Result<HelmOutput> {
    info!(args = ?args, "helm invocation");
    let out = Command::new("helm")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Upstream(format!("failed to run helm: {e}")))?;
    Ok(HelmOutput {
        success: out.status.success(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

fn push_kubeconfig(cmd: &mut Vec<String>, kubeconfig: Option<&Path>) {
    if let Some(kc) = kubeconfig {
        cmd.push("--kubeconfig".into());
        cmd.push(kc.display().to_string());
    }
}

pub async fn install(kubeconfig: Option<&Path>, a: &HelmInstallArgs) -> Result<String> {
    let mut cmd = vec!["install".to_string()];
    match &a.name {
        Some(n) => cmd.push(n.clone()),
        None => cmd.push("--generate-name".into()),
    }
    cmd.push(a.chart.clone());
    if let Some(ns) = &a.namespace {
        cmd.push("--namespace".into());
        cmd.push(ns.clone());
    }
    push_kubeconfig(&mut cmd, kubeconfig);
    for (k, v) in &a.values {
        cmd.push("--set".into());
        cmd.push(format!("{k}={v}"));
    }

    let out = run(&cmd).await?;
    if !out.success {
        warn!(chart = %a.chart, "helm install failed");
        return Err(Error::Upstream(format!(
            "helm install failed\noutput: {}",
            out.combined()
        )));
    }
    Ok(out.combined())
}

pub async fn list(kubeconfig: Option<&Path>, a: &HelmListArgs) -> Result<Vec<HelmRelease>> {
    let mut cmd = vec!["list".to_string(), "--output".into(), "json".into()];
    if a.all_namespaces {
        cmd.push("--all-namespaces".into());
    } else if let Some(ns) = &a.namespace {
        cmd.push("--namespace".into());
        cmd.push(ns.clone());
    }
    push_kubeconfig(&mut cmd, kubeconfig);

    let out = run(&cmd).await?;
    if !out.success {
        return Err(Error::Upstream(format!("helm list failed\noutput: {}", out.combined())));
    }
    if out.stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&out.stdout)
        .map_err(|e| Error::Upstream(format!("failed to parse helm list output: {e}")))
}

pub async fn uninstall(kubeconfig: Option<&Path>, a: &HelmUninstallArgs) -> Result<UninstallOutcome> {
    let mut cmd = vec!["uninstall".to_string(), a.name.clone()];
    if let Some(ns) = &a.namespace {
        cmd.push("--namespace".into());
        cmd.push(ns.clone());
    }
    push_kubeconfig(&mut cmd, kubeconfig);

    let out = run(&cmd).await?;
    if !out.success {
        if out.combined().contains("not found") {
            info!(name = %a.name, "helm release not found (ignored)");
            return Ok(UninstallOutcome::AlreadyGone);
        }
        warn!(name = %a.name, "helm uninstall failed");
        return Err(Error::Upstream(format!(
            "helm uninstall failed\noutput: {}",
            out.combined()
        )));
    }
    Ok(UninstallOutcome::Uninstalled(out.combined()))
}

/// Render releases the way `helm list` summaries read in logs.
pub fn format_releases(releases: &[HelmRelease]) -> String {
    let mut s = format!("Found {} Helm release(s):\n", releases.len());
    for r in releases {
        s.push_str(&format!(
            "  - {} (namespace: {}, status: {}, chart: {})\n",
            r.name, r.namespace, r.status, r.chart
        ));
    }
    s
}
