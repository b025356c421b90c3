//! Kubeconfig inspection helpers (contexts, current context, YAML view).

use std::path::Path;

use belay_core::{Error, Result};
use kube::config::Kubeconfig;

pub fn load(path: &Path) -> Result<Kubeconfig> {
    Kubeconfig::read_from(path)
        .map_err(|e| Error::Upstream(format!("reading kubeconfig {}: {e}", path.display())))
}

pub fn context_names(kc: &Kubeconfig) -> Vec<String> {
    kc.contexts.iter().map(|c| c.name.clone()).collect()
}

pub fn current_context(kc: &Kubeconfig) -> Result<&str> {
    kc.current_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::NotFound("no current context set in kubeconfig".into()))
}

/// Render the kubeconfig as YAML; `minify` keeps only the current
/// context and the cluster/user it references.
pub fn render_yaml(kc: &Kubeconfig, minify: bool) -> Result<String> {
    let doc = if minify { minified(kc)? } else { kc.clone() };
    serde_yaml::to_string(&doc)
        .map_err(|e| Error::Internal(format!("serializing kubeconfig: {e}")))
}

fn minified(kc: &Kubeconfig) -> Result<Kubeconfig> {
    let current = current_context(kc)?.to_string();
    let named = kc
        .contexts
        .iter()
        .find(|c| c.name == current)
        .ok_or_else(|| Error::NotFound(format!("current context {current:?} not in kubeconfig")))?;
    let ctx = named
        .context
        .as_ref()
        .ok_or_else(|| Error::NotFound(format!("context {current:?} has no body")))?;

    let mut out = kc.clone();
    out.contexts.retain(|c| c.name == current);
    out.clusters.retain(|c| c.name == ctx.cluster);
    out.auth_infos.retain(|a| a.name == ctx.user);
    Ok(out)
}
