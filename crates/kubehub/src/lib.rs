//! Belay kube integration: the resource client capability and its live
//! kube-rs adapter.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use belay_core::{AccessQuery, Error, KindRef, Result};
use kube::{
    api::{Api, DeleteParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::DynamicObject,
    discovery::{Discovery, Scope},
    Client, Config,
};
use serde_json::Value;
use tracing::debug;

pub mod kubeconfig;
pub mod mock;

/// Options for [`ResourceClient::delete`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOpts {
    /// Wait for dependents before the delete is considered complete.
    pub foreground: bool,
}

/// Abstract cluster capability the engine depends on. No retries or
/// backoff here; callers own those. Errors must keep not-found
/// distinguishable (`Error::is_not_found`).
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(&self, kind: &KindRef, manifest: Value, namespace: Option<&str>)
        -> Result<Value>;

    async fn delete(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        opts: DeleteOpts,
    ) -> Result<()>;

    async fn get(&self, kind: &KindRef, name: &str, namespace: Option<&str>) -> Result<Value>;

    async fn check_access(&self, query: &AccessQuery) -> Result<bool>;
}

/// Live adapter over a dynamically-typed kube client.
pub struct DynClient {
    client: Client,
    kubeconfig_path: PathBuf,
}

impl DynClient {
    /// Build a client from a kubeconfig path (`~` expanded, defaults to
    /// `~/.kube/config`). The file must exist.
    pub async fn from_kubeconfig(path: Option<&str>) -> Result<Self> {
        let path = resolve_kubeconfig_path(path)?;
        let kc = Kubeconfig::read_from(&path)
            .map_err(|e| Error::Upstream(format!("reading kubeconfig {}: {e}", path.display())))?;
        let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Upstream(format!("building kube config: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::Upstream(format!("building kube client: {e}")))?;
        Ok(Self { client, kubeconfig_path: path })
    }

    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    async fn api_for(&self, kind: &KindRef, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = find_api_resource(self.client.clone(), kind).await?;
        if namespaced {
            match namespace {
                Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
                None => Err(Error::InvalidArgument(format!(
                    "namespace required for namespaced kind {kind}"
                ))),
            }
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }
}

#[async_trait::async_trait]
impl ResourceClient for DynClient {
    async fn create(
        &self,
        kind: &KindRef,
        manifest: Value,
        namespace: Option<&str>,
    ) -> Result<Value> {
        let api = self.api_for(kind, namespace).await?;
        let obj: DynamicObject = serde_json::from_value(manifest)
            .map_err(|e| Error::Internal(format!("marshaling {kind} manifest: {e}")))?;
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| map_kube_err(e, &format!("{kind}")))?;
        debug!(kind = %kind, name = %created.metadata.name.as_deref().unwrap_or(""), "created");
        serde_json::to_value(&created)
            .map_err(|e| Error::Internal(format!("serializing created object: {e}")))
    }

    async fn delete(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        opts: DeleteOpts,
    ) -> Result<()> {
        let api = self.api_for(kind, namespace).await?;
        let dp = if opts.foreground { DeleteParams::foreground() } else { DeleteParams::default() };
        let _ = api
            .delete(name, &dp)
            .await
            .map_err(|e| map_kube_err(e, &format!("{kind} {name}")))?;
        Ok(())
    }

    async fn get(&self, kind: &KindRef, name: &str, namespace: Option<&str>) -> Result<Value> {
        let api = self.api_for(kind, namespace).await?;
        let obj = api
            .get(name)
            .await
            .map_err(|e| map_kube_err(e, &format!("{kind} {name}")))?;
        serde_json::to_value(&obj)
            .map_err(|e| Error::Internal(format!("serializing fetched object: {e}")))
    }

    async fn check_access(&self, query: &AccessQuery) -> Result<bool> {
        use k8s_openapi::api::authorization::v1::{
            ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
        };
        let ra = ResourceAttributes {
            group: query.api_group.clone().filter(|g| !g.is_empty()),
            resource: Some(query.resource.clone()),
            verb: Some(query.verb.clone()),
            namespace: query.namespace.clone().filter(|n| !n.is_empty()),
            name: query.resource_name.clone().filter(|n| !n.is_empty()),
            ..Default::default()
        };
        let sar = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                resource_attributes: Some(ra),
                user: Some(query.subject.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let created = api
            .create(&PostParams::default(), &sar)
            .await
            .map_err(|e| Error::Upstream(format!("subject access review: {e}")))?;
        Ok(created.status.map(|s| s.allowed).unwrap_or(false))
    }
}

fn map_kube_err(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(what.to_string()),
        other => Error::Upstream(other.to_string()),
    }
}

async fn find_api_resource(client: Client, kind: &KindRef) -> Result<(kube::core::ApiResource, bool)> {
    let discovery = Discovery::new(client)
        .run()
        .await
        .map_err(|e| Error::Upstream(format!("api discovery: {e}")))?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == kind.group && ar.version == kind.version && ar.kind == kind.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(Error::NotFound(format!("kind not served: {kind}")))
}

fn resolve_kubeconfig_path(path: Option<&str>) -> Result<PathBuf> {
    let home = || {
        std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| Error::Internal("HOME is not set".into()))
    };
    let resolved = match path {
        Some(p) if !p.is_empty() => {
            if let Some(rest) = p.strip_prefix("~/") {
                home()?.join(rest)
            } else {
                PathBuf::from(p)
            }
        }
        _ => home()?.join(".kube").join("config"),
    };
    if !resolved.exists() {
        return Err(Error::InvalidArgument(format!(
            "kubeconfig not found: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_kubeconfig_path_is_rejected() {
        let err = resolve_kubeconfig_path(Some("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
        assert!(err.to_string().contains("/definitely/not/here"));
    }
}
