//! Belay dispatch: routes named operations to the engine and client,
//! normalizing every handler outcome into the uniform result envelope.

#![forbid(unsafe_code)]

pub mod args;
pub mod helm;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use belay_core::{Error, OperationRequest, OperationResult, Result};
use belay_engine::{probe, wait_for_condition, NamespaceTracker};
use belay_kubehub::{kubeconfig, DeleteOpts, ResourceClient};
use metrics::counter;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Operation names served by [`Dispatcher::dispatch`].
pub const OPERATIONS: &[&str] = &[
    "create",
    "delete",
    "wait",
    "authCanI",
    "createNamespace",
    "deleteGeneratedNamespaces",
    "listContexts",
    "getCurrentContext",
    "viewConfig",
    "helmInstall",
    "helmList",
    "helmUninstall",
];

/// Owns the injected client capability, the namespace tracker, and the
/// kubeconfig path the helm/config operations need.
pub struct Dispatcher {
    client: Option<Arc<dyn ResourceClient>>,
    kubeconfig: Option<PathBuf>,
    namespaces: NamespaceTracker,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ResourceClient>, kubeconfig: Option<PathBuf>) -> Self {
        Self { client: Some(client), kubeconfig, namespaces: NamespaceTracker::new() }
    }

    /// A dispatcher with no cluster capability; every operation that
    /// needs one fails with `ClientUninitialized`.
    pub fn unconfigured() -> Self {
        Self { client: None, kubeconfig: None, namespaces: NamespaceTracker::new() }
    }

    fn client(&self) -> Result<&dyn ResourceClient> {
        self.client.as_deref().ok_or(Error::ClientUninitialized)
    }

    fn kubeconfig(&self) -> Result<&Path> {
        self.kubeconfig
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("no kubeconfig configured".into()))
    }

    /// Route one operation. Handler-level failures come back as failed
    /// [`OperationResult`]s; only an unknown operation name escapes as a
    /// transport-level error.
    pub async fn dispatch(
        &self,
        req: &OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResult> {
        counter!("dispatch_total", 1u64);
        let res = match req.name.as_str() {
            "create" => self.handle_create(&req.args).await,
            "delete" => self.handle_delete(&req.args).await,
            "wait" => self.handle_wait(&req.args, cancel).await,
            "authCanI" => self.handle_auth_can_i(&req.args).await,
            "createNamespace" => self.handle_create_namespace(&req.args).await,
            "deleteGeneratedNamespaces" => self.handle_delete_generated_namespaces().await,
            "listContexts" => self.handle_list_contexts(),
            "getCurrentContext" => self.handle_get_current_context(),
            "viewConfig" => self.handle_view_config(&req.args),
            "helmInstall" => self.handle_helm_install(&req.args).await,
            "helmList" => self.handle_helm_list(&req.args).await,
            "helmUninstall" => self.handle_helm_uninstall(&req.args).await,
            other => return Err(Error::InvalidArgument(format!("unknown operation: {other}"))),
        };
        Ok(res.unwrap_or_else(|e| {
            counter!("dispatch_failures_total", 1u64);
            OperationResult::fail(e)
        }))
    }

    async fn handle_create(&self, raw: &Value) -> Result<OperationResult> {
        let client = self.client()?;
        let a = args::decode_create(raw)?;
        info!(kind = %a.kind, name = %a.name.as_deref().unwrap_or("(generated)"), "creating resource");
        let created = client.create(&a.kind, a.manifest, a.namespace.as_deref()).await?;
        let name = created
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .or(a.name.as_deref())
            .unwrap_or("")
            .to_string();
        Ok(OperationResult::ok(format!("Created {} {}", a.kind.kind, name)))
    }

    async fn handle_delete(&self, raw: &Value) -> Result<OperationResult> {
        let client = self.client()?;
        let a = args::decode_delete(raw)?;
        info!(target = %a.resource, "deleting resource");
        let res = client
            .delete(
                &a.resource.kind,
                &a.resource.name,
                a.resource.namespace.as_deref(),
                DeleteOpts::default(),
            )
            .await;
        match res {
            Ok(()) => Ok(OperationResult::ok(format!(
                "Deleted {} {}",
                a.resource.kind.kind, a.resource.name
            ))),
            Err(e) if a.ignore_not_found && e.is_not_found() => Ok(OperationResult::ok(format!(
                "{} {} not found (ignored)",
                a.resource.kind.kind, a.resource.name
            ))),
            Err(e) => Err(e),
        }
    }

    async fn handle_wait(&self, raw: &Value, cancel: &CancellationToken) -> Result<OperationResult> {
        let client = self.client()?;
        let spec = args::decode_wait(raw)?;
        info!(
            target = %spec.target,
            condition = %spec.condition,
            status = %spec.expected_status,
            timeout_s = spec.timeout.as_secs(),
            "waiting for condition"
        );
        let out = wait_for_condition(client, &spec, cancel).await?;
        Ok(OperationResult::ok(format!(
            "Condition {}={} met on {} after {:.1}s",
            spec.condition,
            spec.expected_status,
            spec.target,
            out.elapsed.as_secs_f64()
        )))
    }

    async fn handle_auth_can_i(&self, raw: &Value) -> Result<OperationResult> {
        let client = self.client()?;
        let a = args::decode_auth(raw)?;
        let out = probe(client, &a.query, a.expect_allowed).await?;
        let mut outputs = BTreeMap::new();
        outputs.insert("allowed".to_string(), out.allowed.to_string());
        if !out.matches_expectation {
            // Expectation mismatch fails the operation but the raw answer
            // still travels in outputs.
            return Ok(OperationResult::fail_with_outputs(
                format!(
                    "expected allowed={}, got allowed={} for {} {} as {}",
                    a.expect_allowed.unwrap_or_default(),
                    out.allowed,
                    a.query.verb,
                    a.query.resource,
                    a.query.subject
                ),
                outputs,
            ));
        }
        Ok(OperationResult::ok_with_outputs(
            format!(
                "{} {} as {}: allowed={}",
                a.query.verb, a.query.resource, a.query.subject, out.allowed
            ),
            outputs,
        ))
    }

    async fn handle_create_namespace(&self, raw: &Value) -> Result<OperationResult> {
        let client = self.client()?;
        let prefix = args::decode_prefix(raw)?;
        let name = self.namespaces.create(client, &prefix).await?;
        let mut outputs = BTreeMap::new();
        outputs.insert("namespace".to_string(), name.clone());
        Ok(OperationResult::ok_with_outputs(format!("Created namespace {name}"), outputs))
    }

    async fn handle_delete_generated_namespaces(&self) -> Result<OperationResult> {
        let client = self.client()?;
        match self.namespaces.delete_tracked(client).await? {
            0 => Ok(OperationResult::ok("No generated namespaces to delete")),
            n => Ok(OperationResult::ok(format!("Deleted {n} generated namespace(s)"))),
        }
    }

    fn handle_list_contexts(&self) -> Result<OperationResult> {
        let kc = kubeconfig::load(self.kubeconfig()?)?;
        let names = kubeconfig::context_names(&kc);
        let mut outputs = BTreeMap::new();
        outputs.insert("contexts".to_string(), names.join(","));
        if let Ok(current) = kubeconfig::current_context(&kc) {
            outputs.insert("current".to_string(), current.to_string());
        }
        Ok(OperationResult::ok_with_outputs(
            format!("Found {} context(s): {}", names.len(), names.join(", ")),
            outputs,
        ))
    }

    fn handle_get_current_context(&self) -> Result<OperationResult> {
        let kc = kubeconfig::load(self.kubeconfig()?)?;
        let current = kubeconfig::current_context(&kc)?;
        let mut outputs = BTreeMap::new();
        outputs.insert("context".to_string(), current.to_string());
        Ok(OperationResult::ok_with_outputs(format!("Current context: {current}"), outputs))
    }

    fn handle_view_config(&self, raw: &Value) -> Result<OperationResult> {
        let minify = args::decode_view_config(raw)?;
        let kc = kubeconfig::load(self.kubeconfig()?)?;
        let yaml = kubeconfig::render_yaml(&kc, minify)?;
        Ok(OperationResult::ok(yaml))
    }

    async fn handle_helm_install(&self, raw: &Value) -> Result<OperationResult> {
        let a = args::decode_helm_install(raw)?;
        info!(chart = %a.chart, name = %a.name.as_deref().unwrap_or("(generated)"), "installing helm chart");
        let output = helm::install(self.kubeconfig.as_deref(), &a).await?;
        Ok(OperationResult::ok(format!("Helm chart installed successfully\n{output}")))
    }

    async fn handle_helm_list(&self, raw: &Value) -> Result<OperationResult> {
        let a = args::decode_helm_list(raw)?;
        let releases = helm::list(self.kubeconfig.as_deref(), &a).await?;
        if releases.is_empty() {
            return Ok(OperationResult::ok("No Helm releases found"));
        }
        Ok(OperationResult::ok(helm::format_releases(&releases)))
    }

    async fn handle_helm_uninstall(&self, raw: &Value) -> Result<OperationResult> {
        let a = args::decode_helm_uninstall(raw)?;
        info!(name = %a.name, "uninstalling helm release");
        match helm::uninstall(self.kubeconfig.as_deref(), &a).await? {
            helm::UninstallOutcome::Uninstalled(output) => Ok(OperationResult::ok(format!(
                "Helm release '{}' uninstalled successfully\n{output}",
                a.name
            ))),
            helm::UninstallOutcome::AlreadyGone => Ok(OperationResult::ok(format!(
                "Helm release '{}' not found (already uninstalled)",
                a.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use belay_kubehub::mock::MockClient;
    use serde_json::json;

    fn req(name: &str, args: Value) -> OperationRequest {
        OperationRequest::new(name, args)
    }

    fn dispatcher(mock: MockClient) -> (Arc<MockClient>, Dispatcher) {
        let client = Arc::new(mock);
        let d = Dispatcher::new(client.clone(), None);
        (client, d)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn non_object_args_fail_before_any_client_call() {
        let (client, d) = dispatcher(MockClient::new());
        for op in ["create", "delete", "wait", "authCanI", "createNamespace", "helmInstall"] {
            let res = d.dispatch(&req(op, json!("not a map")), &token()).await.unwrap();
            assert!(!res.success, "{op} should fail on non-object args");
            assert!(
                res.message.contains("args must be an object"),
                "{op}: unexpected message {:?}",
                res.message
            );
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_a_transport_error() {
        let (_, d) = dispatcher(MockClient::new());
        let err = d.dispatch(&req("definitelyNot", json!({})), &token()).await.unwrap_err();
        assert!(err.to_string().contains("unknown operation"));
    }

    #[tokio::test]
    async fn uninitialized_client_fails_cluster_operations() {
        let d = Dispatcher::unconfigured();
        let res = d
            .dispatch(&req("createNamespace", json!({ "prefix": "vm-test" })), &token())
            .await
            .unwrap();
        assert!(!res.success);
        assert!(res.message.contains("client not initialized"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn create_namespace_reports_the_generated_name() {
        let (_, d) = dispatcher(MockClient::new());
        let res = d
            .dispatch(&req("createNamespace", json!({ "prefix": "vm-test" })), &token())
            .await
            .unwrap();
        assert!(res.success, "{:?}", res.error);
        let ns = res.outputs.unwrap().remove("namespace").unwrap();
        assert!(ns.starts_with("vm-test-"));
        assert_eq!(ns.len(), "vm-test-".len() + 8);
    }

    #[tokio::test]
    async fn create_namespace_requires_prefix() {
        let (client, d) = dispatcher(MockClient::new());
        let res = d.dispatch(&req("createNamespace", json!({})), &token()).await.unwrap();
        assert!(!res.success);
        assert!(res.message.contains("prefix is required"), "{:?}", res.message);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn namespace_cleanup_round_trip() {
        let (_, d) = dispatcher(MockClient::new());
        let empty = d.dispatch(&req("deleteGeneratedNamespaces", json!({})), &token()).await.unwrap();
        assert!(empty.success);
        assert_eq!(empty.message, "No generated namespaces to delete");

        for _ in 0..2 {
            let res = d
                .dispatch(&req("createNamespace", json!({ "prefix": "vm-test" })), &token())
                .await
                .unwrap();
            assert!(res.success);
        }
        let res = d.dispatch(&req("deleteGeneratedNamespaces", json!({})), &token()).await.unwrap();
        assert!(res.success, "{:?}", res.error);
        assert_eq!(res.message, "Deleted 2 generated namespace(s)");
    }

    #[tokio::test]
    async fn auth_can_i_mismatch_fails_but_reports_allowed() {
        let (_, d) = dispatcher(MockClient::new().with_access(|_| Ok(false)));
        let res = d
            .dispatch(
                &req(
                    "authCanI",
                    json!({
                        "verb": "delete", "resource": "pods", "as": "alice",
                        "expect": { "allowed": true },
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(!res.success);
        assert_eq!(res.outputs.unwrap().remove("allowed").unwrap(), "false");
        assert!(res.message.contains("expected allowed=true"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn auth_can_i_matching_expectation_succeeds() {
        let (_, d) = dispatcher(MockClient::new().with_access(|_| Ok(true)));
        let res = d
            .dispatch(
                &req(
                    "authCanI",
                    json!({
                        "verb": "get", "resource": "pods", "as": "alice",
                        "expect": { "allowed": true },
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(res.success, "{:?}", res.error);
        assert_eq!(res.outputs.unwrap().remove("allowed").unwrap(), "true");
    }

    #[tokio::test]
    async fn wait_succeeds_when_condition_is_already_met() {
        let mock = MockClient::new().with_get(|_, _, _| {
            Ok(json!({
                "status": { "conditions": [ { "type": "Ready", "status": "True" } ] }
            }))
        });
        let (_, d) = dispatcher(mock);
        let res = d
            .dispatch(
                &req(
                    "wait",
                    json!({
                        "apiVersion": "v1", "kind": "Pod",
                        "metadata": { "name": "web-0", "namespace": "demo" },
                        "condition": "Ready",
                        "timeout": "5s",
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(res.success, "{:?}", res.error);
        assert!(res.message.contains("Ready=True"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn wait_rejects_unparseable_timeout_without_polling() {
        let (client, d) = dispatcher(MockClient::new());
        let res = d
            .dispatch(
                &req(
                    "wait",
                    json!({
                        "apiVersion": "v1", "kind": "Pod",
                        "metadata": { "name": "web-0" },
                        "condition": "Ready",
                        "timeout": "soon",
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(!res.success);
        assert!(res.message.contains("invalid duration"), "{:?}", res.message);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn wait_reports_cancellation() {
        let mock = MockClient::new().with_get(|_, _, _| Ok(json!({ "status": {} })));
        let (_, d) = dispatcher(mock);
        let cancel = token();
        cancel.cancel();
        let res = d
            .dispatch(
                &req(
                    "wait",
                    json!({
                        "apiVersion": "v1", "kind": "Pod",
                        "metadata": { "name": "web-0" },
                        "condition": "Ready",
                        "timeout": "10s",
                    }),
                ),
                &cancel,
            )
            .await
            .unwrap();
        assert!(!res.success);
        assert!(res.message.contains("canceled"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn delete_honors_ignore_not_found() {
        let mock = MockClient::new()
            .with_delete(|_, name, _, _| Err(Error::NotFound(name.to_string())));
        let (_, d) = dispatcher(mock);
        let target = json!({
            "apiVersion": "v1", "kind": "Pod",
            "metadata": { "name": "web-0", "namespace": "demo" },
            "ignoreNotFound": true,
        });
        let res = d.dispatch(&req("delete", target), &token()).await.unwrap();
        assert!(res.success, "{:?}", res.error);
        assert!(res.message.contains("not found (ignored)"), "{:?}", res.message);

        let strict = json!({
            "apiVersion": "v1", "kind": "Pod",
            "metadata": { "name": "web-0", "namespace": "demo" },
        });
        let res = d.dispatch(&req("delete", strict), &token()).await.unwrap();
        assert!(!res.success);
        assert!(res.message.contains("not found"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn create_passes_the_manifest_through() {
        let mock = MockClient::new().with_create(|kind, manifest, ns| {
            assert_eq!(kind.kind, "ConfigMap");
            assert_eq!(ns, Some("demo"));
            assert!(manifest.get("data").is_some());
            Ok(manifest.clone())
        });
        let (client, d) = dispatcher(mock);
        let res = d
            .dispatch(
                &req(
                    "create",
                    json!({
                        "apiVersion": "v1", "kind": "ConfigMap",
                        "metadata": { "name": "app-config", "namespace": "demo" },
                        "data": { "k": "v" },
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(res.success, "{:?}", res.error);
        assert_eq!(res.message, "Created ConfigMap app-config");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn upstream_create_failure_becomes_a_failed_result() {
        let mock =
            MockClient::new().with_create(|_, _, _| Err(Error::Upstream("connection refused".into())));
        let (_, d) = dispatcher(mock);
        let res = d
            .dispatch(
                &req(
                    "create",
                    json!({
                        "apiVersion": "v1", "kind": "ConfigMap",
                        "metadata": { "name": "app-config", "namespace": "demo" },
                    }),
                ),
                &token(),
            )
            .await
            .unwrap();
        assert!(!res.success);
        assert!(res.message.contains("connection refused"), "{:?}", res.message);
        assert_eq!(res.error.as_deref(), Some(res.message.as_str()));
    }

    #[tokio::test]
    async fn kubeconfig_operations_require_a_configured_path() {
        let (_, d) = dispatcher(MockClient::new());
        for op in ["listContexts", "getCurrentContext"] {
            let res = d.dispatch(&req(op, json!({})), &token()).await.unwrap();
            assert!(!res.success, "{op} should fail without kubeconfig");
            assert!(res.message.contains("no kubeconfig configured"), "{:?}", res.message);
        }
    }

    #[tokio::test]
    async fn kubeconfig_operations_read_the_configured_file() {
        const SAMPLE: &str = "apiVersion: v1\nkind: Config\ncurrent-context: staging\nclusters:\n  - name: c1\n    cluster:\n      server: https://example:6443\nusers:\n  - name: u1\n    user: {}\ncontexts:\n  - name: staging\n    context:\n      cluster: c1\n      user: u1\n";
        let path = std::env::temp_dir().join(format!("belay-kubeconfig-{}.yaml", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();

        let client = Arc::new(MockClient::new());
        let d = Dispatcher::new(client, Some(path.clone()));

        let res = d.dispatch(&req("listContexts", json!({})), &token()).await.unwrap();
        assert!(res.success, "{:?}", res.error);
        let outs = res.outputs.unwrap();
        assert_eq!(outs.get("contexts").unwrap(), "staging");
        assert_eq!(outs.get("current").unwrap(), "staging");

        let res = d.dispatch(&req("getCurrentContext", json!({})), &token()).await.unwrap();
        assert!(res.success);
        assert_eq!(res.outputs.unwrap().get("context").unwrap(), "staging");

        let res = d.dispatch(&req("viewConfig", json!({ "minify": true })), &token()).await.unwrap();
        assert!(res.success);
        assert!(res.message.contains("staging"));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn helm_install_requires_a_chart() {
        let (_, d) = dispatcher(MockClient::new());
        let res = d.dispatch(&req("helmInstall", json!({ "name": "web" })), &token()).await.unwrap();
        assert!(!res.success);
        assert!(res.message.contains("chart is required"), "{:?}", res.message);
    }

    #[tokio::test]
    async fn helm_uninstall_requires_a_name() {
        let (_, d) = dispatcher(MockClient::new());
        let res = d.dispatch(&req("helmUninstall", json!({})), &token()).await.unwrap();
        assert!(!res.success);
        assert!(res.message.contains("name is required"), "{:?}", res.message);
    }
}
