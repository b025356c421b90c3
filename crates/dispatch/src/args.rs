//! Typed per-operation argument structs and the validating decode step.
//!
//! Every decode starts from the same untyped JSON value; malformed shapes
//! become a single `InvalidArgument` instead of ad hoc field poking in
//! the handlers.

use belay_core::{parse_duration, AccessQuery, Error, KindRef, ResourceRef, Result};
use belay_engine::WaitSpec;
use serde_json::{Map, Value};

/// Operations that declare parameters require a string-keyed mapping.
pub fn as_object(args: &Value) -> Result<&Map<String, Value>> {
    args.as_object()
        .ok_or_else(|| Error::InvalidArgument("args must be an object".into()))
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match obj.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(Error::InvalidArgument(format!("{field} is required"))),
    }
}

fn optional_str(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn optional_bool(obj: &Map<String, Value>, field: &str) -> bool {
    obj.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn metadata<'a>(obj: &'a Map<String, Value>) -> Result<&'a Map<String, Value>> {
    obj.get("metadata")
        .and_then(|m| m.as_object())
        .ok_or_else(|| Error::InvalidArgument("metadata is required".into()))
}

#[derive(Debug)]
pub struct CreateArgs {
    pub kind: KindRef,
    pub name: Option<String>,
    pub namespace: Option<String>,
    /// The full manifest as supplied (apiVersion, kind, metadata, spec, ...).
    pub manifest: Value,
}

pub fn decode_create(args: &Value) -> Result<CreateArgs> {
    let obj = as_object(args)?;
    let api_version = required_str(obj, "apiVersion")?;
    let kind = required_str(obj, "kind")?;
    let meta = metadata(obj)?;
    Ok(CreateArgs {
        kind: KindRef::from_api_version(api_version, kind),
        name: optional_str(meta, "name"),
        namespace: optional_str(meta, "namespace"),
        manifest: args.clone(),
    })
}

#[derive(Debug)]
pub struct DeleteArgs {
    pub resource: ResourceRef,
    pub ignore_not_found: bool,
}

pub fn decode_delete(args: &Value) -> Result<DeleteArgs> {
    let obj = as_object(args)?;
    let api_version = required_str(obj, "apiVersion")?;
    let kind = required_str(obj, "kind")?;
    let meta = metadata(obj)?;
    let name = required_str(meta, "name")?;
    Ok(DeleteArgs {
        resource: ResourceRef {
            kind: KindRef::from_api_version(api_version, kind),
            name: name.to_string(),
            namespace: optional_str(meta, "namespace"),
        },
        ignore_not_found: optional_bool(obj, "ignoreNotFound"),
    })
}

pub fn decode_wait(args: &Value) -> Result<WaitSpec> {
    let obj = as_object(args)?;
    let api_version = required_str(obj, "apiVersion")?;
    let kind = required_str(obj, "kind")?;
    let meta = metadata(obj)?;
    let name = required_str(meta, "name")?;
    let condition = required_str(obj, "condition")?;

    let target = ResourceRef {
        kind: KindRef::from_api_version(api_version, kind),
        name: name.to_string(),
        namespace: optional_str(meta, "namespace"),
    };
    let mut spec = WaitSpec::new(target, condition);
    if let Some(status) = optional_str(obj, "status") {
        spec.expected_status = status;
    }
    if let Some(timeout) = optional_str(obj, "timeout") {
        spec.timeout = parse_duration(&timeout)?;
    }
    Ok(spec)
}

#[derive(Debug)]
pub struct AuthArgs {
    pub query: AccessQuery,
    pub expect_allowed: Option<bool>,
}

pub fn decode_auth(args: &Value) -> Result<AuthArgs> {
    let obj = as_object(args)?;
    let query = AccessQuery {
        verb: required_str(obj, "verb")?.to_string(),
        resource: required_str(obj, "resource")?.to_string(),
        subject: required_str(obj, "as")?.to_string(),
        namespace: optional_str(obj, "namespace"),
        api_group: optional_str(obj, "apiGroup"),
        resource_name: optional_str(obj, "resourceName"),
    };
    let expect_allowed = obj
        .get("expect")
        .and_then(|e| e.as_object())
        .and_then(|e| e.get("allowed"))
        .and_then(|v| v.as_bool());
    Ok(AuthArgs { query, expect_allowed })
}

pub fn decode_prefix(args: &Value) -> Result<String> {
    let obj = as_object(args)?;
    Ok(required_str(obj, "prefix")?.to_string())
}

/// `viewConfig` only has the optional `minify` flag.
pub fn decode_view_config(args: &Value) -> Result<bool> {
    let obj = as_object(args)?;
    Ok(optional_bool(obj, "minify"))
}

#[derive(Debug)]
pub struct HelmInstallArgs {
    pub chart: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    /// Pre-rendered `--set` pairs.
    pub values: Vec<(String, String)>,
}

pub fn decode_helm_install(args: &Value) -> Result<HelmInstallArgs> {
    let obj = as_object(args)?;
    let chart = required_str(obj, "chart")?.to_string();
    let values = obj
        .get("values")
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), scalar_to_string(v))).collect())
        .unwrap_or_default();
    Ok(HelmInstallArgs {
        chart,
        name: optional_str(obj, "name"),
        namespace: optional_str(obj, "namespace"),
        values,
    })
}

#[derive(Debug)]
pub struct HelmListArgs {
    pub namespace: Option<String>,
    pub all_namespaces: bool,
}

pub fn decode_helm_list(args: &Value) -> Result<HelmListArgs> {
    let obj = as_object(args)?;
    Ok(HelmListArgs {
        namespace: optional_str(obj, "namespace"),
        all_namespaces: optional_bool(obj, "allNamespaces"),
    })
}

#[derive(Debug)]
pub struct HelmUninstallArgs {
    pub name: String,
    pub namespace: Option<String>,
}

pub fn decode_helm_uninstall(args: &Value) -> Result<HelmUninstallArgs> {
    let obj = as_object(args)?;
    Ok(HelmUninstallArgs {
        name: required_str(obj, "name")?.to_string(),
        namespace: optional_str(obj, "namespace"),
    })
}

fn scalar_to_string(v: &Value) -> String {
    match v.as_str() {
        Some(s) => s.to_string(),
        None => v.to_string(),
    }
}
