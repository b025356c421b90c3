//! Deterministic in-memory substitute for [`ResourceClient`], used by
//! engine and dispatch tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use belay_core::{AccessQuery, Error, KindRef, Result};
use serde_json::Value;

use crate::{DeleteOpts, ResourceClient};

type CreateFn = dyn Fn(&KindRef, &Value, Option<&str>) -> Result<Value> + Send + Sync;
type DeleteFn = dyn Fn(&KindRef, &str, Option<&str>, DeleteOpts) -> Result<()> + Send + Sync;
type GetFn = dyn Fn(&KindRef, &str, Option<&str>) -> Result<Value> + Send + Sync;
type AccessFn = dyn Fn(&AccessQuery) -> Result<bool> + Send + Sync;

/// Mock client with injectable per-method behavior. Unset methods fall
/// back to benign defaults: create echoes the manifest, delete succeeds,
/// get reports not-found, access checks deny.
#[derive(Default)]
pub struct MockClient {
    pub create_fn: Option<Box<CreateFn>>,
    pub delete_fn: Option<Box<DeleteFn>>,
    pub get_fn: Option<Box<GetFn>>,
    pub access_fn: Option<Box<AccessFn>>,
    calls: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of client calls made, for asserting that validation
    /// failures short-circuit before any network traffic.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn with_create(
        mut self,
        f: impl Fn(&KindRef, &Value, Option<&str>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.create_fn = Some(Box::new(f));
        self
    }

    pub fn with_delete(
        mut self,
        f: impl Fn(&KindRef, &str, Option<&str>, DeleteOpts) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.delete_fn = Some(Box::new(f));
        self
    }

    pub fn with_get(
        mut self,
        f: impl Fn(&KindRef, &str, Option<&str>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.get_fn = Some(Box::new(f));
        self
    }

    pub fn with_access(
        mut self,
        f: impl Fn(&AccessQuery) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.access_fn = Some(Box::new(f));
        self
    }
}

#[async_trait::async_trait]
impl ResourceClient for MockClient {
    async fn create(
        &self,
        kind: &KindRef,
        manifest: Value,
        namespace: Option<&str>,
    ) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.create_fn {
            Some(f) => f(kind, &manifest, namespace),
            None => Ok(manifest),
        }
    }

    async fn delete(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        opts: DeleteOpts,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.delete_fn {
            Some(f) => f(kind, name, namespace, opts),
            None => Ok(()),
        }
    }

    async fn get(&self, kind: &KindRef, name: &str, namespace: Option<&str>) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.get_fn {
            Some(f) => f(kind, name, namespace),
            None => Err(Error::NotFound(format!("{kind} {name}"))),
        }
    }

    async fn check_access(&self, query: &AccessQuery) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.access_fn {
            Some(f) => f(query),
            None => Ok(false),
        }
    }
}
