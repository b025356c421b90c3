//! Ephemeral namespace generation and tracking.

use std::sync::Mutex;

use belay_core::{Error, KindRef, Result};
use belay_kubehub::{DeleteOpts, ResourceClient};
use serde_json::json;
use tracing::{info, warn};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the generated namespace suffix.
pub const ID_LEN: usize = 8;

/// Random lowercase-alphanumeric id from the OS entropy source. Source
/// failure is fatal; there is no weaker fallback generator.
pub fn generate_id(len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)
        .map_err(|e| Error::IdGeneration(format!("random source unavailable: {e}")))?;
    Ok(buf
        .iter()
        .map(|b| ID_ALPHABET[*b as usize % ID_ALPHABET.len()] as char)
        .collect())
}

/// Tracks the namespaces created by this instance so a whole batch can be
/// torn down in one call. The lock guards only list reads and swaps; it is
/// never held across a client call.
#[derive(Default)]
pub struct NamespaceTracker {
    generated: Mutex<Vec<String>>,
}

impl NamespaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace named `<prefix>-<8-char-id>` and track it.
    /// Nothing is tracked when the create fails.
    pub async fn create(&self, client: &dyn ResourceClient, prefix: &str) -> Result<String> {
        if prefix.is_empty() {
            return Err(Error::InvalidArgument("prefix is required".into()));
        }
        let name = format!("{prefix}-{}", generate_id(ID_LEN)?);
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        });
        info!(name = %name, "creating namespace");
        let created = client.create(&KindRef::namespace(), manifest, None).await?;
        let created_name = created
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or(&name)
            .to_string();
        self.generated.lock().unwrap().push(created_name.clone());
        info!(name = %created_name, "namespace created");
        Ok(created_name)
    }

    /// Snapshot of the currently tracked names.
    pub fn tracked(&self) -> Vec<String> {
        self.generated.lock().unwrap().clone()
    }

    /// Delete every tracked namespace with foreground propagation and
    /// return how many the batch held.
    ///
    /// The tracked list is swapped for empty before any network call, so
    /// a concurrent create cannot be lost and a second concurrent cleanup
    /// degenerates to a no-op. Not-found deletes count as already
    /// satisfied. Namespaces whose delete fails are reported in the
    /// joined error but not re-queued; the batch is forgotten either way
    /// and leftovers need out-of-band cleanup.
    pub async fn delete_tracked(&self, client: &dyn ResourceClient) -> Result<usize> {
        let snapshot = std::mem::take(&mut *self.generated.lock().unwrap());
        if snapshot.is_empty() {
            return Ok(0);
        }
        info!(count = snapshot.len(), namespaces = ?snapshot, "deleting generated namespaces");
        let mut errs: Vec<String> = Vec::new();
        for ns in &snapshot {
            let res = client
                .delete(&KindRef::namespace(), ns, None, DeleteOpts { foreground: true })
                .await;
            match res {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!(name = %ns, "namespace already deleted (ignored)");
                }
                Err(e) => {
                    warn!(name = %ns, error = %e, "failed to delete namespace");
                    errs.push(format!("{ns}: {e}"));
                }
            }
        }
        if !errs.is_empty() {
            return Err(Error::Upstream(format!(
                "failed to delete namespaces: {}",
                errs.join("; ")
            )));
        }
        metrics::counter!("namespace_cleanup_total", snapshot.len() as u64);
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use belay_kubehub::mock::MockClient;

    fn is_alphabet(s: &str) -> bool {
        s.bytes().all(|b| ID_ALPHABET.contains(&b))
    }

    #[test]
    fn generated_ids_honor_length_and_alphabet() {
        let id = generate_id(ID_LEN).unwrap();
        assert_eq!(id.len(), ID_LEN);
        assert!(is_alphabet(&id), "unexpected characters in {id:?}");
    }

    #[test]
    fn consecutive_ids_differ() {
        // Probabilistic, but 36^8 makes a collision across 64 draws
        // vanishingly unlikely; a repeat here means the source is broken.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(generate_id(ID_LEN).unwrap()));
        }
    }

    #[tokio::test]
    async fn create_tracks_the_generated_name() {
        let client = MockClient::new();
        let tracker = NamespaceTracker::new();
        let name = tracker.create(&client, "vm-test").await.unwrap();

        assert!(name.starts_with("vm-test-"), "name {name:?}");
        let id = name.strip_prefix("vm-test-").unwrap();
        assert_eq!(id.len(), ID_LEN);
        assert!(is_alphabet(id));
        assert_eq!(tracker.tracked(), vec![name]);
    }

    #[tokio::test]
    async fn create_requires_a_prefix() {
        let client = MockClient::new();
        let tracker = NamespaceTracker::new();
        let err = tracker.create(&client, "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
        assert_eq!(client.calls(), 0);
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test]
    async fn failed_create_leaves_tracking_unchanged() {
        let client = MockClient::new()
            .with_create(|_, _, _| Err(Error::Upstream("connection refused".into())));
        let tracker = NamespaceTracker::new();
        assert!(tracker.create(&client, "vm-test").await.is_err());
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test]
    async fn cleanup_deletes_all_and_clears_tracking() {
        let client = MockClient::new();
        let tracker = NamespaceTracker::new();
        tracker.create(&client, "vm-test").await.unwrap();
        tracker.create(&client, "vm-test").await.unwrap();

        let deleted = tracker.delete_tracked(&client).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test]
    async fn cleanup_with_nothing_tracked_is_a_noop() {
        let client = MockClient::new();
        let tracker = NamespaceTracker::new();
        assert_eq!(tracker.delete_tracked(&client).await.unwrap(), 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn cleanup_tolerates_not_found() {
        let client = MockClient::new()
            .with_delete(|_, name, _, _| Err(Error::NotFound(name.to_string())));
        let tracker = NamespaceTracker::new();
        tracker.create(&client, "vm-test").await.unwrap();

        assert_eq!(tracker.delete_tracked(&client).await.unwrap(), 1);
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test]
    async fn cleanup_failure_still_clears_tracking() {
        // Intentional quirk: a namespace whose delete fails is reported
        // once and then forgotten, never re-queued for a later cleanup.
        let client = MockClient::new()
            .with_delete(|_, _, _, _| Err(Error::Upstream("permission denied".into())));
        let tracker = NamespaceTracker::new();
        let name = tracker.create(&client, "vm-test").await.unwrap();

        let err = tracker.delete_tracked(&client).await.unwrap_err();
        assert!(err.to_string().contains(&name), "error should name the namespace: {err}");
        assert!(tracker.tracked().is_empty());

        // A second cleanup has nothing left to do.
        assert_eq!(tracker.delete_tracked(&client).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_uses_foreground_propagation() {
        let saw_foreground = Arc::new(AtomicUsize::new(0));
        let seen = saw_foreground.clone();
        let client = MockClient::new().with_delete(move |_, _, _, opts| {
            if opts.foreground {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        let tracker = NamespaceTracker::new();
        tracker.create(&client, "vm-test").await.unwrap();
        tracker.delete_tracked(&client).await.unwrap();
        assert_eq!(saw_foreground.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cleanups_observe_each_name_exactly_once() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = deletes.clone();
        let client = Arc::new(MockClient::new().with_delete(move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let tracker = Arc::new(NamespaceTracker::new());
        for _ in 0..4 {
            tracker.create(client.as_ref(), "vm-test").await.unwrap();
        }

        let (a, b) = tokio::join!(
            tracker.delete_tracked(client.as_ref()),
            tracker.delete_tracked(client.as_ref()),
        );
        assert_eq!(a.unwrap() + b.unwrap(), 4, "each name observed by exactly one cleanup");
        assert_eq!(deletes.load(Ordering::SeqCst), 4);
        assert!(tracker.tracked().is_empty());
    }
}
