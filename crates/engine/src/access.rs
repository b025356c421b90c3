//! Point-in-time permission probe.

use belay_core::{AccessQuery, Result};
use belay_kubehub::ResourceClient;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct AccessOutcome {
    pub allowed: bool,
    /// False only when an expectation was supplied and the live answer
    /// differed; callers surface the raw `allowed` either way.
    pub matches_expectation: bool,
}

/// One authoritative check per invocation, no retries.
pub async fn probe(
    client: &dyn ResourceClient,
    query: &AccessQuery,
    expect_allowed: Option<bool>,
) -> Result<AccessOutcome> {
    let allowed = client.check_access(query).await?;
    info!(
        verb = %query.verb,
        resource = %query.resource,
        subject = %query.subject,
        allowed,
        "access probe"
    );
    let matches_expectation = expect_allowed.map(|e| e == allowed).unwrap_or(true);
    Ok(AccessOutcome { allowed, matches_expectation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use belay_core::Error;
    use belay_kubehub::mock::MockClient;

    fn query() -> AccessQuery {
        AccessQuery {
            verb: "delete".into(),
            resource: "pods".into(),
            subject: "system:serviceaccount:demo:runner".into(),
            namespace: Some("demo".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn probe_without_expectation_always_matches() {
        let client = MockClient::new().with_access(|_| Ok(false));
        let out = probe(&client, &query(), None).await.unwrap();
        assert!(!out.allowed);
        assert!(out.matches_expectation);
    }

    #[tokio::test]
    async fn probe_reports_expectation_mismatch_with_raw_answer() {
        let client = MockClient::new().with_access(|_| Ok(false));
        let out = probe(&client, &query(), Some(true)).await.unwrap();
        assert!(!out.allowed);
        assert!(!out.matches_expectation);
    }

    #[tokio::test]
    async fn probe_is_a_single_check() {
        let client = MockClient::new().with_access(|_| Ok(true));
        probe(&client, &query(), Some(true)).await.unwrap();
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn probe_surfaces_upstream_failure() {
        let client = MockClient::new().with_access(|_| Err(Error::Upstream("api down".into())));
        let err = probe(&client, &query(), None).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)), "got {err:?}");
    }
}
