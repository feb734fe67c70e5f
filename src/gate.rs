//! Change detection: skip the run when upstream has not been edited since
//! the last state-level paths artifact was written.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::services::cases_api::CasesApi;

#[derive(Deserialize)]
struct ModifiedOnly {
    modified: Option<i64>,
}

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub should_run: bool,
    /// Upstream last-edit epoch (ms), when the metadata query succeeded.
    pub upstream_modified: Option<i64>,
    /// `modified` of the previous artifact, when readable.
    pub stored_modified: Option<i64>,
}

/// Reads `modified` from a previously written paths artifact.
/// Missing or corrupt files yield `None`.
pub fn stored_modified(path: &Path) -> Option<i64> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No previous artifact");
            return None;
        }
    };

    match serde_json::from_str::<ModifiedOnly>(&content) {
        Ok(parsed) => parsed.modified,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Previous artifact is unreadable");
            None
        }
    }
}

/// Runs unless both timestamps are known and the stored one is not older.
pub fn should_run(upstream: Option<i64>, stored: Option<i64>) -> bool {
    match (upstream, stored) {
        (Some(upstream), Some(stored)) => stored < upstream,
        _ => true,
    }
}

/// Queries upstream metadata and compares it with the artifact at `artifact`.
pub async fn check<S: CasesApi + ?Sized>(api: &S, artifact: &Path) -> GateDecision {
    let upstream_modified = match api.last_modified().await {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(error = %e, "Upstream metadata query failed, running anyway");
            None
        }
    };
    let stored_modified = stored_modified(artifact);
    let should_run = should_run(upstream_modified, stored_modified);

    info!(
        should_run,
        upstream_modified, stored_modified, "Change-detection gate evaluated"
    );

    GateDecision {
        should_run,
        upstream_modified,
        stored_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::types::DailyObservation;
    use crate::catalog::TimeSeriesQuery;
    use crate::services::cases_api::TrendLookup;
    use anyhow::{Result, anyhow};
    use std::io::Write;

    struct Metadata(Option<i64>);

    #[async_trait::async_trait]
    impl CasesApi for Metadata {
        async fn time_series(&self, _query: &TimeSeriesQuery) -> Result<Vec<DailyObservation>> {
            Ok(vec![])
        }

        async fn trend_categories(&self) -> Result<TrendLookup> {
            Ok(TrendLookup::new())
        }

        async fn last_modified(&self) -> Result<i64> {
            self.0.ok_or_else(|| anyhow!("metadata unavailable"))
        }
    }

    fn artifact(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_should_run() {
        assert!(should_run(Some(200), Some(100)));
        assert!(!should_run(Some(200), Some(200)));
        assert!(!should_run(Some(200), Some(300)));
        assert!(should_run(None, Some(300)));
        assert!(should_run(Some(200), None));
    }

    #[tokio::test]
    async fn test_stale_artifact_runs() {
        let file = artifact(r#"{"features": [], "frames": {}, "modified": 100}"#);
        let decision = check(&Metadata(Some(200)), file.path()).await;

        assert!(decision.should_run);
        assert_eq!(decision.stored_modified, Some(100));
        assert_eq!(decision.upstream_modified, Some(200));
    }

    #[tokio::test]
    async fn test_fresh_artifact_skips() {
        let file = artifact(r#"{"modified": 200}"#);
        assert!(!check(&Metadata(Some(200)), file.path()).await.should_run);
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_artifact_runs() {
        let missing = std::path::Path::new("/nonexistent/us-states-paths.json");
        assert!(check(&Metadata(Some(200)), missing).await.should_run);

        let corrupt = artifact("{not json");
        assert!(check(&Metadata(Some(200)), corrupt.path()).await.should_run);
    }

    #[tokio::test]
    async fn test_metadata_failure_runs() {
        let file = artifact(r#"{"modified": 500}"#);
        let decision = check(&Metadata(None), file.path()).await;

        assert!(decision.should_run);
        assert_eq!(decision.upstream_modified, None);
    }
}
