//! Refresh coordination for the daemon view
//!
//! Each refresh supersedes the batch in flight: the superseded call returns
//! the last settled results right away and whatever its queries produce
//! later is dropped. Superseding only stops waiting. The Gradle processes
//! behind the queries keep running to completion.

use super::{unique_versions, DaemonRecord, DaemonStatus, ProjectRoot};
use crate::error::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Daemon lookup for one project root
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DaemonQuery: Send + Sync {
    /// Daemons visible from `project_root`
    async fn query(&self, project_root: &Path) -> Result<Vec<DaemonRecord>>;
}

#[derive(Default)]
struct RefreshState {
    /// Settled results of the last batch that completed
    last: Vec<DaemonRecord>,
    /// Token of the batch in flight
    in_flight: Option<CancellationToken>,
}

/// Deduplicates and supersedes daemon queries
pub struct RefreshController {
    query: Arc<dyn DaemonQuery>,
    show_stopped: Mutex<bool>,
    state: Mutex<RefreshState>,
}

impl RefreshController {
    /// Controller issuing lookups through `query`
    pub fn new(query: Arc<dyn DaemonQuery>, show_stopped: bool) -> Self {
        Self {
            query,
            show_stopped: Mutex::new(show_stopped),
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Include or hide stopped daemons from the next batch on
    pub fn set_show_stopped(&self, show: bool) {
        *lock(&self.show_stopped) = show;
    }

    /// Results of the last settled batch
    pub fn latest(&self) -> Vec<DaemonRecord> {
        lock(&self.state).last.clone()
    }

    /// Settle the batch in flight early with the last known results
    pub fn supersede(&self) {
        if let Some(token) = lock(&self.state).in_flight.take() {
            debug!("Superseding daemon refresh in flight");
            token.cancel();
        }
    }

    /// Query every distinct root concurrently.
    ///
    /// Roots are deduplicated by Gradle version. Returns the combined
    /// records, or the last settled results if a newer refresh supersedes
    /// this one first. A failing root contributes no records.
    pub async fn refresh(&self, roots: &[ProjectRoot]) -> Vec<DaemonRecord> {
        let token = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            if let Some(previous) = state.in_flight.replace(token.clone()) {
                previous.cancel();
            }
        }

        let mut batch = JoinSet::new();
        for (index, root) in unique_versions(roots).into_iter().enumerate() {
            let query = Arc::clone(&self.query);
            batch.spawn(async move {
                let records = match query.query(&root.path).await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Failed to query daemons for {:?}: {}", root.path, e);
                        Vec::new()
                    }
                };
                (index, records)
            });
        }

        let settled = tokio::select! {
            results = collect(&mut batch) => Some(results),
            _ = token.cancelled() => None,
        };

        let Some(records) = settled.filter(|_| !token.is_cancelled()) else {
            // Dropping the handles leaves the queries running unobserved
            batch.detach_all();
            return self.latest();
        };

        let show_stopped = *lock(&self.show_stopped);
        let records: Vec<DaemonRecord> = records
            .into_iter()
            .filter(|record| show_stopped || record.status != DaemonStatus::Stopped)
            .collect();

        let mut state = lock(&self.state);
        if token.is_cancelled() {
            return state.last.clone();
        }
        state.in_flight = None;
        state.last = records.clone();
        records
    }
}

/// Wait for every query, keeping the order of the deduplicated roots
async fn collect(batch: &mut JoinSet<(usize, Vec<DaemonRecord>)>) -> Vec<DaemonRecord> {
    let mut per_root: Vec<(usize, Vec<DaemonRecord>)> = Vec::new();
    while let Some(joined) = batch.join_next().await {
        match joined {
            Ok(result) => per_root.push(result),
            Err(e) => warn!("Daemon query task failed: {}", e),
        }
    }
    per_root.sort_by_key(|(index, _)| *index);
    per_root.into_iter().flat_map(|(_, records)| records).collect()
}

/// Paths of the roots a batch would query
pub fn batch_roots(roots: &[ProjectRoot]) -> Vec<PathBuf> {
    unique_versions(roots).into_iter().map(|root| root.path).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemons::parse_status_text;
    use crate::error::BridgeError;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn records(text: &str) -> Vec<DaemonRecord> {
        parse_status_text(text)
    }

    #[tokio::test]
    async fn test_queries_unique_roots_in_order() {
        let mut query = MockDaemonQuery::new();
        query
            .expect_query()
            .withf(|root| root == Path::new("/p1"))
            .times(1)
            .returning(|_| Ok(parse_status_text("1 BUSY 6.3")));
        query
            .expect_query()
            .withf(|root| root == Path::new("/p2"))
            .times(1)
            .returning(|_| Ok(parse_status_text("2 IDLE 6.4\n3 STOPPED (by user or operating system)")));

        let controller = RefreshController::new(Arc::new(query), false);
        let roots = vec![
            ProjectRoot::new("/p1", Some("6.3")),
            ProjectRoot::new("/p2", Some("6.4")),
            ProjectRoot::new("/p3", Some("6.4")),
        ];
        let result = controller.refresh(&roots).await;
        let pids: Vec<&str> = result.iter().map(|r| r.pid()).collect();
        assert_eq!(pids, vec!["1", "2"]);
        assert_eq!(controller.latest(), result);
    }

    #[tokio::test]
    async fn test_show_stopped_and_errors() {
        let mut query = MockDaemonQuery::new();
        query
            .expect_query()
            .withf(|root| root == Path::new("/ok"))
            .returning(|_| Ok(parse_status_text("3 STOPPED (by user or operating system)")));
        query
            .expect_query()
            .withf(|root| root == Path::new("/broken"))
            .returning(|_| Err(BridgeError::Execution("wrapper failed".to_string())));

        let controller = RefreshController::new(Arc::new(query), true);
        let roots = vec![ProjectRoot::new("/ok", None), ProjectRoot::new("/broken", None)];
        let result = controller.refresh(&roots).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].status, DaemonStatus::Stopped);

        controller.set_show_stopped(false);
        assert!(controller.refresh(&roots).await.is_empty());
    }

    /// Query whose answers are released by the test
    struct GatedQuery {
        gates: HashMap<PathBuf, Arc<Notify>>,
        answers: HashMap<PathBuf, Vec<DaemonRecord>>,
    }

    #[async_trait]
    impl DaemonQuery for GatedQuery {
        async fn query(&self, project_root: &Path) -> Result<Vec<DaemonRecord>> {
            if let Some(gate) = self.gates.get(project_root) {
                gate.notified().await;
            }
            Ok(self.answers.get(project_root).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_superseded_batch_returns_last_known() {
        let slow_gate = Arc::new(Notify::new());
        let query = GatedQuery {
            gates: HashMap::from([(PathBuf::from("/slow"), Arc::clone(&slow_gate))]),
            answers: HashMap::from([
                (PathBuf::from("/fast"), records("10 IDLE 8.5")),
                (PathBuf::from("/slow"), records("20 BUSY 7.6")),
            ]),
        };
        let controller = Arc::new(RefreshController::new(Arc::new(query), false));

        // Settle one batch so there is something known
        let known = controller.refresh(&[ProjectRoot::new("/fast", None)]).await;
        assert_eq!(known.len(), 1);

        let stale = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.refresh(&[ProjectRoot::new("/slow", None)]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = controller.refresh(&[ProjectRoot::new("/fast", None)]).await;
        let stale = tokio::time::timeout(Duration::from_secs(2), stale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale, known);
        assert_eq!(fresh, known);

        // The superseded query finishing late changes nothing
        slow_gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.latest(), known);
    }

    #[tokio::test]
    async fn test_supersede_without_batch_is_noop() {
        let controller = RefreshController::new(Arc::new(MockDaemonQuery::new()), false);
        controller.supersede();
        assert!(controller.refresh(&[]).await.is_empty());
    }

    #[test]
    fn test_batch_roots() {
        let roots = vec![
            ProjectRoot::new("/a", Some("8.5")),
            ProjectRoot::new("/b", Some("8.5")),
        ];
        assert_eq!(batch_roots(&roots), vec![PathBuf::from("/a")]);
    }
}
