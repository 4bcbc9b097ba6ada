//! Cluster status polling
//!
//! Atlas provisions asynchronously: a create, update or delete call returns
//! right away and the cluster walks through transient states afterwards.
//! `StatusPoller` reads the cluster until it reaches a target state.

use crate::client::{ClientError, Cluster, ClusterApi};
use crate::cluster::ClusterState;
use crate::error::{ProviderError, Result};
use crate::translate::state_from_remote;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Default wait before the first status read
pub const DEFAULT_DELAY: Duration = Duration::from_secs(60);

/// Default minimum time between two status reads
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Timing shared by every poll loop of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub delay: Duration,
    pub min_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// What the last tick saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Pending,
    Observed(ClusterState),
    RetryTransport,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Observed(state) => write!(f, "{}", state),
            Self::RetryTransport => f.write_str("RETRY_TRANSPORT"),
        }
    }
}

/// Result of a successful poll loop
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub state: ClusterState,
    /// Last payload read; `None` when the cluster disappeared
    pub cluster: Option<Cluster>,
    pub reads: usize,
}

#[derive(Debug, Clone)]
pub struct StatusPoller {
    pending: Vec<ClusterState>,
    target: ClusterState,
    delay: Duration,
    min_interval: Duration,
    timeout: Duration,
}

impl StatusPoller {
    pub fn new(
        pending: Vec<ClusterState>,
        target: ClusterState,
        timeout: Duration,
        settings: PollSettings,
    ) -> Self {
        Self {
            pending,
            target,
            delay: settings.delay,
            min_interval: settings.min_interval,
            timeout,
        }
    }

    /// Wait for a new cluster to become IDLE
    pub fn for_create(timeout: Duration, settings: PollSettings) -> Self {
        Self::new(
            vec![
                ClusterState::Creating,
                ClusterState::Updating,
                ClusterState::Repairing,
            ],
            ClusterState::Idle,
            timeout,
            settings,
        )
    }

    /// Wait for a modified cluster to settle back to IDLE
    pub fn for_update(timeout: Duration, settings: PollSettings) -> Self {
        Self::for_create(timeout, settings)
    }

    /// Wait for a cluster to be gone
    pub fn for_delete(timeout: Duration, settings: PollSettings) -> Self {
        Self::new(
            vec![
                ClusterState::Idle,
                ClusterState::Creating,
                ClusterState::Updating,
                ClusterState::Repairing,
                ClusterState::Deleting,
            ],
            ClusterState::Deleted,
            timeout,
            settings,
        )
    }

    pub fn target(&self) -> ClusterState {
        self.target
    }

    /// Poll `name` until it reaches the target state or the timeout elapses
    pub async fn wait(
        &self,
        client: &dyn ClusterApi,
        project_id: &str,
        name: &str,
    ) -> Result<PollOutcome> {
        // A timeout too large to represent means no deadline at all
        let deadline = Instant::now().checked_add(self.timeout);
        let mut last = Observation::Pending;
        let mut reads = 0;

        tracing::debug!(
            cluster = %name,
            target = %self.target,
            delay = ?self.delay,
            "waiting before first status read"
        );
        sleep(self.delay.min(self.timeout)).await;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ProviderError::Timeout {
                    target: self.target.to_string(),
                    last_state: last.to_string(),
                    timeout: self.timeout,
                });
            }

            reads += 1;
            match client.get_cluster(project_id, name).await {
                Err(err) if err.is_transient() => {
                    tracing::warn!(cluster = %name, error = %err, "transient error reading cluster, retrying");
                    last = Observation::RetryTransport;
                }
                Err(ClientError::NotFound(_)) if self.target == ClusterState::Deleted => {
                    tracing::debug!(cluster = %name, "cluster no longer exists");
                    return Ok(PollOutcome {
                        state: ClusterState::Deleted,
                        cluster: None,
                        reads,
                    });
                }
                Err(err) => {
                    tracing::error!(cluster = %name, error = %err, "error reading MongoDB cluster");
                    return Err(err.into());
                }
                Ok(cluster) => {
                    let state = state_from_remote(&cluster)?;
                    tracing::debug!(cluster = %name, state = %state, "status for MongoDB cluster");

                    if state == self.target {
                        return Ok(PollOutcome {
                            state,
                            cluster: Some(cluster),
                            reads,
                        });
                    }
                    if !self.pending.contains(&state) {
                        return Err(ProviderError::UnexpectedState {
                            state: state.to_string(),
                            target: self.target.to_string(),
                        });
                    }
                    last = Observation::Observed(state);
                }
            }

            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        continue;
                    }
                    self.min_interval.min(d - now)
                }
                None => self.min_interval,
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedApi, Step};

    const PROJECT: &str = "5cf5a45a9ccf6400e60981b5";

    fn settings() -> PollSettings {
        PollSettings::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_idle_after_three_reads() {
        let api = ScriptedApi::new(vec![
            Step::State("CREATING"),
            Step::State("CREATING"),
            Step::State("IDLE"),
        ]);
        let poller = StatusPoller::for_create(Duration::from_secs(3600), settings());

        let outcome = poller.wait(&api, PROJECT, "orders").await.unwrap();

        assert_eq!(outcome.state, ClusterState::Idle);
        assert_eq!(outcome.reads, 3);
        assert_eq!(api.get_count(), 3);
        assert!(outcome.cluster.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_initial_delay_and_interval() {
        let api = ScriptedApi::new(vec![Step::State("UPDATING"), Step::State("IDLE")]);
        let poller = StatusPoller::for_update(Duration::from_secs(3600), settings());
        let start = Instant::now();

        poller.wait(&api, PROJECT, "orders").await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= DEFAULT_DELAY + DEFAULT_MIN_INTERVAL);
        assert!(elapsed < DEFAULT_DELAY + DEFAULT_MIN_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_reset_polls_until_timeout() {
        let api = ScriptedApi::new(vec![Step::Reset]);
        let timeout = Duration::from_secs(600);
        let poller = StatusPoller::for_create(timeout, settings());
        let start = Instant::now();

        let err = poller.wait(&api, PROJECT, "orders").await.unwrap_err();

        assert!(start.elapsed() >= timeout);
        match err {
            ProviderError::Timeout { last_state, target, .. } => {
                assert_eq!(last_state, "RETRY_TRANSPORT");
                assert_eq!(target, "IDLE");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // 60s delay, then one read every 30s until the 600s budget runs out
        assert_eq!(api.get_count(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_last_observed_state() {
        let api = ScriptedApi::new(vec![Step::State("REPAIRING")]);
        let poller = StatusPoller::for_update(Duration::from_secs(120), settings());

        let err = poller.wait(&api, PROJECT, "orders").await.unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Timeout { ref last_state, .. } if last_state == "REPAIRING"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_completes_delete() {
        let api = ScriptedApi::new(vec![
            Step::State("DELETING"),
            Step::Reset,
            Step::NotFound,
        ]);
        let poller = StatusPoller::for_delete(Duration::from_secs(3600), settings());

        let outcome = poller.wait(&api, PROJECT, "orders").await.unwrap();

        assert_eq!(outcome.state, ClusterState::Deleted);
        assert!(outcome.cluster.is_none());
        assert_eq!(outcome.reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fails_create() {
        let api = ScriptedApi::new(vec![Step::State("CREATING"), Step::NotFound]);
        let poller = StatusPoller::for_create(Duration::from_secs(3600), settings());

        let err = poller.wait(&api, PROJECT, "orders").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(api.get_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_fatal() {
        let api = ScriptedApi::new(vec![Step::ServerError]);
        let poller = StatusPoller::for_delete(Duration::from_secs(3600), settings());

        let err = poller.wait(&api, PROJECT, "orders").await.unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Client(ClientError::Api { status: 500, .. })
        ));
        assert_eq!(api.get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state_is_fatal() {
        let api = ScriptedApi::new(vec![Step::State("DELETING")]);
        let poller = StatusPoller::for_create(Duration::from_secs(3600), settings());

        let err = poller.wait(&api, PROJECT, "orders").await.unwrap_err();

        assert!(matches!(
            err,
            ProviderError::UnexpectedState { ref state, .. } if state == "DELETING"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_is_pending_while_deleting() {
        let api = ScriptedApi::new(vec![
            Step::State("IDLE"),
            Step::State("DELETING"),
            Step::NotFound,
        ]);
        let poller = StatusPoller::for_delete(Duration::from_secs(3600), settings());

        let outcome = poller.wait(&api, PROJECT, "orders").await.unwrap();
        assert_eq!(outcome.state, ClusterState::Deleted);
        assert_eq!(poller.target(), ClusterState::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_waits_without_deadline() {
        let api = ScriptedApi::new(vec![Step::State("CREATING"), Step::State("IDLE")]);
        let timeout = crate::config::parse_duration("18000000000000000000s").unwrap();
        let poller = StatusPoller::for_create(timeout, settings());

        let outcome = poller.wait(&api, PROJECT, "orders").await.unwrap();

        assert_eq!(outcome.state, ClusterState::Idle);
        assert_eq!(outcome.reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_timeout_still_polls() {
        let api = ScriptedApi::new(vec![Step::Reset, Step::State("IDLE")]);
        let poller = StatusPoller::for_update(Duration::MAX, settings());

        let outcome = poller.wait(&api, PROJECT, "orders").await.unwrap();
        assert_eq!(outcome.reads, 2);
    }
}
