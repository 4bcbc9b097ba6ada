//! Scripted `ClusterApi` used by unit tests

use crate::client::{Cluster, ClusterApi, ClientError, ProviderSettings, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One scripted answer to `get_cluster`
#[derive(Debug, Clone)]
pub enum Step {
    State(&'static str),
    Reset,
    NotFound,
    ServerError,
}

/// Replays scripted `get_cluster` answers; the last step repeats forever.
/// Mutating calls are recorded and answered from `cluster`.
pub struct ScriptedApi {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    pub cluster: Cluster,
    pub gets: AtomicUsize,
    pub creates: Mutex<Vec<Cluster>>,
    pub updates: Mutex<Vec<Cluster>>,
    pub deletes: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            cluster: sample_cluster(),
            gets: AtomicUsize::new(0),
            creates: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
        }
        last.clone().unwrap_or(Step::NotFound)
    }
}

pub fn sample_cluster() -> Cluster {
    Cluster {
        id: Some("5cf5a45a9ccf6400e60981b6".to_string()),
        group_id: Some("5cf5a45a9ccf6400e60981b5".to_string()),
        name: Some("orders".to_string()),
        disk_size_gb: Some(40.0),
        mongo_db_version: Some("4.0.10".to_string()),
        mongo_uri: Some("mongodb://orders-shard-00-00.mongodb.net:27017".to_string()),
        num_shards: Some(1),
        paused: Some(false),
        provider_settings: Some(ProviderSettings {
            provider_name: Some("AWS".to_string()),
            instance_size_name: Some("M10".to_string()),
            region_name: Some("US_EAST_1".to_string()),
            ..Default::default()
        }),
        srv_address: Some("mongodb+srv://orders.mongodb.net".to_string()),
        state_name: Some("IDLE".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for ScriptedApi {
    async fn create_cluster(&self, _project_id: &str, cluster: &Cluster) -> Result<Cluster> {
        self.creates.lock().unwrap().push(cluster.clone());
        let mut created = self.cluster.clone();
        created.state_name = Some("CREATING".to_string());
        Ok(created)
    }

    async fn get_cluster(&self, _project_id: &str, _name: &str) -> Result<Cluster> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::State(state) => {
                let mut cluster = self.cluster.clone();
                cluster.state_name = Some(state.to_string());
                Ok(cluster)
            }
            Step::Reset => Err(ClientError::ConnectionReset(
                "read tcp: connection reset by peer".to_string(),
            )),
            Step::NotFound => Err(ClientError::NotFound("cluster not found".to_string())),
            Step::ServerError => Err(ClientError::Api {
                status: 500,
                message: "internal error".to_string(),
            }),
        }
    }

    async fn update_cluster(
        &self,
        _project_id: &str,
        _name: &str,
        cluster: &Cluster,
    ) -> Result<Cluster> {
        self.updates.lock().unwrap().push(cluster.clone());
        Ok(self.cluster.clone())
    }

    async fn delete_cluster(&self, _project_id: &str, _name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
