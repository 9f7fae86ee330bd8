#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use buildcause::build_cause::BuildCause;
use buildcause::config::ConfigFile;
use buildcause::errors::Result;
use buildcause::material::{
    ExternalsSource, Material, MaterialRevision, MaterialRevisions, Modification, NoExternals,
};
use buildcause::memory::{InMemoryRevisionStore, InMemoryScheduleQueue, RecordingHealthSink};
use buildcause::poll::{DependencyPoller, PollerRegistry};
use buildcause::ports::RevisionStore;
use buildcause::producer::{
    BuildCauseProducer, Collaborators, ProduceOutcome, ProducerSettings, ResultSink,
};
use buildcause::secrets::MapSecretResolver;

use crate::fake_poller::FakePoller;

/// A producer wired to in-memory collaborators and a [`FakePoller`].
pub struct Harness {
    pub config: Arc<ConfigFile>,
    pub store: Arc<InMemoryRevisionStore>,
    pub queue: Arc<InMemoryScheduleQueue>,
    pub health: Arc<RecordingHealthSink>,
    pub poller: Arc<FakePoller>,
    pub producer: Arc<BuildCauseProducer>,
}

pub struct HarnessOptions {
    pub settings: Option<ProducerSettings>,
    pub secrets: MapSecretResolver,
    pub externals: Arc<dyn ExternalsSource>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            settings: None,
            secrets: MapSecretResolver::new(),
            externals: Arc::new(NoExternals),
        }
    }
}

impl Harness {
    pub fn new(config: ConfigFile) -> Self {
        Self::with_options(config, HarnessOptions::default())
    }

    pub fn with_options(config: ConfigFile, options: HarnessOptions) -> Self {
        let settings = options
            .settings
            .unwrap_or_else(|| config.producer_settings());
        let config = Arc::new(config);
        let store = Arc::new(InMemoryRevisionStore::new());
        let queue = Arc::new(InMemoryScheduleQueue::new());
        let health = Arc::new(RecordingHealthSink::new());
        let poller = Arc::new(FakePoller::new());

        let registry = PollerRegistry::new()
            .with_scm(poller.clone())
            .with_package(poller.clone())
            .with_plugin(poller.clone())
            .with_dependency(Arc::new(DependencyPoller::new(store.clone())));

        let ports = Collaborators {
            config: config.clone(),
            poller: Arc::new(registry),
            store: store.clone(),
            secrets: Arc::new(options.secrets),
            authorizer: config.clone(),
            queue: queue.clone(),
            health: health.clone(),
            externals: options.externals,
        };

        Self {
            producer: BuildCauseProducer::new(ports, settings),
            config,
            store,
            queue,
            health,
            poller,
        }
    }

    /// Record modifications as if a previous poll had seen them.
    pub fn record(&self, material: &Material, modifications: &[Modification]) {
        self.store
            .record(material, modifications)
            .expect("record modifications");
    }

    /// Record run `counter` of `pipeline` built from the given revisions, and
    /// its `stage` passing at `at`.
    pub fn record_run(
        &self,
        pipeline: &str,
        counter: u64,
        stage: &str,
        revisions: &[(&Material, &str)],
        at: DateTime<Utc>,
    ) -> Modification {
        let revisions = self.revisions(revisions).expect("known revisions");
        self.store
            .record_pipeline_run(pipeline, counter, stage, BuildCause::automatic(revisions), at)
            .expect("record pipeline run")
    }

    /// Revision set referencing already recorded modifications.
    pub fn revisions(&self, revisions: &[(&Material, &str)]) -> Result<MaterialRevisions> {
        let mut set = MaterialRevisions::new();
        for (material, revision) in revisions {
            let modification = self
                .store
                .find_modification(&material.fingerprint(), revision)?
                .ok_or_else(|| anyhow::anyhow!("unknown revision {revision}"))?;
            set.push(MaterialRevision::new((*material).clone(), modification))?;
        }
        Ok(set)
    }
}

/// Result sink that keeps every reported result.
#[derive(Default)]
pub struct RecordingResultSink {
    results: Mutex<Vec<(String, std::result::Result<ProduceOutcome, String>)>>,
}

impl RecordingResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(String, std::result::Result<ProduceOutcome, String>)> {
        self.results.lock().unwrap().clone()
    }
}

impl ResultSink for RecordingResultSink {
    fn report(&self, pipeline: &str, result: &Result<ProduceOutcome>) {
        let entry = match result {
            Ok(outcome) => Ok(outcome.clone()),
            Err(err) => Err(err.to_string()),
        };
        self.results
            .lock()
            .unwrap()
            .push((pipeline.to_string(), entry));
    }
}
