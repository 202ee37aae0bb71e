//! Recording fakes for handler unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use gateway_core::job_spec::{ContainerGroupSpec, JobSummary};
use gateway_core::registry::ResourceRegistry;
use gateway_core::signing::{SasWindow, UserDelegationKey};
use gateway_core::GatewayError;
use serde_json::{Map, Value};

use super::{Backends, Gateway};
use crate::adapters::blob_store::{
    BlobContent, BlobCredential, BlobLocation, BlobStore, PutOutcome, SourceFetcher, WriteMode,
};
use crate::adapters::broker::{ScopedTokens, TokenBroker};
use crate::adapters::document_store::{DocumentStore, QueryScope, StoreCredential};
use crate::adapters::log_analytics::{LogQuery, LogTable};
use crate::adapters::orchestrator::{JobGroup, JobOrchestrator};
use crate::config::GatewayConfig;

/// Shared call journal; every fake appends one line per call.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("poisoned mutex").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("poisoned mutex").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

pub struct FakeBroker {
    pub journal: Journal,
    pub failure: Option<GatewayError>,
}

impl TokenBroker for FakeBroker {
    fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError> {
        self.journal.record(format!("broker:{principal}"));
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let tokens = ["tbl-deployments", "tbl-events", "workload-modules"]
            .into_iter()
            .map(|resource| (resource.to_string(), format!("sig-{principal}-{resource}")))
            .collect::<BTreeMap<_, _>>();
        Ok(ScopedTokens::new(tokens))
    }
}

pub struct FakeDocuments {
    pub journal: Journal,
    /// Documents whose `id` is listed here are rejected on write.
    pub rejected_ids: BTreeSet<String>,
}

impl DocumentStore for FakeDocuments {
    fn query(
        &self,
        container: &str,
        query: &str,
        scope: &QueryScope,
        credential: &StoreCredential,
    ) -> Result<Vec<Value>, GatewayError> {
        self.journal
            .record(format!("query:{container}:{scope:?}:{credential:?}:{query}"));
        Ok(vec![Value::String(container.to_string())])
    }

    fn upsert(
        &self,
        container: &str,
        document: &Map<String, Value>,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<Value, GatewayError> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.journal
            .record(format!("upsert:{container}:{partition_key}:{credential:?}:{id}"));
        if self.rejected_ids.contains(&id) {
            return Err(GatewayError::Store(format!("conflict on {id}")));
        }
        Ok(Value::Object(document.clone()))
    }

    fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<(), GatewayError> {
        self.journal
            .record(format!("delete:{container}:{partition_key}:{credential:?}:{id}"));
        if self.rejected_ids.contains(id) {
            return Err(GatewayError::Store(format!("not found: {id}")));
        }
        Ok(())
    }
}

pub struct FakeBlobs {
    pub journal: Journal,
    pub objects: Mutex<BTreeMap<BlobLocation, Vec<u8>>>,
}

impl BlobStore for FakeBlobs {
    fn exists(
        &self,
        location: &BlobLocation,
        credential: &BlobCredential,
    ) -> Result<bool, GatewayError> {
        self.journal.record(format!(
            "exists:{}/{}/{}:{credential:?}",
            location.account, location.container, location.blob
        ));
        Ok(self
            .objects
            .lock()
            .expect("poisoned mutex")
            .contains_key(location))
    }

    fn put(
        &self,
        location: &BlobLocation,
        content: BlobContent,
        mode: WriteMode,
        credential: &BlobCredential,
    ) -> Result<PutOutcome, GatewayError> {
        self.journal.record(format!(
            "put:{}/{}/{}:{mode:?}:{credential:?}",
            location.account, location.container, location.blob
        ));
        let mut objects = self.objects.lock().expect("poisoned mutex");
        if mode == WriteMode::CreateIfAbsent && objects.contains_key(location) {
            return Ok(PutOutcome::AlreadyExists);
        }
        objects.insert(location.clone(), content.into_bytes()?);
        Ok(PutOutcome::Written)
    }

    fn user_delegation_key(
        &self,
        account: &str,
        window: SasWindow,
    ) -> Result<UserDelegationKey, GatewayError> {
        self.journal.record(format!("delegation_key:{account}"));
        Ok(UserDelegationKey {
            signed_oid: "oid".to_string(),
            signed_tid: "tid".to_string(),
            signed_start: gateway_core::signing::sas_timestamp(window.start),
            signed_expiry: gateway_core::signing::sas_timestamp(window.expiry),
            signed_service: "b".to_string(),
            signed_version: "2020-12-06".to_string(),
            value: "c2VjcmV0LWtleQ==".to_string(),
        })
    }
}

pub struct FakeFetcher {
    pub journal: Journal,
}

impl SourceFetcher for FakeFetcher {
    fn fetch(&self, source_url: &str) -> Result<BlobContent, GatewayError> {
        self.journal.record(format!("fetch:{source_url}"));
        Ok(BlobContent::from_bytes(source_url.as_bytes().to_vec()))
    }
}

pub struct FakeOrchestrator {
    pub journal: Journal,
    pub jobs: Vec<JobSummary>,
    pub failing_deletes: BTreeSet<String>,
    pub fail_listing: bool,
}

impl JobOrchestrator for FakeOrchestrator {
    fn list_jobs(&self, group: &JobGroup) -> Result<Vec<JobSummary>, GatewayError> {
        self.journal.record(format!("list:{}", group.resource_group));
        if self.fail_listing {
            return Err(GatewayError::Orchestration("list refused".to_string()));
        }
        Ok(self.jobs.clone())
    }

    fn delete_job(&self, _group: &JobGroup, name: &str) -> Result<(), GatewayError> {
        self.journal.record(format!("delete_job:{name}"));
        if self.failing_deletes.contains(name) {
            return Err(GatewayError::Orchestration(format!("cannot delete {name}")));
        }
        Ok(())
    }

    fn create_job(
        &self,
        _group: &JobGroup,
        name: &str,
        spec: &ContainerGroupSpec,
    ) -> Result<(), GatewayError> {
        self.journal.record(format!(
            "create_job:{name}:{}",
            spec.environment_value("CONTAINER_GROUP_NAME").unwrap_or_default()
        ));
        Ok(())
    }
}

pub struct FakeLogs {
    pub journal: Journal,
    pub table: LogTable,
}

impl LogQuery for FakeLogs {
    fn query(
        &self,
        workspace_id: &str,
        query: &str,
        timespan: &str,
    ) -> Result<LogTable, GatewayError> {
        self.journal
            .record(format!("logs:{workspace_id}:{timespan}:{query}"));
        Ok(self.table.clone())
    }
}

pub fn registry() -> ResourceRegistry {
    let pairs = [
        ("DEPLOYMENTS_TABLE_NAME", "tbl-deployments"),
        ("EVENTS_TABLE_NAME", "tbl-events"),
        ("MODULES_TABLE_NAME", "tbl-modules"),
        ("MODULE_S3_BUCKET", "workload-modules"),
        ("PROVIDERS_S3_BUCKET", "public-providers"),
    ];
    ResourceRegistry::from_lookup(|key| {
        pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
}

pub fn config() -> GatewayConfig {
    let pairs = [
        ("AZURE_SUBSCRIPTION_ID", "sub-0001-aaaa"),
        ("STORAGE_ACCOUNT_NAME", "privateacct"),
        ("PUBLIC_STORAGE_ACCOUNT_NAME", "publicacct"),
        ("RESOURCE_GROUP_NAME", "rg-runners"),
        ("IMAGE", "runner:latest"),
        ("LOCATION", "westeurope"),
        ("REGION", "westeurope"),
        ("REGION_SHORT", "weu"),
        ("LOG_ANALYTICS_WORKSPACE_ID", "workspace-1"),
    ];
    GatewayConfig::from_lookup(|key| {
        pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
}

/// Fakes assembled into a gateway, with knobs for the failure cases.
#[derive(Default)]
pub struct GatewayBuilder {
    pub broker_failure: Option<GatewayError>,
    pub rejected_ids: BTreeSet<String>,
    pub jobs: Vec<JobSummary>,
    pub failing_deletes: BTreeSet<String>,
    pub fail_listing: bool,
    pub log_table: LogTable,
}

impl GatewayBuilder {
    pub fn build(self) -> (Gateway, Journal) {
        let journal = Journal::default();
        let backends = Backends {
            broker: Box::new(FakeBroker {
                journal: journal.clone(),
                failure: self.broker_failure,
            }),
            documents: Box::new(FakeDocuments {
                journal: journal.clone(),
                rejected_ids: self.rejected_ids,
            }),
            blobs: Box::new(FakeBlobs {
                journal: journal.clone(),
                objects: Mutex::new(BTreeMap::new()),
            }),
            fetcher: Box::new(FakeFetcher {
                journal: journal.clone(),
            }),
            orchestrator: Box::new(FakeOrchestrator {
                journal: journal.clone(),
                jobs: self.jobs,
                failing_deletes: self.failing_deletes,
                fail_listing: self.fail_listing,
            }),
            logs: Box::new(FakeLogs {
                journal: journal.clone(),
                table: self.log_table,
            }),
        };
        (Gateway::new(registry(), config(), backends), journal)
    }
}

pub fn gateway() -> (Gateway, Journal) {
    GatewayBuilder::default().build()
}
