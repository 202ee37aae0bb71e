//! In-memory backends shared by the integration tests.
//!
//! Each backend is a cheap clone over shared state, so a test keeps one
//! handle for inspection and hands the other to the gateway.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gateway_core::job_spec::{ContainerGroupSpec, JobSummary};
use gateway_core::registry::ResourceRegistry;
use gateway_core::signing::{SasWindow, UserDelegationKey};
use gateway_core::GatewayError;
use gateway_function::adapters::blob_store::{
    BlobContent, BlobCredential, BlobLocation, BlobStore, PutOutcome, SourceFetcher, WriteMode,
};
use gateway_function::adapters::broker::{ScopedTokens, TokenBroker};
use gateway_function::adapters::document_store::{DocumentStore, QueryScope, StoreCredential};
use gateway_function::adapters::log_analytics::{LogQuery, LogTable};
use gateway_function::adapters::orchestrator::{JobGroup, JobOrchestrator};
use gateway_function::config::GatewayConfig;
use gateway_function::handlers::{handle_api_request, ApiResponse, Backends, Gateway};
use serde_json::{Map, Value};

pub const SUBSCRIPTION: &str = "0f3c9a12-aaaa-bbbb-cccc-1234567890ab";

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |key| {
        pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    }
}

pub fn registry() -> ResourceRegistry {
    ResourceRegistry::from_lookup(lookup(&[
        ("EVENTS_TABLE_NAME", "events-weu"),
        ("MODULES_TABLE_NAME", "modules-weu"),
        ("POLICIES_TABLE_NAME", "policies-weu"),
        ("DEPLOYMENTS_TABLE_NAME", "deployments-weu"),
        ("CHANGE_RECORDS_TABLE_NAME", "change-records-weu"),
        ("CONFIG_TABLE_NAME", "config-weu"),
        ("MODULE_S3_BUCKET", "workload-modules"),
        ("POLICY_S3_BUCKET", "workload-policies"),
        ("CHANGE_RECORD_S3_BUCKET", "workload-change-records"),
        ("PROVIDERS_S3_BUCKET", "providers"),
    ]))
}

pub fn config() -> GatewayConfig {
    GatewayConfig::from_lookup(lookup(&[
        ("AZURE_SUBSCRIPTION_ID", SUBSCRIPTION),
        ("PRINCIPAL_HEADER", "X-Tenant-Principal"),
        ("STORAGE_ACCOUNT_NAME", "iwprivate"),
        ("PUBLIC_STORAGE_ACCOUNT_NAME", "iwpublic"),
        ("RESOURCE_GROUP_NAME", "infraweave-runners"),
        ("IMAGE", "registry.example/runner:1.4"),
        ("REGION", "westeurope"),
        ("REGION_SHORT", "weu"),
        ("LOCATION", "westeurope"),
        ("INFRAWEAVE_ENV", "test"),
        ("TF_STATE_CONTAINER", "tfstate"),
        ("LOG_ANALYTICS_WORKSPACE_ID", "workspace-1"),
    ]))
}

/// Issues a token for every resource, or fails every call with `failure`.
#[derive(Clone, Default)]
pub struct StaticBroker {
    pub failure: Option<GatewayError>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl TokenBroker for StaticBroker {
    fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError> {
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push(principal.to_string());
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(ScopedTokens::new(BTreeMap::new()))
    }

    fn scoped_token(&self, principal: &str, resource: &str) -> Result<String, GatewayError> {
        self.obtain(principal)?;
        Ok(format!("token:{principal}:{resource}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub partition: String,
    pub document: Value,
}

/// Partitioned document store keyed by `(container, id)`.
#[derive(Clone, Default)]
pub struct InMemoryDocuments {
    pub documents: Arc<Mutex<BTreeMap<(String, String), StoredDocument>>>,
    pub rejected_ids: Arc<Mutex<BTreeSet<String>>>,
}

impl InMemoryDocuments {
    pub fn seed(&self, container: &str, partition: &str, document: Value) {
        let id = document["id"].as_str().unwrap_or_default().to_string();
        self.documents.lock().expect("poisoned mutex").insert(
            (container.to_string(), id),
            StoredDocument {
                partition: partition.to_string(),
                document,
            },
        );
    }

    pub fn reject(&self, id: &str) {
        self.rejected_ids
            .lock()
            .expect("poisoned mutex")
            .insert(id.to_string());
    }

    pub fn count(&self, container: &str) -> usize {
        self.documents
            .lock()
            .expect("poisoned mutex")
            .keys()
            .filter(|(stored_in, _)| stored_in == container)
            .count()
    }

    fn check(&self, id: &str) -> Result<(), GatewayError> {
        if self.rejected_ids.lock().expect("poisoned mutex").contains(id) {
            return Err(GatewayError::Store(format!("write rejected for {id}")));
        }
        Ok(())
    }
}

impl DocumentStore for InMemoryDocuments {
    fn query(
        &self,
        container: &str,
        _query: &str,
        scope: &QueryScope,
        _credential: &StoreCredential,
    ) -> Result<Vec<Value>, GatewayError> {
        Ok(self
            .documents
            .lock()
            .expect("poisoned mutex")
            .iter()
            .filter(|((stored_in, _), _)| stored_in == container)
            .filter(|(_, stored)| match scope {
                QueryScope::Partition(partition) => &stored.partition == partition,
                QueryScope::CrossPartition => true,
            })
            .map(|(_, stored)| stored.document.clone())
            .collect())
    }

    fn upsert(
        &self,
        container: &str,
        document: &Map<String, Value>,
        partition_key: &str,
        _credential: &StoreCredential,
    ) -> Result<Value, GatewayError> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.check(&id)?;
        let stored = Value::Object(document.clone());
        self.seed(container, partition_key, stored.clone());
        Ok(stored)
    }

    fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
        _credential: &StoreCredential,
    ) -> Result<(), GatewayError> {
        self.check(id)?;
        let mut documents = self.documents.lock().expect("poisoned mutex");
        let key = (container.to_string(), id.to_string());
        match documents.get(&key) {
            Some(stored) if stored.partition == partition_key => {
                documents.remove(&key);
                Ok(())
            }
            _ => Err(GatewayError::Store(format!("{id} not found"))),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBlobs {
    pub objects: Arc<Mutex<BTreeMap<BlobLocation, Vec<u8>>>>,
    /// Existence checks answer "absent" regardless of contents, as when a
    /// concurrent writer lands between the check and the write.
    pub stale_exists: Arc<AtomicBool>,
}

impl InMemoryBlobs {
    pub fn store(&self, account: &str, container: &str, blob: &str, content: &[u8]) {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .insert(BlobLocation::new(account, container, blob), content.to_vec());
    }

    pub fn get(&self, account: &str, container: &str, blob: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .get(&BlobLocation::new(account, container, blob))
            .cloned()
    }
}

impl BlobStore for InMemoryBlobs {
    fn exists(
        &self,
        location: &BlobLocation,
        _credential: &BlobCredential,
    ) -> Result<bool, GatewayError> {
        if self.stale_exists.load(Ordering::SeqCst) {
            return Ok(false);
        }
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
        _credential: &BlobCredential,
    ) -> Result<PutOutcome, GatewayError> {
        let mut objects = self.objects.lock().expect("poisoned mutex");
        if mode == WriteMode::CreateIfAbsent && objects.contains_key(location) {
            return Ok(PutOutcome::AlreadyExists);
        }
        objects.insert(location.clone(), content.into_bytes()?);
        Ok(PutOutcome::Written)
    }

    fn user_delegation_key(
        &self,
        _account: &str,
        _window: SasWindow,
    ) -> Result<UserDelegationKey, GatewayError> {
        Ok(UserDelegationKey {
            signed_oid: "00000000-0000-0000-0000-000000000001".to_string(),
            signed_tid: "00000000-0000-0000-0000-000000000002".to_string(),
            signed_start: "2026-01-01T00:00:00Z".to_string(),
            signed_expiry: "2026-01-02T00:00:00Z".to_string(),
            signed_service: "b".to_string(),
            signed_version: "2020-12-06".to_string(),
            value: "c2lnbmluZy1rZXk=".to_string(),
        })
    }
}

#[derive(Clone, Default)]
pub struct CountingFetcher {
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl SourceFetcher for CountingFetcher {
    fn fetch(&self, source_url: &str) -> Result<BlobContent, GatewayError> {
        self.fetched
            .lock()
            .expect("poisoned mutex")
            .push(source_url.to_string());
        let body = format!("contents of {source_url}").into_bytes();
        Ok(BlobContent::from_reader(Cursor::new(body), None))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorCall {
    List,
    Delete(String),
    Create(String, Box<ContainerGroupSpec>),
}

#[derive(Clone, Default)]
pub struct RecordingOrchestrator {
    pub jobs: Arc<Mutex<Vec<JobSummary>>>,
    pub calls: Arc<Mutex<Vec<OrchestratorCall>>>,
}

impl RecordingOrchestrator {
    pub fn calls(&self) -> Vec<OrchestratorCall> {
        self.calls.lock().expect("poisoned mutex").clone()
    }
}

impl JobOrchestrator for RecordingOrchestrator {
    fn list_jobs(&self, _group: &JobGroup) -> Result<Vec<JobSummary>, GatewayError> {
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push(OrchestratorCall::List);
        Ok(self.jobs.lock().expect("poisoned mutex").clone())
    }

    fn delete_job(&self, _group: &JobGroup, name: &str) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push(OrchestratorCall::Delete(name.to_string()));
        self.jobs
            .lock()
            .expect("poisoned mutex")
            .retain(|job| job.name != name);
        Ok(())
    }

    fn create_job(
        &self,
        _group: &JobGroup,
        name: &str,
        spec: &ContainerGroupSpec,
    ) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push(OrchestratorCall::Create(name.to_string(), Box::new(spec.clone())));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct StaticLogs {
    pub table: LogTable,
}

impl LogQuery for StaticLogs {
    fn query(
        &self,
        _workspace_id: &str,
        _query: &str,
        _timespan: &str,
    ) -> Result<LogTable, GatewayError> {
        Ok(self.table.clone())
    }
}

/// Gateway over in-memory backends plus handles to inspect them.
pub struct Harness {
    pub gateway: Gateway,
    pub broker: StaticBroker,
    pub documents: InMemoryDocuments,
    pub blobs: InMemoryBlobs,
    pub fetcher: CountingFetcher,
    pub orchestrator: RecordingOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_broker(StaticBroker::default())
    }

    pub fn with_broker(broker: StaticBroker) -> Self {
        Self::with_logs(broker, StaticLogs::default())
    }

    pub fn with_logs(broker: StaticBroker, logs: StaticLogs) -> Self {
        let documents = InMemoryDocuments::default();
        let blobs = InMemoryBlobs::default();
        let fetcher = CountingFetcher::default();
        let orchestrator = RecordingOrchestrator::default();
        let backends = Backends {
            broker: Box::new(broker.clone()),
            documents: Box::new(documents.clone()),
            blobs: Box::new(blobs.clone()),
            fetcher: Box::new(fetcher.clone()),
            orchestrator: Box::new(orchestrator.clone()),
            logs: Box::new(logs),
        };
        Self {
            gateway: Gateway::new(registry(), config(), backends),
            broker,
            documents,
            blobs,
            fetcher,
            orchestrator,
        }
    }

    pub fn call(&self, body: Value) -> ApiResponse {
        handle_api_request(&self.gateway, body.to_string().as_bytes(), None)
    }

    pub fn call_as(&self, principal: &str, body: Value) -> ApiResponse {
        handle_api_request(
            &self.gateway,
            body.to_string().as_bytes(),
            Some(principal.to_string()),
        )
    }
}
