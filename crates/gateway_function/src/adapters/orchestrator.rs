//! Container-group orchestration (resource-manager REST).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gateway_core::job_spec::{ContainerGroupSpec, JobState, JobSummary};
use gateway_core::GatewayError;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use super::credential::{AccessTokenSource, MANAGEMENT_RESOURCE};
use super::{describe_rejection, http_client, BACKEND_TIMEOUT};

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const API_VERSION: &str = "2023-05-01";
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DELETE_POLL_LIMIT: u32 = 60;

/// Resource group whose container groups share one capacity ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGroup {
    pub subscription_id: String,
    pub resource_group: String,
}

pub trait JobOrchestrator: Send + Sync {
    fn list_jobs(&self, group: &JobGroup) -> Result<Vec<JobSummary>, GatewayError>;

    /// Deletes `name` and returns once the backend no longer reports it.
    fn delete_job(&self, group: &JobGroup, name: &str) -> Result<(), GatewayError>;

    /// Submits the job; returns on acceptance, not completion.
    fn create_job(
        &self,
        group: &JobGroup,
        name: &str,
        spec: &ContainerGroupSpec,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    value: Vec<ListedGroup>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedGroup {
    name: String,
    #[serde(default)]
    properties: ListedProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedProperties {
    provisioning_state: Option<String>,
}

impl From<ListedGroup> for JobSummary {
    fn from(group: ListedGroup) -> Self {
        Self {
            name: group.name,
            state: JobState::from_provisioning_state(
                group
                    .properties
                    .provisioning_state
                    .as_deref()
                    .unwrap_or_default(),
            ),
        }
    }
}

pub struct AciRestOrchestrator {
    client: Client,
    identity: Arc<dyn AccessTokenSource>,
    poll_interval: Duration,
    poll_limit: u32,
}

impl AciRestOrchestrator {
    pub fn new(identity: Arc<dyn AccessTokenSource>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(BACKEND_TIMEOUT).map_err(GatewayError::Orchestration)?,
            identity,
            poll_interval: DELETE_POLL_INTERVAL,
            poll_limit: DELETE_POLL_LIMIT,
        })
    }

    fn groups_url(group: &JobGroup) -> String {
        format!(
            "{MANAGEMENT_ENDPOINT}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups",
            group.subscription_id, group.resource_group
        )
    }

    fn group_url(group: &JobGroup, name: &str) -> String {
        format!("{}/{name}?api-version={API_VERSION}", Self::groups_url(group))
    }

    fn bearer(&self) -> Result<String, GatewayError> {
        self.identity.access_token(MANAGEMENT_RESOURCE)
    }
}

fn transport(error: reqwest::Error) -> GatewayError {
    GatewayError::Orchestration(error.to_string())
}

impl JobOrchestrator for AciRestOrchestrator {
    fn list_jobs(&self, group: &JobGroup) -> Result<Vec<JobSummary>, GatewayError> {
        let token = self.bearer()?;
        let mut next = Some(format!("{}?api-version={API_VERSION}", Self::groups_url(group)));
        let mut jobs = Vec::new();

        while let Some(url) = next.take() {
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .send()
                .map_err(transport)?;
            if !response.status().is_success() {
                return Err(GatewayError::Orchestration(describe_rejection(response)));
            }
            let page: ListPage = response.json().map_err(|error| {
                GatewayError::Orchestration(format!("invalid container group list: {error}"))
            })?;
            jobs.extend(page.value.into_iter().map(JobSummary::from));
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(jobs)
    }

    fn delete_job(&self, group: &JobGroup, name: &str) -> Result<(), GatewayError> {
        let token = self.bearer()?;
        let url = Self::group_url(group, name);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(()),
            status if status.is_success() => {}
            _ => return Err(GatewayError::Orchestration(describe_rejection(response))),
        }

        for _ in 0..self.poll_limit {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .map_err(transport)?;
            match deletion_progress(response.status()) {
                DeletionProgress::Gone => return Ok(()),
                DeletionProgress::Pending => thread::sleep(self.poll_interval),
                DeletionProgress::Rejected => {
                    return Err(GatewayError::Orchestration(describe_rejection(response)))
                }
            }
        }
        Err(GatewayError::Orchestration(format!(
            "deletion of {name} did not complete"
        )))
    }

    fn create_job(
        &self,
        group: &JobGroup,
        name: &str,
        spec: &ContainerGroupSpec,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .put(Self::group_url(group, name))
            .bearer_auth(self.bearer()?)
            .json(spec)
            .send()
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(GatewayError::Orchestration(describe_rejection(response)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeletionProgress {
    Gone,
    Pending,
    Rejected,
}

/// Reading of one status poll after a delete. Client errors other than 404
/// will not resolve by waiting; server errors are retried.
fn deletion_progress(status: StatusCode) -> DeletionProgress {
    match status {
        StatusCode::NOT_FOUND => DeletionProgress::Gone,
        status if status.is_client_error() => DeletionProgress::Rejected,
        _ => DeletionProgress::Pending,
    }
}
