//! Ephemeral runner job naming, lifecycle states and container-group specs.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

pub const JOB_NAME_PREFIX: &str = "infraweave-runner-job";
pub const RUNNER_CONTAINER_NAME: &str = "runner";
pub const PROVIDER_TAG: &str = "azure";
pub const DIAGNOSTICS_LOG_TYPE: &str = "ContainerInsights";
/// Container groups allowed per resource group regardless of state.
pub const CONTAINER_GROUP_CEILING: usize = 100;

/// Provisioning state reported by the orchestration backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl JobState {
    pub fn from_provisioning_state(state: &str) -> Self {
        match state {
            "Pending" | "Creating" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Terminal jobs are eligible for reclamation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Other(state) => state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub name: String,
    pub state: JobState,
}

/// `infraweave-runner-job-{principal[..8]}-{region}-{suffix}`. The principal
/// fragment is lowercased and anything outside `[a-z0-9-]` becomes `-`, as
/// container group names require.
pub fn job_name(principal: &str, region_short: &str, suffix: &str) -> String {
    let fragment: String = principal
        .chars()
        .take(8)
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    format!("{JOB_NAME_PREFIX}-{fragment}-{region_short}-{suffix}")
}

/// Eight lowercase hex characters.
pub fn random_suffix(rng: &mut impl Rng) -> String {
    format!("{:08x}", rng.gen::<u32>())
}

/// Deployment-wide settings injected into every runner job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSettings {
    pub subscription_id: String,
    pub resource_group: String,
    pub image: String,
    pub location: String,
    pub region: Option<String>,
    pub region_short: String,
    pub environment: Option<String>,
    pub tf_state_container: Option<String>,
    pub storage_account: Option<String>,
    pub user_assigned_identity: Option<String>,
    pub subnet_id: Option<String>,
    pub tf_client_id: Option<String>,
    pub tf_tenant_id: Option<String>,
    pub log_analytics_workspace_id: Option<String>,
    pub log_analytics_workspace_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerResources {
    pub cpu: f64,
    pub memory_in_gb: f64,
}

impl RunnerResources {
    /// Reads `cpu` and `memory` from the caller's payload. Numbers may arrive
    /// as JSON numbers or numeric strings.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, GatewayError> {
        Ok(Self {
            cpu: positive_number(payload, "cpu")?,
            memory_in_gb: positive_number(payload, "memory")?,
        })
    }
}

fn positive_number(payload: &Map<String, Value>, field: &str) -> Result<f64, GatewayError> {
    let value = match payload.get(field) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        None | Some(Value::Null) => return Err(GatewayError::missing_field(field)),
        Some(_) => None,
    };
    value
        .filter(|value| value.is_finite() && *value > 0.0)
        .ok_or_else(|| GatewayError::BadRequest(format!("{field} must be a positive number")))
}

// ── ARM container-group document ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerGroupSpec {
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<GroupIdentity>,
    pub properties: ContainerGroupProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupIdentity {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_assigned_identities: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupProperties {
    pub containers: Vec<ContainerDefinition>,
    pub os_type: String,
    pub restart_policy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_ids: Vec<SubnetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerDefinition {
    pub name: String,
    pub properties: ContainerProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub image: String,
    pub resources: ResourceRequirements,
    pub ports: Vec<Value>,
    pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    pub requests: ResourceRequests,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequests {
    pub cpu: f64,
    #[serde(rename = "memoryInGB")]
    pub memory_in_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub log_analytics: LogAnalyticsSink,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogAnalyticsSink {
    pub workspace_id: String,
    pub workspace_key: String,
    pub log_type: String,
}

impl ContainerGroupSpec {
    pub fn environment_value(&self, name: &str) -> Option<&str> {
        self.properties
            .containers
            .iter()
            .flat_map(|container| container.properties.environment_variables.iter())
            .find(|variable| variable.name == name)
            .and_then(|variable| variable.value.as_deref())
    }
}

/// Builds the single-container runner group for `job_name`. The caller's
/// whole payload is passed to the runner as `PAYLOAD`; the principal the job
/// acts for as `ACCOUNT_ID`.
pub fn build_runner_group(
    settings: &JobSettings,
    principal: &str,
    job_name: &str,
    payload: &Map<String, Value>,
    resources: RunnerResources,
) -> Result<ContainerGroupSpec, GatewayError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|error| GatewayError::Orchestration(format!("payload serialization: {error}")))?;

    let subscription = Some(settings.subscription_id.clone());
    let env = |name: &str, value: Option<String>| EnvironmentVariable {
        name: name.to_string(),
        value,
    };
    let fixed = |value: &str| Some(value.to_string());

    let environment_variables = vec![
        env("PAYLOAD", Some(payload_json)),
        env("REGION", settings.region.clone()),
        env("AZURE_SUBSCRIPTION_ID", subscription.clone()),
        env("INFRAWEAVE_ENV", settings.environment.clone()),
        env("PROVIDER", fixed(PROVIDER_TAG)),
        env("AZURE_CONTAINER_INSTANCE", fixed("true")),
        env("ACCOUNT_ID", Some(principal.to_string())),
        env("TF_BUCKET", settings.tf_state_container.clone()),
        env("STORAGE_ACCOUNT", settings.storage_account.clone()),
        env("RESOURCE_GROUP_NAME", Some(settings.resource_group.clone())),
        env("CONTAINER_GROUP_NAME", Some(job_name.to_string())),
        env("ARM_USE_MSI", fixed("true")),
        env("ARM_USE_AZUREAD", fixed("true")),
        env("ARM_CLIENT_ID", settings.tf_client_id.clone()),
        env("ARM_TENANT_ID", settings.tf_tenant_id.clone()),
        env("ARM_SUBSCRIPTION_ID", subscription),
    ];

    let identity = settings
        .user_assigned_identity
        .as_ref()
        .map(|resource_id| GroupIdentity {
            kind: "UserAssigned".to_string(),
            user_assigned_identities: Map::from_iter([(
                resource_id.clone(),
                Value::Object(Map::new()),
            )]),
        });

    let diagnostics = match (
        &settings.log_analytics_workspace_id,
        &settings.log_analytics_workspace_key,
    ) {
        (Some(workspace_id), Some(workspace_key)) => Some(Diagnostics {
            log_analytics: LogAnalyticsSink {
                workspace_id: workspace_id.clone(),
                workspace_key: workspace_key.clone(),
                log_type: DIAGNOSTICS_LOG_TYPE.to_string(),
            },
        }),
        _ => None,
    };

    Ok(ContainerGroupSpec {
        location: settings.location.clone(),
        identity,
        properties: ContainerGroupProperties {
            containers: vec![ContainerDefinition {
                name: RUNNER_CONTAINER_NAME.to_string(),
                properties: ContainerProperties {
                    image: settings.image.clone(),
                    resources: ResourceRequirements {
                        requests: ResourceRequests {
                            cpu: resources.cpu,
                            memory_in_gb: resources.memory_in_gb,
                        },
                    },
                    ports: Vec::new(),
                    environment_variables,
                },
            }],
            os_type: "Linux".to_string(),
            restart_policy: "Never".to_string(),
            subnet_ids: settings
                .subnet_id
                .iter()
                .map(|id| SubnetRef { id: id.clone() })
                .collect(),
            diagnostics,
        },
    })
}
