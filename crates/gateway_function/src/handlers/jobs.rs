//! Runner job launch with pre-launch reclamation of finished jobs.
//!
//! The container-group ceiling counts groups in every state, so finished
//! groups are deleted before each launch. Reclamation is best effort and not
//! serialized across concurrent launches; the ceiling is a soft bound.

use gateway_core::contract::RunnerStartedResponse;
use gateway_core::job_spec::{build_runner_group, job_name, random_suffix, RunnerResources};
use gateway_core::GatewayError;
use serde_json::{Map, Value};

use super::Gateway;
use crate::adapters::orchestrator::JobGroup;

pub const RUNNER_STARTED_STATUS: &str = "ACI task started successfully.";

impl Gateway {
    /// Submits a runner job and returns its generated name as soon as the
    /// orchestrator accepts it. Job progress is observed through its logs.
    pub fn start_runner(
        &self,
        payload: Map<String, Value>,
        principal: &str,
    ) -> Result<RunnerStartedResponse, GatewayError> {
        let settings = self.config.job_settings()?;
        let resources = RunnerResources::from_payload(&payload)?;
        let group = JobGroup {
            subscription_id: settings.subscription_id.clone(),
            resource_group: settings.resource_group.clone(),
        };

        self.reclaim_finished_jobs(&group);

        let name = job_name(
            principal,
            &settings.region_short,
            &random_suffix(&mut rand::thread_rng()),
        );
        let spec = build_runner_group(&settings, principal, &name, &payload, resources)?;
        self.backends.orchestrator.create_job(&group, &name, &spec)?;

        tracing::info!(
            component = "job_launcher",
            event = "runner_started",
            job_id = %name,
            cpu = resources.cpu,
            memory_in_gb = resources.memory_in_gb,
        );
        Ok(RunnerStartedResponse {
            status: RUNNER_STARTED_STATUS.to_string(),
            job_id: name,
        })
    }

    /// Deletes every terminal job in the group, one at a time. Failures are
    /// logged and skipped.
    fn reclaim_finished_jobs(&self, group: &JobGroup) {
        let jobs = match self.backends.orchestrator.list_jobs(group) {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::warn!(
                    component = "job_launcher",
                    event = "cleanup_skipped",
                    error = %error,
                );
                return;
            }
        };

        let mut reclaimed = 0usize;
        for job in &jobs {
            if !job.state.is_terminal() {
                tracing::debug!(
                    component = "job_launcher",
                    event = "job_kept",
                    job = %job.name,
                    state = job.state.as_str(),
                );
                continue;
            }
            match self.backends.orchestrator.delete_job(group, &job.name) {
                Ok(()) => reclaimed += 1,
                Err(error) => tracing::warn!(
                    component = "job_launcher",
                    event = "cleanup_failed",
                    job = %job.name,
                    error = %error,
                ),
            }
        }

        tracing::info!(
            component = "job_launcher",
            event = "cleanup_finished",
            listed = jobs.len(),
            reclaimed,
        );
    }
}
