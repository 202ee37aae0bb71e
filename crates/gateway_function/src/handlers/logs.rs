use gateway_core::log_query::{job_log_query, LOG_LOOKBACK, MESSAGE_COLUMN};
use gateway_core::GatewayError;
use serde_json::Value;

use super::Gateway;
use crate::adapters::log_analytics::LogTable;
use crate::config::required;

/// Message lines of one query result, in generation order. Rows without a
/// message are skipped.
#[derive(Debug)]
pub struct JobLogLines {
    rows: std::vec::IntoIter<Vec<Value>>,
    message_column: Option<usize>,
}

impl JobLogLines {
    fn new(table: LogTable) -> Self {
        Self {
            message_column: table.column_index(MESSAGE_COLUMN),
            rows: table.rows.into_iter(),
        }
    }
}

impl Iterator for JobLogLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let column = self.message_column?;
        self.rows.by_ref().find_map(|mut row| {
            if column >= row.len() {
                return None;
            }
            match row.swap_remove(column) {
                Value::Null => None,
                Value::String(message) => Some(message),
                other => Some(other.to_string()),
            }
        })
    }
}

impl Gateway {
    /// Queries the job's log lines. Every call re-queries the backend.
    pub fn read_logs(&self, job_id: Option<&str>) -> Result<JobLogLines, GatewayError> {
        let job_id = job_id
            .map(str::trim)
            .filter(|job_id| !job_id.is_empty())
            .ok_or_else(|| GatewayError::missing_field("job_id"))?;
        let workspace_id = required(
            &self.config.log_analytics_workspace_id,
            "LOG_ANALYTICS_WORKSPACE_ID",
        )?;

        let table = self
            .backends
            .logs
            .query(workspace_id, &job_log_query(job_id), LOG_LOOKBACK)?;
        tracing::info!(
            component = "log_reader",
            event = "logs_queried",
            job_id,
            rows = table.rows.len(),
        );
        Ok(JobLogLines::new(table))
    }
}
