//! Log-analytics query construction for runner job logs.

pub const RUNNER_LOG_TABLE: &str = "ContainerInstanceLog_CL";
pub const MESSAGE_COLUMN: &str = "Message";
/// Wide lookback so that late-ingested lines are still returned.
pub const LOG_LOOKBACK: &str = "P365D";

/// Query returning every log line of `job_id` in generation order.
pub fn job_log_query(job_id: &str) -> String {
    format!(
        "{RUNNER_LOG_TABLE}\n| where ContainerGroup_s == \"{}\"\n| order by TimeGenerated asc",
        escape_string_literal(job_id)
    )
}

fn escape_string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}
