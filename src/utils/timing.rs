use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::utils::text::truncate_for_log;

/// Times one user-visible unit of work: a console turn or an HTTP request.
#[derive(Debug)]
pub struct TurnTimer {
    operation: String,
    channel: &'static str,
    turn: Option<u64>,
    input: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl TurnTimer {
    pub fn new(channel: &'static str, operation: &str, turn: Option<u64>, input: Option<&str>) -> Self {
        TurnTimer {
            operation: operation.to_string(),
            channel,
            turn,
            input: input.map(|value| truncate_for_log(&value.replace('\n', " "), 300)),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: "feedback.timing",
            "event=turn_received channel={} operation={} turn={:?} received_at={} input={:?}",
            self.channel,
            self.operation,
            self.turn,
            self.started_at.to_rfc3339(),
            self.input
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "feedback.timing",
            "event=turn_completed channel={} operation={} turn={:?} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.channel,
            self.operation,
            self.turn,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for TurnTimer {
    fn drop(&mut self) {
        self.log_completed();
    }
}

pub fn start_turn_timer(
    channel: &'static str,
    operation: &str,
    turn: Option<u64>,
    input: Option<&str>,
) -> TurnTimer {
    let timer = TurnTimer::new(channel, operation, turn, input);
    timer.log_received();
    timer
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "feedback.timing",
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_err() { "error" } else { "success" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "feedback.timing",
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
