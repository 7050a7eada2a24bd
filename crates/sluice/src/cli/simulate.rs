//! Synthetic workload command.
//!
//! Runs requests of every priority against an in-process API that enforces a
//! fixed request quota per window and reports it the way a real API does,
//! then prints what the dispatcher did.

use serde::Serialize;
use sluice::{
    AdmissionMode, Attempt, Dimension, DimensionSignal, OperationError, OperationErrorKind,
    Priority, QueueStatus, QuotaReport, QuotaSignal, ResourceCost, Sluice, SluiceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Workload shape for [`run_simulation`].
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Requests to enqueue, assigned to tiers round-robin
    pub requests: u64,
    /// Requests the synthetic API allows per window
    pub limit: u64,
    /// Quota window length
    pub window: Duration,
    /// Fail every Nth call with a transient error
    pub fail_every: Option<u64>,
    /// Admission mode override
    pub mode: Option<AdmissionMode>,
}

/// Result of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Wall time from first dispatch to last outcome
    pub elapsed_ms: u64,
    /// Requests that eventually succeeded
    pub completed: u64,
    /// Requests that failed for good
    pub failed: u64,
    /// Calls the synthetic API received, including rejected ones
    pub api_calls: u64,
    /// Tier of each successful request, in the order the API served them
    pub dispatch_order: Vec<Priority>,
    /// Final dispatcher status
    pub status: QueueStatus,
    /// Final quota view
    pub quota: QuotaReport,
}

#[derive(Debug)]
struct ApiWindow {
    started: Instant,
    used: u64,
    calls: u64,
}

/// In-process stand-in for a quota-limited API.
#[derive(Debug)]
struct SyntheticApi {
    limit: u64,
    window: Duration,
    fail_every: Option<u64>,
    state: Mutex<ApiWindow>,
}

impl SyntheticApi {
    fn new(limit: u64, window: Duration, fail_every: Option<u64>) -> Self {
        Self {
            limit,
            window,
            fail_every,
            state: Mutex::new(ApiWindow {
                started: Instant::now(),
                used: 0,
                calls: 0,
            }),
        }
    }

    /// Serve one call, returning the call number on success.
    async fn call(&self) -> Attempt<u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.used = 0;
        }
        state.calls += 1;
        let reset_in = self
            .window
            .saturating_sub(now.duration_since(state.started));

        if self
            .fail_every
            .is_some_and(|every| every > 0 && state.calls % every == 0)
        {
            return Attempt::err(OperationError::new(OperationErrorKind::Transport(
                "synthetic connection reset".to_string(),
            )));
        }

        if state.used >= self.limit {
            return Attempt::err(OperationError::new(OperationErrorKind::RateLimited {
                retry_after: Some(reset_in),
            }))
            .with_signal(self.signal(0, reset_in));
        }

        state.used += 1;
        Attempt::ok(state.calls).with_signal(self.signal(self.limit - state.used, reset_in))
    }

    async fn calls(&self) -> u64 {
        self.state.lock().await.calls
    }

    fn signal(&self, remaining: u64, reset_in: Duration) -> QuotaSignal {
        QuotaSignal::new().with(
            Dimension::Requests,
            DimensionSignal::default()
                .with_limit(self.limit)
                .with_remaining(remaining)
                .with_reset_in(reset_in),
        )
    }
}

/// Run the workload to completion and report.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the queue rejects a
/// request.
pub async fn simulate(
    mut config: SluiceConfig,
    options: SimulationOptions,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    if let Some(mode) = options.mode {
        config.queue.admission_mode = mode;
    }
    let session: Sluice<u64> = Sluice::new(config)?;
    let api = Arc::new(SyntheticApi::new(
        options.limit,
        options.window,
        options.fail_every,
    ));

    let mut tickets = Vec::new();
    for n in 0..options.requests {
        let priority = Priority::DISPATCH_ORDER[(n % 4) as usize];
        let api_for_call = Arc::clone(&api);
        let ticket = session
            .submit(
                move || {
                    let api = Arc::clone(&api_for_call);
                    async move { api.call().await }
                },
                ResourceCost::default(),
                priority,
            )
            .await?;
        tickets.push((priority, ticket));
    }
    info!(requests = tickets.len(), "Workload queued");

    let started = Instant::now();
    let worker = session.start()?;

    let mut served = Vec::new();
    let mut failed = 0;
    for (priority, ticket) in tickets {
        let id = ticket.id().clone();
        match ticket.outcome().await {
            Ok(call) => served.push((call, priority)),
            Err(e) => {
                warn!(%id, error = %e, "Request failed");
                failed += 1;
            }
        }
    }
    let elapsed = started.elapsed();
    worker.stop().await;

    served.sort_by_key(|(call, _)| *call);
    Ok(SimulationReport {
        elapsed_ms: elapsed.as_millis() as u64,
        completed: served.len() as u64,
        failed,
        api_calls: api.calls().await,
        dispatch_order: served.into_iter().map(|(_, priority)| priority).collect(),
        status: session.status().await,
        quota: session.quota_snapshot().await,
    })
}

/// Run the workload and print the report as JSON.
pub async fn run_simulation(
    config: SluiceConfig,
    options: SimulationOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(config, options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(requests: u64, limit: u64) -> SimulationOptions {
        SimulationOptions {
            requests,
            limit,
            window: Duration::from_secs(1),
            fail_every: None,
            mode: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_each_window_in_priority_order() {
        let report = simulate(SluiceConfig::default(), options(8, 3))
            .await
            .unwrap();

        assert_eq!(report.completed, 8);
        assert_eq!(report.failed, 0);
        assert_eq!(report.api_calls, 8);
        assert_eq!(
            report.dispatch_order,
            vec![
                Priority::Urgent,
                Priority::Urgent,
                Priority::High,
                Priority::High,
                Priority::Normal,
                Priority::Normal,
                Priority::Low,
                Priority::Low,
            ]
        );
        // Three windows are needed for eight calls at three per window.
        assert!(report.elapsed_ms >= 2_000, "elapsed {}", report.elapsed_ms);
        assert_eq!(report.status.stats.total_processed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let mut workload = options(4, 10);
        workload.fail_every = Some(2);

        let report = simulate(SluiceConfig::default(), workload).await.unwrap();

        assert_eq!(report.completed, 4);
        assert_eq!(report.failed, 0);
        assert!(report.status.stats.total_retries > 0);
        assert_eq!(report.api_calls, 4 + report.status.stats.total_retries);
    }
}
