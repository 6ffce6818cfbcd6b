//! Operator surface (spec.md §6): the three entrypoints external callers
//! (cron jobs, admin actions, CLIs) invoke, wrapped in the retry policy from
//! spec.md §7 ("retry up to N with exponential backoff... retried only for
//! `TransientStorageError`").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::aggregate_writer::compute_aggregate;
use crate::allocator::CreatorContext;
use crate::config::Parameters;
use crate::errors::{CoreError, CoreResult};
use crate::event_reader::read_window;
use crate::revenue_window::finalize_revenue_window;
use crate::types::{EisComponents, RevenueWindowParams, RevenueWindowSummary, VideoFeatures};
use crate::unit_builder::build_units;

/// Detailed EIS breakdown for one video over one window, as returned by
/// `analyze_window` (spec.md §6).
#[derive(Debug, Clone)]
pub struct EisDetails {
  pub video_id: i64,
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub features: VideoFeatures,
  pub components: EisComponents,
}

/// Retries `f` on `TransientStorageError` only, with exponential backoff
/// (base delay doubling each attempt, up to `params.max_storage_retries`
/// attempts total). Mirrors the teacher's operator-entrypoint retry wrapper;
/// every other error kind is returned immediately.
pub async fn with_retry<T, F, Fut>(params: &Parameters, mut f: F) -> CoreResult<T>
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = CoreResult<T>>,
{
  let mut attempt = 0u32;
  loop {
    match f().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() && attempt + 1 < params.max_storage_retries => {
        let delay_ms = params.retry_base_delay_ms * 2u64.pow(attempt);
        tracing::warn!(attempt, delay_ms, error = %e, "transient storage error, retrying");
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

/// `finalize_revenue_window(start, end, params, dry_run) -> RevenueWindowSummary`
/// (spec.md §6), retried per §7.
pub async fn finalize_window(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
  revenue: &RevenueWindowParams,
  params: &Parameters,
  creator_contexts: &HashMap<i64, CreatorContext>,
  dry_run: bool,
) -> CoreResult<RevenueWindowSummary> {
  if window_end <= window_start {
    return Err(CoreError::ValidationError(format!(
      "inverted window: start={window_start} end={window_end}"
    )));
  }
  if revenue.gross_revenue_cents < 0 {
    return Err(CoreError::ValidationError("gross_revenue_cents must be non-negative".to_string()));
  }

  with_retry(params, || {
    finalize_revenue_window(pool, window_start, window_end, payment_type, revenue, params, creator_contexts, dry_run)
  })
  .await
}

/// `compute_units(run_day) -> {creator_id -> units}` (spec.md §6). `run_day`
/// is the UTC calendar day start; the window is `[run_day, run_day + 1d)`
/// per spec.md §4.6.
pub async fn compute_units(
  pool: &MySqlPool,
  run_day: DateTime<Utc>,
  params: &Parameters,
) -> CoreResult<HashMap<i64, f64>> {
  let window_start = run_day;
  let window_end = run_day + chrono::Duration::days(1);

  let output = with_retry(params, || build_units(pool, window_start, window_end, params)).await?;

  Ok(output.per_creator.into_iter().map(|cu| (cu.creator_id, cu.value_units)).collect())
}

/// `analyze_window(video_id, start, end) -> EISDetails` (spec.md §6).
/// Computes features and EIS components on the fly without persisting —
/// used for ad hoc operator inspection, not part of a finalize run.
pub async fn analyze_window(
  pool: &MySqlPool,
  video_id: i64,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  params: &Parameters,
) -> CoreResult<EisDetails> {
  let snapshot = with_retry(params, || read_window(pool, window_start, window_end, Some(video_id), params)).await?;

  let video = snapshot
    .videos
    .get(&video_id)
    .copied()
    .ok_or_else(|| CoreError::ValidationError(format!("no events for video_id={video_id} in window")))?;

  let empty = Vec::new();
  let events = snapshot.events_by_video.get(&video_id).unwrap_or(&empty);
  let (features, components) = compute_aggregate(&video, events, window_end, &snapshot.users);

  Ok(EisDetails {
    video_id,
    window_start,
    window_end,
    features,
    components,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn with_retry_returns_immediately_on_non_retryable_error() {
    let params = Parameters::default();
    let mut calls = 0;
    let result: CoreResult<()> = with_retry(&params, || {
      calls += 1;
      async { Err(CoreError::ValidationError("bad input".to_string())) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls, 1);
  }

  #[tokio::test]
  async fn with_retry_retries_transient_errors_up_to_limit() {
    let mut params = Parameters::default();
    params.max_storage_retries = 3;
    params.retry_base_delay_ms = 1;
    let mut calls = 0;
    let result: CoreResult<()> = with_retry(&params, || {
      calls += 1;
      async { Err(CoreError::TransientStorageError(sqlx::Error::PoolTimedOut)) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls, 3);
  }
}
