//! Revenue Window Finalizer (spec.md §4.8): computes the creator pool from
//! gross revenue under a margin guardrail, runs the Unit Builder and
//! Allocator over the window, and commits the whole run atomically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::allocator::{apply_allocations, compute_allocations, CreatorContext};
use crate::config::Parameters;
use crate::db;
use crate::errors::{CoreError, CoreResult};
use crate::types::{RevenueWindowParams, RevenueWindowSummary};
use crate::unit_builder::build_units;

fn round_cents(value: f64) -> i64 {
  value.round() as i64
}

/// Net revenue after taxes, fees, and refunds (spec.md §4.8 step 1).
fn net_revenue(params: &RevenueWindowParams) -> i64 {
  params.gross_revenue_cents - params.taxes_cents - params.fees_cents - params.refunds_cents
}

/// Margin guardrail cap (spec.md §4.8 step 2):
/// `cap_by_margin = floor(max(0, R_net - costs_est - margin_target * gross))`.
/// The raw (unclamped) value is also returned: when it is negative the
/// platform cannot meet `margin_target` even at `creator_pool = 0`, which is
/// the one case that surfaces `MarginGuardrailError` rather than simply
/// capping the pool.
fn cap_by_margin(r_net: i64, revenue: &RevenueWindowParams, params: &Parameters) -> (i64, i64) {
  let raw = r_net as f64 - revenue.costs_est_cents as f64 - params.margin_target * revenue.gross_revenue_cents as f64;
  (raw.floor() as i64, raw.max(0.0).floor() as i64)
}

async fn finalize_inner(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
  revenue: &RevenueWindowParams,
  params: &Parameters,
  creator_contexts: &HashMap<i64, CreatorContext>,
  dry_run: bool,
  existing_window_id: Option<i64>,
) -> CoreResult<RevenueWindowSummary> {
  let r_net = net_revenue(revenue);
  if r_net < 0 {
    return Err(CoreError::ValidationError(format!(
      "net revenue is negative for window [{window_start}, {window_end}): {r_net} cents"
    )));
  }

  let requested_pool = round_cents(r_net as f64 * params.pool_pct);
  let (raw_cap, margin_cap) = cap_by_margin(r_net, revenue, params);

  if raw_cap < 0 {
    let reason = format!(
      "cannot meet margin_target {:.2} for window [{window_start}, {window_end}): even a zero creator pool falls {} cents short",
      params.margin_target,
      -raw_cap
    );
    if !dry_run {
      let meta = serde_json::json!({ "net_revenue_cents": r_net, "reason": reason });
      // No ledger writes are involved in a guardrail rejection, so recording
      // it as 'finalized' immediately is safe — unlike the ledger-writing
      // path below, there is nothing for a crash to leave half-done.
      match existing_window_id {
        Some(id) => db::mark_revenue_window_guardrail_failure(pool, id, &meta).await?,
        None => {
          db::insert_revenue_window(
            pool,
            window_start,
            window_end,
            payment_type,
            revenue,
            params.pool_pct,
            params.margin_target,
            params.platform_fee_pct,
            params.risk_reserve_pct,
            0,
            0,
            0,
            "finalized",
            &meta,
          )
          .await?;
        }
      }
    }
    return Err(CoreError::MarginGuardrailError { reason });
  }

  let creator_pool_cents = requested_pool.min(margin_cap);
  // Reserve is a recorded marker only, computed from R_net directly rather
  // than deducted from the creator pool before allocation.
  let reserve_cents = round_cents(r_net as f64 * params.risk_reserve_pct);

  let unit_output = build_units(pool, window_start, window_end, params).await?;
  let allocation = compute_allocations(&unit_output.per_creator, creator_contexts, creator_pool_cents, params);

  let creators_paid = allocation.allocations.iter().filter(|a| a.allocated_cents > 0).count();
  let creators_excluded = allocation.allocations.iter().filter(|a| a.excluded.is_some()).count();
  let allocated_cents: i64 = allocation.allocations.iter().map(|a| a.allocated_cents).sum();

  if dry_run {
    return Ok(RevenueWindowSummary {
      revenue_window_id: 0,
      window_start,
      window_end,
      creator_pool_cents,
      allocated_cents,
      unallocated_cents: allocation.unallocated_cents,
      reserve_cents,
      creators_paid,
      creators_excluded,
      dry_run: true,
    });
  }

  let meta = serde_json::json!({
    "net_revenue_cents": r_net,
    "margin_cap_cents": margin_cap,
  });

  // Insert with a 'pending' placeholder status — never 'finalized' — so that
  // a crash before the ledger writes below commit leaves a row that reads as
  // unfinished and resumable, not as a done (but empty) payout. `finalize`
  // only ever reads 'finalized' once `apply_allocations` has flipped it as
  // the last statement of its own transaction (spec.md §4.8 steps 5-6).
  let revenue_window_id = match existing_window_id {
    Some(id) => id,
    None => {
      db::insert_revenue_window(
        pool,
        window_start,
        window_end,
        payment_type,
        revenue,
        params.pool_pct,
        params.margin_target,
        params.platform_fee_pct,
        params.risk_reserve_pct,
        creator_pool_cents,
        allocation.unallocated_cents,
        reserve_cents,
        "pending",
        &meta,
      )
      .await?
    }
  };

  // Reserve rows are markers only — tracked on `revenue_windows.reserve_cents`,
  // no corresponding `transactions` row (spec.md §9 open question, resolved).
  match apply_allocations(pool, revenue_window_id, payment_type, &allocation.allocations, &unit_output.per_video).await
  {
    Ok(()) => Ok(RevenueWindowSummary {
      revenue_window_id,
      window_start,
      window_end,
      creator_pool_cents,
      allocated_cents,
      unallocated_cents: allocation.unallocated_cents,
      reserve_cents,
      creators_paid,
      creators_excluded,
      dry_run: false,
    }),
    Err(e) => {
      if e.is_retryable() {
        db::compensate_revenue_window(pool, revenue_window_id).await?;
        Err(e)
      } else {
        db::mark_revenue_window_partial(pool, revenue_window_id, &e.to_string()).await?;
        Err(CoreError::PartialCommitError {
          window_start,
          window_end,
          payment_type: payment_type.to_string(),
          detail: e.to_string(),
        })
      }
    }
  }
}

/// Finalize a revenue window (spec.md §4.8). Idempotent per
/// `(window_start, window_end, payment_type)`: a second call against an
/// already-finalized window returns without doing any work. Exclusive
/// execution against concurrent callers is enforced via the advisory lock
/// in `db::try_acquire_revenue_window_lock`.
pub async fn finalize_revenue_window(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
  revenue: &RevenueWindowParams,
  params: &Parameters,
  creator_contexts: &HashMap<i64, CreatorContext>,
  dry_run: bool,
) -> CoreResult<RevenueWindowSummary> {
  // A 'finalized' row means the whole run (ledger writes included) already
  // committed: safe to skip. A 'pending' row means a prior run was
  // interrupted after reserving the idempotency key but before (or during)
  // its ledger writes — `apply_allocations` only flips status to 'finalized'
  // once those writes commit in the same transaction, so 'pending' here
  // guarantees no ledger rows exist yet for it. Reuse that id and resume
  // rather than leaving the payout stuck forever behind the idempotency
  // check (spec.md §4.8).
  let existing_window_id = match db::revenue_window_status(pool, window_start, window_end, payment_type).await? {
    Some((id, status)) if status == "finalized" => {
      tracing::info!(
        window_start = %window_start,
        window_end = %window_end,
        payment_type,
        revenue_window_id = id,
        "revenue window already finalized, skipping"
      );
      return Ok(RevenueWindowSummary {
        revenue_window_id: id,
        window_start,
        window_end,
        creator_pool_cents: 0,
        allocated_cents: 0,
        unallocated_cents: 0,
        reserve_cents: 0,
        creators_paid: 0,
        creators_excluded: 0,
        dry_run: false,
      });
    }
    Some((id, _pending)) => {
      tracing::warn!(
        window_start = %window_start,
        window_end = %window_end,
        payment_type,
        revenue_window_id = id,
        "resuming revenue window left pending by an incomplete prior run"
      );
      Some(id)
    }
    None => None,
  };

  if dry_run {
    return finalize_inner(pool, window_start, window_end, payment_type, revenue, params, creator_contexts, true, None)
      .await;
  }

  let acquired = db::try_acquire_revenue_window_lock(pool, window_start, window_end, payment_type).await?;
  if !acquired {
    return Err(CoreError::ValidationError(format!(
      "revenue window [{window_start}, {window_end}) payment_type={payment_type} is already being finalized"
    )));
  }

  let result = finalize_inner(
    pool,
    window_start,
    window_end,
    payment_type,
    revenue,
    params,
    creator_contexts,
    false,
    existing_window_id,
  )
  .await;

  db::release_revenue_window_lock(pool, window_start, window_end, payment_type).await?;
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  fn revenue(gross: i64) -> RevenueWindowParams {
    RevenueWindowParams {
      gross_revenue_cents: gross,
      taxes_cents: 0,
      fees_cents: 0,
      refunds_cents: 0,
      costs_est_cents: 0,
    }
  }

  #[test]
  fn net_revenue_subtracts_deductions() {
    let params = RevenueWindowParams {
      gross_revenue_cents: 100_000,
      taxes_cents: 5_000,
      fees_cents: 2_000,
      refunds_cents: 1_000,
      costs_est_cents: 0,
    };
    assert_eq!(net_revenue(&params), 92_000);
  }

  #[test]
  fn margin_guardrail_caps_pool_below_target_margin() {
    let params = Parameters::default();
    let revenue = revenue(100_000);
    let r_net = 100_000;
    // margin_target=0.60, costs_est=0 -> cap = 100000 - 0 - 60000 = 40000
    let (raw, cap) = cap_by_margin(r_net, &revenue, &params);
    assert_eq!(raw, 40_000);
    assert_eq!(cap, 40_000);
  }

  #[test]
  fn requested_pool_above_cap_gets_clamped_not_rejected() {
    // pool_pct=0.45 requests 45000 against a 40000 margin cap: the pool is
    // silently capped, this is not a guardrail violation (raw_cap >= 0).
    let params = Parameters::default();
    let revenue = revenue(100_000);
    let r_net = net_revenue(&revenue);
    let requested = round_cents(r_net as f64 * params.pool_pct);
    let (raw, cap) = cap_by_margin(r_net, &revenue, &params);
    assert!(raw >= 0);
    assert_eq!(requested.min(cap), 40_000);
  }

  #[test]
  fn costs_est_exceeding_margin_budget_violates_guardrail() {
    let params = Parameters::default();
    let revenue = RevenueWindowParams {
      gross_revenue_cents: 100_000,
      taxes_cents: 0,
      fees_cents: 0,
      refunds_cents: 0,
      costs_est_cents: 50_000,
    };
    let r_net = net_revenue(&revenue);
    let (raw, _cap) = cap_by_margin(r_net, &revenue, &params);
    // r_net - costs_est - margin_target*gross = 100000 - 50000 - 60000 = -10000
    assert_eq!(raw, -10_000);
  }
}
