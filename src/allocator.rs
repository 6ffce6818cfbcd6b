//! Allocator (spec.md §4.7): creator multipliers, proportional scaling, KYC
//! cap enforcement with iterative redistribution, and ledger writes.

use std::collections::{HashMap, HashSet};

use sqlx::MySqlPool;

use crate::config::Parameters;
use crate::db;
use crate::errors::{classify_storage_error, CoreResult};
use crate::types::{
  AllocationExclusionReason, CreatorAllocation, CreatorUnits, KycLevel, VideoRevShareRow, VideoValueUnits,
};

#[derive(Debug, Clone, Copy)]
pub struct CreatorContext {
  pub likely_bot: bool,
  pub creator_trust_score: Option<f64>,
  pub kyc_level: Option<i32>,
}

/// Splits `total_cents` across `items` (keyed by an opaque `i64` id, e.g.
/// `creator_id` or `video_id`) in proportion to each item's weight, using
/// floor division plus a largest-remainder top-up. Unlike rounding each
/// share independently, the sum of the returned shares is always exactly
/// `total_cents` (when `total_cents >= 0` and the weights sum positive) —
/// it can never overshoot, which plain per-item `f64::round()` can (e.g.
/// two equal weights splitting an odd total each round up). Ties in
/// fractional remainder are broken by descending weight, then ascending id,
/// matching the descending-`U'_c` tie-break spec.md §4.7 Step C already
/// names for its one-cent remainder pass.
fn largest_remainder_split(items: &[(i64, f64)], total_cents: i64) -> HashMap<i64, i64> {
  let mut out: HashMap<i64, i64> = items.iter().map(|(id, _)| (*id, 0)).collect();

  let weight_sum: f64 = items.iter().map(|(_, w)| w).sum();
  if total_cents <= 0 || weight_sum <= 0.0 {
    return out;
  }

  struct Share {
    id: i64,
    weight: f64,
    floor: i64,
    frac: f64,
  }

  let mut shares: Vec<Share> = items
    .iter()
    .map(|(id, weight)| {
      let raw = weight / weight_sum * total_cents as f64;
      let floor = raw.floor();
      Share {
        id: *id,
        weight: *weight,
        floor: floor as i64,
        frac: raw - floor,
      }
    })
    .collect();

  let floor_total: i64 = shares.iter().map(|s| s.floor).sum();
  let mut remainder = (total_cents - floor_total).max(0);

  let mut order: Vec<usize> = (0..shares.len()).collect();
  order.sort_by(|&a, &b| {
    shares[b]
      .frac
      .partial_cmp(&shares[a].frac)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| shares[b].weight.partial_cmp(&shares[a].weight).unwrap_or(std::cmp::Ordering::Equal))
      .then_with(|| shares[a].id.cmp(&shares[b].id))
  });

  let mut i = 0;
  while remainder > 0 && !order.is_empty() {
    shares[order[i % order.len()]].floor += 1;
    remainder -= 1;
    i += 1;
  }

  for s in shares {
    out.insert(s.id, s.floor);
  }
  out
}

fn multiplier(ctx: &CreatorContext, params: &Parameters) -> (f64, Option<AllocationExclusionReason>) {
  if ctx.likely_bot && params.penalize_likely_bot {
    return (0.0, Some(AllocationExclusionReason::LikelyBot));
  }

  let clamped_trust = ctx.creator_trust_score.unwrap_or(50.0).clamp(0.0, 100.0);
  let range = params.trust_mult_range;
  let trust_mult = match ctx.creator_trust_score {
    Some(_) => range.min + (range.max - range.min) * (clamped_trust / 100.0),
    None => 1.0,
  };
  (trust_mult, None)
}

pub struct AllocationResult {
  /// Sorted ascending by `creator_id` (spec.md §5 ordering guarantee).
  pub allocations: Vec<CreatorAllocation>,
  pub unallocated_cents: i64,
}

/// Pure allocation algorithm (spec.md §4.7 Steps A–C). No I/O — the
/// transactional ledger writes live in `apply_allocations` below.
pub fn compute_allocations(
  creator_units: &[CreatorUnits],
  contexts: &HashMap<i64, CreatorContext>,
  pool_cents: i64,
  params: &Parameters,
) -> AllocationResult {
  // Step A: creator multipliers.
  struct Working {
    creator_id: i64,
    raw_units: f64,
    multiplier: f64,
    weighted_units: f64,
    excluded: Option<AllocationExclusionReason>,
    kyc_cap: Option<i64>,
    a_c: i64,
    capped: bool,
  }

  let mut working: Vec<Working> = creator_units
    .iter()
    .map(|cu| {
      let ctx = contexts.get(&cu.creator_id).copied().unwrap_or(CreatorContext {
        likely_bot: false,
        creator_trust_score: None,
        kyc_level: None,
      });
      let (mult, mut excluded) = multiplier(&ctx, params);
      let kyc = KycLevel::from_raw(ctx.kyc_level);
      if excluded.is_none() && kyc.is_excluded() {
        excluded = Some(AllocationExclusionReason::KycUnverified);
      }
      Working {
        creator_id: cu.creator_id,
        raw_units: cu.value_units,
        multiplier: mult,
        weighted_units: cu.value_units * mult,
        excluded,
        kyc_cap: kyc.cap_cents(&params.kyc_caps),
        a_c: 0,
        capped: false,
      }
    })
    .collect();

  // Step B: proportional scaling. Floor + largest-remainder guarantees the
  // shares sum to exactly `pool_cents`, never more — naive per-creator
  // `f64::round()` can overshoot (e.g. two equal weights splitting an odd
  // pool both round up).
  let total_weighted: f64 = working.iter().filter(|w| w.weighted_units > 0.0).map(|w| w.weighted_units).sum();

  if total_weighted > 0.0 {
    let items: Vec<(i64, f64)> = working
      .iter()
      .filter(|w| w.weighted_units > 0.0)
      .map(|w| (w.creator_id, w.weighted_units))
      .collect();
    let shares = largest_remainder_split(&items, pool_cents);
    for w in working.iter_mut() {
      if w.weighted_units > 0.0 {
        w.a_c = shares[&w.creator_id];
      }
    }
  }

  // Step C: KYC cap enforcement with iterative redistribution. Each round's
  // excess is redistributed via the same floor + largest-remainder split, so
  // the running total stays exactly `pool_cents` minus whatever excess has
  // no uncapped recipient left to absorb it (which becomes `unallocated`).
  let mut capped_ids: HashSet<i64> = HashSet::new();
  if total_weighted > 0.0 {
    for _iteration in 0..working.len().max(1) {
      let mut excess = 0i64;
      for w in working.iter_mut() {
        if let Some(cap) = w.kyc_cap {
          if w.a_c > cap {
            excess += w.a_c - cap;
            w.a_c = cap;
            w.capped = true;
            capped_ids.insert(w.creator_id);
          }
        }
      }

      if excess == 0 {
        break;
      }

      let recipients: Vec<(i64, f64)> = working
        .iter()
        .filter(|w| !capped_ids.contains(&w.creator_id) && w.weighted_units > 0.0)
        .map(|w| (w.creator_id, w.weighted_units))
        .collect();

      if recipients.is_empty() {
        break;
      }

      let shares = largest_remainder_split(&recipients, excess);
      for w in working.iter_mut() {
        if let Some(share) = shares.get(&w.creator_id) {
          w.a_c += share;
        }
      }
    }
  }

  let allocated_total: i64 = working.iter().map(|w| w.a_c).sum();
  let unallocated_cents = pool_cents - allocated_total;

  let mut allocations: Vec<CreatorAllocation> = working
    .into_iter()
    .map(|w| CreatorAllocation {
      creator_id: w.creator_id,
      raw_units: w.raw_units,
      multiplier: w.multiplier,
      weighted_units: w.weighted_units,
      allocated_cents: w.a_c,
      capped: w.capped,
      excluded: w.excluded,
    })
    .collect();
  allocations.sort_by_key(|a| a.creator_id);

  AllocationResult {
    allocations,
    unallocated_cents,
  }
}

/// Allocator Step D (spec.md §4.7): writes the ledger rows for a finalized
/// (non-dry-run) run, in deterministic ascending `creator_id` order
/// (spec.md §5).
pub async fn apply_allocations(
  pool: &MySqlPool,
  revenue_window_id: i64,
  payment_type: &str,
  allocations: &[CreatorAllocation],
  per_video: &[VideoValueUnits],
) -> CoreResult<()> {
  let mut by_creator_videos: HashMap<i64, Vec<&VideoValueUnits>> = HashMap::new();
  for v in per_video {
    by_creator_videos.entry(v.creator_id).or_default().push(v);
  }

  let mut tx = pool.begin().await.map_err(classify_storage_error)?;

  for alloc in allocations {
    if alloc.allocated_cents <= 0 {
      continue;
    }

    db::insert_inflow_transaction(&mut tx, alloc.creator_id, alloc.allocated_cents, payment_type, revenue_window_id)
      .await?;

    if let Some(videos) = by_creator_videos.get(&alloc.creator_id) {
      // Same floor + largest-remainder split as Steps B/C: independent
      // per-video rounding can overshoot `alloc.allocated_cents` the same
      // way the creator-level split could, so the per-video shares must sum
      // to exactly the creator's ledgered amount, never more.
      let items: Vec<(i64, f64)> = videos.iter().map(|v| (v.video_id, v.value_units)).collect();
      let video_shares = largest_remainder_split(&items, alloc.allocated_cents);

      for v in videos.iter() {
        let video_cents = video_shares.get(&v.video_id).copied().unwrap_or(0);
        let share_pct = if alloc.allocated_cents > 0 {
          video_cents as f64 / alloc.allocated_cents as f64
        } else {
          0.0
        };
        db::insert_video_rev_share(
          &mut tx,
          &VideoRevShareRow {
            revenue_window_id,
            video_id: v.video_id,
            creator_id: alloc.creator_id,
            eng_units: v.eng_units,
            eis_avg: v.eis,
            value_units: v.value_units,
            share_pct,
            allocated_cents: video_cents,
          },
        )
        .await?;
      }
    }
  }

  // Flip to finalized as the last statement of this transaction, so a row
  // only ever reads 'finalized' once its ledger rows are committed with it —
  // a crash before this point leaves the row 'pending' and resumable.
  db::mark_revenue_window_finalized(&mut tx, revenue_window_id).await?;

  tx.commit().await.map_err(classify_storage_error)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx(likely_bot: bool, trust: Option<f64>, kyc: Option<i32>) -> CreatorContext {
    CreatorContext {
      likely_bot,
      creator_trust_score: trust,
      kyc_level: kyc,
    }
  }

  #[test]
  fn scenario_two_equal_creators_capped_at_tier1() {
    // spec.md §8 scenario 2.
    let units = vec![
      CreatorUnits { creator_id: 1, value_units: 100.0 },
      CreatorUnits { creator_id: 2, value_units: 100.0 },
    ];
    let mut contexts = HashMap::new();
    contexts.insert(1, ctx(false, None, Some(1)));
    contexts.insert(2, ctx(false, None, Some(1)));

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 20_000, &params);

    for a in &result.allocations {
      assert_eq!(a.allocated_cents, 5_000);
    }
    assert_eq!(result.unallocated_cents, 10_000);
  }

  #[test]
  fn scenario_three_cascading_redistribution() {
    // spec.md §8 scenario 3.
    let units = vec![
      CreatorUnits { creator_id: 1, value_units: 50.0 },  // A, kyc=3
      CreatorUnits { creator_id: 2, value_units: 50.0 },  // B, kyc=2
      CreatorUnits { creator_id: 3, value_units: 100.0 }, // C, kyc=1
    ];
    let mut contexts = HashMap::new();
    contexts.insert(1, ctx(false, None, Some(3)));
    contexts.insert(2, ctx(false, None, Some(2)));
    contexts.insert(3, ctx(false, None, Some(1)));

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 60_000, &params);

    let by_id: HashMap<i64, &CreatorAllocation> = result.allocations.iter().map(|a| (a.creator_id, a)).collect();
    assert_eq!(by_id[&3].allocated_cents, 5_000);
    assert_eq!(by_id[&1].allocated_cents, 27_500);
    assert_eq!(by_id[&2].allocated_cents, 27_500);
    assert_eq!(result.unallocated_cents, 0);
  }

  #[test]
  fn scenario_four_bot_fully_excluded() {
    let units = vec![CreatorUnits { creator_id: 1, value_units: 1_000.0 }];
    let mut contexts = HashMap::new();
    contexts.insert(1, ctx(true, None, Some(3)));

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 10_000, &params);

    assert_eq!(result.allocations[0].allocated_cents, 0);
    assert_eq!(result.allocations[0].excluded, Some(AllocationExclusionReason::LikelyBot));
    assert_eq!(result.unallocated_cents, 10_000);
  }

  #[test]
  fn kyc_zero_or_null_is_excluded() {
    let units = vec![
      CreatorUnits { creator_id: 1, value_units: 100.0 },
      CreatorUnits { creator_id: 2, value_units: 100.0 },
    ];
    let mut contexts = HashMap::new();
    contexts.insert(1, ctx(false, None, Some(0)));
    contexts.insert(2, ctx(false, None, None));

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 10_000, &params);
    for a in &result.allocations {
      assert_eq!(a.allocated_cents, 0);
    }
  }

  #[test]
  fn trust_multiplier_stays_within_configured_range() {
    let params = Parameters::default();
    let (mult_low, _) = multiplier(&ctx(false, Some(0.0), Some(3)), &params);
    let (mult_high, _) = multiplier(&ctx(false, Some(100.0), Some(3)), &params);
    assert!((mult_low - 0.90).abs() < 1e-9);
    assert!((mult_high - 1.10).abs() < 1e-9);
  }

  #[test]
  fn zero_total_units_leaves_pool_fully_unallocated() {
    let units = vec![CreatorUnits { creator_id: 1, value_units: 0.0 }];
    let contexts = HashMap::new();
    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 5_000, &params);
    assert_eq!(result.unallocated_cents, 5_000);
  }

  #[test]
  fn equal_weights_splitting_an_odd_pool_never_overshoot() {
    // Two creators with equal units, both KYC tier3+ (uncapped), splitting a
    // 5-cent pool: each creator's naive proportional share is 2.5, which
    // `f64::round()` rounds away from zero to 3 for BOTH creators, paying out
    // 6 cents from a 5-cent pool. The floor + largest-remainder split must
    // instead give exactly one of them the extra cent.
    let units = vec![
      CreatorUnits { creator_id: 1, value_units: 1.0 },
      CreatorUnits { creator_id: 2, value_units: 1.0 },
    ];
    let mut contexts = HashMap::new();
    contexts.insert(1, ctx(false, None, Some(3)));
    contexts.insert(2, ctx(false, None, Some(3)));

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 5, &params);

    let total: i64 = result.allocations.iter().map(|a| a.allocated_cents).sum();
    assert_eq!(total, 5);
    assert_eq!(result.unallocated_cents, 0);
    for a in &result.allocations {
      assert!(a.allocated_cents == 2 || a.allocated_cents == 3);
    }
  }

  #[test]
  fn many_equal_weights_never_overshoot_pool_regardless_of_remainder() {
    // A less contrived version of the same bug at a larger scale: 7 equal
    // creators splitting a pool not evenly divisible by 7 must still sum to
    // exactly the pool, never more.
    let units: Vec<CreatorUnits> = (1..=7).map(|id| CreatorUnits { creator_id: id, value_units: 10.0 }).collect();
    let mut contexts = HashMap::new();
    for id in 1..=7 {
      contexts.insert(id, ctx(false, None, Some(3)));
    }

    let params = Parameters::default();
    let result = compute_allocations(&units, &contexts, 1_000, &params);

    let total: i64 = result.allocations.iter().map(|a| a.allocated_cents).sum();
    assert_eq!(total, 1_000);
    assert_eq!(result.unallocated_cents, 0);
  }

  #[test]
  fn largest_remainder_split_sums_exactly_to_total() {
    let items = vec![(1, 1.0), (2, 1.0), (3, 1.0)];
    let shares = largest_remainder_split(&items, 10);
    let total: i64 = shares.values().sum();
    assert_eq!(total, 10);
  }

  #[test]
  fn largest_remainder_split_is_deterministic_on_ties() {
    // Equal weights tie on fractional remainder; the tie-break (descending
    // weight, then ascending id) must make the result stable across calls.
    let items = vec![(5, 1.0), (2, 1.0), (8, 1.0)];
    let first = largest_remainder_split(&items, 10);
    let second = largest_remainder_split(&items, 10);
    assert_eq!(first, second);
  }
}
