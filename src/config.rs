//! Immutable parameters bag. Every entrypoint takes `&Parameters` explicitly;
//! there is no process-global tunable anywhere in this crate (spec.md §9).

#[derive(Debug, Clone, Copy)]
pub struct EventWeights {
  pub view: u32,
  pub like: u32,
  pub comment: u32,
  pub share: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct KycCaps {
  pub tier1: i64,
  pub tier2: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TrustMultRange {
  pub min: f64,
  pub max: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Parameters {
  pub event_weights: EventWeights,
  pub gamma: f64,
  pub early_min_views: i64,
  pub early_device_frac: f64,
  pub early_ip_frac: f64,
  pub early_kicker: f64,
  pub trust_mult_range: TrustMultRange,
  pub kyc_caps: KycCaps,
  pub penalize_likely_bot: bool,
  pub pool_pct: f64,
  pub margin_target: f64,
  pub risk_reserve_pct: f64,
  pub platform_fee_pct: f64,

  /// Event Window Reader page size (spec.md §4.1: "page in fixed-size
  /// batches (~10000 rows) to bound memory").
  pub event_page_size: i64,
  /// Operator-entrypoint retry policy (spec.md §7).
  pub max_storage_retries: u32,
  pub retry_base_delay_ms: u64,
  /// Bound on concurrent per-video EIS computation within one window run
  /// (spec.md §5: "may run concurrently across videos... no shared mutable
  /// state other than the storage layer").
  pub max_concurrent_videos: usize,
}

impl Default for Parameters {
  fn default() -> Self {
    Self {
      event_weights: EventWeights {
        view: 1,
        like: 3,
        comment: 5,
        share: 8,
      },
      gamma: 2.0,
      early_min_views: 50,
      early_device_frac: 0.5,
      early_ip_frac: 0.4,
      early_kicker: 1.05,
      trust_mult_range: TrustMultRange { min: 0.90, max: 1.10 },
      kyc_caps: KycCaps {
        tier1: 5_000,
        tier2: 50_000,
      },
      penalize_likely_bot: true,
      pool_pct: 0.45,
      margin_target: 0.60,
      risk_reserve_pct: 0.10,
      platform_fee_pct: 0.10,
      event_page_size: 10_000,
      max_storage_retries: 3,
      retry_base_delay_ms: 200,
      max_concurrent_videos: 8,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec_configuration_bag() {
    let p = Parameters::default();
    assert_eq!(p.event_weights.view, 1);
    assert_eq!(p.event_weights.like, 3);
    assert_eq!(p.event_weights.comment, 5);
    assert_eq!(p.event_weights.share, 8);
    assert!((p.gamma - 2.0).abs() < 1e-12);
    assert_eq!(p.kyc_caps.tier1, 5_000);
    assert_eq!(p.kyc_caps.tier2, 50_000);
    assert!((p.trust_mult_range.min - 0.90).abs() < 1e-12);
    assert!((p.trust_mult_range.max - 1.10).abs() < 1e-12);
  }
}
