//! Trust Resolver (spec.md §4.3). Pure function from stored signals to a
//! Viewer Trust Score in `[0, 100]`.

use crate::types::UserTrustFields;

fn clamp(value: f64, min: f64, max: f64) -> f64 {
  if value < min {
    min
  } else if value > max {
    max
  } else {
    value
  }
}

/// `VTS(user)` per spec.md §4.3: start from `viewer_trust_score` (default
/// 50 when absent), then apply the bot and KYC multipliers deterministically
/// so every scorer sees the same adjusted value.
pub fn resolve_vts(user: &UserTrustFields) -> f64 {
  let base = user.viewer_trust_score.unwrap_or(50.0);

  let bot_mult = if user.likely_bot { 0.2 } else { 1.0 };
  let kyc_mult = match user.kyc_level {
    None | Some(0) => 0.7,
    Some(1) => 0.9,
    _ => 1.0,
  };

  clamp(base * bot_mult * kyc_mult, 0.0, 100.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields(vts: Option<f64>, likely_bot: bool, kyc_level: Option<i32>) -> UserTrustFields {
    UserTrustFields {
      likely_bot,
      kyc_level,
      creator_trust_score: None,
      viewer_trust_score: vts,
    }
  }

  #[test]
  fn missing_score_defaults_to_50() {
    let f = fields(None, false, Some(2));
    assert!((resolve_vts(&f) - 50.0).abs() < 1e-9);
  }

  #[test]
  fn likely_bot_multiplies_by_0_2() {
    let f = fields(Some(100.0), true, Some(2));
    assert!((resolve_vts(&f) - 20.0).abs() < 1e-9);
  }

  #[test]
  fn kyc_zero_or_null_multiplies_by_0_7() {
    let f_zero = fields(Some(100.0), false, Some(0));
    let f_null = fields(Some(100.0), false, None);
    assert!((resolve_vts(&f_zero) - 70.0).abs() < 1e-9);
    assert!((resolve_vts(&f_null) - 70.0).abs() < 1e-9);
  }

  #[test]
  fn kyc_one_multiplies_by_0_9() {
    let f = fields(Some(100.0), false, Some(1));
    assert!((resolve_vts(&f) - 90.0).abs() < 1e-9);
  }

  #[test]
  fn kyc_two_or_more_is_full_weight() {
    let f = fields(Some(100.0), false, Some(3));
    assert!((resolve_vts(&f) - 100.0).abs() < 1e-9);
  }

  #[test]
  fn result_is_clamped_to_0_100() {
    let f = fields(Some(150.0), false, Some(3));
    assert!((resolve_vts(&f) - 100.0).abs() < 1e-9);
  }
}
