//! EIS Scorer (spec.md §4.4). Four pure sub-scorers plus a blend, each a
//! pure function over already-extracted features and resolved VTS values —
//! no I/O, same texture as the teacher's `decision_engine::compute_decision`.

use crate::types::{EisComponents, VideoFeatures};

fn clamp(value: f64, min: f64, max: f64) -> f64 {
  if value < min {
    min
  } else if value > max {
    max
  } else {
    value
  }
}

fn mean(values: &[f64]) -> f64 {
  if values.is_empty() {
    0.0
  } else {
    values.iter().sum::<f64>() / values.len() as f64
  }
}

/// Authentic Engagement (spec.md §4.4).
pub fn authentic_engagement(features: &VideoFeatures) -> f64 {
  let duration_s = features.duration_s.max(1) as f64;
  let target_lpv = clamp(0.08 * (15.0 / duration_s), 0.02, 0.25);
  let target_cpv = clamp(0.02 * (15.0 / duration_s), 0.005, 0.08);

  let views = features.views.max(1) as f64;
  let lpv = features.likes as f64 / views;
  let cpv = features.comments as f64 / views;

  let s_l = (lpv / target_lpv).min(1.0);
  let s_c = (cpv / target_cpv).min(1.0);

  let rec = if features.age_s <= 86_400 {
    1.0
  } else {
    (1.0 - (features.age_s - 86_400) as f64 / (7.0 * 86_400.0)).max(0.6)
  };

  let aud = (features.active_viewers as f64 / 50.0).min(1.0);

  100.0 * rec * (0.4 * s_l + 0.4 * s_c + 0.2 * aud)
}

/// Comment Quality (spec.md §4.4). `commenter_vts` is the resolved VTS of
/// each distinct commenter (one entry per unique `user_id`, matching
/// `unique_commenters` in `VideoFeatures` — a deliberate reading of the
/// spec's "mean(VTS(commenter))" as a per-user average rather than a
/// per-comment-event average; see DESIGN.md).
pub fn comment_quality(features: &VideoFeatures, commenter_vts: &[f64]) -> f64 {
  let unique_rate = features.unique_commenters as f64 / features.comments.max(1) as f64;
  let avg_vts = mean(commenter_vts) / 100.0;
  100.0 * (0.5 * unique_rate + 0.5 * avg_vts)
}

/// Like Integrity (spec.md §4.4). `liker_vts` mirrors `comment_quality`'s
/// convention: one VTS per distinct liker.
pub fn like_integrity(features: &VideoFeatures, liker_vts: &[f64]) -> f64 {
  let base = mean(liker_vts) / 100.0;
  let nat = match features.inter_arrival_cv {
    Some(cv) => clamp(cv / 0.6, 0.0, 1.0),
    None => 0.7,
  };
  let clus_raw = features
    .device_concentration_top_share
    .max(features.ip_concentration_top_share)
    - 0.2;
  let clus = clamp(clus_raw, 0.0, 0.6) / 0.6;

  100.0 * (0.5 * base + 0.3 * nat - 0.4 * clus + 0.1).max(0.0)
}

/// Report Credibility (spec.md §4.4). `reporter_vts` is the VTS of every
/// report event (one entry per event, not deduped — repeat reports from the
/// same user should weigh the mass more, matching "weighted report mass").
pub fn report_credibility(features: &VideoFeatures, reporter_vts: &[f64]) -> f64 {
  let w: f64 = reporter_vts.iter().map(|v| v / 100.0).sum();
  let denom = (5.0_f64).max(0.05 * features.views as f64);
  (100.0 * (1.0 - w / denom)).max(0.0)
}

/// Blend the four component scores into a final EIS, with creator-trust
/// modulation (spec.md §4.4 "Blend").
pub fn blend_eis(
  authentic_engagement: f64,
  comment_quality: f64,
  like_integrity: f64,
  report_credibility: f64,
  creator_trust_score: Option<f64>,
) -> f64 {
  let raw = 0.40 * authentic_engagement
    + 0.25 * comment_quality
    + 0.20 * like_integrity
    + 0.15 * report_credibility;

  let modulated = match creator_trust_score {
    Some(score) => raw * clamp(0.95 + (score - 50.0) / 1000.0, 0.95, 1.05),
    None => raw,
  };

  clamp(modulated, 0.0, 100.0)
}

pub fn score_video(
  features: &VideoFeatures,
  commenter_vts: &[f64],
  liker_vts: &[f64],
  reporter_vts: &[f64],
  creator_trust_score: Option<f64>,
) -> EisComponents {
  let ae = authentic_engagement(features);
  let cq = comment_quality(features, commenter_vts);
  let li = like_integrity(features, liker_vts);
  let rc = report_credibility(features, reporter_vts);
  let eis = blend_eis(ae, cq, li, rc, creator_trust_score);

  EisComponents {
    authentic_engagement: ae,
    comment_quality: cq,
    like_integrity: li,
    report_credibility: rc,
    eis,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_features() -> VideoFeatures {
    VideoFeatures {
      views: 100,
      likes: 20,
      comments: 5,
      reports: 0,
      shares: 0,
      active_viewers: 50,
      unique_commenters: 5,
      unique_likers: 20,
      device_concentration_top_share: 0.1,
      ip_concentration_top_share: 0.1,
      users_per_device: 1,
      users_per_ip: 1,
      inter_arrival_cv: Some(0.6),
      duration_s: 60,
      age_s: 3_600,
      recency_s: 60,
    }
  }

  #[test]
  fn authentic_engagement_scenario_one_video_a() {
    // spec.md §8 scenario 1, V1: 100 views / 20 likes / 5 comments.
    let f = base_features();
    let ae = authentic_engagement(&f);
    // target_lpv=0.08*(15/60)=0.02, lpv=0.2 -> s_l capped at 1.0
    // target_cpv=0.02*(15/60)=0.005, cpv=0.05 -> s_c capped at 1.0
    // aud=min(1,50/50)=1.0, rec=1.0 (age<=86400)
    // AE = 100*(0.4+0.4+0.2) = 100
    assert!((ae - 100.0).abs() < 1e-6);
  }

  #[test]
  fn authentic_engagement_scenario_one_video_b() {
    // V2: 100 views / 2 likes / 0 comments -> EIS=20 per spec narrative.
    let mut f = base_features();
    f.likes = 2;
    f.comments = 0;
    let ae = authentic_engagement(&f);
    // lpv=0.02 -> s_l=min(1,0.02/0.02)=1.0; cpv=0 -> s_c=0
    // AE = 100*(0.4*1.0 + 0.4*0 + 0.2*1.0) = 60
    assert!((ae - 60.0).abs() < 1e-6);
  }

  #[test]
  fn recency_decays_after_one_day() {
    let mut f = base_features();
    f.age_s = 86_400 + 7 * 86_400; // exactly one decay period past the grace window
    let ae_recent = authentic_engagement(&{
      let mut f2 = f.clone();
      f2.age_s = 0;
      f2
    });
    let ae_old = authentic_engagement(&f);
    assert!(ae_old < ae_recent);
    // floor at 0.6 recency factor.
    f.age_s = 86_400 + 100 * 86_400;
    let ae_floor = authentic_engagement(&f);
    assert!(ae_floor >= 0.6 * 60.0 - 1e-6);
  }

  #[test]
  fn like_integrity_penalizes_device_clustering() {
    // spec.md §8 scenario 5: top_share=0.5 -> clus=0.5, -20 points vs uniform.
    let mut f = base_features();
    f.device_concentration_top_share = 0.5;
    f.ip_concentration_top_share = 0.0;
    f.inter_arrival_cv = Some(0.6);
    let vts = vec![100.0; 20];
    let li_clustered = like_integrity(&f, &vts);

    f.device_concentration_top_share = 0.2;
    let li_uniform = like_integrity(&f, &vts);

    assert!((li_uniform - li_clustered - 20.0).abs() < 1e-6);
  }

  #[test]
  fn report_credibility_drops_with_trusted_report_mass() {
    let f = base_features();
    let rc_no_reports = report_credibility(&f, &[]);
    assert!((rc_no_reports - 100.0).abs() < 1e-6);

    let reporters = vec![100.0; 20]; // w = 20, denom = max(5, 0.05*100)=5
    let rc_many_reports = report_credibility(&f, &reporters);
    assert!(rc_many_reports < rc_no_reports);
    assert!(rc_many_reports >= 0.0);
  }

  #[test]
  fn blend_applies_creator_trust_modulation() {
    let base = blend_eis(80.0, 80.0, 80.0, 80.0, None);
    let boosted = blend_eis(80.0, 80.0, 80.0, 80.0, Some(100.0));
    let penalized = blend_eis(80.0, 80.0, 80.0, 80.0, Some(0.0));
    assert!(boosted > base);
    assert!(penalized < base);
    assert!(boosted <= 100.0);
  }

  #[test]
  fn eis_clamped_to_0_100() {
    let eis = blend_eis(1000.0, 1000.0, 1000.0, 1000.0, Some(100.0));
    assert!(eis <= 100.0);
  }
}
