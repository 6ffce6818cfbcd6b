use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the five raw viewer actions plus the two auxiliary kinds the
/// storage schema also carries (`follow`, `pause`). Stored as `VARCHAR` in
/// the `event` table, matching how the teacher stores small enums
/// (`job_tasks.status`, alert kinds) rather than native DB enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum EventType {
  View,
  Like,
  Comment,
  Share,
  Report,
  Follow,
  Pause,
}

/// Normalized KYC tier. Raw storage is `kyc_level INT NULL`; `NULL` and `0`
/// both collapse to `Unverified` per spec.md's cap table
/// (`{0: 0, NULL: 0, 1: 5_000, 2: 50_000, >=3: +inf}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KycLevel {
  Unverified,
  Tier1,
  Tier2,
  Tier3Plus,
}

impl KycLevel {
  pub fn from_raw(level: Option<i32>) -> Self {
    match level {
      None | Some(0) => KycLevel::Unverified,
      Some(1) => KycLevel::Tier1,
      Some(2) => KycLevel::Tier2,
      Some(_) => KycLevel::Tier3Plus,
    }
  }

  /// Per-run cap in cents, `None` meaning unbounded.
  pub fn cap_cents(self, caps: &crate::config::KycCaps) -> Option<i64> {
    match self {
      KycLevel::Unverified => Some(0),
      KycLevel::Tier1 => Some(caps.tier1),
      KycLevel::Tier2 => Some(caps.tier2),
      KycLevel::Tier3Plus => None,
    }
  }

  pub fn is_excluded(self) -> bool {
    matches!(self, KycLevel::Unverified)
  }
}

#[derive(Debug, Clone)]
pub struct User {
  pub id: i64,
  pub is_creator: bool,
  pub likely_bot: bool,
  pub kyc_level: Option<i32>,
  pub creator_trust_score: Option<f64>,
  pub viewer_trust_score: Option<f64>,
  pub current_balance_cents: i64,
}

/// Subset of `User` the Trust Resolver and Allocator need, resolved once per
/// window by the Event Window Reader rather than re-queried per video.
#[derive(Debug, Clone, Copy)]
pub struct UserTrustFields {
  pub likely_bot: bool,
  pub kyc_level: Option<i32>,
  pub creator_trust_score: Option<f64>,
  pub viewer_trust_score: Option<f64>,
}

impl From<&User> for UserTrustFields {
  fn from(u: &User) -> Self {
    UserTrustFields {
      likely_bot: u.likely_bot,
      kyc_level: u.kyc_level,
      creator_trust_score: u.creator_trust_score,
      viewer_trust_score: u.viewer_trust_score,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Video {
  pub id: i64,
  pub creator_id: i64,
  pub created_at: DateTime<Utc>,
  pub duration_s: i64,
  pub eis_current: f64,
  pub eis_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoMeta {
  pub video_id: i64,
  pub creator_id: i64,
  pub created_at: DateTime<Utc>,
  pub duration_s: i64,
}

impl From<&Video> for VideoMeta {
  fn from(v: &Video) -> Self {
    VideoMeta {
      video_id: v.id,
      creator_id: v.creator_id,
      created_at: v.created_at,
      duration_s: v.duration_s,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Event {
  pub event_id: i64,
  pub video_id: i64,
  pub user_id: i64,
  pub event_type: EventType,
  pub ts: DateTime<Utc>,
  pub device_id: Option<String>,
  pub ip_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFeatures {
  pub views: i64,
  pub likes: i64,
  pub comments: i64,
  pub reports: i64,
  pub shares: i64,
  pub active_viewers: i64,
  pub unique_commenters: i64,
  pub unique_likers: i64,
  pub device_concentration_top_share: f64,
  pub ip_concentration_top_share: f64,
  pub users_per_device: i64,
  pub users_per_ip: i64,
  pub inter_arrival_cv: Option<f64>,
  pub duration_s: i64,
  pub age_s: i64,
  pub recency_s: i64,
}

#[derive(Debug, Clone)]
pub struct EisComponents {
  pub authentic_engagement: f64,
  pub comment_quality: f64,
  pub like_integrity: f64,
  pub report_credibility: f64,
  pub eis: f64,
}

#[derive(Debug, Clone)]
pub struct VideoAggregate {
  pub video_id: i64,
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub features: VideoFeatures,
  pub components: EisComponents,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngUnits {
  pub views: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
}

impl EngUnits {
  pub fn weighted_total(&self, weights: &crate::config::EventWeights) -> i64 {
    self.views * weights.view as i64
      + self.likes * weights.like as i64
      + self.comments * weights.comment as i64
      + self.shares * weights.share as i64
  }
}

#[derive(Debug, Clone, Copy)]
pub struct VideoValueUnits {
  pub video_id: i64,
  pub creator_id: i64,
  pub eng_units: i64,
  pub eis: f64,
  pub kicker_applied: bool,
  pub value_units: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreatorUnits {
  pub creator_id: i64,
  pub value_units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationExclusionReason {
  LikelyBot,
  KycUnverified,
}

#[derive(Debug, Clone)]
pub struct CreatorAllocation {
  pub creator_id: i64,
  pub raw_units: f64,
  pub multiplier: f64,
  pub weighted_units: f64,
  pub allocated_cents: i64,
  pub capped: bool,
  pub excluded: Option<AllocationExclusionReason>,
}

#[derive(Debug, Clone)]
pub struct VideoRevShareRow {
  pub revenue_window_id: i64,
  pub video_id: i64,
  pub creator_id: i64,
  pub eng_units: i64,
  pub eis_avg: f64,
  pub value_units: f64,
  pub share_pct: f64,
  pub allocated_cents: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct RevenueWindowParams {
  pub gross_revenue_cents: i64,
  pub taxes_cents: i64,
  pub fees_cents: i64,
  pub refunds_cents: i64,
  pub costs_est_cents: i64,
}

#[derive(Debug, Clone)]
pub struct RevenueWindowSummary {
  pub revenue_window_id: i64,
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub creator_pool_cents: i64,
  pub allocated_cents: i64,
  pub unallocated_cents: i64,
  pub reserve_cents: i64,
  pub creators_paid: usize,
  pub creators_excluded: usize,
  pub dry_run: bool,
}
