//! Aggregate Writer (spec.md §4.5) plus the Feature Extractor -> Trust
//! Resolver -> EIS Scorer composition that produces what gets written.

use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::errors::CoreResult;
use crate::eis;
use crate::features::extract_features;
use crate::trust::resolve_vts;
use crate::types::{Event, EisComponents, UserTrustFields, VideoFeatures, VideoMeta};
use crate::{db, event_reader::WindowSnapshot};

/// Compose Feature Extractor + Trust Resolver + EIS Scorer for one video's
/// events in a window, without touching storage (used by `analyze_window`
/// and by the Unit Builder's on-demand aggregate computation).
pub fn compute_aggregate(
  video: &VideoMeta,
  events: &[Event],
  window_end: DateTime<Utc>,
  users: &std::collections::HashMap<i64, UserTrustFields>,
) -> (VideoFeatures, EisComponents) {
  let features = extract_features(video, events, window_end);

  let creator_vts = users.get(&video.creator_id).map(resolve_vts);

  let commenter_vts = distinct_user_vts(events, users, |e| {
    matches!(e.event_type, crate::types::EventType::Comment)
  });
  let liker_vts = distinct_user_vts(events, users, |e| {
    matches!(e.event_type, crate::types::EventType::Like)
  });
  let reporter_vts: Vec<f64> = events
    .iter()
    .filter(|e| matches!(e.event_type, crate::types::EventType::Report))
    .map(|e| users.get(&e.user_id).map(resolve_vts).unwrap_or(50.0))
    .collect();

  let components = eis::score_video(&features, &commenter_vts, &liker_vts, &reporter_vts, creator_vts);

  (features, components)
}

fn distinct_user_vts(
  events: &[Event],
  users: &std::collections::HashMap<i64, UserTrustFields>,
  matches_kind: impl Fn(&Event) -> bool,
) -> Vec<f64> {
  let mut seen = std::collections::HashSet::new();
  events
    .iter()
    .filter(|e| matches_kind(e))
    .filter(|e| seen.insert(e.user_id))
    .map(|e| users.get(&e.user_id).map(resolve_vts).unwrap_or(50.0))
    .collect()
}

/// Compute and persist the aggregate for one video's window (spec.md §4.5).
pub async fn write_aggregate_for_video(
  pool: &MySqlPool,
  video: &VideoMeta,
  events: &[Event],
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  users: &std::collections::HashMap<i64, UserTrustFields>,
) -> CoreResult<EisComponents> {
  let (features, components) = compute_aggregate(video, events, window_end, users);
  let features_json = serde_json::to_value(&features).unwrap_or(serde_json::Value::Null);

  db::write_video_aggregate(pool, video.video_id, window_start, window_end, &features_json, &components).await?;

  tracing::debug!(
    video_id = video.video_id,
    window_start = %window_start,
    window_end = %window_end,
    eis = components.eis,
    "wrote video aggregate"
  );

  Ok(components)
}

/// Fetch an existing aggregate for `(video_id, window)` if one exists,
/// otherwise compute and persist it on demand (spec.md §4.6 step 2 /
/// §7 "Local recovery").
pub async fn fetch_or_compute_aggregate(
  pool: &MySqlPool,
  video: &VideoMeta,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  snapshot: &WindowSnapshot,
) -> CoreResult<EisComponents> {
  if let Some(existing) = db::fetch_existing_aggregate(pool, video.video_id, window_start, window_end).await? {
    return Ok(existing.components);
  }

  let empty = Vec::new();
  let events = snapshot.events_by_video.get(&video.video_id).unwrap_or(&empty);
  write_aggregate_for_video(pool, video, events, window_start, window_end, &snapshot.users).await
}
