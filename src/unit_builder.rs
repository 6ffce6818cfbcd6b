//! Unit Builder (spec.md §4.6). For a run window, computes per-video
//! EngUnits, applies EIS weighting and the early-velocity kicker, and
//! accumulates per-creator ValueUnits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use tokio::sync::Semaphore;

use crate::aggregate_writer::fetch_or_compute_aggregate;
use crate::config::Parameters;
use crate::errors::CoreResult;
use crate::event_reader::{read_window, WindowSnapshot};
use crate::types::{CreatorUnits, EngUnits, Event, EventType, VideoMeta, VideoValueUnits};

fn eng_units_for(events: &[Event]) -> EngUnits {
  let mut e = EngUnits::default();
  for ev in events {
    match ev.event_type {
      EventType::View => e.views += 1,
      EventType::Like => e.likes += 1,
      EventType::Comment => e.comments += 1,
      EventType::Share => e.shares += 1,
      EventType::Report | EventType::Follow | EventType::Pause => {}
    }
  }
  e
}

/// Early-velocity kicker (spec.md §4.6 step 4), evaluated over the actual
/// first two hours after `video.created_at` regardless of where that
/// interval sits relative to the run window.
fn early_kicker_events(events: &[Event], params: &Parameters) -> (bool, i64) {
  let views: Vec<&Event> = events.iter().filter(|e| e.event_type == EventType::View).collect();
  let early_views = views.len() as i64;

  if early_views < params.early_min_views {
    return (false, early_views);
  }

  let unique_devices: std::collections::HashSet<&str> =
    views.iter().filter_map(|e| e.device_id.as_deref()).collect();
  let unique_ips: std::collections::HashSet<&str> = views.iter().filter_map(|e| e.ip_hash.as_deref()).collect();

  let device_ok = unique_devices.len() as f64 >= params.early_device_frac * early_views as f64;
  let ip_ok = unique_ips.len() as f64 >= params.early_ip_frac * early_views as f64;

  (device_ok && ip_ok, early_views)
}

pub struct UnitBuilderOutput {
  pub per_video: Vec<VideoValueUnits>,
  pub per_creator: Vec<CreatorUnits>,
}

/// Per-video ValueUnits computation (spec.md §4.6 steps 2-5), isolated so it
/// can be fanned out across videos with no shared mutable state besides the
/// pool (spec.md §5).
async fn value_units_for_video(
  pool: MySqlPool,
  snapshot: Arc<WindowSnapshot>,
  video_id: i64,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  params: Parameters,
) -> CoreResult<Option<VideoValueUnits>> {
  let video: VideoMeta = match snapshot.videos.get(&video_id) {
    Some(v) => *v,
    None => return Ok(None),
  };
  let empty = Vec::new();
  let events = snapshot.events_by_video.get(&video_id).unwrap_or(&empty);

  let eng_units = eng_units_for(events);
  let eng_units_weighted = eng_units.weighted_total(&params.event_weights);

  let components = fetch_or_compute_aggregate(&pool, &video, window_start, window_end, &snapshot).await?;

  let early_window_end = video.created_at + chrono::Duration::hours(2);
  let early_snapshot = read_window(&pool, video.created_at, early_window_end, Some(video_id), &params).await?;
  let early_events = early_snapshot.events_by_video.get(&video_id).unwrap_or(&empty);
  let (kicker_applied, _early_views) = early_kicker_events(early_events, &params);
  let kicker = if kicker_applied { params.early_kicker } else { 1.0 };

  let value_units = eng_units_weighted as f64 * (components.eis / 100.0).powf(params.gamma) * kicker;

  Ok(Some(VideoValueUnits {
    video_id,
    creator_id: video.creator_id,
    eng_units: eng_units_weighted,
    eis: components.eis,
    kicker_applied,
    value_units,
  }))
}

/// Compute per-creator units for a run window (spec.md §4.6). `window_start`
/// / `window_end` need not be a calendar day — the Revenue Window Finalizer
/// drives this over an arbitrary `[start, end)`. Per-video ValueUnits
/// computation is fanned out across videos (spec.md §5: "may run
/// concurrently across videos within one window run; no shared mutable state
/// other than the storage layer"), bounded by
/// `Parameters::max_concurrent_videos` via a `tokio::task::JoinSet` guarded
/// by a semaphore, each task owning its own pool checkout.
pub async fn build_units(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  params: &Parameters,
) -> CoreResult<UnitBuilderOutput> {
  let snapshot = Arc::new(read_window(pool, window_start, window_end, None, params).await?);
  let video_ids: Vec<i64> = snapshot.events_by_video.keys().copied().collect();

  let semaphore = Arc::new(Semaphore::new(params.max_concurrent_videos.max(1)));
  let mut set = tokio::task::JoinSet::new();

  for video_id in video_ids {
    let pool = pool.clone();
    let snapshot = Arc::clone(&snapshot);
    let semaphore = Arc::clone(&semaphore);
    let params = *params;

    set.spawn(async move {
      let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
      value_units_for_video(pool, snapshot, video_id, window_start, window_end, params).await
    });
  }

  let mut per_video = Vec::with_capacity(set.len());
  let mut per_creator: HashMap<i64, f64> = HashMap::new();

  while let Some(joined) = set.join_next().await {
    let result = joined.expect("video value-units task panicked");
    if let Some(vu) = result? {
      *per_creator.entry(vu.creator_id).or_insert(0.0) += vu.value_units;
      per_video.push(vu);
    }
  }

  per_video.sort_by_key(|v| v.video_id);

  let mut per_creator: Vec<CreatorUnits> = per_creator
    .into_iter()
    .map(|(creator_id, value_units)| CreatorUnits { creator_id, value_units })
    .collect();
  per_creator.sort_by_key(|c| c.creator_id);

  Ok(UnitBuilderOutput { per_video, per_creator })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn ev(id: i64, kind: EventType, device: Option<&str>, ip: Option<&str>, ts_offset_s: i64) -> Event {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Event {
      event_id: id,
      video_id: 1,
      user_id: id,
      event_type: kind,
      ts: base + chrono::Duration::seconds(ts_offset_s),
      device_id: device.map(str::to_string),
      ip_hash: ip.map(str::to_string),
    }
  }

  #[test]
  fn eng_units_weights_views_likes_comments_shares() {
    // spec.md §8 scenario 1, V1: 100 views/20 likes/5 comments -> EngUnits=185.
    let mut events = Vec::new();
    for i in 0..100 {
      events.push(ev(i, EventType::View, None, None, i));
    }
    for i in 0..20 {
      events.push(ev(1000 + i, EventType::Like, None, None, i));
    }
    for i in 0..5 {
      events.push(ev(2000 + i, EventType::Comment, None, None, i));
    }
    let weights = Parameters::default().event_weights;
    let eng = eng_units_for(&events);
    assert_eq!(eng.weighted_total(&weights), 185);
  }

  #[test]
  fn early_kicker_triggers_on_diverse_early_traffic() {
    // spec.md §8 scenario 6: 60 views, 40 devices (0.67>=0.5), 30 ips (0.5>=0.4).
    let params = Parameters::default();
    let mut events = Vec::new();
    for i in 0..60 {
      let device = format!("dev-{}", i % 40);
      let ip = format!("ip-{}", i % 30);
      events.push(ev(i, EventType::View, Some(&device), Some(&ip), i));
    }
    let (applied, early_views) = early_kicker_events(&events, &params);
    assert!(applied);
    assert_eq!(early_views, 60);
  }

  #[test]
  fn early_kicker_requires_minimum_views() {
    let params = Parameters::default();
    let events: Vec<Event> = (0..10)
      .map(|i| ev(i, EventType::View, Some("dev"), Some("ip"), i))
      .collect();
    let (applied, _) = early_kicker_events(&events, &params);
    assert!(!applied);
  }
}
