//! Feature Extractor (spec.md §4.2). Pure function over an event slice for a
//! single `(video_id, window)` — no I/O, unit-tested the way the teacher
//! tests `decision_engine::compute_decision` and `replay_gate::
//! compute_metrics`: construct fixture rows, call the pure function, assert.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{Event, EventType, VideoFeatures, VideoMeta};

fn mean(values: &[f64]) -> f64 {
  if values.is_empty() {
    0.0
  } else {
    values.iter().sum::<f64>() / values.len() as f64
  }
}

fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
  if values.len() < 2 {
    return None;
  }
  let m = mean(values);
  if m <= 0.0 {
    return None;
  }
  let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
  Some(variance.sqrt() / m)
}

/// Max fraction of a set of (likes) sharing one key, ignoring `None` keys
/// for the numerator but counting them in the denominator (spec.md §4.2).
fn top_share(keys: &[Option<&str>]) -> f64 {
  let denom = keys.len();
  if denom == 0 {
    return 0.0;
  }
  let mut counts: HashMap<&str, i64> = HashMap::new();
  for k in keys.iter().flatten() {
    *counts.entry(*k).or_insert(0) += 1;
  }
  let top = counts.values().copied().max().unwrap_or(0);
  top as f64 / denom as f64
}

fn max_users_per_key<'a>(keys_and_users: &[(Option<&'a str>, i64)]) -> i64 {
  let mut by_key: HashMap<&str, HashSet<i64>> = HashMap::new();
  for (k, user_id) in keys_and_users {
    if let Some(k) = k {
      by_key.entry(k).or_default().insert(*user_id);
    }
  }
  by_key.values().map(|s| s.len() as i64).max().unwrap_or(0)
}

pub fn extract_features(
  video: &VideoMeta,
  events: &[Event],
  window_end: DateTime<Utc>,
) -> VideoFeatures {
  let mut views = 0i64;
  let mut likes = 0i64;
  let mut comments = 0i64;
  let mut reports = 0i64;
  let mut shares = 0i64;

  let mut active_viewers: HashSet<i64> = HashSet::new();
  let mut commenters: HashSet<i64> = HashSet::new();
  let mut likers: HashSet<i64> = HashSet::new();

  let mut like_device_ids: Vec<Option<&str>> = Vec::new();
  let mut like_ip_hashes: Vec<Option<&str>> = Vec::new();
  let mut like_device_users: Vec<(Option<&str>, i64)> = Vec::new();
  let mut like_ip_users: Vec<(Option<&str>, i64)> = Vec::new();
  let mut like_ts: Vec<DateTime<Utc>> = Vec::new();

  let mut max_ts: Option<DateTime<Utc>> = None;

  for e in events {
    active_viewers.insert(e.user_id);
    max_ts = Some(max_ts.map_or(e.ts, |m| m.max(e.ts)));

    match e.event_type {
      EventType::View => views += 1,
      EventType::Like => {
        likes += 1;
        likers.insert(e.user_id);
        like_device_ids.push(e.device_id.as_deref());
        like_ip_hashes.push(e.ip_hash.as_deref());
        like_device_users.push((e.device_id.as_deref(), e.user_id));
        like_ip_users.push((e.ip_hash.as_deref(), e.user_id));
        like_ts.push(e.ts);
      }
      EventType::Comment => {
        comments += 1;
        commenters.insert(e.user_id);
      }
      EventType::Report => reports += 1,
      EventType::Share => shares += 1,
      EventType::Follow | EventType::Pause => {}
    }
  }

  like_ts.sort();
  let gaps: Vec<f64> = like_ts
    .windows(2)
    .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
    .collect();
  let inter_arrival_cv = if like_ts.len() < 3 {
    None
  } else {
    coefficient_of_variation(&gaps)
  };

  let recency_s = max_ts.map(|m| (window_end - m).num_seconds()).unwrap_or(i64::MAX);
  let age_s = (window_end - video.created_at).num_seconds().max(0);

  VideoFeatures {
    views,
    likes,
    comments,
    reports,
    shares,
    active_viewers: active_viewers.len() as i64,
    unique_commenters: commenters.len() as i64,
    unique_likers: likers.len() as i64,
    device_concentration_top_share: top_share(&like_device_ids),
    ip_concentration_top_share: top_share(&like_ip_hashes),
    users_per_device: max_users_per_key(&like_device_users),
    users_per_ip: max_users_per_key(&like_ip_users),
    inter_arrival_cv,
    duration_s: video.duration_s,
    age_s,
    recency_s,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn ev(id: i64, video_id: i64, user_id: i64, kind: EventType, ts_offset_s: i64) -> Event {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Event {
      event_id: id,
      video_id,
      user_id,
      event_type: kind,
      ts: base + chrono::Duration::seconds(ts_offset_s),
      device_id: None,
      ip_hash: None,
    }
  }

  fn meta() -> VideoMeta {
    VideoMeta {
      video_id: 1,
      creator_id: 10,
      created_at: Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
      duration_s: 60,
    }
  }

  #[test]
  fn counts_events_by_type() {
    let events = vec![
      ev(1, 1, 100, EventType::View, 0),
      ev(2, 1, 100, EventType::Like, 1),
      ev(3, 1, 101, EventType::View, 2),
      ev(4, 1, 102, EventType::Comment, 3),
      ev(5, 1, 103, EventType::Report, 4),
      ev(6, 1, 104, EventType::Share, 5),
    ];
    let window_end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
    let f = extract_features(&meta(), &events, window_end);
    assert_eq!(f.views, 2);
    assert_eq!(f.likes, 1);
    assert_eq!(f.comments, 1);
    assert_eq!(f.reports, 1);
    assert_eq!(f.shares, 1);
    assert_eq!(f.active_viewers, 5);
  }

  #[test]
  fn fewer_than_three_likes_yields_missing_inter_arrival_cv() {
    let events = vec![
      ev(1, 1, 100, EventType::Like, 0),
      ev(2, 1, 101, EventType::Like, 10),
    ];
    let window_end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
    let f = extract_features(&meta(), &events, window_end);
    assert!(f.inter_arrival_cv.is_none());
  }

  #[test]
  fn device_concentration_ignores_none_in_numerator_but_counts_in_denominator() {
    let mut events = vec![];
    for i in 0..4 {
      events.push(Event {
        event_id: i,
        video_id: 1,
        user_id: 100 + i,
        event_type: EventType::Like,
        ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(i),
        device_id: if i < 2 { Some("dev-a".to_string()) } else { None },
        ip_hash: None,
      });
    }
    let window_end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
    let f = extract_features(&meta(), &events, window_end);
    // 2 likes share dev-a out of 4 total likes.
    assert!((f.device_concentration_top_share - 0.5).abs() < 1e-9);
  }
}
