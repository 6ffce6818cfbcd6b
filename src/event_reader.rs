//! Event Window Reader (spec.md §4.1). Pages events for `[start, end)` in
//! fixed-size batches and resolves the auxiliary user/video maps alongside,
//! so downstream Feature Extractor / EIS Scorer calls never re-query.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::config::Parameters;
use crate::db;
use crate::errors::CoreResult;
use crate::types::{Event, UserTrustFields, VideoMeta};

pub struct WindowSnapshot {
  pub events_by_video: HashMap<i64, Vec<Event>>,
  pub users: HashMap<i64, UserTrustFields>,
  pub videos: HashMap<i64, VideoMeta>,
}

/// Fetch every event in `[window_start, window_end)` (optionally scoped to
/// one video), paging in batches of `Parameters::event_page_size` rows to
/// bound memory on large windows (spec.md §4.1).
pub async fn read_window(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  video_filter: Option<i64>,
  params: &Parameters,
) -> CoreResult<WindowSnapshot> {
  let mut events_by_video: HashMap<i64, Vec<Event>> = HashMap::new();
  let mut user_ids: std::collections::HashSet<i64> = std::collections::HashSet::new();
  let mut video_ids: std::collections::HashSet<i64> = std::collections::HashSet::new();

  let mut offset = 0i64;
  loop {
    let page = db::fetch_event_page(
      pool,
      window_start,
      window_end,
      video_filter,
      params.event_page_size,
      offset,
    )
    .await?;

    let page_len = page.len() as i64;
    for event in page {
      user_ids.insert(event.user_id);
      video_ids.insert(event.video_id);
      events_by_video.entry(event.video_id).or_default().push(event);
    }

    if page_len < params.event_page_size {
      break;
    }
    offset += params.event_page_size;
  }

  let user_ids: Vec<i64> = user_ids.into_iter().collect();
  let video_ids: Vec<i64> = video_ids.into_iter().collect();

  let users = db::fetch_user_trust_fields(pool, &user_ids).await?;
  let videos = db::fetch_video_meta_batch(pool, &video_ids).await?;

  Ok(WindowSnapshot {
    events_by_video,
    users,
    videos,
  })
}
