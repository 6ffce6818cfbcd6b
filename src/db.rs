//! Storage layer: schema bootstrap + queries for the tables in spec.md §3/§6.
//! Pool bootstrap, idempotent `CREATE TABLE IF NOT EXISTS`, and the
//! bind-and-map-err-to-`CoreError` idiom all follow the teacher's `db.rs`.

use chrono::{DateTime, Utc};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool, Row};
use std::collections::HashMap;
use tokio::sync::OnceCell;

use crate::errors::{classify_storage_error, CoreError, CoreResult};
use crate::types::{Event, EventType, UserTrustFields, VideoMeta};

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

async fn ensure_schema(pool: &MySqlPool) -> CoreResult<()> {
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        is_creator BOOLEAN NOT NULL DEFAULT FALSE,
        likely_bot BOOLEAN NOT NULL DEFAULT FALSE,
        kyc_level INT NULL,
        creator_trust_score DOUBLE NULL,
        viewer_trust_score DOUBLE NULL,
        current_balance_cents BIGINT NOT NULL DEFAULT 0,
        CHECK (current_balance_cents >= 0)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS videos (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        creator_id BIGINT NOT NULL,
        created_at TIMESTAMP(3) NOT NULL,
        duration_s BIGINT NOT NULL,
        eis_current DOUBLE NOT NULL DEFAULT 0,
        eis_updated_at TIMESTAMP(3) NULL,
        KEY idx_videos_creator (creator_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS event (
        event_id BIGINT PRIMARY KEY AUTO_INCREMENT,
        video_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        event_type VARCHAR(16) NOT NULL,
        ts TIMESTAMP(3) NOT NULL,
        device_id VARCHAR(128) NULL,
        ip_hash VARCHAR(128) NULL,
        KEY idx_event_video_ts (video_id, ts)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS video_aggregates (
        video_id BIGINT NOT NULL,
        window_start TIMESTAMP(3) NOT NULL,
        window_end TIMESTAMP(3) NOT NULL,
        features JSON NOT NULL,
        comment_quality DOUBLE NOT NULL,
        like_integrity DOUBLE NOT NULL,
        report_credibility DOUBLE NOT NULL,
        authentic_engagement DOUBLE NOT NULL,
        eis DOUBLE NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_video_aggregates_window (video_id, window_start, window_end),
        KEY idx_video_aggregates_end (video_id, window_end)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS revenue_windows (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        window_start TIMESTAMP(3) NOT NULL,
        window_end TIMESTAMP(3) NOT NULL,
        payment_type VARCHAR(32) NOT NULL,
        gross_revenue_cents BIGINT NOT NULL,
        taxes_cents BIGINT NOT NULL,
        fees_cents BIGINT NOT NULL,
        refunds_cents BIGINT NOT NULL,
        pool_pct DOUBLE NOT NULL,
        margin_target DOUBLE NOT NULL,
        platform_fee_pct DOUBLE NOT NULL,
        risk_reserve_pct DOUBLE NOT NULL,
        costs_est_cents BIGINT NOT NULL,
        creator_pool_cents BIGINT NOT NULL,
        unallocated_cents BIGINT NOT NULL DEFAULT 0,
        reserve_cents BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(16) NOT NULL DEFAULT 'finalized',
        meta JSON NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_revenue_windows_key (window_start, window_end, payment_type)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS revenue_window_locks (
        window_start TIMESTAMP(3) NOT NULL,
        window_end TIMESTAMP(3) NOT NULL,
        payment_type VARCHAR(32) NOT NULL,
        locked_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        PRIMARY KEY (window_start, window_end, payment_type)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS video_rev_shares (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        revenue_window_id BIGINT NOT NULL,
        video_id BIGINT NOT NULL,
        eng_units BIGINT NOT NULL,
        eis_avg DOUBLE NOT NULL,
        vu DOUBLE NOT NULL,
        share_pct DOUBLE NOT NULL,
        allocated_cents BIGINT NOT NULL,
        meta JSON NULL,
        KEY idx_video_rev_shares_window (revenue_window_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS transactions (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        recipient BIGINT NOT NULL,
        amount_cents BIGINT NOT NULL,
        payment_type VARCHAR(32) NOT NULL,
        status VARCHAR(16) NOT NULL,
        direction VARCHAR(8) NOT NULL,
        revenue_window_id BIGINT NULL,
        CHECK (amount_cents > 0),
        KEY idx_transactions_recipient (recipient),
        KEY idx_transactions_window (revenue_window_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  Ok(())
}

pub async fn get_pool(database_url: &str) -> CoreResult<&'static MySqlPool> {
  POOL
    .get_or_try_init(|| async {
      let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(classify_storage_error)?;

      ensure_schema(&pool).await?;
      Ok::<_, CoreError>(pool)
    })
    .await
}

/// Event Window Reader (spec.md §4.1): fetch one fixed-size page of events
/// ordered by `(video_id, ts, event_id)`, optionally restricted to a single
/// video. Plain OFFSET pagination is sufficient because the window is
/// always a closed, already-past `[start, end)` range — the row set cannot
/// grow mid-scan.
pub async fn fetch_event_page(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  video_id: Option<i64>,
  page_size: i64,
  offset: i64,
) -> CoreResult<Vec<Event>> {
  let rows = match video_id {
    Some(vid) => sqlx::query(
      r#"
        SELECT event_id, video_id, user_id, event_type, ts, device_id, ip_hash
        FROM event
        WHERE video_id = ? AND ts >= ? AND ts < ?
        ORDER BY video_id ASC, ts ASC, event_id ASC
        LIMIT ? OFFSET ?;
      "#,
    )
    .bind(vid)
    .bind(window_start)
    .bind(window_end)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(classify_storage_error)?,
    None => sqlx::query(
      r#"
        SELECT event_id, video_id, user_id, event_type, ts, device_id, ip_hash
        FROM event
        WHERE ts >= ? AND ts < ?
        ORDER BY video_id ASC, ts ASC, event_id ASC
        LIMIT ? OFFSET ?;
      "#,
    )
    .bind(window_start)
    .bind(window_end)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(classify_storage_error)?,
  };

  rows.iter().map(row_to_event).collect::<CoreResult<Vec<_>>>()
}

fn row_to_event(row: &sqlx::mysql::MySqlRow) -> CoreResult<Event> {
  let event_type_raw: String = row
    .try_get("event_type")
    .map_err(|e| CoreError::SchemaError(e.to_string()))?;
  let event_type = parse_event_type(&event_type_raw)?;

  Ok(Event {
    event_id: row.try_get("event_id").map_err(|e| CoreError::SchemaError(e.to_string()))?,
    video_id: row.try_get("video_id").map_err(|e| CoreError::SchemaError(e.to_string()))?,
    user_id: row.try_get("user_id").map_err(|e| CoreError::SchemaError(e.to_string()))?,
    event_type,
    ts: row.try_get("ts").map_err(|e| CoreError::SchemaError(e.to_string()))?,
    device_id: row.try_get("device_id").map_err(|e| CoreError::SchemaError(e.to_string()))?,
    ip_hash: row.try_get("ip_hash").map_err(|e| CoreError::SchemaError(e.to_string()))?,
  })
}

fn parse_event_type(raw: &str) -> CoreResult<EventType> {
  match raw {
    "view" => Ok(EventType::View),
    "like" => Ok(EventType::Like),
    "comment" => Ok(EventType::Comment),
    "share" => Ok(EventType::Share),
    "report" => Ok(EventType::Report),
    "follow" => Ok(EventType::Follow),
    "pause" => Ok(EventType::Pause),
    other => Err(CoreError::SchemaError(format!("unknown event_type: {other}"))),
  }
}

/// Resolve trust fields for a batch of users in one round trip, used by the
/// Event Window Reader to build the `user -> trust fields` map up front
/// (mirrors the teacher's pattern of resolving auxiliary lookups ahead of
/// the main report fetch).
pub async fn fetch_user_trust_fields(
  pool: &MySqlPool,
  user_ids: &[i64],
) -> CoreResult<HashMap<i64, UserTrustFields>> {
  if user_ids.is_empty() {
    return Ok(HashMap::new());
  }

  let placeholders = vec!["?"; user_ids.len()].join(",");
  let sql = format!(
    "SELECT id, likely_bot, kyc_level, creator_trust_score, viewer_trust_score FROM users WHERE id IN ({placeholders});"
  );

  let mut query = sqlx::query(&sql);
  for id in user_ids {
    query = query.bind(id);
  }

  let rows = query.fetch_all(pool).await.map_err(classify_storage_error)?;

  let mut out = HashMap::with_capacity(rows.len());
  for row in rows {
    let id: i64 = row.try_get("id").map_err(|e| CoreError::SchemaError(e.to_string()))?;
    out.insert(
      id,
      UserTrustFields {
        likely_bot: row.try_get("likely_bot").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        kyc_level: row.try_get("kyc_level").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        creator_trust_score: row
          .try_get("creator_trust_score")
          .map_err(|e| CoreError::SchemaError(e.to_string()))?,
        viewer_trust_score: row
          .try_get("viewer_trust_score")
          .map_err(|e| CoreError::SchemaError(e.to_string()))?,
      },
    );
  }
  Ok(out)
}

pub async fn fetch_video_meta_batch(
  pool: &MySqlPool,
  video_ids: &[i64],
) -> CoreResult<HashMap<i64, VideoMeta>> {
  if video_ids.is_empty() {
    return Ok(HashMap::new());
  }

  let placeholders = vec!["?"; video_ids.len()].join(",");
  let sql = format!("SELECT id, creator_id, created_at, duration_s FROM videos WHERE id IN ({placeholders});");

  let mut query = sqlx::query(&sql);
  for id in video_ids {
    query = query.bind(id);
  }

  let rows = query.fetch_all(pool).await.map_err(classify_storage_error)?;

  let mut out = HashMap::with_capacity(rows.len());
  for row in rows {
    let id: i64 = row.try_get("id").map_err(|e| CoreError::SchemaError(e.to_string()))?;
    out.insert(
      id,
      VideoMeta {
        video_id: id,
        creator_id: row.try_get("creator_id").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        duration_s: row.try_get("duration_s").map_err(|e| CoreError::SchemaError(e.to_string()))?,
      },
    );
  }
  Ok(out)
}

/// Resolves `CreatorContext` (spec.md §4.7 Step A inputs) for every user
/// flagged `is_creator`, used by operator CLIs to populate the Allocator's
/// creator-context map without the caller having to know which creators
/// earned units ahead of time (mirrors `fetch_user_trust_fields` above, but
/// scoped to `is_creator = true` and shaped for the Allocator rather than the
/// Trust Resolver).
pub async fn fetch_all_creator_contexts(
  pool: &MySqlPool,
) -> CoreResult<HashMap<i64, crate::allocator::CreatorContext>> {
  let rows = sqlx::query(
    r#"
      SELECT id, likely_bot, kyc_level, creator_trust_score
      FROM users
      WHERE is_creator = TRUE;
    "#,
  )
  .fetch_all(pool)
  .await
  .map_err(classify_storage_error)?;

  let mut out = HashMap::with_capacity(rows.len());
  for row in rows {
    let id: i64 = row.try_get("id").map_err(|e| CoreError::SchemaError(e.to_string()))?;
    out.insert(
      id,
      crate::allocator::CreatorContext {
        likely_bot: row.try_get("likely_bot").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        creator_trust_score: row
          .try_get("creator_trust_score")
          .map_err(|e| CoreError::SchemaError(e.to_string()))?,
        kyc_level: row.try_get("kyc_level").map_err(|e| CoreError::SchemaError(e.to_string()))?,
      },
    );
  }
  Ok(out)
}

/// Aggregate Writer (spec.md §4.5): idempotent replace on
/// `(video_id, window_start, window_end)`, and updates `videos.eis_current`
/// in the same transaction — the teacher's `ON DUPLICATE KEY UPDATE` idiom
/// from `db::upsert_video_daily_metric`.
pub async fn write_video_aggregate(
  pool: &MySqlPool,
  video_id: i64,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  features_json: &serde_json::Value,
  components: &crate::types::EisComponents,
) -> CoreResult<()> {
  let mut tx = pool.begin().await.map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      INSERT INTO video_aggregates
        (video_id, window_start, window_end, features, comment_quality, like_integrity, report_credibility, authentic_engagement, eis)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        features = VALUES(features),
        comment_quality = VALUES(comment_quality),
        like_integrity = VALUES(like_integrity),
        report_credibility = VALUES(report_credibility),
        authentic_engagement = VALUES(authentic_engagement),
        eis = VALUES(eis);
    "#,
  )
  .bind(video_id)
  .bind(window_start)
  .bind(window_end)
  .bind(features_json)
  .bind(components.comment_quality)
  .bind(components.like_integrity)
  .bind(components.report_credibility)
  .bind(components.authentic_engagement)
  .bind(components.eis)
  .execute(&mut *tx)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      UPDATE videos
      SET eis_current = ?, eis_updated_at = CURRENT_TIMESTAMP(3)
      WHERE id = ?;
    "#,
  )
  .bind(components.eis)
  .bind(video_id)
  .execute(&mut *tx)
  .await
  .map_err(classify_storage_error)?;

  tx.commit().await.map_err(classify_storage_error)?;
  Ok(())
}

pub struct ExistingAggregate {
  pub features_json: serde_json::Value,
  pub components: crate::types::EisComponents,
}

pub async fn fetch_existing_aggregate(
  pool: &MySqlPool,
  video_id: i64,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
) -> CoreResult<Option<ExistingAggregate>> {
  let row = sqlx::query(
    r#"
      SELECT features, comment_quality, like_integrity, report_credibility, authentic_engagement, eis
      FROM video_aggregates
      WHERE video_id = ? AND window_start = ? AND window_end = ?;
    "#,
  )
  .bind(video_id)
  .bind(window_start)
  .bind(window_end)
  .fetch_optional(pool)
  .await
  .map_err(classify_storage_error)?;

  match row {
    None => Ok(None),
    Some(row) => Ok(Some(ExistingAggregate {
      features_json: row.try_get("features").map_err(|e| CoreError::SchemaError(e.to_string()))?,
      components: crate::types::EisComponents {
        authentic_engagement: row
          .try_get("authentic_engagement")
          .map_err(|e| CoreError::SchemaError(e.to_string()))?,
        comment_quality: row.try_get("comment_quality").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        like_integrity: row.try_get("like_integrity").map_err(|e| CoreError::SchemaError(e.to_string()))?,
        report_credibility: row
          .try_get("report_credibility")
          .map_err(|e| CoreError::SchemaError(e.to_string()))?,
        eis: row.try_get("eis").map_err(|e| CoreError::SchemaError(e.to_string()))?,
      },
    })),
  }
}

/// Advisory lock for §5's "exclusive per `(start, end, payment_type)`"
/// requirement, grounded on the teacher's `job_tasks` claim flow: a unique
/// key insert that either succeeds (we hold the lock) or fails with a
/// duplicate-key error (someone else holds it).
pub async fn try_acquire_revenue_window_lock(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
) -> CoreResult<bool> {
  let result = sqlx::query(
    r#"
      INSERT INTO revenue_window_locks (window_start, window_end, payment_type)
      VALUES (?, ?, ?);
    "#,
  )
  .bind(window_start)
  .bind(window_end)
  .bind(payment_type)
  .execute(pool)
  .await;

  match result {
    Ok(_) => Ok(true),
    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
    Err(e) => Err(classify_storage_error(e)),
  }
}

pub async fn release_revenue_window_lock(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
) -> CoreResult<()> {
  sqlx::query(
    r#"
      DELETE FROM revenue_window_locks
      WHERE window_start = ? AND window_end = ? AND payment_type = ?;
    "#,
  )
  .bind(window_start)
  .bind(window_end)
  .bind(payment_type)
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;
  Ok(())
}

/// Looks up any existing `revenue_windows` row for this idempotency key,
/// returning its id and `status` ('pending' or 'finalized'). Callers must
/// check `status` themselves — a 'pending' row is not yet finalized and may
/// be a resumable placeholder left by an incomplete prior run (spec.md §4.8).
pub async fn revenue_window_status(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
) -> CoreResult<Option<(i64, String)>> {
  let row: Option<(i64, String)> = sqlx::query_as(
    r#"
      SELECT id, status FROM revenue_windows
      WHERE window_start = ? AND window_end = ? AND payment_type = ?;
    "#,
  )
  .bind(window_start)
  .bind(window_end)
  .bind(payment_type)
  .fetch_optional(pool)
  .await
  .map_err(classify_storage_error)?;

  Ok(row)
}

/// Flips a `revenue_windows` row to `status = 'finalized'`. Called as the
/// last statement in the same transaction as the Allocator Step D ledger
/// writes (`apply_allocations`), so a row only ever reaches 'finalized' once
/// its `transactions`/`video_rev_shares` rows are durably committed
/// alongside it — never before.
pub async fn mark_revenue_window_finalized(
  tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
  revenue_window_id: i64,
) -> CoreResult<()> {
  sqlx::query("UPDATE revenue_windows SET status = 'finalized' WHERE id = ?;")
    .bind(revenue_window_id)
    .execute(&mut **tx)
    .await
    .map_err(classify_storage_error)?;
  Ok(())
}

/// Records a margin-guardrail rejection (spec.md §4.8 step 2) against an
/// already-inserted placeholder row, rather than inserting a fresh one — used
/// when resuming a window that already has a 'pending' row from a prior run.
pub async fn mark_revenue_window_guardrail_failure(
  pool: &MySqlPool,
  revenue_window_id: i64,
  meta: &serde_json::Value,
) -> CoreResult<()> {
  sqlx::query(
    r#"
      UPDATE revenue_windows
      SET status = 'finalized', creator_pool_cents = 0, unallocated_cents = 0, reserve_cents = 0, meta = ?
      WHERE id = ?;
    "#,
  )
  .bind(meta)
  .bind(revenue_window_id)
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;
  Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_revenue_window(
  pool: &MySqlPool,
  window_start: DateTime<Utc>,
  window_end: DateTime<Utc>,
  payment_type: &str,
  params: &crate::types::RevenueWindowParams,
  pool_pct: f64,
  margin_target: f64,
  platform_fee_pct: f64,
  risk_reserve_pct: f64,
  creator_pool_cents: i64,
  unallocated_cents: i64,
  reserve_cents: i64,
  status: &str,
  meta: &serde_json::Value,
) -> CoreResult<i64> {
  let result = sqlx::query(
    r#"
      INSERT INTO revenue_windows
        (window_start, window_end, payment_type, gross_revenue_cents, taxes_cents, fees_cents,
         refunds_cents, pool_pct, margin_target, platform_fee_pct, risk_reserve_pct, costs_est_cents,
         creator_pool_cents, unallocated_cents, reserve_cents, status, meta)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
    "#,
  )
  .bind(window_start)
  .bind(window_end)
  .bind(payment_type)
  .bind(params.gross_revenue_cents)
  .bind(params.taxes_cents)
  .bind(params.fees_cents)
  .bind(params.refunds_cents)
  .bind(pool_pct)
  .bind(margin_target)
  .bind(platform_fee_pct)
  .bind(risk_reserve_pct)
  .bind(params.costs_est_cents)
  .bind(creator_pool_cents)
  .bind(unallocated_cents)
  .bind(reserve_cents)
  .bind(status)
  .bind(meta)
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;

  Ok(result.last_insert_id() as i64)
}

/// Allocator Step D (spec.md §4.7): ledger writes for one creator's
/// inflow plus balance increment, executed inside the caller's transaction
/// so the whole run either commits or rolls back together.
pub async fn insert_inflow_transaction(
  tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
  recipient: i64,
  amount_cents: i64,
  payment_type: &str,
  revenue_window_id: i64,
) -> CoreResult<()> {
  sqlx::query(
    r#"
      INSERT INTO transactions (recipient, amount_cents, payment_type, status, direction, revenue_window_id)
      VALUES (?, ?, ?, 'pending', 'inflow', ?);
    "#,
  )
  .bind(recipient)
  .bind(amount_cents)
  .bind(payment_type)
  .bind(revenue_window_id)
  .execute(&mut **tx)
  .await
  .map_err(classify_storage_error)?;

  sqlx::query(
    r#"
      UPDATE users SET current_balance_cents = current_balance_cents + ? WHERE id = ?;
    "#,
  )
  .bind(amount_cents)
  .bind(recipient)
  .execute(&mut **tx)
  .await
  .map_err(classify_storage_error)?;

  Ok(())
}

pub async fn insert_video_rev_share(
  tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
  row: &crate::types::VideoRevShareRow,
) -> CoreResult<()> {
  sqlx::query(
    r#"
      INSERT INTO video_rev_shares
        (revenue_window_id, video_id, eng_units, eis_avg, vu, share_pct, allocated_cents)
      VALUES
        (?, ?, ?, ?, ?, ?, ?);
    "#,
  )
  .bind(row.revenue_window_id)
  .bind(row.video_id)
  .bind(row.eng_units)
  .bind(row.eis_avg)
  .bind(row.value_units)
  .bind(row.share_pct)
  .bind(row.allocated_cents)
  .execute(&mut **tx)
  .await
  .map_err(classify_storage_error)?;
  Ok(())
}

/// Compensating delete for spec.md §4.8 failure semantics: remove the
/// ledger rows and reverse the balance increments this run inserted.
pub async fn compensate_revenue_window(pool: &MySqlPool, revenue_window_id: i64) -> CoreResult<()> {
  let mut tx = pool.begin().await.map_err(classify_storage_error)?;

  let rows: Vec<(i64, i64)> = sqlx::query_as(
    r#"
      SELECT recipient, amount_cents FROM transactions
      WHERE revenue_window_id = ? AND direction = 'inflow';
    "#,
  )
  .bind(revenue_window_id)
  .fetch_all(&mut *tx)
  .await
  .map_err(classify_storage_error)?;

  for (recipient, amount_cents) in &rows {
    sqlx::query("UPDATE users SET current_balance_cents = current_balance_cents - ? WHERE id = ?;")
      .bind(amount_cents)
      .bind(recipient)
      .execute(&mut *tx)
      .await
      .map_err(classify_storage_error)?;
  }

  sqlx::query("DELETE FROM transactions WHERE revenue_window_id = ?;")
    .bind(revenue_window_id)
    .execute(&mut *tx)
    .await
    .map_err(classify_storage_error)?;

  sqlx::query("DELETE FROM video_rev_shares WHERE revenue_window_id = ?;")
    .bind(revenue_window_id)
    .execute(&mut *tx)
    .await
    .map_err(classify_storage_error)?;

  sqlx::query("DELETE FROM revenue_windows WHERE id = ?;")
    .bind(revenue_window_id)
    .execute(&mut *tx)
    .await
    .map_err(classify_storage_error)?;

  tx.commit().await.map_err(classify_storage_error)?;
  Ok(())
}

pub async fn mark_revenue_window_partial(
  pool: &MySqlPool,
  revenue_window_id: i64,
  error_detail: &str,
) -> CoreResult<()> {
  sqlx::query(
    r#"
      UPDATE revenue_windows
      SET status = 'pending', meta = JSON_SET(COALESCE(meta, JSON_OBJECT()), '$.error', ?)
      WHERE id = ?;
    "#,
  )
  .bind(error_detail)
  .bind(revenue_window_id)
  .execute(pool)
  .await
  .map_err(classify_storage_error)?;
  Ok(())
}
