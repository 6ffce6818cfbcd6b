use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use integrity_allocation_core::config::Parameters;
use integrity_allocation_core::db::get_pool;
use integrity_allocation_core::operator::analyze_window;

type Error = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing() {
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "integrity_allocation_core=info".into()))
    .with(tracing_subscriber::fmt::layer())
    .init();
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args.iter().position(|a| a == flag).and_then(|idx| args.get(idx + 1)).cloned()
}

fn parse_dt(input: &str) -> Option<DateTime<Utc>> {
  NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|ndt| Utc.from_utc_datetime(&ndt))
}

fn validate_database_url() -> Result<String, Error> {
  let url = std::env::var("DATABASE_URL").unwrap_or_default();
  let trimmed = url.trim().to_string();
  if trimmed.is_empty() {
    return Err("Missing DATABASE_URL".into());
  }
  Ok(trimmed)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  let database_url = validate_database_url()?;
  let args: Vec<String> = std::env::args().collect();

  let video_id = match parse_flag_value(&args, "--video-id").and_then(|v| v.parse::<i64>().ok()) {
    Some(v) => v,
    None => {
      eprintln!("Missing required --video-id");
      eprintln!("Example: cargo run --bin analyze_video -- --video-id 42 --start 2026-07-01 --end 2026-07-02");
      return Ok(());
    }
  };
  let start = parse_flag_value(&args, "--start").and_then(|v| parse_dt(&v));
  let end = parse_flag_value(&args, "--end").and_then(|v| parse_dt(&v));

  let (window_start, window_end) = match (start, end) {
    (Some(s), Some(e)) => (s, e),
    _ => {
      eprintln!("Missing required --start YYYY-MM-DD --end YYYY-MM-DD");
      return Ok(());
    }
  };

  let params = Parameters::default();
  let pool = get_pool(&database_url).await?;

  let details = analyze_window(pool, video_id, window_start, window_end, &params).await?;

  println!(
    "video_id={} window_start={} window_end={} eis={:.4} ae={:.4} cq={:.4} li={:.4} rc={:.4}",
    details.video_id,
    details.window_start,
    details.window_end,
    details.components.eis,
    details.components.authentic_engagement,
    details.components.comment_quality,
    details.components.like_integrity,
    details.components.report_credibility,
  );
  println!(
    "views={} likes={} comments={} reports={} shares={} active_viewers={} unique_commenters={} unique_likers={}",
    details.features.views,
    details.features.likes,
    details.features.comments,
    details.features.reports,
    details.features.shares,
    details.features.active_viewers,
    details.features.unique_commenters,
    details.features.unique_likers,
  );

  Ok(())
}
