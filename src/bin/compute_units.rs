use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use integrity_allocation_core::config::Parameters;
use integrity_allocation_core::db::get_pool;
use integrity_allocation_core::operator::compute_units;

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

  let run_day = match parse_flag_value(&args, "--day").and_then(|v| parse_dt(&v)) {
    Some(d) => d,
    None => {
      eprintln!("Missing required --day YYYY-MM-DD");
      eprintln!("Example: cargo run --bin compute_units -- --day 2026-07-01");
      return Ok(());
    }
  };

  let params = Parameters::default();
  let pool = get_pool(&database_url).await?;

  let units = compute_units(pool, run_day, &params).await?;

  let mut rows: Vec<(i64, f64)> = units.into_iter().collect();
  rows.sort_by_key(|(creator_id, _)| *creator_id);

  println!("run_day={} creators={}", run_day.date_naive(), rows.len());
  for (creator_id, value_units) in rows {
    println!("creator_id={} value_units={:.4}", creator_id, value_units);
  }

  Ok(())
}
