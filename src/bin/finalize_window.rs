use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use integrity_allocation_core::config::Parameters;
use integrity_allocation_core::db::{fetch_all_creator_contexts, get_pool};
use integrity_allocation_core::operator::finalize_window;
use integrity_allocation_core::types::RevenueWindowParams;

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

  let start = parse_flag_value(&args, "--start").and_then(|v| parse_dt(&v));
  let end = parse_flag_value(&args, "--end").and_then(|v| parse_dt(&v));
  let payment_type = parse_flag_value(&args, "--payment-type").unwrap_or_else(|| "standard".to_string());
  let gross_cents = parse_flag_value(&args, "--gross-cents").and_then(|v| v.parse::<i64>().ok());
  let dry_run = args.iter().any(|a| a == "--dry-run");

  let (window_start, window_end) = match (start, end) {
    (Some(s), Some(e)) => (s, e),
    _ => {
      eprintln!("Missing required --start YYYY-MM-DD --end YYYY-MM-DD");
      eprintln!(
        "Example: cargo run --bin finalize_window -- --start 2026-07-01 --end 2026-07-02 --gross-cents 1000000"
      );
      return Ok(());
    }
  };

  let gross_revenue_cents = match gross_cents {
    Some(v) => v,
    None => {
      eprintln!("Missing required --gross-cents");
      return Ok(());
    }
  };

  let params = Parameters::default();
  let pool = get_pool(&database_url).await?;

  let revenue = RevenueWindowParams {
    gross_revenue_cents,
    taxes_cents: parse_flag_value(&args, "--taxes-cents").and_then(|v| v.parse().ok()).unwrap_or(0),
    fees_cents: parse_flag_value(&args, "--fees-cents").and_then(|v| v.parse().ok()).unwrap_or(0),
    refunds_cents: parse_flag_value(&args, "--refunds-cents").and_then(|v| v.parse().ok()).unwrap_or(0),
    costs_est_cents: parse_flag_value(&args, "--costs-est-cents").and_then(|v| v.parse().ok()).unwrap_or(0),
  };

  // Creator context (likely_bot / trust / kyc) drives Allocator Step A and
  // the KYC caps in Step C (spec.md §4.7) — resolve every known creator up
  // front rather than leaving the map empty, which would silently fall back
  // every creator to the neutral (unbounded, unexcluded) default.
  let creator_contexts = fetch_all_creator_contexts(pool).await?;

  let summary = finalize_window(
    pool,
    window_start,
    window_end,
    &payment_type,
    &revenue,
    &params,
    &creator_contexts,
    dry_run,
  )
  .await?;

  println!(
    "ok=true window_start={} window_end={} payment_type={} dry_run={} creator_pool_cents={} allocated_cents={} unallocated_cents={} reserve_cents={} creators_paid={} creators_excluded={}",
    summary.window_start,
    summary.window_end,
    payment_type,
    summary.dry_run,
    summary.creator_pool_cents,
    summary.allocated_cents,
    summary.unallocated_cents,
    summary.reserve_cents,
    summary.creators_paid,
    summary.creators_excluded,
  );

  Ok(())
}
