use chrono::{Days, Duration, Utc};
use clap::Subcommand;
use pomofocus_core::{Config, DayTotal};

use super::{open_database, CliResult};

/// Upper bound for `stats daily --days`, about ten years.
const MAX_DAYS: i64 = 3660;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's and all-time totals
    Summary {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Minutes of work per day (UTC)
    Daily {
        /// Number of days ending today
        #[arg(long, default_value = "7", value_parser = clap::value_parser!(u32).range(1..=MAX_DAYS))]
        days: u32,
    },
    /// Most recent completed sessions as JSON
    Sessions {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

pub fn run(action: StatsAction, config: &Config) -> CliResult {
    let db = open_database(config)?;

    match action {
        StatsAction::Summary { json } => {
            let stats = db.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "today: {} sessions, {} min",
                    stats.today_sessions, stats.today_minutes
                );
                println!(
                    "total: {} sessions, {} min",
                    stats.total_sessions, stats.total_minutes
                );
            }
        }
        StatsAction::Daily { days } => {
            let to = Utc::now().date_naive();
            let from = to
                .checked_sub_days(Days::new(u64::from(days).saturating_sub(1)))
                .ok_or("--days reaches past the earliest representable date")?;
            let totals = db.daily_minutes(from, to)?;
            for day in fill_days(from, days, &totals) {
                println!("{}  {:>3} sessions  {:>5} min", day.date, day.sessions, day.minutes);
            }
        }
        StatsAction::Sessions { limit } => {
            let sessions = db.recent_sessions(limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
    }
    Ok(())
}

/// Expand sparse per-day totals into one row per day.
fn fill_days(from: chrono::NaiveDate, days: u32, totals: &[DayTotal]) -> Vec<DayTotal> {
    (0..days)
        .map(|offset| {
            let date = from + Duration::days(i64::from(offset));
            totals
                .iter()
                .find(|total| total.date == date)
                .cloned()
                .unwrap_or(DayTotal {
                    date,
                    sessions: 0,
                    minutes: 0,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn fill_days_inserts_empty_days() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let totals = vec![DayTotal {
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            sessions: 2,
            minutes: 50,
        }];
        let filled = fill_days(from, 3, &totals);
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].minutes, 0);
        assert_eq!(filled[1].minutes, 50);
        assert_eq!(filled[2].date, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
    }
}
