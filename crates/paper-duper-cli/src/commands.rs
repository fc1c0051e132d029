use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "paper-duper")]
#[command(about = "Find duplicate PDF documents by content", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a directory for duplicate PDFs
    Scan(ScanArgs),
    /// Show hash cache statistics
    CacheStats,
    /// Remove every entry from the hash cache
    CacheClear,
    /// Purge expired entries and trim the hash cache to its size limit
    CacheCleanup,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan
    pub dir: PathBuf,

    /// Only look at PDFs directly inside DIR
    #[arg(long)]
    pub no_recursive: bool,

    /// Similarity threshold, greater than 0 and at most 1
    #[arg(long, value_parser = parse_threshold)]
    pub threshold: Option<f64>,

    /// Skip files smaller than this many bytes
    #[arg(long)]
    pub min_size: Option<u64>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Only files modified on or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_start_date)]
    pub after: Option<DateTime<Utc>>,

    /// Only files modified on or before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_end_date)]
    pub before: Option<DateTime<Utc>>,

    /// Only files whose name matches this regular expression (case-insensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Do not extract or compare text
    #[arg(long)]
    pub no_text: bool,

    /// Do not read or write the hash cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Delete every duplicate, keeping the first file of each group
    #[arg(long)]
    pub delete: bool,

    /// With --delete, remove files permanently instead of moving them to the trash
    #[arg(long, requires = "delete")]
    pub permanent: bool,

    /// With --delete, do not ask for confirmation
    #[arg(long, requires = "delete")]
    pub yes: bool,
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(format!(
            "threshold must be greater than 0 and at most 1, got {}",
            value
        ))
    }
}

fn parse_start_date(s: &str) -> Result<DateTime<Utc>, String> {
    let midnight =
        NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(|| "invalid start of day".to_string())?;
    parse_date(s, midnight)
}

fn parse_end_date(s: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .ok_or_else(|| "invalid end of day".to_string())?;
    parse_date(s, end_of_day)
}

/// Accept RFC 3339 timestamps, or plain dates taken at `time_of_day` UTC.
fn parse_date(s: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("'{}' is not a date (expected YYYY-MM-DD)", s))?;
    Ok(Utc.from_utc_datetime(&date.and_time(time_of_day)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_dates() {
        let start = parse_start_date("2021-06-29").unwrap();
        assert_eq!((start.year(), start.month(), start.day()), (2021, 6, 29));
        assert_eq!(start.hour(), 0);

        let end = parse_end_date("2021-06-30").unwrap();
        assert_eq!(end.day(), 30);
        assert_eq!(end.hour(), 23);

        let exact = parse_start_date("2021-06-29T12:30:00+02:00").unwrap();
        assert_eq!(exact.hour(), 10);

        assert!(parse_start_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("0.85"), Ok(0.85));
        assert_eq!(parse_threshold("1"), Ok(1.0));
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("0").is_err());
        assert!(parse_threshold("-0.2").is_err());
        assert!(parse_threshold("abc").is_err());
    }

    #[test]
    fn test_scan_args() {
        let cli = Cli::try_parse_from([
            "paper-duper",
            "scan",
            "/docs",
            "--threshold",
            "0.8",
            "--name",
            "invoice",
            "--delete",
            "--yes",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Scan(args)) => {
                assert_eq!(args.dir, PathBuf::from("/docs"));
                assert_eq!(args.threshold, Some(0.8));
                assert_eq!(args.name.as_deref(), Some("invoice"));
                assert!(args.delete && args.yes && !args.permanent);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["paper-duper", "scan", "/docs", "--yes"]).is_err());
    }
}
