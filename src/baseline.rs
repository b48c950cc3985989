//! Historical transfer baseline.
//!
//! Reconstructs a user's representative transfer amount from the daily
//! event log partitions (`fds-YYYY-MM-DD.json`, one JSON event per line).
//! History problems of any kind degrade to `0.0`, never to an error.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::model::{EventType, UserId};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Path of the partition holding the events of `date`.
pub fn partition_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("fds-{}.json", date.format("%Y-%m-%d")))
}

#[async_trait]
pub trait Baseline: Send + Sync {
    /// Mean transfer amount of the user's most recent day of history, or
    /// `0.0` when there is none.
    async fn average_amount(&self, user: &UserId, as_of: NaiveDate) -> f64;
}

/// Event as it appears in a log partition. Fields other than these are
/// ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalEvent {
    event_type: EventType,
    user_id: String,
    #[serde(default)]
    amount: Option<LoggedAmount>,
}

/// Amounts are written as numbers, older pipelines wrote them as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LoggedAmount {
    Number(f64),
    Text(String),
}

impl LoggedAmount {
    fn value(&self) -> Option<f64> {
        let value = match self {
            LoggedAmount::Number(n) => *n,
            LoggedAmount::Text(s) => s.trim().parse().ok()?,
        };
        (value.is_finite() && value >= 0.0).then_some(value)
    }
}

/// Baseline computed by scanning the event log on the blocking pool.
///
/// At most `max_concurrent_scans` scans run at once; callers beyond that
/// wait for a permit.
#[derive(Debug, Clone)]
pub struct EventLogBaseline {
    log_dir: PathBuf,
    lookback_days: u32,
    permits: Arc<Semaphore>,
}

impl EventLogBaseline {
    pub fn new(log_dir: impl Into<PathBuf>, lookback_days: u32, max_concurrent_scans: usize) -> Self {
        Self {
            log_dir: log_dir.into(),
            lookback_days,
            permits: Arc::new(Semaphore::new(max_concurrent_scans.max(1))),
        }
    }

    /// Synchronous scan, the body of [`Baseline::average_amount`].
    pub fn scan(&self, user: &UserId, as_of: NaiveDate) -> f64 {
        average_from_log(&self.log_dir, user, as_of, self.lookback_days)
    }
}

#[async_trait]
impl Baseline for EventLogBaseline {
    async fn average_amount(&self, user: &UserId, as_of: NaiveDate) -> f64 {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            warn!(user = %user, "baseline scan budget closed, using 0.0");
            return 0.0;
        };

        let this = self.clone();
        let user = user.clone();
        match tokio::task::spawn_blocking(move || this.scan(&user, as_of)).await {
            Ok(average) => average,
            Err(e) => {
                warn!(error = %e, "baseline scan task failed, using 0.0");
                0.0
            }
        }
    }
}

/// Walk back from `as_of` through at most `lookback_days` earlier partitions
/// and average the first day that has matching transfers.
pub fn average_from_log(log_dir: &Path, user: &UserId, as_of: NaiveDate, lookback_days: u32) -> f64 {
    for days_ago in 0..=lookback_days {
        let Some(date) = as_of.checked_sub_days(Days::new(u64::from(days_ago))) else {
            break;
        };
        let path = partition_path(log_dir, date);

        let amounts = match scan_partition(&path, user) {
            Ok(amounts) => amounts,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "log partition not found");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "log partition unreadable");
                continue;
            }
        };

        if amounts.is_empty() {
            debug!(user = %user, %date, "no transfer records in partition");
            continue;
        }

        let average = amounts.iter().sum::<f64>() / amounts.len() as f64;
        info!(
            user = %user,
            %date,
            days_ago,
            transfers = amounts.len(),
            average,
            "baseline computed"
        );
        return average;
    }

    info!(user = %user, lookback_days, "no transfer history in lookback window");
    0.0
}

/// Transfer amounts of `user` in one partition. Malformed lines are skipped.
fn scan_partition(path: &Path, user: &UserId) -> io::Result<Vec<f64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut amounts = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            // invalid utf-8 only spoils this line
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                debug!(path = %path.display(), line = idx + 1, "skipping undecodable line");
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: HistoricalEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                debug!(path = %path.display(), line = idx + 1, error = %e, "skipping malformed line");
                continue;
            }
        };

        if event.event_type != EventType::Transfer || event.user_id != user.as_str() {
            continue;
        }
        if let Some(amount) = event.amount.as_ref().and_then(LoggedAmount::value) {
            amounts.push(amount);
        }
    }

    Ok(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn day(d: &str) -> NaiveDate {
        NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()
    }

    fn write_partition(dir: &TempDir, date: NaiveDate, lines: &[&str]) {
        let mut file = File::create(partition_path(dir.path(), date)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn transfer(user: &str, amount: &str) -> String {
        format!(r#"{{"eventType":"TRANSFER","userId":"{user}","amount":{amount},"result":"SUCCESS"}}"#)
    }

    #[test]
    fn partition_file_name() {
        let path = partition_path(Path::new("logs"), day("2024-03-05"));
        assert_eq!(path, PathBuf::from("logs/fds-2024-03-05.json"));
    }

    #[test]
    fn averages_same_day_transfers() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(
            &dir,
            d,
            &[
                &transfer("u1", "100"),
                &transfer("u2", "9999"),
                r#"{"eventType":"LOGIN","userId":"u1","result":"SUCCESS"}"#,
                &transfer("u1", "300"),
            ],
        );

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 200.0);
    }

    #[test]
    fn falls_back_to_most_recent_earlier_day() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(&dir, day("2024-03-03"), &[&transfer("u1", "50")]);
        write_partition(&dir, day("2024-03-01"), &[&transfer("u1", "1000")]);

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 50.0);
    }

    #[test]
    fn empty_partition_for_user_falls_back() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(&dir, d, &[&transfer("someone_else", "10")]);
        write_partition(&dir, day("2024-03-04"), &[&transfer("u1", "70")]);

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 70.0);
    }

    #[test]
    fn nothing_within_lookback_is_zero() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-10");
        // eight days back is outside the window
        write_partition(&dir, day("2024-03-02"), &[&transfer("u1", "500")]);

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 0.0);
    }

    #[test]
    fn seventh_day_back_is_inside_lookback() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-10");
        write_partition(&dir, day("2024-03-03"), &[&transfer("u1", "500")]);

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 500.0);
    }

    #[test]
    fn missing_directory_is_zero() {
        let avg = average_from_log(
            Path::new("/nonexistent/fds-logs"),
            &"u1".into(),
            day("2024-03-10"),
            DEFAULT_LOOKBACK_DAYS,
        );
        assert_eq!(avg, 0.0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(
            &dir,
            d,
            &[
                "not json at all",
                &transfer("u1", "100"),
                r#"{"eventType":"TRANSFER","userId":"u1","amount":"abc"}"#,
                r#"{"eventType":"TRANSFER","userId":"u1""#,
                "",
                &transfer("u1", "\"300\""),
            ],
        );

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 200.0);
    }

    #[test]
    fn invalid_utf8_line_does_not_abort_scan() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        let mut file = File::create(partition_path(dir.path(), d)).unwrap();
        file.write_all(&[0xff, 0xfe, b'\n']).unwrap();
        writeln!(file, "{}", transfer("u1", "40")).unwrap();
        drop(file);

        let avg = average_from_log(dir.path(), &"u1".into(), d, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(avg, 40.0);
    }

    #[tokio::test]
    async fn async_scan_matches_sync_scan() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(&dir, d, &[&transfer("u1", "100"), &transfer("u1", "300")]);

        let baseline = EventLogBaseline::new(dir.path(), DEFAULT_LOOKBACK_DAYS, 2);
        assert_eq!(baseline.average_amount(&"u1".into(), d).await, 200.0);
        assert_eq!(baseline.average_amount(&"u2".into(), d).await, 0.0);
    }

    #[tokio::test]
    async fn concurrent_scans_for_different_users() {
        let dir = TempDir::new().unwrap();
        let d = day("2024-03-05");
        write_partition(
            &dir,
            d,
            &[&transfer("u1", "10"), &transfer("u2", "20"), &transfer("u3", "30")],
        );

        let baseline = Arc::new(EventLogBaseline::new(dir.path(), DEFAULT_LOOKBACK_DAYS, 1));
        let handles: Vec<_> = ["u1", "u2", "u3"]
            .into_iter()
            .map(|user| {
                let baseline = Arc::clone(&baseline);
                tokio::spawn(async move { baseline.average_amount(&user.into(), d).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results, vec![10.0, 20.0, 30.0]);
    }
}
