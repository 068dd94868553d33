use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use itertools::iproduct;
use std::{
    fs::{self, OpenOptions},
    path::Path,
};
use tracing::info;

use fs2::FileExt; // for file locking

use crate::UpdateArgs;
use crate::config::{CoinInfo, UpdateConfig};
use crate::santiment::{MetricQuery, MetricSource, SantimentClient};
use crate::table;

pub async fn execute(args: &UpdateArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => UpdateConfig::from_path(path)?,
        None => UpdateConfig::default(),
    };

    // Optional single-instance lock, held until this function returns
    let _lock_guard = match &args.lock_file {
        Some(lock_path) => Some(acquire_lock(lock_path)?),
        None => None,
    };

    let client = SantimentClient::new(&cfg.endpoint)?;
    let to = end_of_day(Utc::now().date_naive());
    run_once(&client, &cfg, &args.data_folder, &to).await
}

/// One pass over every (coin, metric) pair. The first failure aborts the pass.
pub async fn run_once<S: MetricSource>(
    source: &S,
    cfg: &UpdateConfig,
    data_folder: &Path,
    to: &str,
) -> Result<()> {
    fs::create_dir_all(data_folder)
        .with_context(|| format!("create data folder {}", data_folder.display()))?;

    info!(
        "starting run ({} coins x {} metrics, to={})",
        cfg.coins.len(),
        cfg.metrics.len(),
        to
    );
    for (coin, metric) in iproduct!(&cfg.coins, &cfg.metrics) {
        process_data_file(source, cfg, data_folder, coin, metric, to).await?;
    }
    info!("run complete");
    Ok(())
}

/// Fetch one series and merge it into its CSV file.
pub async fn process_data_file<S: MetricSource>(
    source: &S,
    cfg: &UpdateConfig,
    data_folder: &Path,
    coin: &CoinInfo,
    metric: &str,
    to: &str,
) -> Result<()> {
    let query = MetricQuery {
        metric,
        slug: &coin.slug,
        from: &cfg.from,
        to,
        interval: &cfg.interval,
    };
    let points = source
        .timeseries(&query)
        .await
        .with_context(|| format!("fetch {} {}", coin.slug, metric))?;
    let records = points
        .iter()
        .map(|p| p.to_record())
        .collect::<Result<Vec<_>>>()?;

    let out_path = data_folder.join(coin.data_filename(metric));
    table::update(&out_path, records)?;
    info!("updated {} {}", coin.slug, metric);
    Ok(())
}

/// Upper bound of the requested range: the last second of `day`, UTC.
pub fn end_of_day(day: NaiveDate) -> String {
    format!("{}T23:59:59Z", day.format("%Y-%m-%d"))
}

/// Acquire an exclusive file lock; keep the file handle alive to hold the lock.
pub fn acquire_lock(lock_path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;
    file.lock_exclusive()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::santiment::DataPoint;
    use anyhow::bail;
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Serves the same two points for every query and records what was asked.
    #[derive(Default)]
    struct FakeSource {
        seen: RefCell<Vec<(String, String, String)>>,
        fail_on: Option<&'static str>,
    }

    impl MetricSource for FakeSource {
        async fn timeseries(&self, q: &MetricQuery<'_>) -> Result<Vec<DataPoint>> {
            self.seen
                .borrow_mut()
                .push((q.slug.to_string(), q.metric.to_string(), q.to.to_string()));
            if self.fail_on == Some(q.metric) {
                bail!("upstream down");
            }
            Ok(vec![
                DataPoint {
                    datetime: "2023-01-03T00:00:00Z".into(),
                    value: json!(7),
                },
                DataPoint {
                    datetime: "2023-01-01T00:00:00Z".into(),
                    value: json!(5),
                },
            ])
        }
    }

    fn small_config() -> UpdateConfig {
        UpdateConfig {
            coins: vec![
                CoinInfo::new("bitcoin", "btc"),
                CoinInfo::new("ethereum", "eth"),
            ],
            metrics: vec!["dev_activity".into(), "github_activity".into()],
            ..Default::default()
        }
    }

    #[test]
    fn end_of_day_format() {
        let d = NaiveDate::from_ymd_opt(2023, 5, 4).unwrap();
        assert_eq!(end_of_day(d), "2023-05-04T23:59:59Z");
    }

    #[tokio::test]
    async fn writes_one_file_per_pair() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("data");
        let source = FakeSource::default();
        let cfg = small_config();

        run_once(&source, &cfg, &out, "2023-01-03T23:59:59Z")
            .await
            .unwrap();

        let seen = source.seen.borrow();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].0, "bitcoin");
        assert_eq!(seen[0].1, "dev_activity");
        assert_eq!(seen[1].1, "github_activity");
        assert_eq!(seen[2].0, "ethereum");
        assert!(seen.iter().all(|s| s.2 == "2023-01-03T23:59:59Z"));

        for name in [
            "BTC_DEV_ACTIVITY.csv",
            "BTC_GITHUB_ACTIVITY.csv",
            "ETH_DEV_ACTIVITY.csv",
            "ETH_GITHUB_ACTIVITY.csv",
        ] {
            let text = fs::read_to_string(out.join(name)).unwrap();
            assert_eq!(text, "20230101,5,5,5,5,0\n20230103,7,7,7,7,0\n");
        }
    }

    #[tokio::test]
    async fn fetch_error_aborts_remaining_pairs() {
        let dir = tempdir().unwrap();
        let source = FakeSource {
            fail_on: Some("github_activity"),
            ..Default::default()
        };
        let cfg = small_config();

        let err = run_once(&source, &cfg, dir.path(), "2023-01-03T23:59:59Z")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("upstream down"));
        assert_eq!(source.seen.borrow().len(), 2);
        assert!(dir.path().join("BTC_DEV_ACTIVITY.csv").exists());
        assert!(!dir.path().join("ETH_DEV_ACTIVITY.csv").exists());
    }

    #[test]
    fn lock_file_is_created() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("locks").join("run.lock");
        let _guard = acquire_lock(&lock).unwrap();
        assert!(lock.exists());
    }
}
