use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{fs, path::Path};

pub const DEFAULT_ENDPOINT: &str = "https://api.santiment.net/graphql";
pub const DEFAULT_FROM: &str = "2012-12-31T00:00:00Z";
pub const DEFAULT_INTERVAL: &str = "1d";

/// Asset as named by the API (`slug`) and the prefix used for its CSV files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinInfo {
    pub slug: String,
    pub data_filename_prefix: String,
}

impl CoinInfo {
    pub fn new(slug: &str, data_filename_prefix: &str) -> Self {
        Self {
            slug: slug.to_string(),
            data_filename_prefix: data_filename_prefix.to_string(),
        }
    }

    /// `BTC_DEV_ACTIVITY.csv` for prefix `btc` and metric `dev_activity`.
    pub fn data_filename(&self, metric: &str) -> String {
        format!("{}_{}", self.data_filename_prefix, metric).to_uppercase() + ".csv"
    }
}

/// Which assets and metrics to pull, and from where.
///
/// Any field left out of a JSON config file takes its default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub coins: Vec<CoinInfo>,
    pub metrics: Vec<String>,
    pub from: String,
    pub interval: String,
    pub endpoint: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            coins: vec![
                CoinInfo::new("bitcoin", "btc"),
                CoinInfo::new("ethereum", "eth"),
            ],
            metrics: [
                "sentiment_negative_total",
                "github_activity",
                "dev_activity",
                "sentiment_positive_total",
                "sentiment_balance_total",
                "social_volume_total",
                "social_dominance_total",
                "unique_social_volume_total_1h",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            from: DEFAULT_FROM.to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl UpdateConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).context("parse config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.coins.is_empty() {
            bail!("config lists no coins");
        }
        if self.metrics.is_empty() {
            bail!("config lists no metrics");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_uppercased() {
        let btc = CoinInfo::new("bitcoin", "btc");
        assert_eq!(btc.data_filename("dev_activity"), "BTC_DEV_ACTIVITY.csv");
        assert_eq!(
            btc.data_filename("unique_social_volume_total_1h"),
            "BTC_UNIQUE_SOCIAL_VOLUME_TOTAL_1H.csv"
        );
    }

    #[test]
    fn defaults_cover_two_coins_and_eight_metrics() {
        let cfg = UpdateConfig::default();
        assert_eq!(cfg.coins.len(), 2);
        assert_eq!(cfg.metrics.len(), 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = UpdateConfig::from_json(r#"{"metrics": ["dev_activity"]}"#).unwrap();
        assert_eq!(cfg.metrics, vec!["dev_activity".to_string()]);
        assert_eq!(cfg.coins, UpdateConfig::default().coins);
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn empty_lists_rejected() {
        assert!(UpdateConfig::from_json(r#"{"coins": []}"#).is_err());
        assert!(UpdateConfig::from_json(r#"{"metrics": []}"#).is_err());
    }
}
