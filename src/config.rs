use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::anyhow;
use tracing::{info, warn};

use crate::{rank::ScoreBounds, recommend::BandConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub default_year: i32,
    pub score_bounds: ScoreBounds,
    pub max_rank: i64,
    pub bands: BandConfig,
    /// `None` keeps the loaded dataset for the life of the process.
    pub cache_ttl: Option<Duration>,
    pub static_dir: PathBuf,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let min_score: f64 = try_load(&lookup, "MIN_SCORE", "0")?;
        let max_score: f64 = try_load(&lookup, "MAX_SCORE", "800")?;
        let score_bounds = ScoreBounds::new(min_score, max_score)
            .map_err(|e| anyhow!("MIN_SCORE/MAX_SCORE misconfigured: {e}"))?;

        let max_rank: i64 = try_load(&lookup, "MAX_RANK", "40000")?;
        if max_rank <= 0 {
            return Err(anyhow!("MAX_RANK must be positive, got {max_rank}"));
        }

        let ttl_secs: u64 = try_load(&lookup, "CACHE_TTL_SECS", "3600")?;

        Ok(Self {
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite://scores.db")?,
            host: try_load(&lookup, "HOST", "0.0.0.0")?,
            port: try_load(&lookup, "PORT", "8008")?,
            default_year: try_load(&lookup, "DEFAULT_YEAR", "2024")?,
            score_bounds,
            max_rank,
            bands: try_load(&lookup, "RECOMMEND_CUTS", "0.60,0.85,1.10,1.50")?,
            cache_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            static_dir: try_load(&lookup, "STATIC_DIR", "frontend")?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Environment misconfigured: {key}={raw}: {e}")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::Band;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.database_url, "sqlite://scores.db");
        assert_eq!(config.port, 8008);
        assert_eq!(config.default_year, 2024);
        assert_eq!(config.max_rank, 40000);
        assert_eq!(config.score_bounds, ScoreBounds::new(0.0, 800.0).unwrap());
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.address(), "0.0.0.0:8008");
        assert_eq!(config.bands.interval(Band::Match).low, 0.85);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("DEFAULT_YEAR", "2025"),
            ("MAX_RANK", "55000"),
            ("CACHE_TTL_SECS", "0"),
            ("RECOMMEND_CUTS", "0.5,0.8,1.2,1.6"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.default_year, 2025);
        assert_eq!(config.max_rank, 55000);
        assert_eq!(config.cache_ttl, None);
        assert_eq!(config.bands.interval(Band::Safety).high, 1.6);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("PORT", "not-a-port")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("MAX_RANK", "-1")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("MAX_SCORE", "-5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("RECOMMEND_CUTS", "1.0,0.5,2.0,3.0")])).is_err());
    }
}
