use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    db,
    models::{School, Scope},
    rank::{RankResolver, ScoreBounds},
    recommend::latest_admission_year,
};

/// Everything a request needs, loaded from SQLite and never mutated.
#[derive(Debug)]
pub struct Dataset {
    pub resolver: RankResolver,
    pub schools: Vec<School>,
    pub loaded_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(resolver: RankResolver, schools: Vec<School>) -> Self {
        Self {
            resolver,
            schools,
            loaded_at: Utc::now(),
        }
    }

    pub async fn load(pool: &SqlitePool, bounds: ScoreBounds, default_year: i32) -> anyhow::Result<Self> {
        let records = db::fetch_score_records(pool).await?;
        let schools = db::fetch_schools(pool).await?;
        let resolver = RankResolver::from_records(bounds, default_year, &records);

        info!(
            records = records.len(),
            schools = schools.len(),
            years = ?resolver.years(),
            "Loaded dataset"
        );

        Ok(Self::new(resolver, schools))
    }

    pub fn latest_admission_year(&self, scope: Scope) -> Option<i32> {
        latest_admission_year(&self.schools, scope)
    }
}

/// Time-based memoization of the loaded [`Dataset`].
pub struct DatasetCache {
    pool: SqlitePool,
    bounds: ScoreBounds,
    default_year: i32,
    ttl: Option<Duration>,
    slot: RwLock<Option<(Instant, Arc<Dataset>)>>,
}

impl DatasetCache {
    pub fn new(pool: SqlitePool, bounds: ScoreBounds, default_year: i32, ttl: Option<Duration>) -> Self {
        Self {
            pool,
            bounds,
            default_year,
            ttl,
            slot: RwLock::new(None),
        }
    }

    fn is_fresh(&self, loaded: Instant) -> bool {
        self.ttl.map_or(true, |ttl| loaded.elapsed() < ttl)
    }

    pub async fn get(&self) -> anyhow::Result<Arc<Dataset>> {
        if let Some((loaded, dataset)) = self.slot.read().await.as_ref() {
            if self.is_fresh(*loaded) {
                return Ok(dataset.clone());
            }
        }

        let mut slot = self.slot.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some((loaded, dataset)) = slot.as_ref() {
            if self.is_fresh(*loaded) {
                return Ok(dataset.clone());
            }
        }

        let dataset = Arc::new(Dataset::load(&self.pool, self.bounds, self.default_year).await?);
        *slot = Some((Instant::now(), dataset.clone()));
        Ok(dataset)
    }

    pub async fn invalidate(&self) {
        self.slot.write().await.take();
        info!("Dataset cache cleared");
    }
}
