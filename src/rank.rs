//! Score to rank resolution.
//!
//! Each year's records are folded once into a descending list of distinct
//! scores with cumulative head counts. A query is then two binary searches:
//! students strictly above the score and students at or above it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    error::RankError,
    models::{RankQueryResult, RankRange, ScoreRecord, Scope},
};

/// Scores are handled as integer hundredths so equality is exact.
pub type Centi = i64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub min: f64,
    pub max: f64,
}

impl ScoreBounds {
    pub fn new(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min >= max {
            return Err(format!("invalid score bounds [{min}, {max}]"));
        }
        Ok(Self { min, max })
    }

    pub fn validate(&self, score: f64) -> Result<Centi, RankError> {
        let reject = |reason: String| RankError::InvalidScore { score, reason };

        if !score.is_finite() {
            return Err(reject("score must be a finite number".to_string()));
        }
        if score < self.min || score > self.max {
            return Err(reject(format!(
                "must be between {} and {}",
                self.min, self.max
            )));
        }

        to_centi(score).ok_or_else(|| reject("at most two decimal places are allowed".to_string()))
    }
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 800.0,
        }
    }
}

/// Converts a score to hundredths, rejecting anything finer than 0.01.
pub fn to_centi(score: f64) -> Option<Centi> {
    let scaled = score * 100.0;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return None;
    }
    Some(rounded as Centi)
}

pub fn from_centi(centi: Centi) -> f64 {
    centi as f64 / 100.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `count / total` as a percentage with one decimal, never rounded down to zero.
pub fn share(count: u64, total: u64) -> f64 {
    round1(count as f64 / total as f64 * 100.0).max(0.1)
}

/// One year's score distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    year: i32,
    // Distinct scores, strictly descending.
    scores: Vec<Centi>,
    // cumulative[i] = students scoring >= scores[i]
    cumulative: Vec<u64>,
}

impl Distribution {
    pub fn from_counts(year: i32, counts: impl IntoIterator<Item = (Centi, u64)>) -> Self {
        let mut merged: BTreeMap<Centi, u64> = BTreeMap::new();
        for (score, count) in counts {
            if count > 0 {
                *merged.entry(score).or_insert(0) += count;
            }
        }

        let mut scores = Vec::with_capacity(merged.len());
        let mut cumulative = Vec::with_capacity(merged.len());
        let mut running = 0u64;

        for (score, count) in merged.into_iter().rev() {
            running += count;
            scores.push(score);
            cumulative.push(running);
        }

        Self {
            year,
            scores,
            cumulative,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn total_students(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn score_levels(&self) -> usize {
        self.scores.len()
    }

    pub fn max_score(&self) -> Option<Centi> {
        self.scores.first().copied()
    }

    pub fn min_score(&self) -> Option<Centi> {
        self.scores.last().copied()
    }

    /// Distinct scores (descending) paired with how many students got each.
    pub fn segments(&self) -> impl Iterator<Item = (Centi, u64)> + '_ {
        self.scores.iter().enumerate().map(|(i, &score)| {
            let above = if i == 0 { 0 } else { self.cumulative[i - 1] };
            (score, self.cumulative[i] - above)
        })
    }

    pub fn count_above(&self, score: Centi) -> u64 {
        let idx = self.scores.partition_point(|&s| s > score);
        self.cumulative_before(idx)
    }

    pub fn count_at_or_above(&self, score: Centi) -> u64 {
        let idx = self.scores.partition_point(|&s| s >= score);
        self.cumulative_before(idx)
    }

    /// Highest score whose cumulative count reaches `target_rank`.
    pub fn score_reaching(&self, target_rank: u64) -> Option<Centi> {
        let idx = self.cumulative.partition_point(|&c| c < target_rank);
        self.scores.get(idx).copied()
    }

    fn cumulative_before(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.cumulative[idx - 1]
        }
    }
}

/// Performance tier derived from the share of students at or below a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Top,
    Excellent,
    Good,
    Average,
    Developing,
}

impl Level {
    pub fn from_percentile(percentile: f64) -> Self {
        match percentile {
            p if p >= 95.0 => Level::Top,
            p if p >= 85.0 => Level::Excellent,
            p if p >= 70.0 => Level::Good,
            p if p >= 50.0 => Level::Average,
            _ => Level::Developing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Top => "top",
            Level::Excellent => "excellent",
            Level::Good => "good",
            Level::Average => "average",
            Level::Developing => "developing",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Level::Top => "Among the very best results in the city.",
            Level::Excellent => "Well ahead of most of the city.",
            Level::Good => "A solid result with room to grow.",
            Level::Average => "Around the middle of the city; keep pushing.",
            Level::Developing => "Plenty of room to improve.",
        }
    }
}

pub fn analysis(percentile: f64, scope: Scope) -> String {
    let level = Level::from_percentile(percentile);
    let population = match scope {
        Scope::City => "citywide",
        Scope::Inner => "in the inner districts",
    };
    format!(
        "Level: {}. {} Scored at or above {:.1}% of students {}.",
        level.label(),
        level.advice(),
        percentile,
        population
    )
}

/// Where one score sits inside a single distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Standing {
    rank: u64,
    rank_range: RankRange,
    segment_count: u64,
    percentage: f64,
    percentile: f64,
}

impl Standing {
    fn locate(distribution: &Distribution, centi: Centi) -> Self {
        let total = distribution.total_students();
        let above = distribution.count_above(centi);
        let at_or_above = distribution.count_at_or_above(centi);
        let segment_count = at_or_above - above;

        // Below the lowest recorded score the counting rule would give total + 1.
        let rank = (above + 1).min(total);
        let rank_range = if segment_count > 0 {
            RankRange {
                start: above + 1,
                end: at_or_above,
            }
        } else {
            RankRange {
                start: rank,
                end: rank,
            }
        };

        Self {
            rank,
            rank_range,
            segment_count,
            percentage: share(rank, total),
            percentile: share(total - rank + 1, total),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankResolver {
    bounds: ScoreBounds,
    default_year: i32,
    distributions: BTreeMap<(i32, Scope), Distribution>,
}

impl RankResolver {
    pub fn new(bounds: ScoreBounds, default_year: i32) -> Self {
        Self {
            bounds,
            default_year,
            distributions: BTreeMap::new(),
        }
    }

    /// Groups records by year and builds every year's citywide and
    /// inner-district distributions.
    pub fn from_records(bounds: ScoreBounds, default_year: i32, records: &[ScoreRecord]) -> Self {
        let mut grouped: HashMap<(i32, Scope), Vec<(Centi, u64)>> = HashMap::new();

        for record in records {
            let Some(centi) = to_centi(record.score) else {
                tracing::warn!(
                    year = record.year,
                    score = record.score,
                    "Skipping score record with more than two decimals"
                );
                continue;
            };
            for scope in Scope::ALL {
                grouped
                    .entry((record.year, scope))
                    .or_default()
                    .push((centi, record.count_in(scope) as u64));
            }
        }

        let mut resolver = Self::new(bounds, default_year);
        for ((year, scope), counts) in grouped {
            let distribution = Distribution::from_counts(year, counts);
            // Years without inner-district counts only rank citywide.
            if scope == Scope::City || distribution.total_students() > 0 {
                resolver.insert(scope, distribution);
            }
        }
        resolver
    }

    pub fn insert(&mut self, scope: Scope, distribution: Distribution) {
        self.distributions
            .insert((distribution.year(), scope), distribution);
    }

    pub fn bounds(&self) -> ScoreBounds {
        self.bounds
    }

    pub fn default_year(&self) -> i32 {
        self.default_year
    }

    /// Years with citywide records, ascending.
    pub fn years(&self) -> Vec<i32> {
        self.distributions
            .keys()
            .filter(|(_, scope)| *scope == Scope::City)
            .map(|&(year, _)| year)
            .collect()
    }

    pub fn distribution(&self, year: Option<i32>) -> Result<&Distribution, RankError> {
        self.distribution_in(year, Scope::City)
    }

    pub fn distribution_in(
        &self,
        year: Option<i32>,
        scope: Scope,
    ) -> Result<&Distribution, RankError> {
        let year = year.unwrap_or(self.default_year);
        self.distributions
            .get(&(year, scope))
            .filter(|distribution| distribution.total_students() > 0)
            .ok_or(RankError::NoData { year })
    }

    pub fn resolve(&self, score: f64, year: Option<i32>) -> Result<RankQueryResult, RankError> {
        self.resolve_in(score, year, Scope::City)
    }

    /// Ranks `score` within `scope`, and also reports the inner-district
    /// standing whenever the year has inner-district counts.
    pub fn resolve_in(
        &self,
        score: f64,
        year: Option<i32>,
        scope: Scope,
    ) -> Result<RankQueryResult, RankError> {
        let centi = self.bounds.validate(score)?;
        let distribution = self.distribution_in(year, scope)?;
        let standing = Standing::locate(distribution, centi);

        let inner = self
            .distribution_in(Some(distribution.year()), Scope::Inner)
            .ok()
            .map(|inner| (inner.total_students(), Standing::locate(inner, centi)));

        Ok(RankQueryResult {
            score: from_centi(centi),
            year: distribution.year(),
            scope,
            rank: standing.rank,
            percentage: standing.percentage,
            percentile: standing.percentile,
            total_students: distribution.total_students(),
            rank_range: standing.rank_range,
            segment_count: standing.segment_count,
            exact_match: standing.segment_count > 0,
            analysis: analysis(standing.percentile, scope),
            inner_rank: inner.map(|(_, s)| s.rank),
            inner_percentage: inner.map(|(_, s)| s.percentage),
            total_students_inner: inner.map(|(total, _)| total),
        })
    }
}
