//! Reach / match / safety banding.
//!
//! A school's latest admission rank is divided by the student's rank. Lower
//! admission ranks are more selective, so a small ratio means a reach.

use std::{collections::BTreeMap, fmt, num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::RankError,
    models::{Band, RecommendationResult, RecommendedSchool, School, Scope},
};

/// Half-open `[low, high)` ratio interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandInterval {
    pub low: f64,
    pub high: f64,
}

impl BandInterval {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, relative: f64) -> bool {
        relative >= self.low && relative < self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub reach: BandInterval,
    #[serde(rename = "match")]
    pub matched: BandInterval,
    pub safety: BandInterval,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            reach: BandInterval::new(0.60, 0.85),
            matched: BandInterval::new(0.85, 1.10),
            safety: BandInterval::new(1.10, 1.50),
        }
    }
}

impl BandConfig {
    pub fn interval(&self, band: Band) -> BandInterval {
        match band {
            Band::Reach => self.reach,
            Band::Match => self.matched,
            Band::Safety => self.safety,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for band in Band::ALL {
            let interval = self.interval(band);
            if !interval.low.is_finite()
                || !interval.high.is_finite()
                || interval.low < 0.0
                || interval.low >= interval.high
            {
                return Err(format!(
                    "{} band [{}, {}) is not a valid interval",
                    band.label(),
                    interval.low,
                    interval.high
                ));
            }
        }

        for (a, b) in [(Band::Reach, Band::Match), (Band::Match, Band::Safety)] {
            if self.interval(a).high > self.interval(b).low {
                return Err(format!(
                    "{} band overlaps {} band",
                    a.label(),
                    b.label()
                ));
            }
        }

        Ok(())
    }

    /// Band whose interval contains `relative`, if any.
    pub fn classify(&self, relative: f64) -> Option<Band> {
        Band::ALL
            .into_iter()
            .find(|&band| self.interval(band).contains(relative))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseBandsError(String);

impl fmt::Display for ParseBandsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses four ascending cut points, e.g. `0.60,0.85,1.10,1.50`.
impl FromStr for BandConfig {
    type Err = ParseBandsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cuts = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ParseBandsError(format!("bad cut point: {e}")))?;

        let &[a, b, c, d] = cuts.as_slice() else {
            return Err(ParseBandsError(format!(
                "expected 4 cut points, got {}",
                cuts.len()
            )));
        };

        let config = Self {
            reach: BandInterval::new(a, b),
            matched: BandInterval::new(b, c),
            safety: BandInterval::new(c, d),
        };
        config.validate().map_err(ParseBandsError)?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct RecommendationBander {
    max_rank: i64,
    bands: BandConfig,
}

impl RecommendationBander {
    pub fn new(max_rank: i64, bands: BandConfig) -> Self {
        Self { max_rank, bands }
    }

    pub fn validate_rank(&self, rank: i64) -> Result<(), RankError> {
        if rank <= 0 || rank > self.max_rank {
            return Err(RankError::InvalidRank {
                rank,
                max: self.max_rank,
            });
        }
        Ok(())
    }

    /// Bands `schools` against `rank` using admissions from `year` that were
    /// ranked in the same `scope` as the student.
    ///
    /// `bands` overrides the configured intervals for this call only, and
    /// `limit` caps each band after sorting.
    pub fn recommend(
        &self,
        rank: i64,
        schools: &[School],
        year: i32,
        scope: Scope,
        bands: Option<&BandConfig>,
        limit: Option<NonZeroUsize>,
    ) -> Result<RecommendationResult, RankError> {
        self.validate_rank(rank)?;
        let bands = bands.unwrap_or(&self.bands);

        let mut recommendations: BTreeMap<Band, Vec<RecommendedSchool>> =
            Band::ALL.into_iter().map(|band| (band, Vec::new())).collect();

        for school in schools {
            let Some(admission) = school.admission_for(year, scope) else {
                continue;
            };

            let relative = admission.admission_rank as f64 / rank as f64;
            if let Some(band) = bands.classify(relative) {
                recommendations.entry(band).or_default().push(RecommendedSchool {
                    school: school.clone(),
                    admission_rank: admission.admission_rank,
                    admission_score: admission.admission_score,
                    relative,
                });
            }
        }

        for picked in recommendations.values_mut() {
            picked.sort_by(|a, b| {
                a.admission_rank
                    .cmp(&b.admission_rank)
                    .then_with(|| a.school.name.cmp(&b.school.name))
            });
            if let Some(limit) = limit {
                picked.truncate(limit.get());
            }
        }

        let total_schools = recommendations.values().map(Vec::len).sum();

        Ok(RecommendationResult {
            rank,
            year,
            scope,
            total_schools,
            recommendations,
        })
    }
}

/// Most recent year in which any school reported an admission rank in `scope`.
pub fn latest_admission_year(schools: &[School], scope: Scope) -> Option<i32> {
    schools
        .iter()
        .filter_map(|school| school.latest_year(scope))
        .max()
}
