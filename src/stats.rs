use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use crate::{
    error::RankError,
    models::{BatchRankEntry, ScoreBucket, ScoreStatistics, Scope, TrendAnalysis, TrendPoint},
    rank::{from_centi, Centi, Distribution, RankResolver},
};

pub const KEY_PERCENTILES: [u32; 6] = [99, 95, 90, 80, 70, 50];

// (label, inclusive lower bound in hundredths), highest first
const BUCKETS: [(&str, Centi); 6] = [
    ("750+", 75000),
    ("700-749", 70000),
    ("650-699", 65000),
    ("600-649", 60000),
    ("550-599", 55000),
    ("<550", Centi::MIN),
];

pub fn bucket_distribution(distribution: &Distribution) -> Vec<ScoreBucket> {
    let mut counts = [0u64; BUCKETS.len()];

    for (score, count) in distribution.segments() {
        if let Some(idx) = BUCKETS.iter().position(|&(_, low)| score >= low) {
            counts[idx] += count;
        }
    }

    BUCKETS
        .iter()
        .zip(counts)
        .map(|(&(range, _), count)| ScoreBucket {
            range: range.to_string(),
            count,
        })
        .collect()
}

/// Score that `percentile` percent of students reached or beat.
pub fn score_for_percentile(
    distribution: &Distribution,
    percentile: f64,
) -> Result<Option<f64>, RankError> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(RankError::InvalidPercentile { percentile });
    }

    let total = distribution.total_students();
    if total == 0 {
        return Ok(None);
    }

    let target_rank = (total as f64 * (1.0 - percentile / 100.0)) as u64;
    Ok(distribution.score_reaching(target_rank).map(from_centi))
}

pub fn statistics(distribution: &Distribution) -> ScoreStatistics {
    let mut key_percentiles = BTreeMap::new();
    for p in KEY_PERCENTILES {
        if let Ok(Some(score)) = score_for_percentile(distribution, p as f64) {
            key_percentiles.insert(format!("p{p}"), score);
        }
    }

    ScoreStatistics {
        year: distribution.year(),
        max_score: distribution.max_score().map(from_centi).unwrap_or(0.0),
        min_score: distribution.min_score().map(from_centi).unwrap_or(0.0),
        score_levels: distribution.score_levels(),
        total_students: distribution.total_students(),
        score_distribution: bucket_distribution(distribution),
        key_percentiles,
        generated_at: Utc::now(),
    }
}

/// Rank of `score` in every loaded year; years that cannot answer are skipped.
pub fn trend(resolver: &RankResolver, score: f64) -> Result<TrendAnalysis, RankError> {
    resolver.bounds().validate(score)?;

    let mut trends = Vec::new();
    for year in resolver.years() {
        match resolver.resolve(score, Some(year)) {
            Ok(result) => trends.push(TrendPoint {
                year,
                rank: result.rank,
                percentage: result.percentage,
                total_students: result.total_students,
            }),
            Err(e) => warn!(year, score, "Skipping year in trend: {e}"),
        }
    }

    let analysis = describe_trend(&trends);
    Ok(TrendAnalysis {
        score,
        trends,
        analysis,
    })
}

fn describe_trend(trends: &[TrendPoint]) -> String {
    let (Some(first), Some(last)) = (trends.first(), trends.last()) else {
        return "No trend data available".to_string();
    };
    if trends.len() < 2 {
        return "Not enough years to describe a trend".to_string();
    }

    // A larger percentage means a worse position.
    let change = last.percentage - first.percentage;
    let direction = if change.abs() < 1.0 {
        "stayed roughly stable".to_string()
    } else if change > 0.0 {
        format!("declined by {:.1} points", change)
    } else {
        format!("improved by {:.1} points", -change)
    };

    format!(
        "From {} to {} this score's standing {}",
        first.year, last.year, direction
    )
}

pub fn resolve_batch(
    resolver: &RankResolver,
    scores: &[f64],
    year: Option<i32>,
    scope: Scope,
) -> Vec<BatchRankEntry> {
    scores
        .iter()
        .map(|&score| match resolver.resolve_in(score, year, scope) {
            Ok(result) => BatchRankEntry {
                score,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                warn!(score, "Batch rank entry rejected: {e}");
                BatchRankEntry {
                    score,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::{to_centi, ScoreBounds};

    fn distribution(year: i32, counts: &[(f64, u64)]) -> Distribution {
        Distribution::from_counts(
            year,
            counts
                .iter()
                .map(|&(score, count)| (to_centi(score).unwrap(), count)),
        )
    }

    fn resolver() -> RankResolver {
        let mut resolver = RankResolver::new(ScoreBounds::default(), 2024);
        resolver.insert(
            Scope::City,
            distribution(2023, &[(760.0, 50), (700.0, 450), (650.0, 500), (500.0, 1000)]),
        );
        resolver.insert(
            Scope::City,
            distribution(2024, &[(760.0, 10), (700.0, 90), (650.0, 100), (500.0, 800)]),
        );
        resolver
    }

    #[test]
    fn buckets_sum_to_total() {
        let dist = distribution(
            2024,
            &[(780.0, 5), (750.0, 10), (749.5, 20), (655.0, 30), (600.0, 40), (420.0, 95)],
        );
        let buckets = bucket_distribution(&dist);

        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![15, 20, 30, 40, 0, 95]);
        assert_eq!(counts.iter().sum::<u64>(), dist.total_students());
        assert_eq!(buckets[0].range, "750+");
    }

    #[test]
    fn percentile_scores_walk_down_the_distribution() {
        let dist = distribution(2024, &[(760.0, 10), (700.0, 90), (650.0, 100), (500.0, 800)]);

        assert_eq!(score_for_percentile(&dist, 100.0).unwrap(), Some(760.0));
        assert_eq!(score_for_percentile(&dist, 99.0).unwrap(), Some(760.0));
        assert_eq!(score_for_percentile(&dist, 90.0).unwrap(), Some(700.0));
        assert_eq!(score_for_percentile(&dist, 50.0).unwrap(), Some(500.0));
        assert_eq!(score_for_percentile(&dist, 0.0).unwrap(), Some(500.0));
        assert_eq!(
            score_for_percentile(&dist, 101.0).unwrap_err(),
            RankError::InvalidPercentile { percentile: 101.0 }
        );
    }

    #[test]
    fn statistics_summarize_year() {
        let dist = distribution(2024, &[(760.0, 10), (700.0, 90), (650.0, 100), (500.0, 800)]);
        let stats = statistics(&dist);

        assert_eq!(stats.year, 2024);
        assert_eq!(stats.max_score, 760.0);
        assert_eq!(stats.min_score, 500.0);
        assert_eq!(stats.score_levels, 4);
        assert_eq!(stats.total_students, 1000);
        assert_eq!(stats.key_percentiles.get("p90"), Some(&700.0));
        assert_eq!(stats.key_percentiles.len(), KEY_PERCENTILES.len());
    }

    #[test]
    fn trend_covers_every_year() {
        let analysis = trend(&resolver(), 700.0).unwrap();

        let years: Vec<i32> = analysis.trends.iter().map(|t| t.year).collect();
        assert_eq!(years, vec![2023, 2024]);
        assert_eq!(analysis.trends[0].rank, 51);
        assert_eq!(analysis.trends[1].rank, 11);
        assert!(analysis.analysis.contains("improved"));
    }

    #[test]
    fn trend_rejects_invalid_score() {
        assert!(matches!(
            trend(&resolver(), 801.0),
            Err(RankError::InvalidScore { .. })
        ));
    }

    #[test]
    fn describes_flat_and_short_trends() {
        let point = |year, percentage| TrendPoint {
            year,
            rank: 1,
            percentage,
            total_students: 100,
        };

        assert_eq!(describe_trend(&[]), "No trend data available");
        assert_eq!(describe_trend(&[point(2024, 5.0)]), "Not enough years to describe a trend");
        assert!(describe_trend(&[point(2023, 5.0), point(2024, 5.5)]).contains("stable"));
        assert!(describe_trend(&[point(2023, 5.0), point(2024, 9.0)]).contains("declined by 4.0"));
    }

    #[test]
    fn batch_reports_errors_inline() {
        let entries = resolve_batch(&resolver(), &[700.0, 900.0, 650.333], Some(2024), Scope::City);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].result.as_ref().map(|r| r.rank), Some(11));
        assert!(entries[1].error.as_deref().unwrap().contains("between 0 and 800"));
        assert!(entries[2].error.is_some());
    }
}
