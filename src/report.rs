use std::fmt::Write;

use crate::{
    models::{School, ScoreStatistics, Scope},
    rank::RankResolver,
    stats,
};

// Scores whose standing is listed in the report, highest first.
const SAMPLE_SCORES: [f64; 6] = [760.0, 740.0, 720.0, 700.0, 650.0, 600.0];

pub fn build_report(
    resolver: &RankResolver,
    statistics: &ScoreStatistics,
    schools: &[School],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Exam Rank Report {}", statistics.year);
    let _ = writeln!(
        output,
        "Generated {} from {} students across {} score levels",
        statistics.generated_at.format("%Y-%m-%d %H:%M UTC"),
        statistics.total_students,
        statistics.score_levels
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Highest score: {:.2}", statistics.max_score);
    let _ = writeln!(output, "- Lowest score: {:.2}", statistics.min_score);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Distribution");

    if statistics.total_students == 0 {
        let _ = writeln!(output, "No students recorded for this year.");
    } else {
        for bucket in statistics.score_distribution.iter() {
            let share = bucket.count as f64 / statistics.total_students as f64 * 100.0;
            let _ = writeln!(
                output,
                "- {}: {} students ({:.1}%)",
                bucket.range, bucket.count, share
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Percentiles");

    if statistics.key_percentiles.is_empty() {
        let _ = writeln!(output, "No percentile data for this year.");
    } else {
        for p in stats::KEY_PERCENTILES {
            if let Some(score) = statistics.key_percentiles.get(&format!("p{p}")) {
                let _ = writeln!(output, "- Top {}%: {:.2} and above", 100 - p, score);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sample Standings");

    for score in SAMPLE_SCORES {
        match resolver.resolve(score, Some(statistics.year)) {
            Ok(result) => {
                let _ = writeln!(
                    output,
                    "- {:.0}: rank {} (ranks {}-{}), top {:.1}%",
                    score,
                    result.rank,
                    result.rank_range.start,
                    result.rank_range.end,
                    result.percentage
                );
            }
            Err(e) => {
                let _ = writeln!(output, "- {:.0}: {}", score, e);
            }
        }
    }

    let mut admitted: Vec<(&School, i64)> = schools
        .iter()
        .filter_map(|school| {
            school
                .admission_for(statistics.year, Scope::City)
                .map(|admission| (school, admission.admission_rank))
        })
        .collect();
    admitted.sort_by_key(|&(_, rank)| rank);

    let _ = writeln!(output);
    let _ = writeln!(output, "## School Admission Ranks");

    if admitted.is_empty() {
        let _ = writeln!(output, "No school admissions recorded for this year.");
    } else {
        for (school, rank) in admitted.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}): rank {}, quota {}",
                school.name, school.region, rank, school.admission_quota
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Admission,
        rank::{to_centi, Centi, Distribution, ScoreBounds},
    };

    #[test]
    fn report_lists_sections() {
        let mut resolver = RankResolver::new(ScoreBounds::default(), 2024);
        let distribution = Distribution::from_counts(
            2024,
            [(760.0, 10), (700.0, 90), (650.0, 100), (500.0, 800)]
                .into_iter()
                .map(|(score, count)| (to_centi(score).unwrap(), count)),
        );
        let statistics = stats::statistics(&distribution);
        resolver.insert(Scope::City, distribution);

        let schools = vec![School {
            name: "Nankai".to_string(),
            region: "Nankai".to_string(),
            admission_quota: 500,
            admissions: vec![Admission {
                year: 2024,
                scope: Scope::City,
                admission_score: 755.0,
                admission_rank: 12,
            }],
        }];

        let report = build_report(&resolver, &statistics, &schools);

        assert!(report.starts_with("# Exam Rank Report 2024"));
        assert!(report.contains("- 750+: 10 students (1.0%)"));
        assert!(report.contains("- Top 10%: 700.00 and above"));
        assert!(report.contains("- 760: rank 1 (ranks 1-10), top 0.1%"));
        assert!(report.contains("- Nankai (Nankai): rank 12, quota 500"));
    }

    #[test]
    fn empty_year_is_reported_plainly() {
        let resolver = RankResolver::new(ScoreBounds::default(), 2024);
        let statistics = stats::statistics(&Distribution::from_counts(2024, Vec::<(Centi, u64)>::new()));
        let report = build_report(&resolver, &statistics, &[]);

        assert!(report.contains("No students recorded for this year."));
        assert!(report.contains("- 700: No data for year 2024"));
        assert!(report.contains("No school admissions recorded for this year."));
    }
}
