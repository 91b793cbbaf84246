use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Population a rank is counted in: the whole city or the six inner districts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    City,
    Inner,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::City, Scope::Inner];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::City => "city",
            Scope::Inner => "inner",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "city" => Ok(Scope::City),
            "inner" => Ok(Scope::Inner),
            other => Err(format!("unknown scope `{other}`, expected city or inner")),
        }
    }
}

/// Number of students who obtained exactly `score` in `year`, citywide and
/// within the inner districts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub year: i32,
    pub score: f64,
    pub student_count: u32,
    #[serde(default)]
    pub inner_count: u32,
}

impl ScoreRecord {
    pub fn count_in(&self, scope: Scope) -> u32 {
        match scope {
            Scope::City => self.student_count,
            Scope::Inner => self.inner_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankQueryResult {
    pub score: f64,
    pub year: i32,
    pub scope: Scope,
    pub rank: u64,
    pub percentage: f64,
    pub percentile: f64,
    pub total_students: u64,
    pub rank_range: RankRange,
    pub segment_count: u64,
    pub exact_match: bool,
    pub analysis: String,
    /// Standing among inner-district students, when that year has them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_rank: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_students_inner: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub year: i32,
    #[serde(default)]
    pub scope: Scope,
    pub admission_score: f64,
    pub admission_rank: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    pub name: String,
    pub region: String,
    pub admission_quota: u32,
    pub admissions: Vec<Admission>,
}

impl School {
    /// Admission for `year` ranked in `scope`, if it carries a usable rank.
    pub fn admission_for(&self, year: i32, scope: Scope) -> Option<&Admission> {
        self.admissions.iter().find(|admission| {
            admission.year == year && admission.scope == scope && admission.admission_rank > 0
        })
    }

    pub fn latest_year(&self, scope: Scope) -> Option<i32> {
        self.admissions
            .iter()
            .filter(|admission| admission.scope == scope && admission.admission_rank > 0)
            .map(|admission| admission.year)
            .max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Reach,
    Match,
    Safety,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Reach, Band::Match, Band::Safety];

    pub fn label(self) -> &'static str {
        match self {
            Band::Reach => "reach",
            Band::Match => "match",
            Band::Safety => "safety",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedSchool {
    #[serde(flatten)]
    pub school: School,
    pub admission_rank: i64,
    pub admission_score: f64,
    pub relative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub rank: i64,
    pub year: i32,
    pub scope: Scope,
    pub total_schools: usize,
    pub recommendations: BTreeMap<Band, Vec<RecommendedSchool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub range: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStatistics {
    pub year: i32,
    pub max_score: f64,
    pub min_score: f64,
    pub score_levels: usize,
    pub total_students: u64,
    pub score_distribution: Vec<ScoreBucket>,
    pub key_percentiles: BTreeMap<String, f64>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub year: i32,
    pub rank: u64,
    pub percentage: f64,
    pub total_students: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub score: f64,
    pub trends: Vec<TrendPoint>,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRankEntry {
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RankQueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
