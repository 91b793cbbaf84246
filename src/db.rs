use std::{collections::BTreeMap, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::info;

use crate::{
    models::{Admission, School, ScoreRecord, Scope},
    rank::{from_centi, to_centi},
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open SQLite database {database_url}"))
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Connects and brings the schema up to date. Migrations are idempotent, so
/// every command can start from a fresh database file.
pub async fn open(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = connect(database_url).await?;
    init_db(&pool)
        .await
        .with_context(|| format!("failed to apply migrations to {database_url}"))?;
    Ok(pool)
}

pub async fn seed(pool: &SqlitePool) -> anyhow::Result<()> {
    // Bell-shaped sample distribution around 640 for two years. Roughly
    // three in five students sit in the inner districts.
    for (year, peak) in [(2023, 180u32), (2024, 200u32)] {
        for score in (450..=785).rev() {
            let distance = (score as i64 - 640).unsigned_abs() as u32;
            let count = peak.saturating_sub(distance) + 1;
            upsert_score(pool, year, score as f64, count, count * 3 / 5).await?;
        }
        upsert_score(pool, year, 760.5, 3, 2).await?;
    }

    let schools = vec![
        ("Nankai High School", "Nankai", 520, [(2023, 752.0, 620), (2024, 755.0, 600)]),
        ("Yaohua High School", "Heping", 560, [(2023, 748.0, 980), (2024, 750.0, 950)]),
        ("Tianjin No.1 High School", "Hebei", 600, [(2023, 738.0, 2100), (2024, 741.0, 2000)]),
        ("Experimental High School", "Hexi", 480, [(2023, 730.0, 3300), (2024, 733.0, 3100)]),
        ("Xinhua High School", "Heping", 500, [(2023, 722.0, 4600), (2024, 724.0, 4400)]),
        ("Tianjin No.20 High School", "Hexi", 450, [(2023, 712.0, 6100), (2024, 715.0, 5900)]),
        ("Tianjin No.4 High School", "Hedong", 420, [(2023, 705.0, 7400), (2024, 706.0, 7300)]),
        ("Hongqiao High School", "Hongqiao", 380, [(2023, 690.0, 9800), (2024, 692.0, 9500)]),
    ];

    for (name, region, quota, admissions) in schools {
        let school_id = upsert_school(pool, name, region, quota).await?;
        for (year, admission_score, admission_rank) in admissions {
            let admission = Admission {
                year,
                scope: Scope::City,
                admission_score,
                admission_rank,
            };
            upsert_admission(pool, school_id, &admission).await?;
            upsert_admission(
                pool,
                school_id,
                &Admission {
                    scope: Scope::Inner,
                    admission_rank: admission_rank * 3 / 5,
                    ..admission
                },
            )
            .await?;
        }
    }

    Ok(())
}

async fn upsert_score(
    pool: &SqlitePool,
    year: i32,
    score: f64,
    student_count: u32,
    inner_count: u32,
) -> anyhow::Result<u64> {
    let score_centi = to_centi(score)
        .with_context(|| format!("score {score} has more than two decimal places"))?;
    if inner_count > student_count {
        return Err(anyhow!(
            "score {score} in {year}: inner_count {inner_count} exceeds student_count {student_count}"
        ));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO score_records (year, score_centi, student_count, inner_count)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (year, score_centi) DO UPDATE
        SET student_count = EXCLUDED.student_count,
            inner_count = EXCLUDED.inner_count
        "#,
    )
    .bind(year)
    .bind(score_centi)
    .bind(student_count as i64)
    .bind(inner_count as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn upsert_school(
    pool: &SqlitePool,
    name: &str,
    region: &str,
    admission_quota: u32,
) -> anyhow::Result<i64> {
    let school_id: i64 = sqlx::query(
        r#"
        INSERT INTO schools (name, region, admission_quota)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (name) DO UPDATE
        SET region = EXCLUDED.region, admission_quota = EXCLUDED.admission_quota
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(region)
    .bind(admission_quota as i64)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(school_id)
}

async fn upsert_admission(
    pool: &SqlitePool,
    school_id: i64,
    admission: &Admission,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO school_admissions (school_id, year, scope, admission_score, admission_rank)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (school_id, year, scope) DO UPDATE
        SET admission_score = EXCLUDED.admission_score,
            admission_rank = EXCLUDED.admission_rank
        "#,
    )
    .bind(school_id)
    .bind(admission.year)
    .bind(admission.scope.as_str())
    .bind(admission.admission_score)
    .bind(admission.admission_rank)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn fetch_score_records(pool: &SqlitePool) -> anyhow::Result<Vec<ScoreRecord>> {
    let rows = sqlx::query(
        "SELECT year, score_centi, student_count, inner_count FROM score_records \
         ORDER BY year, score_centi DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let student_count: i64 = row.get("student_count");
        let inner_count: i64 = row.get("inner_count");
        records.push(ScoreRecord {
            year: row.get("year"),
            score: from_centi(row.get("score_centi")),
            student_count: u32::try_from(student_count)
                .context("student_count out of range")?,
            inner_count: u32::try_from(inner_count).context("inner_count out of range")?,
        });
    }

    Ok(records)
}

pub async fn fetch_schools(pool: &SqlitePool) -> anyhow::Result<Vec<School>> {
    let rows = sqlx::query(
        "SELECT s.id, s.name, s.region, s.admission_quota, \
         a.year, a.scope, a.admission_score, a.admission_rank \
         FROM schools s \
         LEFT JOIN school_admissions a ON a.school_id = s.id \
         ORDER BY s.id, a.year, a.scope",
    )
    .fetch_all(pool)
    .await?;

    let mut schools: BTreeMap<i64, School> = BTreeMap::new();

    for row in rows {
        let id: i64 = row.get("id");
        let quota: i64 = row.get("admission_quota");
        let school = schools.entry(id).or_insert_with(|| School {
            name: row.get("name"),
            region: row.get("region"),
            admission_quota: u32::try_from(quota).unwrap_or(0),
            admissions: Vec::new(),
        });

        let year: Option<i32> = row.get("year");
        let scope: Option<String> = row.get("scope");
        if let (Some(year), Some(scope)) = (year, scope) {
            school.admissions.push(Admission {
                year,
                scope: scope.parse().map_err(|e: String| anyhow!(e))?,
                admission_score: row.get("admission_score"),
                admission_rank: row.get("admission_rank"),
            });
        }
    }

    Ok(schools.into_values().collect())
}

pub async fn import_scores_csv(pool: &SqlitePool, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        year: i32,
        score: f64,
        student_count: u32,
        #[serde(default)]
        inner_count: u32,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad score row {}", line + 2))?;
        let affected =
            upsert_score(pool, row.year, row.score, row.student_count, row.inner_count).await?;
        if affected > 0 {
            imported += 1;
        }
    }

    info!(imported, path = %csv_path.display(), "Imported score records");
    Ok(imported)
}

pub async fn import_schools_csv(pool: &SqlitePool, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        name: String,
        region: String,
        admission_quota: u32,
        year: i32,
        #[serde(default)]
        scope: Scope,
        admission_score: f64,
        admission_rank: i64,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad school row {}", line + 2))?;
        let school_id = upsert_school(pool, &row.name, &row.region, row.admission_quota).await?;
        let admission = Admission {
            year: row.year,
            scope: row.scope,
            admission_score: row.admission_score,
            admission_rank: row.admission_rank,
        };
        let affected = upsert_admission(pool, school_id, &admission).await?;

        if affected > 0 {
            imported += 1;
        }
    }

    info!(imported, path = %csv_path.display(), "Imported school admissions");
    Ok(imported)
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    init_db(&pool).await.unwrap();
    pool
}
