use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::models::{InsertOutcome, Verdict, VoteOutcome, VoteRecord};

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts a first vote for `(username, case_id)`. An existing vote is left
/// untouched and reported as [`InsertOutcome::AlreadyVoted`].
pub async fn insert_vote(
    pool: &SqlitePool,
    username: &str,
    case_id: i64,
    verdict: Verdict,
) -> anyhow::Result<InsertOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO votes (username, case_id, verdict, ts)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(username)
    .bind(case_id)
    .bind(verdict.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            debug!(username, case_id, %verdict, "vote inserted");
            Ok(InsertOutcome::Inserted)
        }
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            debug!(username, case_id, "vote already recorded");
            Ok(InsertOutcome::AlreadyVoted)
        }
        Err(err) => Err(err).context("failed to insert vote"),
    }
}

/// Replaces the verdict and timestamp of an existing vote. Returns false when
/// there was nothing to update.
pub async fn update_vote(
    pool: &SqlitePool,
    username: &str,
    case_id: i64,
    verdict: Verdict,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE votes SET verdict = ?, ts = ?
        WHERE username = ? AND case_id = ?
        "#,
    )
    .bind(verdict.as_str())
    .bind(Utc::now())
    .bind(username)
    .bind(case_id)
    .execute(pool)
    .await
    .context("failed to update vote")?;

    Ok(result.rows_affected() > 0)
}

/// Records a verdict, replacing the previous one when the user already voted
/// on the case. Resubmitting the same verdict leaves the row untouched.
pub async fn cast_vote(
    pool: &SqlitePool,
    username: &str,
    case_id: i64,
    verdict: Verdict,
) -> anyhow::Result<VoteOutcome> {
    if insert_vote(pool, username, case_id, verdict).await? == InsertOutcome::Inserted {
        info!(username, case_id, %verdict, "vote recorded");
        return Ok(VoteOutcome::Recorded);
    }

    if fetch_verdict(pool, username, case_id).await? == Some(verdict) {
        return Ok(VoteOutcome::Unchanged);
    }

    if !update_vote(pool, username, case_id, verdict).await? {
        bail!("could not update the vote for case {case_id}");
    }
    info!(username, case_id, %verdict, "vote updated");
    Ok(VoteOutcome::Updated)
}

pub async fn fetch_votes(pool: &SqlitePool) -> anyhow::Result<Vec<VoteRecord>> {
    let rows = sqlx::query("SELECT username, case_id, verdict, ts FROM votes ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut votes = Vec::with_capacity(rows.len());
    for row in rows {
        votes.push(VoteRecord {
            username: row.get("username"),
            case_id: row.get("case_id"),
            verdict: row.get("verdict"),
            ts: row.get("ts"),
        });
    }

    Ok(votes)
}

pub async fn fetch_voted_case_ids(
    pool: &SqlitePool,
    username: &str,
) -> anyhow::Result<BTreeSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT case_id FROM votes WHERE username = ?")
        .bind(username)
        .fetch_all(pool)
        .await?;

    Ok(ids.into_iter().collect())
}

pub async fn fetch_verdict(
    pool: &SqlitePool,
    username: &str,
    case_id: i64,
) -> anyhow::Result<Option<Verdict>> {
    let verdict: Option<String> =
        sqlx::query_scalar("SELECT verdict FROM votes WHERE username = ? AND case_id = ?")
            .bind(username)
            .bind(case_id)
            .fetch_optional(pool)
            .await?;

    Ok(verdict.and_then(|value| value.parse().ok()))
}

pub async fn delete_all_votes(pool: &SqlitePool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM votes").execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn fetch_config(pool: &SqlitePool, key: &str) -> anyhow::Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn get_config(pool: &SqlitePool, key: &str, default: &str) -> anyhow::Result<String> {
    Ok(fetch_config(pool, key)
        .await?
        .unwrap_or_else(|| default.to_string()))
}

pub async fn set_config(pool: &SqlitePool, key: &str, value: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO config (key, value, ts)
        VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE
        SET value = excluded.value, ts = excluded.ts
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to save config key {key}"))?;

    Ok(())
}

pub async fn delete_config(pool: &SqlitePool, key: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM config WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_case_cache(
    pool: &SqlitePool,
) -> anyhow::Result<Option<(String, DateTime<Utc>)>> {
    let row = sqlx::query("SELECT payload, fetched_at FROM case_cache WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| (row.get("payload"), row.get("fetched_at"))))
}

pub async fn store_case_cache(
    pool: &SqlitePool,
    payload: &str,
    fetched_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO case_cache (id, payload, fetched_at)
        VALUES (1, ?, ?)
        ON CONFLICT (id) DO UPDATE
        SET payload = excluded.payload, fetched_at = excluded.fetched_at
        "#,
    )
    .bind(payload)
    .bind(fetched_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn export_csv(pool: &SqlitePool, csv_path: &Path) -> anyhow::Result<usize> {
    let votes = fetch_votes(pool).await?;
    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("failed to create {}", csv_path.display()))?;

    for vote in &votes {
        writer.serialize(vote)?;
    }
    writer.flush()?;

    info!(rows = votes.len(), path = %csv_path.display(), "votes exported");
    Ok(votes.len())
}

/// Loads votes from a CSV export. Rows whose `(username, case_id)` already
/// exists are skipped.
pub async fn import_csv(pool: &SqlitePool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<VoteRecord>() {
        let row = result?;
        let verdict: Verdict = row
            .verdict
            .parse()
            .map_err(|err: String| {
                anyhow::anyhow!("{err} for {} on case {}", row.username, row.case_id)
            })?;

        let result = sqlx::query(
            r#"
            INSERT INTO votes (username, case_id, verdict, ts)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (username, case_id) DO NOTHING
            "#,
        )
        .bind(&row.username)
        .bind(row.case_id)
        .bind(verdict.as_str())
        .bind(row.ts)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "votes imported");
    Ok(inserted)
}

/// Writes a consistent copy of the whole database to `out`.
pub async fn backup(pool: &SqlitePool, out: &Path) -> anyhow::Result<()> {
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    let target = out
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", out.display()))?;

    sqlx::query("VACUUM INTO ?")
        .bind(target)
        .execute(pool)
        .await
        .context("failed to back up database")?;

    info!(path = %out.display(), "database backed up");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    async fn count_rows(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM votes")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported_and_keeps_row() {
        let pool = setup_test_db().await;

        let first = insert_vote(&pool, "ana", 1, Verdict::Guilty).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        let second = insert_vote(&pool, "ana", 1, Verdict::Innocent).await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyVoted);

        assert_eq!(count_rows(&pool).await, 1);
        let verdict = fetch_verdict(&pool, "ana", 1).await.unwrap();
        assert_eq!(verdict, Some(Verdict::Guilty));
    }

    #[tokio::test]
    async fn update_replaces_verdict_and_timestamp() {
        let pool = setup_test_db().await;

        insert_vote(&pool, "ana", 4, Verdict::Guilty).await.unwrap();
        let before = fetch_votes(&pool).await.unwrap()[0].ts;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(update_vote(&pool, "ana", 4, Verdict::Innocent).await.unwrap());

        let votes = fetch_votes(&pool).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].verdict, "innocent");
        assert!(votes[0].ts > before);
    }

    #[tokio::test]
    async fn cast_vote_records_updates_and_skips_repeats() {
        let pool = setup_test_db().await;

        let outcome = cast_vote(&pool, "ana", 2, Verdict::Guilty).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
        let recorded_at = fetch_votes(&pool).await.unwrap()[0].ts;

        let outcome = cast_vote(&pool, "ana", 2, Verdict::Guilty).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Unchanged);
        assert_eq!(fetch_votes(&pool).await.unwrap()[0].ts, recorded_at);

        let outcome = cast_vote(&pool, "ana", 2, Verdict::Innocent).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Updated);

        let votes = fetch_votes(&pool).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].verdict, "innocent");
    }

    #[tokio::test]
    async fn update_without_vote_reports_nothing_changed() {
        let pool = setup_test_db().await;
        assert!(!update_vote(&pool, "ana", 4, Verdict::Guilty).await.unwrap());
        assert_eq!(count_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn voted_case_ids_are_per_user() {
        let pool = setup_test_db().await;
        insert_vote(&pool, "ana", 1, Verdict::Guilty).await.unwrap();
        insert_vote(&pool, "ana", 3, Verdict::Innocent).await.unwrap();
        insert_vote(&pool, "ben", 2, Verdict::Guilty).await.unwrap();

        let ids = fetch_voted_case_ids(&pool, "ana").await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(fetch_verdict(&pool, "ben", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_all_votes_truncates() {
        let pool = setup_test_db().await;
        insert_vote(&pool, "ana", 1, Verdict::Guilty).await.unwrap();
        insert_vote(&pool, "ben", 1, Verdict::Guilty).await.unwrap();

        assert_eq!(delete_all_votes(&pool).await.unwrap(), 2);
        assert_eq!(count_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn config_defaults_and_upserts() {
        let pool = setup_test_db().await;
        assert_eq!(get_config(&pool, "color", "blue").await.unwrap(), "blue");

        set_config(&pool, "color", "red").await.unwrap();
        set_config(&pool, "color", "green").await.unwrap();
        assert_eq!(get_config(&pool, "color", "blue").await.unwrap(), "green");

        delete_config(&pool, "color").await.unwrap();
        assert_eq!(get_config(&pool, "color", "blue").await.unwrap(), "blue");
    }

    #[tokio::test]
    async fn case_cache_keeps_single_row() {
        let pool = setup_test_db().await;
        assert!(load_case_cache(&pool).await.unwrap().is_none());

        let now = Utc::now();
        store_case_cache(&pool, "[]", now).await.unwrap();
        store_case_cache(&pool, "[1]", now).await.unwrap();

        let (payload, _) = load_case_cache(&pool).await.unwrap().unwrap();
        assert_eq!(payload, "[1]");
    }

    #[tokio::test]
    async fn csv_export_round_trips_through_import() {
        let pool = setup_test_db().await;
        insert_vote(&pool, "ana", 1, Verdict::Guilty).await.unwrap();
        insert_vote(&pool, "ben", 2, Verdict::Innocent).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.csv");
        assert_eq!(export_csv(&pool, &path).await.unwrap(), 2);

        // Existing rows are skipped.
        assert_eq!(import_csv(&pool, &path).await.unwrap(), 0);

        delete_all_votes(&pool).await.unwrap();
        assert_eq!(import_csv(&pool, &path).await.unwrap(), 2);
        assert_eq!(fetch_verdict(&pool, "ben", 2).await.unwrap(), Some(Verdict::Innocent));
    }

    #[tokio::test]
    async fn backup_writes_file_and_refuses_overwrite() {
        let pool = setup_test_db().await;
        insert_vote(&pool, "ana", 1, Verdict::Guilty).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes-backup.db");
        backup(&pool, &path).await.unwrap();
        assert!(path.exists());
        assert!(backup(&pool, &path).await.is_err());
    }
}
