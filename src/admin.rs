use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::ResetError;

const PENDING_RESET_KEY: &str = "pending_reset";
const RESET_WINDOW_MINUTES: i64 = 10;

/// First step of a full vote reset. Nothing is deleted until the code is
/// confirmed with [`confirm_reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn request_reset(pool: &SqlitePool) -> anyhow::Result<ResetRequest> {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(8);

    let request = ResetRequest {
        code,
        expires_at: Utc::now() + Duration::minutes(RESET_WINDOW_MINUTES),
    };
    db::set_config(pool, PENDING_RESET_KEY, &serde_json::to_string(&request)?).await?;

    info!(expires_at = %request.expires_at, "vote reset requested");
    Ok(request)
}

/// Returns true when there was a pending request to cancel.
pub async fn cancel_reset(pool: &SqlitePool) -> anyhow::Result<bool> {
    let pending = pending_reset(pool).await?.is_some();
    if pending {
        db::delete_config(pool, PENDING_RESET_KEY).await?;
        info!("vote reset cancelled");
    }
    Ok(pending)
}

/// Deletes every vote if `code` matches an unexpired request. Returns the
/// number of votes removed.
pub async fn confirm_reset(pool: &SqlitePool, code: &str) -> anyhow::Result<u64> {
    let request = pending_reset(pool)
        .await?
        .ok_or(ResetError::NotRequested)?;

    if Utc::now() > request.expires_at {
        db::delete_config(pool, PENDING_RESET_KEY).await?;
        return Err(ResetError::Expired.into());
    }
    if request.code != code.trim() {
        warn!("vote reset confirmation code mismatch");
        return Err(ResetError::CodeMismatch.into());
    }

    let deleted = db::delete_all_votes(pool).await?;
    db::delete_config(pool, PENDING_RESET_KEY).await?;
    warn!(deleted, "all votes deleted");
    Ok(deleted)
}

async fn pending_reset(pool: &SqlitePool) -> anyhow::Result<Option<ResetRequest>> {
    let Some(raw) = db::fetch_config(pool, PENDING_RESET_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(request) => Ok(Some(request)),
        Err(err) => {
            warn!(error = %err, "discarding unreadable pending reset");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::setup_test_db;
    use crate::models::Verdict;

    async fn seed_votes(pool: &SqlitePool) {
        db::insert_vote(pool, "ana", 1, Verdict::Guilty).await.unwrap();
        db::insert_vote(pool, "ben", 1, Verdict::Innocent).await.unwrap();
    }

    fn reset_error(err: anyhow::Error) -> ResetError {
        err.downcast::<ResetError>().unwrap()
    }

    #[tokio::test]
    async fn confirm_without_request_is_rejected() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;

        let err = confirm_reset(&pool, "whatever").await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::NotRequested));
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn two_steps_delete_all_votes() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;

        let request = request_reset(&pool).await.unwrap();
        assert_eq!(request.code.len(), 8);
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);

        assert_eq!(confirm_reset(&pool, &request.code).await.unwrap(), 2);
        assert!(db::fetch_votes(&pool).await.unwrap().is_empty());

        // The code is single use.
        let err = confirm_reset(&pool, &request.code).await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::NotRequested));
    }

    #[tokio::test]
    async fn wrong_code_keeps_votes_and_request() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;

        let request = request_reset(&pool).await.unwrap();
        let err = confirm_reset(&pool, "00000000x").await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::CodeMismatch));
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);

        assert_eq!(confirm_reset(&pool, &request.code).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_request_is_discarded() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;

        let stale = ResetRequest {
            code: "deadbeef".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        };
        db::set_config(&pool, PENDING_RESET_KEY, &serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        let err = confirm_reset(&pool, "deadbeef").await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::Expired));
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);
        assert!(!cancel_reset(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_request_counts_as_none() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;
        db::set_config(&pool, PENDING_RESET_KEY, "{not json")
            .await
            .unwrap();

        let err = confirm_reset(&pool, "deadbeef").await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::NotRequested));
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);

        // A fresh request replaces the unreadable one.
        let request = request_reset(&pool).await.unwrap();
        assert_eq!(confirm_reset(&pool, &request.code).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancel_clears_pending_request() {
        let pool = setup_test_db().await;
        seed_votes(&pool).await;

        let request = request_reset(&pool).await.unwrap();
        assert!(cancel_reset(&pool).await.unwrap());

        let err = confirm_reset(&pool, &request.code).await.unwrap_err();
        assert!(matches!(reset_error(err), ResetError::NotRequested));
        assert_eq!(db::fetch_votes(&pool).await.unwrap().len(), 2);
    }
}
