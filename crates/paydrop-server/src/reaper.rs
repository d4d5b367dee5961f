use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use paydrop_db::models::FileRow;
use paydrop_db::{format_ts, Database};
use paydrop_types::api::{CleanupError, CleanupReport};
use paydrop_types::EventType;

use crate::storage::Storage;

/// Background task that reclaims storage for files past their retention
/// window. Paid files are reaped as soon as they expire; files that never
/// reached a completed payment get an extra grace window before they are
/// treated as abandoned.
pub async fn run_reaper_loop(
    db: Arc<Database>,
    storage: Arc<Storage>,
    interval_secs: u64,
    pending_grace: chrono::Duration,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match run_cleanup(&db, &storage, pending_grace).await {
            Ok(report) => {
                if report.deleted_count > 0 || !report.errors.is_empty() {
                    info!(
                        "Cleanup: removed {} expired files ({} failures)",
                        report.deleted_count,
                        report.errors.len()
                    );
                }
            }
            Err(e) => {
                warn!("Cleanup error: {:#}", e);
            }
        }
    }
}

/// One reaper pass. Per-file failures are collected into the report and
/// never abort the batch.
pub async fn run_cleanup(
    db: &Database,
    storage: &Storage,
    pending_grace: chrono::Duration,
) -> Result<CleanupReport> {
    let now = Utc::now();

    let mut targets: Vec<(FileRow, &'static str)> = Vec::new();
    for file in db.get_expired_paid_files(&format_ts(now))? {
        targets.push((file, "expired"));
    }
    for file in db.get_abandoned_pending_files(&format_ts(now - pending_grace))? {
        targets.push((file, "abandoned_pending"));
    }

    let mut report = CleanupReport::default();
    for (file, reason) in targets {
        match reap_file(db, storage, &file, reason).await {
            Ok(()) => {
                info!("Reaped file {} ({})", file.id, reason);
                report.deleted_count += 1;
            }
            Err(e) => {
                warn!("Failed to reap file {}: {:#}", file.id, e);
                report.errors.push(CleanupError {
                    file_id: file.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

async fn reap_file(
    db: &Database,
    storage: &Storage,
    file: &FileRow,
    reason: &str,
) -> Result<()> {
    storage.delete_blob(&file.filename).await?;

    let event = json!({
        "filename": file.original_filename,
        "reason": reason,
        "expiryDate": file.expiry_date,
    });
    db.create_transaction(
        &Uuid::new_v4().to_string(),
        &file.id,
        None,
        EventType::FileDeleted.as_str(),
        Some(&event.to_string()),
    )?;

    // Cascades the payments and transactions, including the event above.
    db.delete_file(&file.id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use paydrop_db::NewFile;

    fn grace() -> ChronoDuration {
        ChronoDuration::hours(24)
    }

    async fn fixture() -> (tempfile::TempDir, Arc<Database>, Arc<Storage>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("test.db")).unwrap());
        let storage = Arc::new(Storage::new(dir.path().join("blobs")).await.unwrap());
        (dir, db, storage)
    }

    async fn insert_file_with_blob(
        db: &Database,
        storage: &Storage,
        status: &str,
        expiry: chrono::DateTime<Utc>,
        blob: Option<&[u8]>,
    ) -> FileRow {
        let id = Uuid::new_v4().to_string();
        let path = match blob {
            Some(data) => storage.save_blob(&id, data).await.unwrap(),
            None => storage.blob_path(&id),
        };
        let link = Uuid::new_v4().to_string();
        let path = path.display().to_string();
        let expiry = format_ts(expiry);
        db.create_file(&NewFile {
            id: &id,
            filename: &id,
            original_filename: "old.bin",
            filepath: &path,
            file_size: blob.map(|b| b.len() as i64).unwrap_or(0),
            mime_type: None,
            duration_days: 1,
            price_usd: "0.05",
            share_link: &link,
            expiry_date: &expiry,
            payment_status: status,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn empty_store_is_a_noop() {
        let (_dir, db, storage) = fixture().await;
        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 0);
        assert!(report.errors.is_empty());
        assert!(db.get_all_transactions(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_paid_file_is_fully_reclaimed() {
        let (_dir, db, storage) = fixture().await;
        let file = insert_file_with_blob(
            &db,
            &storage,
            "completed",
            Utc::now() - ChronoDuration::hours(2),
            Some(b"stale bytes"),
        )
        .await;

        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert!(report.errors.is_empty());

        // Blob, record, and cascaded children are all gone.
        assert!(tokio::fs::metadata(storage.blob_path(&file.filename))
            .await
            .is_err());
        assert!(db.get_file_by_id(&file.id).unwrap().is_none());
        assert!(db
            .get_file_by_share_link(&file.share_link)
            .unwrap()
            .is_none());
        assert!(db.get_transactions_by_file_id(&file.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_and_fresh_pending_files_survive() {
        let (_dir, db, storage) = fixture().await;
        let live = insert_file_with_blob(
            &db,
            &storage,
            "completed",
            Utc::now() + ChronoDuration::hours(2),
            Some(b"live"),
        )
        .await;
        // Expired but pending, within the grace window: not yet abandoned.
        let fresh_pending = insert_file_with_blob(
            &db,
            &storage,
            "pending",
            Utc::now() - ChronoDuration::hours(2),
            Some(b"unpaid"),
        )
        .await;

        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 0);
        assert!(db.get_file_by_id(&live.id).unwrap().is_some());
        assert!(db.get_file_by_id(&fresh_pending.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn abandoned_pending_file_is_reaped_after_grace() {
        let (_dir, db, storage) = fixture().await;
        let abandoned = insert_file_with_blob(
            &db,
            &storage,
            "pending",
            Utc::now() - ChronoDuration::hours(25),
            Some(b"never paid"),
        )
        .await;

        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert!(db.get_file_by_id(&abandoned.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_does_not_count_as_failure() {
        let (_dir, db, storage) = fixture().await;
        insert_file_with_blob(
            &db,
            &storage,
            "completed",
            Utc::now() - ChronoDuration::hours(2),
            None,
        )
        .await;

        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn one_bad_file_does_not_block_the_batch() {
        let (_dir, db, storage) = fixture().await;
        let good = insert_file_with_blob(
            &db,
            &storage,
            "completed",
            Utc::now() - ChronoDuration::hours(2),
            Some(b"deletable"),
        )
        .await;

        // A directory where the blob should be makes remove_file fail.
        let bad = insert_file_with_blob(
            &db,
            &storage,
            "completed",
            Utc::now() - ChronoDuration::hours(2),
            None,
        )
        .await;
        tokio::fs::create_dir(storage.blob_path(&bad.filename))
            .await
            .unwrap();

        let report = run_cleanup(&db, &storage, grace()).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].file_id, bad.id);

        assert!(db.get_file_by_id(&good.id).unwrap().is_none());
        // The failed file is untouched and will be retried next pass.
        assert!(db.get_file_by_id(&bad.id).unwrap().is_some());
    }
}
