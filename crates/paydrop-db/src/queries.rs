use crate::models::{FileRow, PaymentRow, TransactionRow};
use crate::{now_ts, Database};
use anyhow::Result;
use rusqlite::Connection;

const FILE_COLUMNS: &str = "id, filename, original_filename, filepath, file_size, mime_type, \
     duration_days, price_usd, share_link, expiry_date, payment_status, created_at, updated_at";

const PAYMENT_COLUMNS: &str =
    "id, file_id, amount_usd, payment_status, transaction_hash, payment_data, paid_at, created_at";

const TRANSACTION_COLUMNS: &str = "id, file_id, payment_id, event_type, event_data, created_at";

/// Insert parameters for a new file record.
pub struct NewFile<'a> {
    pub id: &'a str,
    pub filename: &'a str,
    pub original_filename: &'a str,
    pub filepath: &'a str,
    pub file_size: i64,
    pub mime_type: Option<&'a str>,
    pub duration_days: i64,
    pub price_usd: &'a str,
    pub share_link: &'a str,
    /// RFC 3339 UTC, see [`crate::format_ts`].
    pub expiry_date: &'a str,
    /// "pending" or "completed".
    pub payment_status: &'a str,
}

/// Insert parameters for a new payment record.
pub struct NewPayment<'a> {
    pub id: &'a str,
    pub file_id: &'a str,
    pub amount_usd: &'a str,
    pub payment_status: &'a str,
    pub transaction_hash: Option<&'a str>,
    pub payment_data: Option<&'a str>,
}

impl Database {
    // -- Files --

    pub fn create_file(&self, file: &NewFile) -> Result<FileRow> {
        let now = now_ts();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO files (id, filename, original_filename, filepath, file_size, \
                 mime_type, duration_days, price_usd, share_link, expiry_date, payment_status, \
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                rusqlite::params![
                    file.id,
                    file.filename,
                    file.original_filename,
                    file.filepath,
                    file.file_size,
                    file.mime_type,
                    file.duration_days,
                    file.price_usd,
                    file.share_link,
                    file.expiry_date,
                    file.payment_status,
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(FileRow {
            id: file.id.to_string(),
            filename: file.filename.to_string(),
            original_filename: file.original_filename.to_string(),
            filepath: file.filepath.to_string(),
            file_size: file.file_size,
            mime_type: file.mime_type.map(str::to_string),
            duration_days: file.duration_days,
            price_usd: file.price_usd.to_string(),
            share_link: file.share_link.to_string(),
            expiry_date: file.expiry_date.to_string(),
            payment_status: file.payment_status.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_file_by_id(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| query_file(conn, "id", id))
    }

    pub fn get_file_by_share_link(&self, share_link: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| query_file(conn, "share_link", share_link))
    }

    pub fn get_all_files(&self, limit: u32) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM files ORDER BY created_at DESC LIMIT ?1",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], map_file_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Promote a file to completed. Conditional on the current status still
    /// being pending, so a racing second promotion is a no-op and the
    /// transition can never reverse. Returns true if the row transitioned.
    pub fn complete_file_payment(&self, id: &str) -> Result<bool> {
        let now = now_ts();
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE files SET payment_status = 'completed', updated_at = ?2
                 WHERE id = ?1 AND payment_status = 'pending'",
                rusqlite::params![id, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Completed-payment files whose expiry has passed. The boundary instant
    /// itself counts as expired.
    pub fn get_expired_paid_files(&self, now: &str) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM files WHERE expiry_date <= ?1 AND payment_status = 'completed'",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([now], map_file_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Never-paid files whose expiry passed before `cutoff` (expiry plus a
    /// grace window, computed by the caller). These are orphans: no payment
    /// ever completed, so the paid-expiry path never reclaims them.
    pub fn get_abandoned_pending_files(&self, cutoff: &str) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM files WHERE expiry_date <= ?1 AND payment_status = 'pending'",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([cutoff], map_file_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a file record. Payments and transactions cascade at the
    /// storage layer. Returns true if a row was deleted.
    pub fn delete_file(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Payments --

    pub fn create_payment(&self, payment: &NewPayment) -> Result<PaymentRow> {
        let now = now_ts();
        let paid_at = (payment.payment_status == "completed").then(|| now.clone());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO payments (id, file_id, amount_usd, payment_status, \
                 transaction_hash, payment_data, paid_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    payment.id,
                    payment.file_id,
                    payment.amount_usd,
                    payment.payment_status,
                    payment.transaction_hash,
                    payment.payment_data,
                    paid_at,
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(PaymentRow {
            id: payment.id.to_string(),
            file_id: payment.file_id.to_string(),
            amount_usd: payment.amount_usd.to_string(),
            payment_status: payment.payment_status.to_string(),
            transaction_hash: payment.transaction_hash.map(str::to_string),
            payment_data: payment.payment_data.map(str::to_string),
            paid_at,
            created_at: now,
        })
    }

    /// Promote a payment to completed, stamping paid_at. Same conditional
    /// update rule as [`Database::complete_file_payment`].
    pub fn complete_payment(
        &self,
        payment_id: &str,
        transaction_hash: Option<&str>,
        payment_data: Option<&str>,
    ) -> Result<bool> {
        let now = now_ts();
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE payments SET payment_status = 'completed',
                     transaction_hash = COALESCE(?2, transaction_hash),
                     payment_data = COALESCE(?3, payment_data),
                     paid_at = ?4
                 WHERE id = ?1 AND payment_status = 'pending'",
                rusqlite::params![payment_id, transaction_hash, payment_data, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Latest-created payment for a file. That record is the authoritative
    /// one for status queries.
    pub fn get_payment_by_file_id(&self, file_id: &str) -> Result<Option<PaymentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM payments WHERE file_id = ?1 ORDER BY created_at DESC LIMIT 1",
                PAYMENT_COLUMNS
            );
            conn.query_row(&sql, [file_id], map_payment_row).optional()
        })
    }

    // -- Transactions (audit log) --

    pub fn create_transaction(
        &self,
        id: &str,
        file_id: &str,
        payment_id: Option<&str>,
        event_type: &str,
        event_data: Option<&str>,
    ) -> Result<()> {
        let now = now_ts();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO transactions (id, file_id, payment_id, event_type, event_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, file_id, payment_id, event_type, event_data, now],
            )?;
            Ok(())
        })
    }

    pub fn get_transactions_by_file_id(&self, file_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM transactions WHERE file_id = ?1 ORDER BY created_at DESC",
                TRANSACTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([file_id], map_transaction_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_all_transactions(&self, limit: u32) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM transactions ORDER BY created_at DESC LIMIT ?1",
                TRANSACTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], map_transaction_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_file(conn: &Connection, column: &str, value: &str) -> Result<Option<FileRow>> {
    let sql = format!("SELECT {} FROM files WHERE {} = ?1", FILE_COLUMNS, column);
    conn.query_row(&sql, [value], map_file_row).optional()
}

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_filename: row.get(2)?,
        filepath: row.get(3)?,
        file_size: row.get(4)?,
        mime_type: row.get(5)?,
        duration_days: row.get(6)?,
        price_usd: row.get(7)?,
        share_link: row.get(8)?,
        expiry_date: row.get(9)?,
        payment_status: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn map_payment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        id: row.get(0)?,
        file_id: row.get(1)?,
        amount_usd: row.get(2)?,
        payment_status: row.get(3)?,
        transaction_hash: row.get(4)?,
        payment_data: row.get(5)?,
        paid_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        file_id: row.get(1)?,
        payment_id: row.get(2)?,
        event_type: row.get(3)?,
        event_data: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_ts;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn insert_file(db: &Database, status: &str, expiry: chrono::DateTime<Utc>) -> FileRow {
        let id = Uuid::new_v4().to_string();
        let link = Uuid::new_v4().to_string();
        let expiry = format_ts(expiry);
        db.create_file(&NewFile {
            id: &id,
            filename: &id,
            original_filename: "report.pdf",
            filepath: "/tmp/nowhere",
            file_size: 1234,
            mime_type: Some("application/pdf"),
            duration_days: 7,
            price_usd: "0.15",
            share_link: &link,
            expiry_date: &expiry,
            payment_status: status,
        })
        .unwrap()
    }

    #[test]
    fn file_roundtrip_by_id_and_share_link() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "pending", Utc::now() + Duration::days(7));

        let by_id = db.get_file_by_id(&file.id).unwrap().unwrap();
        assert_eq!(by_id.original_filename, "report.pdf");
        assert_eq!(by_id.price_usd, "0.15");
        assert_eq!(by_id.payment_status, "pending");

        let by_link = db.get_file_by_share_link(&file.share_link).unwrap().unwrap();
        assert_eq!(by_link.id, file.id);

        assert!(db.get_file_by_share_link("missing").unwrap().is_none());
    }

    #[test]
    fn file_payment_promotion_is_one_way() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "pending", Utc::now() + Duration::days(1));

        assert!(db.complete_file_payment(&file.id).unwrap());
        // Second promotion is a no-op.
        assert!(!db.complete_file_payment(&file.id).unwrap());

        let row = db.get_file_by_id(&file.id).unwrap().unwrap();
        assert_eq!(row.payment_status, "completed");
        assert!(row.updated_at >= row.created_at);
    }

    #[test]
    fn expired_listing_respects_status_and_boundary() {
        let (_dir, db) = open_db();
        let now = Utc::now();

        let paid_expired = insert_file(&db, "completed", now - Duration::hours(1));
        let paid_boundary = insert_file(&db, "completed", now);
        let paid_live = insert_file(&db, "completed", now + Duration::hours(1));
        let pending_expired = insert_file(&db, "pending", now - Duration::hours(1));

        let expired = db.get_expired_paid_files(&format_ts(now)).unwrap();
        let ids: Vec<&str> = expired.iter().map(|f| f.id.as_str()).collect();
        assert!(ids.contains(&paid_expired.id.as_str()));
        // The expiry instant itself counts as expired.
        assert!(ids.contains(&paid_boundary.id.as_str()));
        assert!(!ids.contains(&paid_live.id.as_str()));
        assert!(!ids.contains(&pending_expired.id.as_str()));
    }

    #[test]
    fn abandoned_pending_listing_uses_cutoff() {
        let (_dir, db) = open_db();
        let now = Utc::now();
        let cutoff = now - Duration::hours(24);

        let old_pending = insert_file(&db, "pending", now - Duration::hours(25));
        let recent_pending = insert_file(&db, "pending", now - Duration::hours(1));
        let old_paid = insert_file(&db, "completed", now - Duration::hours(25));

        let abandoned = db.get_abandoned_pending_files(&format_ts(cutoff)).unwrap();
        let ids: Vec<&str> = abandoned.iter().map(|f| f.id.as_str()).collect();
        assert!(ids.contains(&old_pending.id.as_str()));
        assert!(!ids.contains(&recent_pending.id.as_str()));
        assert!(!ids.contains(&old_paid.id.as_str()));
    }

    #[test]
    fn delete_cascades_payments_and_transactions() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "completed", Utc::now() - Duration::hours(1));

        let payment = db
            .create_payment(&NewPayment {
                id: &Uuid::new_v4().to_string(),
                file_id: &file.id,
                amount_usd: "0.15",
                payment_status: "completed",
                transaction_hash: Some("0xabc"),
                payment_data: None,
            })
            .unwrap();
        db.create_transaction(
            &Uuid::new_v4().to_string(),
            &file.id,
            Some(&payment.id),
            "file_uploaded",
            Some(r#"{"size":1234}"#),
        )
        .unwrap();

        assert!(db.delete_file(&file.id).unwrap());
        assert!(!db.delete_file(&file.id).unwrap());

        assert!(db.get_file_by_id(&file.id).unwrap().is_none());
        assert!(db.get_payment_by_file_id(&file.id).unwrap().is_none());
        assert!(db.get_transactions_by_file_id(&file.id).unwrap().is_empty());
    }

    #[test]
    fn latest_payment_is_authoritative() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "pending", Utc::now() + Duration::days(1));

        let first = Uuid::new_v4().to_string();
        db.create_payment(&NewPayment {
            id: &first,
            file_id: &file.id,
            amount_usd: "0.15",
            payment_status: "pending",
            transaction_hash: None,
            payment_data: None,
        })
        .unwrap();

        // created_at has microsecond precision; keep the rows apart.
        std::thread::sleep(std::time::Duration::from_millis(2));

        let second = Uuid::new_v4().to_string();
        db.create_payment(&NewPayment {
            id: &second,
            file_id: &file.id,
            amount_usd: "0.15",
            payment_status: "pending",
            transaction_hash: None,
            payment_data: None,
        })
        .unwrap();

        let latest = db.get_payment_by_file_id(&file.id).unwrap().unwrap();
        assert_eq!(latest.id, second);
    }

    #[test]
    fn payment_promotion_stamps_paid_at_once() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "pending", Utc::now() + Duration::days(1));

        let payment = db
            .create_payment(&NewPayment {
                id: &Uuid::new_v4().to_string(),
                file_id: &file.id,
                amount_usd: "0.05",
                payment_status: "pending",
                transaction_hash: None,
                payment_data: None,
            })
            .unwrap();
        assert!(payment.paid_at.is_none());

        assert!(db
            .complete_payment(&payment.id, Some("0xfeed"), Some(r#"{"via":"proof"}"#))
            .unwrap());
        let row = db.get_payment_by_file_id(&file.id).unwrap().unwrap();
        assert_eq!(row.payment_status, "completed");
        assert_eq!(row.transaction_hash.as_deref(), Some("0xfeed"));
        assert!(row.paid_at.is_some());

        // A second completion attempt must not touch the row.
        assert!(!db.complete_payment(&payment.id, Some("0xother"), None).unwrap());
        let row = db.get_payment_by_file_id(&file.id).unwrap().unwrap();
        assert_eq!(row.transaction_hash.as_deref(), Some("0xfeed"));
    }

    #[test]
    fn payment_created_completed_has_paid_at() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "completed", Utc::now() + Duration::days(1));

        let payment = db
            .create_payment(&NewPayment {
                id: &Uuid::new_v4().to_string(),
                file_id: &file.id,
                amount_usd: "0.15",
                payment_status: "completed",
                transaction_hash: Some("0xsettled"),
                payment_data: None,
            })
            .unwrap();
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn transactions_are_append_only_and_listed_per_file() {
        let (_dir, db) = open_db();
        let file = insert_file(&db, "completed", Utc::now() + Duration::days(1));

        db.create_transaction(
            &Uuid::new_v4().to_string(),
            &file.id,
            None,
            "file_uploaded",
            None,
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        db.create_transaction(
            &Uuid::new_v4().to_string(),
            &file.id,
            None,
            "payment_completed",
            Some(r#"{"transactionHash":"0xabc"}"#),
        )
        .unwrap();

        let events = db.get_transactions_by_file_id(&file.id).unwrap();
        assert_eq!(events.len(), 2);
        // Newest first.
        assert_eq!(events[0].event_type, "payment_completed");
        assert_eq!(events[1].event_type, "file_uploaded");

        assert_eq!(db.get_all_transactions(10).unwrap().len(), 2);
        assert_eq!(db.get_all_transactions(1).unwrap().len(), 1);
    }

    #[test]
    fn get_all_files_applies_limit() {
        let (_dir, db) = open_db();
        for _ in 0..5 {
            insert_file(&db, "pending", Utc::now() + Duration::days(1));
        }
        assert_eq!(db.get_all_files(3).unwrap().len(), 3);
        assert_eq!(db.get_all_files(100).unwrap().len(), 5);
    }
}
