//! Receipt repository: the `receipts` table.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, Database, DatabaseError};
use crate::extraction::{LineItem, ReceiptFields};

/// A stored receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptRow {
    pub id: i64,
    pub job_id: Option<i64>,
    pub uploader_name: String,
    pub receipt_type: String,
    pub date: String,
    pub company_name: String,
    pub price: String,
    pub raw_ocr: String,
    pub file_path: String,
    pub file_name: Option<String>,
    pub items: Vec<LineItem>,
    pub created_at: String,
}

impl ReceiptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let items: String = row.get("items")?;
        let items: Vec<LineItem> = serde_json::from_str(&items).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            uploader_name: row.get("uploader_name")?,
            receipt_type: row.get("receipt_type")?,
            date: row.get("date")?,
            company_name: row.get("company_name")?,
            price: row.get("price")?,
            raw_ocr: row.get("raw_ocr")?,
            file_path: row.get("file_path")?,
            file_name: row.get("file_name")?,
            items,
            created_at: row.get("created_at")?,
        })
    }
}

/// Everything needed to store a receipt for a finished job.
///
/// `uploader_name` is the job's owner and is stored in place of
/// `fields.uploader_name`.
#[derive(Debug, Clone)]
pub struct NewReceipt<'a> {
    pub job_id: i64,
    pub uploader_name: &'a str,
    pub fields: &'a ReceiptFields,
    pub raw_ocr: &'a str,
    pub file_path: &'a str,
}

/// Inserts a receipt and returns its id.
///
/// `job_id` is unique, so a second receipt for the same job fails.
pub fn insert(db: &Database, receipt: &NewReceipt<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_in(conn, receipt))
}

/// [`insert`] on a connection the caller holds.
pub(crate) fn insert_in(conn: &Connection, receipt: &NewReceipt<'_>) -> Result<i64, DatabaseError> {
    let items = serde_json::to_string(&receipt.fields.items).map_err(|e| {
        DatabaseError::Serialize {
            what: "receipt items",
            source: e,
        }
    })?;

    conn.execute(
        "INSERT INTO receipts (job_id, uploader_name, receipt_type, date, company_name,
                               price, raw_ocr, file_path, file_name, items, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            receipt.job_id,
            receipt.uploader_name,
            receipt.fields.receipt_type,
            receipt.fields.date,
            receipt.fields.company_name,
            receipt.fields.price,
            receipt.raw_ocr,
            receipt.file_path,
            receipt.fields.file_name,
            items,
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ReceiptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM receipts WHERE id = ?1",
                params![id],
                ReceiptRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// The receipt produced by a job, if it succeeded.
pub fn find_by_job(db: &Database, job_id: i64) -> Result<Option<ReceiptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM receipts WHERE job_id = ?1",
                params![job_id],
                ReceiptRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists receipts newest first, optionally for one uploader.
pub fn list(
    db: &Database,
    uploader_name: Option<&str>,
    limit: u64,
) -> Result<Vec<ReceiptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM receipts
             WHERE ?1 IS NULL OR uploader_name = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![uploader_name, limit as i64], ReceiptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
