//! SQLite-backed document record store.
//!
//! Status updates go through [`DocumentStore::set_status`], which enforces
//! the forward-only transition table with a compare-and-set on the current
//! status. A refused transition is reported, not an error; callers decide
//! whether a refusal means "skip" (duplicate delivery of a finished
//! document) or "give up".

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{DocumentRecord, DocumentStatus};

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, owner_id, name, description, source_filename, size_bytes,
                 status, namespace, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.name)
        .bind(&doc.description)
        .bind(&doc.source_filename)
        .bind(doc.size_bytes)
        .bind(doc.status.as_str())
        .bind(&doc.namespace)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    /// Owner-scoped lookup. Another owner's document id behaves as missing.
    pub async fn get_owned(&self, doc_id: &str, owner_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND owner_id = ?")
            .bind(doc_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE owner_id = ? ORDER BY created_at DESC, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Apply a status transition if the forward-only table allows it from
    /// the document's current status. Returns whether the update was
    /// applied; a missing document also returns `false`.
    pub async fn set_status(&self, doc_id: &str, to: DocumentStatus) -> Result<bool> {
        // CAS loop: re-read on a concurrent update and re-check the table.
        for _ in 0..3 {
            let Some(doc) = self.get(doc_id).await? else {
                return Ok(false);
            };
            if !doc.status.can_transition(to) {
                tracing::debug!(
                    doc_id,
                    from = doc.status.as_str(),
                    to = to.as_str(),
                    "status transition refused"
                );
                return Ok(false);
            }

            let now = chrono::Utc::now().timestamp();
            let result = sqlx::query(
                "UPDATE documents SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(to.as_str())
            .bind(now)
            .bind(doc_id)
            .bind(doc.status.as_str())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn delete(&self, doc_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str).ok_or_else(|| {
        crate::error::PipelineError::Store(sqlx::Error::Decode(
            format!("unknown document status: {}", status_str).into(),
        ))
    })?;
    Ok(DocumentRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        source_filename: row.get("source_filename"),
        size_bytes: row.get("size_bytes"),
        status,
        namespace: row.get("namespace"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
