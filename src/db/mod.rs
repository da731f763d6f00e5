mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "concept-templates")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("templates.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Template operations
    // ============================================================

    /// Latest version of a template.
    pub fn get_template(&self, name: &str) -> Result<Option<ConceptTemplate>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT body FROM template_versions WHERE name = ?
             ORDER BY version DESC LIMIT 1",
        )?;

        let mut rows = stmt.query([name])?;
        if let Some(row) = rows.next()? {
            Ok(Some(serde_json::from_str(&row.get::<_, String>(0)?)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_template_version(&self, name: &str, version: u32) -> Result<Option<ConceptTemplate>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT body FROM template_versions WHERE name = ? AND version = ?")?;

        let mut rows = stmt.query((name, version))?;
        if let Some(row) = rows.next()? {
            Ok(Some(serde_json::from_str(&row.get::<_, String>(0)?)?))
        } else {
            Ok(None)
        }
    }

    /// Latest version of every template, ordered by name.
    pub fn get_all_templates(&self) -> Result<Vec<ConceptTemplate>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT t.body FROM template_versions t
             WHERE t.version = (SELECT MAX(version) FROM template_versions WHERE name = t.name)
             ORDER BY t.name",
        )?;

        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut templates = Vec::with_capacity(bodies.len());
        for body in bodies {
            templates.push(serde_json::from_str(&body)?);
        }
        Ok(templates)
    }

    /// Stores a new version. Fails if that version of the template exists.
    pub fn insert_template_version(&self, template: &ConceptTemplate) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO template_versions (name, version, body, created_at) VALUES (?, ?, ?, ?)",
            (
                &template.name,
                template.version,
                serde_json::to_string(template)?,
                template.updated_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    // ============================================================
    // Transformation operations
    // ============================================================

    pub fn create_transformation(&self, transformation: &TemplateTransformation) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO transformations
             (id, branch_path, destination_template, request, status, error_msg, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                transformation.id.to_string(),
                &transformation.branch_path,
                &transformation.destination_template,
                serde_json::to_string(&transformation.transform_request)?,
                transformation.status.as_str(),
                &transformation.error_msg,
                transformation.created_at.to_rfc3339(),
                transformation.updated_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    /// Persists status and error message. Returns false for an unknown id.
    pub fn update_transformation(&self, transformation: &TemplateTransformation) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let affected = conn.execute(
            "UPDATE transformations SET status = ?, error_msg = ?, updated_at = ? WHERE id = ?",
            (
                transformation.status.as_str(),
                &transformation.error_msg,
                transformation.updated_at.to_rfc3339(),
                transformation.id.to_string(),
            ),
        )?;
        Ok(affected > 0)
    }

    pub fn get_transformation(&self, id: Uuid) -> Result<Option<TemplateTransformation>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, branch_path, destination_template, request, status, error_msg, created_at, updated_at
             FROM transformations WHERE id = ?",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let status: String = row.get(4)?;
        Ok(Some(TemplateTransformation {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            branch_path: row.get(1)?,
            destination_template: row.get(2)?,
            transform_request: serde_json::from_str(&row.get::<_, String>(3)?)?,
            status: TransformationStatus::from_str(&status)
                .ok_or_else(|| anyhow::anyhow!("Unknown transformation status {}", status))?,
            error_msg: row.get(5)?,
            created_at: parse_datetime(&row.get::<_, String>(6)?)?,
            updated_at: parse_datetime(&row.get::<_, String>(7)?)?,
        }))
    }

    // ============================================================
    // Result operations
    // ============================================================

    /// Stores the outcome of a transformation, replacing any earlier one.
    pub fn write_results(&self, transformation_id: Uuid, result: &TransformationResult) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO transformation_results
             (transformation_id, concepts, failures, created_at) VALUES (?, ?, ?, ?)",
            (
                transformation_id.to_string(),
                serde_json::to_string(&result.concepts)?,
                serde_json::to_string(&result.failures)?,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn get_results(&self, transformation_id: Uuid) -> Result<Option<TransformationResult>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT concepts, failures FROM transformation_results WHERE transformation_id = ?",
        )?;

        let mut rows = stmt.query([transformation_id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(TransformationResult {
            concepts: serde_json::from_str(&row.get::<_, String>(0)?)?,
            failures: serde_json::from_str(&row.get::<_, String>(1)?)?,
        }))
    }
}

#[cfg(test)]
impl Database {
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid id in store: '{}'", s))
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_raw(db: &Database, id: &str, created_at: &str) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transformations
             (id, branch_path, destination_template, request, status, error_msg, created_at, updated_at)
             VALUES (?, 'MAIN', 'CT of X', '{\"concepts_to_transform\":[]}', 'RUNNING', NULL, ?, ?)",
            (id, created_at, created_at),
        )
        .unwrap();
    }

    fn setup() -> Database {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn corrupt_timestamp_is_an_error() {
        let db = setup();
        let id = Uuid::new_v4();
        insert_raw(&db, &id.to_string(), "yesterday");

        let error = db.get_transformation(id).unwrap_err();
        assert!(error.to_string().contains("yesterday"));
    }

    #[test]
    fn well_formed_row_is_read() {
        let db = setup();
        let id = Uuid::new_v4();
        insert_raw(&db, &id.to_string(), "2026-10-19T08:00:00+00:00");

        let found = db.get_transformation(id).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.status, TransformationStatus::Running);
    }
}
