//! Shared SQLite database receiving the rows of every QA table of a visit.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::model::{Cell, TableRows};

pub const QA_DB_FILE: &str = "SurveyQualityDB.sqlite";
pub const QA_DB_ID: &str = "SurveyQualityDB";

const SCHEMA: &str = include_str!("schema.sql");

pub struct QualityDatabase {
    conn: Connection,
    path: PathBuf,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Integer(v) => Value::Integer(*v),
        Cell::Real(v) => Value::Real(*v),
        Cell::Text(v) => Value::Text(v.clone()),
    }
}

impl QualityDatabase {
    /// Creates the database at `path`, from `template` when given.
    /// The embedded schema is applied either way; it only adds what is missing.
    pub fn create(path: &Path, template: Option<&Path>) -> Result<Self> {
        if let Some(template) = template {
            if !template.is_file() {
                return Err(ExportError::input_missing("QA database template", template));
            }
            fs::copy(template, path)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_info(&self, name: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO SurveyQualityInfo (Name, Value) VALUES (?1, ?2)
             ON CONFLICT(Name) DO UPDATE SET Value = excluded.Value",
            (name, value),
        )?;
        Ok(())
    }

    pub fn info(&self, name: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Value FROM SurveyQualityInfo WHERE Name = ?1")?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    /// Column names of `table`; empty when the table does not exist.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Appends all rows of `rows` into `table` in one transaction, creating
    /// the table or adding the columns it lacks first.
    pub fn append_table(&mut self, table: &str, rows: &TableRows) -> Result<usize> {
        if rows.columns.is_empty() {
            debug!(table, "no exportable QA columns");
            return Ok(0);
        }
        let existing = self.table_columns(table)?;
        let tx = self.conn.transaction()?;

        if existing.is_empty() {
            let columns: Vec<String> = rows.columns.iter().map(|c| quote(c)).collect();
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                quote(table),
                columns.join(", ")
            ))?;
        } else {
            for column in rows.columns.iter().filter(|c| !existing.contains(c)) {
                debug!(table, column = column.as_str(), "adding QA column");
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote(table),
                    quote(column)
                ))?;
            }
        }

        {
            let columns: Vec<String> = rows.columns.iter().map(|c| quote(c)).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table),
                columns.join(", "),
                placeholders
            );
            let mut stmt = tx.prepare(&sql)?;
            for row in &rows.rows {
                stmt.execute(params_from_iter(row.iter().map(to_value)))?;
            }
        }

        tx.execute(
            "INSERT INTO ExportedTables (TableName, RowCount, ExportedAt) VALUES (?1, ?2, ?3)
             ON CONFLICT(TableName) DO UPDATE SET RowCount = RowCount + excluded.RowCount,
                                                ExportedAt = excluded.ExportedAt",
            (
                table,
                rows.rows.len() as i64,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        tx.commit()?;
        Ok(rows.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn qa_rows() -> TableRows {
        let mut rows = TableRows::new(vec!["Name".into(), "Value".into()]);
        rows.rows.push(vec![Cell::Text("rmse".into()), Cell::Real(0.05)]);
        rows.rows.push(vec![Cell::Text("count".into()), Cell::Integer(1200)]);
        rows
    }

    #[test]
    fn test_append_creates_table() {
        let temp = TempDir::new().unwrap();
        let mut db = QualityDatabase::create(&temp.path().join(QA_DB_FILE), None).unwrap();

        assert_eq!(db.append_table("QaQcTIN", &qa_rows()).unwrap(), 2);
        assert_eq!(db.row_count("QaQcTIN").unwrap(), 2);
        assert_eq!(db.table_columns("QaQcTIN").unwrap(), vec!["Name", "Value"]);
    }

    #[test]
    fn test_append_without_columns_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let mut db = QualityDatabase::create(&temp.path().join(QA_DB_FILE), None).unwrap();

        let mut only_derived = TableRows::new(vec!["OBJECTID".into()]);
        only_derived.rows.push(vec![Cell::Integer(1)]);
        let rows = only_derived.without_derived();

        assert_eq!(db.append_table("QaQcVector", &rows).unwrap(), 0);
        assert!(db.table_columns("QaQcVector").unwrap().is_empty());
    }

    #[test]
    fn test_append_adds_missing_columns() {
        let temp = TempDir::new().unwrap();
        let mut db = QualityDatabase::create(&temp.path().join(QA_DB_FILE), None).unwrap();
        db.append_table("QaQcPoints", &qa_rows()).unwrap();

        let mut more = TableRows::new(vec!["Name".into(), "Flag".into()]);
        more.rows.push(vec![Cell::Text("x".into()), Cell::Null]);
        db.append_table("QaQcPoints", &more).unwrap();

        assert_eq!(
            db.table_columns("QaQcPoints").unwrap(),
            vec!["Name", "Value", "Flag"]
        );
        assert_eq!(db.row_count("QaQcPoints").unwrap(), 3);
    }

    #[test]
    fn test_template_is_copied() {
        let temp = TempDir::new().unwrap();
        let template = temp.path().join("template.sqlite");
        {
            let conn = Connection::open(&template).unwrap();
            conn.execute_batch("CREATE TABLE CrewFeedback (Comment TEXT);")
                .unwrap();
        }
        let db = QualityDatabase::create(&temp.path().join(QA_DB_FILE), Some(&template)).unwrap();
        assert_eq!(db.table_columns("CrewFeedback").unwrap(), vec!["Comment"]);
        db.set_info("Visit", "1234").unwrap();
        db.set_info("Visit", "1235").unwrap();
        assert_eq!(db.info("Visit").unwrap().as_deref(), Some("1235"));
    }

    #[test]
    fn test_missing_template_is_input_missing() {
        let temp = TempDir::new().unwrap();
        let result = QualityDatabase::create(
            &temp.path().join(QA_DB_FILE),
            Some(&temp.path().join("nope.sqlite")),
        );
        assert!(matches!(result, Err(ExportError::InputMissing { .. })));
    }
}
