//! Result handlers.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription};

/// Handler for query results in text format.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// For multi-statement queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
pub trait TextHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// A handler that discards all results.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of rows affected (if applicable).
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl TextHandler for DropHandler {
    fn row(&mut self, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// One result row in text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRow {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl TextRow {
    /// Build a row from column names and values.
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Value of the column named `name`. `None` if absent or NULL.
    pub fn get(&self, name: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.get_index(idx)
    }

    /// Value at `idx`. `None` if out of range or NULL.
    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_deref()
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Handler that collects every row of every result set as [`TextRow`]s.
#[derive(Debug, Default)]
pub struct RowsHandler {
    columns: Option<Arc<[String]>>,
    rows: Vec<TextRow>,
    rows_affected: Option<u64>,
}

impl RowsHandler {
    /// Create a new rows handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected rows.
    pub fn rows(&self) -> &[TextRow] {
        &self.rows
    }

    /// Take collected rows.
    pub fn into_rows(self) -> Vec<TextRow> {
        self.rows
    }

    /// Rows affected by the last command.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl TextHandler for RowsHandler {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let names: Vec<String> = cols.iter().map(|f| f.name.to_string()).collect();
        self.columns = Some(names.into());
        Ok(())
    }

    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        let columns = match &self.columns {
            Some(columns) => Arc::clone(columns),
            None => {
                let names: Vec<String> = cols.iter().map(|f| f.name.to_string()).collect();
                let columns: Arc<[String]> = names.into();
                self.columns = Some(Arc::clone(&columns));
                columns
            }
        };

        let values = row
            .iter()
            .map(|value| {
                value?
                    .map(|bytes| {
                        simdutf8::compat::from_utf8(bytes)
                            .map(str::to_string)
                            .map_err(|e| Error::Protocol(format!("non UTF-8 text value: {e}")))
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        self.rows.push(TextRow::new(columns, values));
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}
