//! Tabular warehouse the logging stage appends expense rows to.
//!
//! Layout is project → dataset → table. Each project is a directory under the
//! warehouse root, each dataset a libSQL database file inside it, and each
//! table a SQL table in that file. Datasets and tables are created on first
//! use with `IF NOT EXISTS`, so concurrent first writers do not collide.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use libsql::{Connection, Value, params};
use regex::Regex;
use tracing::{debug, info, instrument};

use expensetracker_shared::{ExpenseError, Result};

/// How long a writer waits on a locked dataset before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex")
});

static PROJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").expect("valid regex")
});

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ExpenseError::validation(format!(
            "invalid {kind} name `{name}`: use letters, digits and underscores"
        )))
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Column storage types supported by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Real,
    Integer,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
        }
    }
}

/// One column of a warehouse table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub required: bool,
}

impl ColumnDef {
    pub const fn required(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            required: true,
        }
    }

    pub const fn nullable(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            required: false,
        }
    }
}

/// The expected columns of a warehouse table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub columns: &'static [ColumnDef],
}

impl TableSchema {
    fn create_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let not_null = if c.required { " NOT NULL" } else { "" };
                format!("    {} {}{not_null}", c.name, c.sql_type.as_sql())
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n{}\n)",
            columns.join(",\n")
        )
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<Cell> for Value {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Null => Value::Null,
            Cell::Integer(v) => Value::Integer(v),
            Cell::Real(v) => Value::Real(v),
            Cell::Text(s) => Value::Text(s),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Integer(v) => Cell::Integer(v),
            Value::Real(v) => Cell::Real(v),
            Value::Text(s) => Cell::Text(s),
            Value::Blob(b) => Cell::Text(format!("<{} bytes>", b.len())),
        }
    }
}

/// An ordered set of named cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Cell)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, cell: Cell) -> Self {
        self.cells.push((column.into(), cell));
        self
    }

    pub fn text(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(column, Cell::Text(value.into()))
    }

    pub fn real(self, column: impl Into<String>, value: f64) -> Self {
        self.with(column, Cell::Real(value))
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Warehouse
// ---------------------------------------------------------------------------

/// Handle to one project of the warehouse.
#[derive(Debug, Clone)]
pub struct Warehouse {
    root: PathBuf,
    project: String,
}

impl Warehouse {
    /// Address `project` under `root`. Nothing is touched on disk until first use.
    pub fn new(root: impl Into<PathBuf>, project: impl Into<String>) -> Result<Self> {
        let project = project.into();
        if !PROJECT_NAME.is_match(&project) {
            return Err(ExpenseError::validation(format!(
                "invalid project name `{project}`"
            )));
        }
        Ok(Self {
            root: root.into(),
            project,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Database file backing `dataset`.
    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.root.join(&self.project).join(format!("{dataset}.db"))
    }

    /// Open a connection to `dataset`, creating the dataset if absent.
    async fn connect(&self, dataset: &str) -> Result<Connection> {
        check_identifier("dataset", dataset)?;
        let path = self.dataset_path(dataset);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ExpenseError::TransientIo(format!("warehouse unreachable at {}: {e}", parent.display()))
            })?;
        }

        open_connection(&path).await
    }

    /// Ensure `dataset` and `table` exist and that the table is compatible with `schema`.
    #[instrument(skip(self, schema), fields(project = %self.project))]
    pub async fn create_if_absent(
        &self,
        dataset: &str,
        table: &str,
        schema: &TableSchema,
    ) -> Result<()> {
        let conn = self.connect(dataset).await?;
        ensure_table(&conn, table, schema).await
    }

    /// Append one row to `dataset.table`, creating both first if needed.
    #[instrument(skip(self, schema, row), fields(project = %self.project, columns = row.len()))]
    pub async fn append_row(
        &self,
        dataset: &str,
        table: &str,
        schema: &TableSchema,
        row: Row,
    ) -> Result<()> {
        for column in row.columns() {
            check_identifier("column", column)?;
        }
        let conn = self.connect(dataset).await?;
        ensure_table(&conn, table, schema).await?;
        check_row(table, schema, &row)?;

        let columns: Vec<&str> = row.columns().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<Value> = row.cells.into_iter().map(|(_, cell)| cell.into()).collect();

        conn.execute(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| insert_error(dataset, table, e))?;

        debug!(dataset, table, "row appended");
        Ok(())
    }

    /// Most recent rows of `dataset.table`, newest first. Missing tables read as empty.
    pub async fn list_rows(&self, dataset: &str, table: &str, limit: u32) -> Result<Vec<Row>> {
        check_identifier("dataset", dataset)?;
        check_identifier("table", table)?;

        let path = self.dataset_path(dataset);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let conn = open_connection(&path).await?;
        if !table_exists(&conn, table).await? {
            return Ok(Vec::new());
        }

        let mut rows = conn
            .query(
                &format!("SELECT * FROM {table} ORDER BY rowid DESC LIMIT ?1"),
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;

        let names: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ExpenseError::TransientIo(e.to_string()))?
        {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value = row
                    .get_value(i as i32)
                    .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;
                out = out.with(name.clone(), Cell::from(value));
            }
            results.push(out);
        }
        Ok(results)
    }
}

async fn open_connection(path: &Path) -> Result<Connection> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(|e| {
            ExpenseError::TransientIo(format!("cannot open dataset {}: {e}", path.display()))
        })?;

    let conn = db
        .connect()
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;

    conn.execute_batch(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))
        .await
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;

    Ok(conn)
}

async fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
        )
        .await
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;

    Ok(rows
        .next()
        .await
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?
        .is_some())
}

/// Create `table` if absent, then verify the existing columns against `schema`.
async fn ensure_table(conn: &Connection, table: &str, schema: &TableSchema) -> Result<()> {
    check_identifier("table", table)?;

    if !table_exists(conn, table).await? {
        info!(table, "table not found, creating it");
    }
    conn.execute(&schema.create_sql(table), ())
        .await
        .map_err(|e| ExpenseError::TransientIo(format!("create table {table}: {e}")))?;

    let existing = table_columns(conn, table).await?;
    verify_columns(table, schema, &existing)
}

/// Every row column must be in `schema` and every required column must hold a value.
fn check_row(table: &str, schema: &TableSchema, row: &Row) -> Result<()> {
    if let Some(unknown) = row
        .columns()
        .find(|name| !schema.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
    {
        return Err(ExpenseError::schema_mismatch(
            table,
            format!("row has column `{unknown}` outside the table schema"),
        ));
    }
    if let Some(missing) = schema
        .columns
        .iter()
        .find(|c| c.required && matches!(row.get(c.name), None | Some(Cell::Null)))
    {
        return Err(ExpenseError::validation(format!(
            "row for `{table}` has no value for required column `{}`",
            missing.name
        )));
    }
    Ok(())
}

/// Constraint and column errors are permanent; anything else (locks, I/O) may be retried.
fn insert_error(dataset: &str, table: &str, e: libsql::Error) -> ExpenseError {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("constraint") || lower.contains("no column") {
        ExpenseError::schema_mismatch(table, message)
    } else {
        ExpenseError::TransientIo(format!("insert into {dataset}.{table}: {message}"))
    }
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct ExistingColumn {
    name: String,
    decl_type: String,
    not_null: bool,
    has_default: bool,
}

async fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ExistingColumn>> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({table})"), ())
        .await
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?;

    let mut columns = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| ExpenseError::TransientIo(e.to_string()))?
    {
        columns.push(ExistingColumn {
            name: row
                .get::<String>(1)
                .map_err(|e| ExpenseError::TransientIo(e.to_string()))?,
            decl_type: row.get::<String>(2).unwrap_or_default(),
            not_null: row.get::<i64>(3).unwrap_or(0) != 0,
            has_default: !matches!(row.get_value(4), Ok(Value::Null) | Err(_)),
        });
    }
    Ok(columns)
}

fn verify_columns(table: &str, schema: &TableSchema, existing: &[ExistingColumn]) -> Result<()> {
    for expected in schema.columns {
        let Some(found) = existing
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(expected.name))
        else {
            return Err(ExpenseError::schema_mismatch(
                table,
                format!("missing column `{}`", expected.name),
            ));
        };
        if !found.decl_type.eq_ignore_ascii_case(expected.sql_type.as_sql()) {
            return Err(ExpenseError::schema_mismatch(
                table,
                format!(
                    "column `{}` is {}, expected {}",
                    expected.name,
                    found.decl_type,
                    expected.sql_type.as_sql()
                ),
            ));
        }
    }

    // Extra columns are fine unless an insert would leave them violating NOT NULL.
    if let Some(extra) = existing.iter().find(|c| {
        c.not_null
            && !c.has_default
            && !schema
                .columns
                .iter()
                .any(|e| e.name.eq_ignore_ascii_case(&c.name))
    }) {
        return Err(ExpenseError::schema_mismatch(
            table,
            format!("unexpected required column `{}`", extra.name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SCHEMA: TableSchema = TableSchema {
        columns: &[
            ColumnDef::required("record_id", SqlType::Text),
            ColumnDef::required("amount", SqlType::Real),
            ColumnDef::nullable("note", SqlType::Text),
        ],
    };

    fn test_root() -> PathBuf {
        std::env::temp_dir().join(format!("et_wh_{}", Uuid::now_v7()))
    }

    fn row(id: &str, amount: f64) -> Row {
        Row::new().text("record_id", id).real("amount", amount)
    }

    #[test]
    fn create_sql_lists_columns() {
        let sql = SCHEMA.create_sql("expenses");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS expenses ("));
        assert!(sql.contains("record_id TEXT NOT NULL"));
        assert!(sql.contains("note TEXT\n"));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(Warehouse::new(test_root(), "../escape").is_err());
        assert!(check_identifier("table", "expenses; DROP TABLE x").is_err());
        assert!(check_identifier("table", "finance_data").is_ok());
    }

    #[tokio::test]
    async fn append_creates_dataset_and_table() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        wh.append_row("finance_data", "expenses", &SCHEMA, row("r1", 12.5))
            .await
            .expect("append");

        assert!(wh.dataset_path("finance_data").exists());
        let rows = wh.list_rows("finance_data", "expenses", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("record_id").and_then(Cell::as_text), Some("r1"));
        assert_eq!(rows[0].get("amount").and_then(Cell::as_real), Some(12.5));
        assert_eq!(rows[0].get("note"), Some(&Cell::Null));
    }

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        for _ in 0..3 {
            wh.create_if_absent("finance_data", "expenses", &SCHEMA)
                .await
                .expect("create again");
        }
        wh.append_row("finance_data", "expenses", &SCHEMA, row("r1", 1.0))
            .await
            .unwrap();
        wh.append_row("finance_data", "expenses", &SCHEMA, row("r2", 2.0))
            .await
            .unwrap();

        let rows = wh.list_rows("finance_data", "expenses", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first.
        assert_eq!(rows[0].get("record_id").and_then(Cell::as_text), Some("r2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_use_does_not_collide() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let wh = wh.clone();
                tokio::spawn(async move {
                    let row = row(&format!("r{i}"), f64::from(i));
                    wh.append_row("finance_data", "expenses", &SCHEMA, row).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("append");
        }
        let rows = wh.list_rows("finance_data", "expenses", 50).await.unwrap();
        assert_eq!(rows.len(), 16);
    }

    #[tokio::test]
    async fn unknown_row_column_is_schema_mismatch() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let err = wh
            .append_row(
                "finance_data",
                "expenses",
                &SCHEMA,
                row("r1", 1.0).text("currency", "EUR"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::SchemaMismatch { .. }), "{err:?}");
        assert!(err.to_string().contains("currency"));
        assert!(wh.list_rows("finance_data", "expenses", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_required_value_is_validation() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let incomplete = Row::new().text("record_id", "r1").with("note", Cell::Text("x".into()));
        let err = wh
            .append_row("finance_data", "expenses", &SCHEMA, incomplete)
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::Validation { .. }), "{err:?}");
        assert!(err.to_string().contains("amount"));
        assert!(wh.list_rows("finance_data", "expenses", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn constraint_violation_is_not_transient() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        wh.create_if_absent("finance_data", "expenses", &SCHEMA).await.unwrap();
        let conn = wh.connect("finance_data").await.unwrap();
        conn.execute("CREATE UNIQUE INDEX expenses_record ON expenses(record_id)", ())
            .await
            .unwrap();

        wh.append_row("finance_data", "expenses", &SCHEMA, row("r1", 1.0))
            .await
            .unwrap();
        let err = wh
            .append_row("finance_data", "expenses", &SCHEMA, row("r1", 2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::SchemaMismatch { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn incompatible_table_is_schema_mismatch() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let conn = wh.connect("finance_data").await.unwrap();
        conn.execute("CREATE TABLE expenses (record_id TEXT, amount TEXT)", ())
            .await
            .unwrap();

        let err = wh
            .append_row("finance_data", "expenses", &SCHEMA, row("r1", 1.0))
            .await
            .unwrap_err();
        match err {
            ExpenseError::SchemaMismatch { table, message } => {
                assert_eq!(table, "expenses");
                assert!(message.contains("amount"), "{message}");
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_column_is_schema_mismatch() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let conn = wh.connect("finance_data").await.unwrap();
        conn.execute("CREATE TABLE expenses (record_id TEXT NOT NULL)", ())
            .await
            .unwrap();

        let err = wh
            .create_if_absent("finance_data", "expenses", &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("missing column `amount`"));
    }

    #[tokio::test]
    async fn unreachable_root_is_transient_io() {
        // A regular file where the warehouse root directory should be.
        let blocker = std::env::temp_dir().join(format!("et_blocker_{}", Uuid::now_v7()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let wh = Warehouse::new(blocker.join("warehouse"), "acme").unwrap();
        let err = wh
            .append_row("finance_data", "expenses", &SCHEMA, row("r1", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpenseError::TransientIo(_)), "{err:?}");
    }

    #[tokio::test]
    async fn listing_missing_dataset_is_empty() {
        let wh = Warehouse::new(test_root(), "acme").unwrap();
        let rows = wh.list_rows("finance_data", "expenses", 5).await.unwrap();
        assert!(rows.is_empty());
        assert!(!wh.dataset_path("finance_data").exists());
    }
}
