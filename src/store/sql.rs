//! SQL text and arguments shared by every storage backend
//!
//! Both backends speak the SQLite dialect, so each query is written once here
//! and executed by whichever backend was selected at startup.

use crate::error::StoreError;
use crate::ingestion::types::{Column, ConflictPolicy, PropertySaleRecord, COLUMN_COUNT};

/// SQL literals for the separators removed from stored postcodes
const POSTCODE_SEPARATORS: [&str; 3] = ["' '", "char(9)", "'-'"];

/// A positional SQL argument or result value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Text(s) => s.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(r) => Some(*r as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(r) => Some(*r),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

/// SQL text with its positional arguments
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// A result row as positional values
pub type SqlRow = Vec<SqlValue>;

/// Physical table layout holding the records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaLayout {
    /// `property_sales`, keyed by the transaction id
    #[default]
    Natural,
    /// `prices`, autoincrement key plus a unique transaction id
    Legacy,
}

impl std::str::FromStr for SchemaLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "natural" | "property_sales" => Ok(SchemaLayout::Natural),
            "legacy" | "prices" => Ok(SchemaLayout::Legacy),
            other => Err(format!("unknown schema layout: {}", other)),
        }
    }
}

impl SchemaLayout {
    pub fn table(&self) -> &'static str {
        match self {
            SchemaLayout::Natural => "property_sales",
            SchemaLayout::Legacy => "prices",
        }
    }

    /// Physical column name for a logical column
    pub fn column(&self, column: Column) -> &'static str {
        match (self, column) {
            (SchemaLayout::Natural, Column::Id) => "id",
            (SchemaLayout::Legacy, Column::Id) => "transaction_id",
            (SchemaLayout::Natural, Column::TransferDate) => "transfer_date",
            (SchemaLayout::Legacy, Column::TransferDate) => "date_of_transfer",
            (SchemaLayout::Natural, Column::IsNewBuild) => "is_new_build",
            (SchemaLayout::Legacy, Column::IsNewBuild) => "old_new",
            (SchemaLayout::Natural, Column::Town) => "town",
            (SchemaLayout::Legacy, Column::Town) => "town_city",
            (SchemaLayout::Natural, Column::Category) => "category",
            (SchemaLayout::Legacy, Column::Category) => "ppd_category_type",
            (SchemaLayout::Natural, Column::Status) => "status",
            (SchemaLayout::Legacy, Column::Status) => "record_status",
            (_, Column::Price) => "price",
            (_, Column::Postcode) => "postcode",
            (_, Column::PropertyType) => "property_type",
            (_, Column::Duration) => "duration",
            (_, Column::Paon) => "paon",
            (_, Column::Saon) => "saon",
            (_, Column::Street) => "street",
            (_, Column::Locality) => "locality",
            (_, Column::District) => "district",
            (_, Column::County) => "county",
        }
    }

    fn id(&self) -> &'static str {
        self.column(Column::Id)
    }

    fn date(&self) -> &'static str {
        self.column(Column::TransferDate)
    }

    /// Stored-side counterpart of `normalize_postcode`. SQLite has no
    /// character classes, so only the separators seen in published postcodes
    /// are stripped; other punctuation is dropped from queries alone.
    fn postcode_key(&self) -> String {
        POSTCODE_SEPARATORS.iter().fold(
            format!("UPPER({})", self.column(Column::Postcode)),
            |expr, sep| format!("REPLACE({}, {}, '')", expr, sep),
        )
    }

    /// Columns in logical order, comma separated
    fn select_list(&self) -> String {
        Column::ALL
            .iter()
            .map(|c| self.column(*c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_statements(&self) -> Vec<Statement> {
        let table = self.table();
        let text_columns = Column::ALL
            .iter()
            .filter(|c| !matches!(c, Column::Id | Column::Price))
            .map(|c| format!("{} TEXT NOT NULL DEFAULT ''", self.column(*c)))
            .collect::<Vec<_>>()
            .join(",\n    ");

        let key = match self {
            SchemaLayout::Natural => "id TEXT PRIMARY KEY NOT NULL".to_string(),
            SchemaLayout::Legacy => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT,\n    transaction_id TEXT NOT NULL UNIQUE"
                    .to_string()
            }
        };

        vec![
            Statement::new(format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    {key},\n    price INTEGER NOT NULL DEFAULT 0,\n    {text_columns}\n)"
            )),
            Statement::new(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_postcode_key ON {table}({})",
                self.postcode_key()
            )),
            Statement::new(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_date ON {table}({})",
                self.date()
            )),
        ]
    }

    pub fn drop_statement(&self) -> Statement {
        Statement::new(format!("DROP TABLE IF EXISTS {}", self.table()))
    }

    pub fn table_exists(&self) -> Statement {
        Statement::new("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(self.table())
    }

    /// Multi-row insert with one placeholder group per record
    pub fn insert_batch(&self, records: &[PropertySaleRecord], policy: ConflictPolicy) -> Statement {
        let table = self.table();
        let columns = self.select_list();
        let group = format!("({})", vec!["?"; COLUMN_COUNT].join(", "));
        let placeholders = vec![group.as_str(); records.len()].join(", ");

        let verb = match policy {
            ConflictPolicy::Replace => "INSERT OR REPLACE INTO",
            ConflictPolicy::Ignore | ConflictPolicy::Upsert => "INSERT INTO",
        };

        let conflict = match policy {
            ConflictPolicy::Replace => String::new(),
            ConflictPolicy::Ignore => format!(" ON CONFLICT({}) DO NOTHING", self.id()),
            ConflictPolicy::Upsert => self.upsert_clause(),
        };

        let mut statement = Statement::new(format!(
            "{verb} {table} ({columns}) VALUES {placeholders}{conflict}"
        ));
        statement.args.reserve(records.len() * COLUMN_COUNT);
        for record in records {
            statement.args.extend(record_values(record));
        }
        statement
    }

    /// `DO UPDATE` that never blanks stored text and skips no-op rewrites
    fn upsert_clause(&self) -> String {
        let table = self.table();
        let mut assignments = Vec::new();
        let mut changed = Vec::new();

        for column in Column::ALL.iter().filter(|c| **c != Column::Id) {
            let name = self.column(*column);
            let incoming = if *column == Column::Price {
                format!("excluded.{name}")
            } else {
                format!("COALESCE(NULLIF(excluded.{name}, ''), {table}.{name})")
            };
            changed.push(format!("{table}.{name} IS NOT {incoming}"));
            assignments.push(format!("{name} = {incoming}"));
        }

        format!(
            " ON CONFLICT({}) DO UPDATE SET {} WHERE {}",
            self.id(),
            assignments.join(", "),
            changed.join(" OR ")
        )
    }

    pub fn existing_ids(&self, ids: &[&str]) -> Statement {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut statement = Statement::new(format!(
            "SELECT {id} FROM {table} WHERE {id} IN ({placeholders})",
            id = self.id(),
            table = self.table(),
        ));
        statement.args.extend(ids.iter().map(|id| SqlValue::from(*id)));
        statement
    }

    /// Only ISO-shaped dates take part; unrecognised dates are stored verbatim
    /// and would otherwise sort above every real one
    pub fn latest_transfer_date(&self) -> Statement {
        Statement::new(format!(
            "SELECT MAX({date}) FROM {table} \
             WHERE {date} GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*'",
            date = self.date(),
            table = self.table()
        ))
    }

    pub fn count(&self) -> Statement {
        Statement::new(format!("SELECT COUNT(*) FROM {}", self.table()))
    }

    pub fn search_postcode_prefix(&self, postcode_key: &str, limit: u32) -> Statement {
        Statement::new(format!(
            "SELECT {} FROM {} WHERE {} GLOB ? ORDER BY {} DESC LIMIT ?",
            self.select_list(),
            self.table(),
            self.postcode_key(),
            self.date()
        ))
        .bind(format!("{}*", postcode_key))
        .bind(limit as i64)
    }

    pub fn search_area(&self, area: &str, limit: u32) -> Statement {
        let area = area.trim().to_uppercase();
        Statement::new(format!(
            "SELECT {} FROM {} WHERE UPPER({town}) = ? OR UPPER(district) = ? ORDER BY {} DESC LIMIT ?",
            self.select_list(),
            self.table(),
            self.date(),
            town = self.column(Column::Town),
        ))
        .bind(area.clone())
        .bind(area)
        .bind(limit as i64)
    }

    /// `(year, mean price, sales)` per year, oldest first, retractions excluded
    pub fn yearly_averages(&self, filter: &AreaFilter) -> Statement {
        let date = self.date();
        let (predicate, args) = self.filter_predicate(filter);
        let mut statement = Statement::new(format!(
            "SELECT SUBSTR({date}, 1, 4) AS year, AVG(price), COUNT(*) FROM {table} \
             WHERE ({predicate}) AND {status} <> 'D' AND LENGTH({date}) >= 4 \
             GROUP BY year ORDER BY year ASC",
            table = self.table(),
            status = self.column(Column::Status),
        ));
        statement.args.extend(args);
        statement
    }

    pub fn sales_for_address(&self, key: &AddressKey) -> Statement {
        Statement::new(format!(
            "SELECT {} FROM {} WHERE UPPER(paon) = ? AND UPPER(saon) = ? AND UPPER(street) = ? \
             AND {} = ? AND {} <> 'D' ORDER BY {} ASC",
            self.select_list(),
            self.table(),
            self.postcode_key(),
            self.column(Column::Status),
            self.date()
        ))
        .bind(key.paon.trim().to_uppercase())
        .bind(key.saon.trim().to_uppercase())
        .bind(key.street.trim().to_uppercase())
        .bind(crate::ingestion::utils::normalize_postcode(&key.postcode))
    }

    /// Recent non-retracted sales in a postcode area, newest first
    pub fn comparables(&self, postcode_key: &str, limit: u32) -> Statement {
        Statement::new(format!(
            "SELECT {} FROM {} WHERE {} GLOB ? AND {} <> 'D' AND price > 0 ORDER BY {} DESC LIMIT ?",
            self.select_list(),
            self.table(),
            self.postcode_key(),
            self.column(Column::Status),
            self.date()
        ))
        .bind(format!("{}*", postcode_key))
        .bind(limit as i64)
    }

    fn filter_predicate(&self, filter: &AreaFilter) -> (String, Vec<SqlValue>) {
        match filter {
            AreaFilter::PostcodePrefix(key) => (
                format!("{} GLOB ?", self.postcode_key()),
                vec![SqlValue::Text(format!("{}*", key))],
            ),
            AreaFilter::Area(area) => {
                let area = area.trim().to_uppercase();
                (
                    format!(
                        "UPPER({}) = ? OR UPPER(district) = ?",
                        self.column(Column::Town)
                    ),
                    vec![SqlValue::Text(area.clone()), SqlValue::Text(area)],
                )
            }
        }
    }
}

/// Which records an aggregate covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaFilter {
    /// Normalised postcode prefix
    PostcodePrefix(String),
    /// Town or district name
    Area(String),
}

/// Identifies one property across sales
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressKey {
    pub paon: String,
    #[serde(default)]
    pub saon: String,
    pub street: String,
    pub postcode: String,
}

fn record_values(record: &PropertySaleRecord) -> [SqlValue; COLUMN_COUNT] {
    [
        SqlValue::Text(record.id.clone()),
        SqlValue::Integer(record.price),
        SqlValue::Text(record.transfer_date.clone()),
        SqlValue::Text(record.postcode.clone()),
        SqlValue::Text(record.property_type.clone()),
        SqlValue::Text(record.is_new_build.clone()),
        SqlValue::Text(record.duration.clone()),
        SqlValue::Text(record.paon.clone()),
        SqlValue::Text(record.saon.clone()),
        SqlValue::Text(record.street.clone()),
        SqlValue::Text(record.locality.clone()),
        SqlValue::Text(record.town.clone()),
        SqlValue::Text(record.district.clone()),
        SqlValue::Text(record.county.clone()),
        SqlValue::Text(record.category.clone()),
        SqlValue::Text(record.status.clone()),
    ]
}

/// Rebuild a record from a row selected in logical column order
pub fn record_from_row(row: &[SqlValue]) -> Result<PropertySaleRecord, StoreError> {
    if row.len() != COLUMN_COUNT {
        return Err(StoreError::Decode(format!(
            "expected {} columns, got {}",
            COLUMN_COUNT,
            row.len()
        )));
    }

    let text = |column: Column| row[column.index()].as_text();

    Ok(PropertySaleRecord {
        id: text(Column::Id),
        price: row[Column::Price.index()].as_i64().unwrap_or(0),
        transfer_date: text(Column::TransferDate),
        postcode: text(Column::Postcode),
        property_type: text(Column::PropertyType),
        is_new_build: text(Column::IsNewBuild),
        duration: text(Column::Duration),
        paon: text(Column::Paon),
        saon: text(Column::Saon),
        street: text(Column::Street),
        locality: text(Column::Locality),
        town: text(Column::Town),
        district: text(Column::District),
        county: text(Column::County),
        category: text(Column::Category),
        status: text(Column::Status),
    })
}
