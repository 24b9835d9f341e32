//! The database boundary consumed by the pipeline.
//!
//! The store is only ever reached through [Database]: one transaction per
//! run, raw DDL/DML execution, paged bulk inserts and existence predicates.
//! [MemoryDb] is an in-memory implementation of the same contract that
//! understands exactly the statement shapes this crate emits; it backs the
//! integration tests and the binary's dry-run mode.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Error;
use crate::record::Value;

/// A typed parameter for a bulk insert.
///
/// Geometry stays structured (WKT plus SRID) so each store adapter can wrap
/// it in its own geometry-from-text constructor instead of receiving opaque
/// text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    /// Seconds since midnight
    Time(u32),
    Timestamp(DateTime<Utc>),
    Geometry { wkt: String, srid: u32 },
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Text(s) => SqlValue::Text(s),
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Float(f) => SqlValue::Float(f),
            Value::Date(d) => SqlValue::Date(d),
            Value::Time(t) => SqlValue::Time(t),
        }
    }
}

/// Contract of the relational+spatial store.
///
/// All pipeline statements run between `begin` and `commit`; any failure
/// path calls `rollback` instead, so implementors must support transactional
/// DDL (or document that they cannot honor all-or-nothing runs).
pub trait Database {
    fn begin(&mut self) -> Result<(), Error>;
    fn commit(&mut self) -> Result<(), Error>;
    fn rollback(&mut self) -> Result<(), Error>;
    /// Execute one DDL or DML statement
    fn execute(&mut self, sql: &str) -> Result<(), Error>;
    /// Insert a page of rows; either the whole page lands or the call fails
    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<(), Error>;
    fn table_exists(&mut self, table: &str) -> Result<bool, Error>;
    fn constraint_exists(&mut self, table: &str, constraint: &str) -> Result<bool, Error>;
}

/// One in-memory table: column names in DDL order plus row tuples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// In-memory [Database] understanding the statement shapes the pipeline
/// emits: `CREATE TABLE IF NOT EXISTS`, `TRUNCATE TABLE`, and
/// `ALTER TABLE ... ADD/DROP CONSTRAINT`.
#[derive(Debug, Default)]
pub struct MemoryDb {
    tables: BTreeMap<String, MemTable>,
    constraints: BTreeMap<String, BTreeSet<String>>,
    snapshot: Option<(BTreeMap<String, MemTable>, BTreeMap<String, BTreeSet<String>>)>,
    /// Every statement executed, in order, for assertions
    pub statements: Vec<String>,
    /// Every bulk insert as (table, row count), for assertions on paging
    pub inserts: Vec<(String, usize)>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }

    pub fn table(&self, name: &str) -> Option<&MemTable> {
        self.tables.get(name)
    }

    pub fn constraints_on(&self, table: &str) -> Vec<&str> {
        self.constraints
            .get(table)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All values of one column, in insertion order
    pub fn column(&self, table: &str, column: &str) -> Vec<SqlValue> {
        let Some(t) = self.tables.get(table) else {
            return Vec::new();
        };
        let Some(idx) = t.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        t.rows.iter().map(|row| row[idx].clone()).collect()
    }

    fn apply(&mut self, sql: &str) -> Result<(), Error> {
        let trimmed = sql.trim();
        if let Some(rest) = trimmed.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let (name, body) = rest
                .split_once('(')
                .ok_or_else(|| Error::Database(format!("malformed create: {trimmed}")))?;
            let name = name.trim().to_owned();
            if self.tables.contains_key(&name) {
                return Ok(());
            }
            let body = body.trim_end_matches(')');
            let columns = body
                .split(',')
                .map(|col| {
                    col.trim()
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_owned()
                })
                .filter(|c| !c.is_empty())
                .collect();
            self.tables.insert(
                name,
                MemTable {
                    columns,
                    rows: Vec::new(),
                },
            );
            Ok(())
        } else if let Some(rest) = trimmed.strip_prefix("TRUNCATE TABLE ") {
            let name = rest
                .trim_end_matches(" CASCADE")
                .trim()
                .to_owned();
            match self.tables.get_mut(&name) {
                Some(table) => {
                    table.rows.clear();
                    Ok(())
                }
                None => Err(Error::Database(format!("no such table: {name}"))),
            }
        } else if let Some(rest) = trimmed.strip_prefix("ALTER TABLE ") {
            let mut words = rest.split_whitespace();
            let table = words
                .next()
                .ok_or_else(|| Error::Database(format!("malformed alter: {trimmed}")))?
                .to_owned();
            let action: Vec<&str> = words.collect();
            match action.as_slice() {
                ["ADD", "CONSTRAINT", name, ..] => {
                    if !self.tables.contains_key(&table) {
                        return Err(Error::Database(format!("no such table: {table}")));
                    }
                    self.constraints
                        .entry(table)
                        .or_default()
                        .insert((*name).to_owned());
                    Ok(())
                }
                ["DROP", "CONSTRAINT", "IF", "EXISTS", name] => {
                    if let Some(set) = self.constraints.get_mut(&table) {
                        set.remove(*name);
                    }
                    Ok(())
                }
                _ => Err(Error::Database(format!("unsupported alter: {trimmed}"))),
            }
        } else {
            Err(Error::Database(format!("unsupported statement: {trimmed}")))
        }
    }
}

impl Database for MemoryDb {
    fn begin(&mut self) -> Result<(), Error> {
        if self.snapshot.is_some() {
            return Err(Error::Database("transaction already open".to_owned()));
        }
        self.snapshot = Some((self.tables.clone(), self.constraints.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Database("no open transaction".to_owned()))
    }

    fn rollback(&mut self) -> Result<(), Error> {
        let (tables, constraints) = self
            .snapshot
            .take()
            .ok_or_else(|| Error::Database("no open transaction".to_owned()))?;
        self.tables = tables;
        self.constraints = constraints;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.statements.push(sql.to_owned());
        self.apply(sql)
    }

    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<(), Error> {
        self.inserts.push((table.to_owned(), rows.len()));
        let target = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Database(format!("no such table: {table}")))?;
        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            let idx = target
                .columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| {
                    Error::Database(format!("no column {column} on table {table}"))
                })?;
            indices.push(idx);
        }
        for row in rows {
            if row.len() != columns.len() {
                return Err(Error::Database(format!(
                    "row width {} does not match {} insert columns",
                    row.len(),
                    columns.len()
                )));
            }
            let mut full = vec![SqlValue::Null; target.columns.len()];
            for (value, idx) in row.iter().zip(&indices) {
                full[*idx] = value.clone();
            }
            target.rows.push(full);
        }
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, Error> {
        Ok(self.tables.contains_key(table))
    }

    fn constraint_exists(&mut self, table: &str, constraint: &str) -> Result<bool, Error> {
        Ok(self
            .constraints
            .get(table)
            .map(|set| set.contains(constraint))
            .unwrap_or(false))
    }
}
