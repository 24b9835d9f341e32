//! Truncate-then-bulk-insert loading of validated records.
//!
//! The loader trusts its input: everything it receives already passed
//! validation, so any constraint violation surfacing here is fatal for the
//! whole table (and therefore the run). Inserts are paged for throughput.

use log::debug;

use crate::db::{Database, SqlValue};
use crate::error::Error;
use crate::geometry::Geometry;
use crate::materializer::DEAD_LETTER_TABLE;
use crate::record::{Rejection, ValidatedRecord};
use crate::schema::{EntitySchema, GeometryKind};

/// Rows per bulk insert page
pub const PAGE_SIZE: usize = 1000;

fn geometry_value(geometry: Option<&Geometry>, srid: u32) -> SqlValue {
    match geometry {
        Some(g) => SqlValue::Geometry {
            wkt: g.to_wkt(),
            srid,
        },
        None => SqlValue::Null,
    }
}

fn truncate(db: &mut dyn Database, table: &str) -> Result<(), Error> {
    // Requires the deferred foreign keys to be absent at load time
    db.execute(&format!("TRUNCATE TABLE {table} CASCADE"))
        .map_err(|e| Error::LoadBatch {
            table: table.to_owned(),
            message: e.to_string(),
        })
}

fn insert_pages(
    db: &mut dyn Database,
    table: &str,
    columns: &[String],
    rows: Vec<Vec<SqlValue>>,
) -> Result<usize, Error> {
    let loaded = rows.len();
    for page in rows.chunks(PAGE_SIZE) {
        db.bulk_insert(table, columns, page)
            .map_err(|e| Error::LoadBatch {
                table: table.to_owned(),
                message: e.to_string(),
            })?;
    }
    debug!("loaded {loaded} rows into {table}");
    Ok(loaded)
}

/// Truncate `schema.table` and insert every record. When the schema declares
/// point geometry, the derived geometry rides along as a typed WKT+SRID
/// value so the store adapter wraps it in its geometry constructor.
///
/// Returns the number of rows loaded.
pub fn load(
    db: &mut dyn Database,
    schema: &EntitySchema,
    records: &[ValidatedRecord],
) -> Result<usize, Error> {
    truncate(db, schema.table)?;

    let mut columns: Vec<String> = schema
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let point_spec = schema
        .geometry
        .as_ref()
        .filter(|spec| matches!(spec.kind, GeometryKind::Point { .. }));
    if let Some(spec) = point_spec {
        columns.push(spec.target_column.to_owned());
    }

    let rows: Vec<Vec<SqlValue>> = records
        .iter()
        .map(|record| {
            let mut row: Vec<SqlValue> = record
                .clone()
                .into_values()
                .into_iter()
                .map(SqlValue::from)
                .collect();
            if let Some(spec) = point_spec {
                row.push(geometry_value(record.geometry.as_ref(), spec.srid));
            }
            row
        })
        .collect();

    insert_pages(db, schema.table, &columns, rows)
}

/// Truncate and load a derived aggregate table of (group id, geometry) rows
pub fn load_aggregate(
    db: &mut dyn Database,
    table: &str,
    group_column: &str,
    geometry_column: &str,
    srid: u32,
    lines: &[(String, Geometry)],
) -> Result<usize, Error> {
    truncate(db, table)?;
    let columns = vec![group_column.to_owned(), geometry_column.to_owned()];
    let rows: Vec<Vec<SqlValue>> = lines
        .iter()
        .map(|(id, geometry)| {
            vec![
                SqlValue::Text(id.clone()),
                geometry_value(Some(geometry), srid),
            ]
        })
        .collect();
    insert_pages(db, table, &columns, rows)
}

/// Persist rejections to the dead-letter table.
///
/// Runs inside the same transaction as the loads, so dead-letter entries
/// only survive a committed run. The dead-letter table is never truncated;
/// it accumulates across runs for inspection.
pub fn store_rejections(db: &mut dyn Database, rejections: &[Rejection]) -> Result<(), Error> {
    if rejections.is_empty() {
        return Ok(());
    }
    let columns = vec![
        "filename".to_owned(),
        "record".to_owned(),
        "errors".to_owned(),
        "rejected_at".to_owned(),
    ];
    let rows: Vec<Vec<SqlValue>> = rejections
        .iter()
        .map(|r| {
            vec![
                SqlValue::Text(r.filename.clone()),
                SqlValue::Text(r.record.to_json().to_string()),
                SqlValue::Text(r.errors_json()),
                SqlValue::Timestamp(r.rejected_at),
            ]
        })
        .collect();
    insert_pages(db, DEAD_LETTER_TABLE, &columns, rows).map(|_| ())
}
