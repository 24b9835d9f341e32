//! Idempotent DDL derived from the registry.
//!
//! Tables are created with `IF NOT EXISTS`; composite primary keys get a
//! deterministic constraint name checked for existence by name before the
//! `ALTER`, so re-running against an already-migrated database never errors.

use log::info;
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::error::Error;
use crate::schema::{EntitySchema, FieldType, GeometryKind, Registry};

/// Dead-letter table receiving rejected rows
pub const DEAD_LETTER_TABLE: &str = "etl_rejections";

/// Identifier length limit of the store (PostgreSQL's NAMEDATALEN - 1)
const IDENTIFIER_LIMIT: usize = 63;

/// Deterministic constraint name for `prefix` on `table`.
///
/// Names longer than the identifier limit are cut and suffixed with 8 hex
/// chars of the untruncated name's digest, so similar long table names can
/// never collide after truncation.
pub fn constraint_name(prefix: &str, table: &str) -> String {
    let name = format!("{prefix}_{table}");
    if name.len() <= IDENTIFIER_LIMIT {
        return name;
    }
    let digest = Sha256::digest(name.as_bytes());
    let suffix = format!("{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3]);
    format!("{}_{suffix}", &name[..IDENTIFIER_LIMIT - 9])
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "TEXT",
        FieldType::Integer => "BIGINT",
        FieldType::Float => "DOUBLE PRECISION",
        FieldType::Date => "DATE",
        // Seconds since midnight; may exceed 24h
        FieldType::Time => "INTEGER",
    }
}

fn create_table(db: &mut dyn Database, table: &str, columns: &[String]) -> Result<(), Error> {
    let ddl = format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "));
    db.execute(&ddl).map_err(|e| Error::Schema(e.to_string()))
}

fn ensure_primary_key(
    db: &mut dyn Database,
    table: &str,
    key_columns: &[&str],
) -> Result<(), Error> {
    if key_columns.is_empty() {
        return Ok(());
    }
    let name = constraint_name("pk", table);
    if db
        .constraint_exists(table, &name)
        .map_err(|e| Error::Schema(e.to_string()))?
    {
        return Ok(());
    }
    db.execute(&format!(
        "ALTER TABLE {table} ADD CONSTRAINT {name} PRIMARY KEY ({})",
        key_columns.join(", ")
    ))
    .map_err(|e| Error::Schema(e.to_string()))
}

fn entity_columns(schema: &EntitySchema) -> Vec<String> {
    let mut columns: Vec<String> = schema
        .fields
        .iter()
        .map(|f| format!("{} {}", f.name, sql_type(f.field_type)))
        .collect();
    if let Some(spec) = &schema.geometry {
        if matches!(spec.kind, GeometryKind::Point { .. }) {
            columns.push(format!("{} GEOMETRY", spec.target_column));
        }
    }
    columns
}

/// Create every table the run needs: one per registry entry, the derived
/// aggregate tables the linestring specs point at, and the dead-letter
/// table. Any DDL failure is fatal to the whole run.
pub fn ensure_schema(db: &mut dyn Database, registry: &Registry) -> Result<(), Error> {
    for schema in registry.load_order() {
        create_table(db, schema.table, &entity_columns(schema))?;
        ensure_primary_key(db, schema.table, schema.primary_key)?;

        if let Some(spec) = &schema.geometry {
            if let GeometryKind::LineStringFromGroup {
                group,
                target_table,
                ..
            } = &spec.kind
            {
                create_table(
                    db,
                    target_table,
                    &[
                        format!("{group} TEXT"),
                        format!("{} GEOMETRY", spec.target_column),
                    ],
                )?;
                ensure_primary_key(db, target_table, &[group])?;
            }
        }
    }

    create_table(
        db,
        DEAD_LETTER_TABLE,
        &[
            "filename TEXT".to_owned(),
            "record TEXT".to_owned(),
            "errors TEXT".to_owned(),
            "rejected_at TIMESTAMP".to_owned(),
        ],
    )?;

    info!("schema materialized");
    Ok(())
}
