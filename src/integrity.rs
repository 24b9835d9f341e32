//! Deferred foreign key management.
//!
//! Foreign keys are dropped before the loads (truncate order must not matter)
//! and added back only after both sides are fully loaded, as deferrable
//! constraints checked at commit. The manager trusts the caller's rule
//! ordering and never re-sequences.

use log::{info, warn};

use crate::db::Database;
use crate::error::Error;
use crate::schema::ForeignKeyRule;

/// Drop every declared constraint, tolerant of "does not exist"
pub fn drop_all(db: &mut dyn Database, rules: &[ForeignKeyRule]) -> Result<(), Error> {
    for rule in rules {
        db.execute(&format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            rule.from_table, rule.constraint
        ))?;
    }
    Ok(())
}

/// Add every constraint whose tables both exist.
///
/// Optional feed files may never have materialized a table; those rules are
/// skipped with a warning. A genuine addition failure (orphaned references)
/// is fatal and rolls back the run.
pub fn add_all(db: &mut dyn Database, rules: &[ForeignKeyRule]) -> Result<(), Error> {
    for rule in rules {
        if !db.table_exists(rule.from_table)? || !db.table_exists(rule.to_table)? {
            warn!(
                "skipping foreign key {}: table {} or {} does not exist",
                rule.constraint, rule.from_table, rule.to_table
            );
            continue;
        }
        db.execute(&format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
            rule.from_table,
            rule.constraint,
            rule.from_columns.join(", "),
            rule.to_table,
            rule.to_columns.join(", ")
        ))
        .map_err(|e| Error::Integrity(format!("{}: {e}", rule.constraint)))?;
        info!("added foreign key {}", rule.constraint);
    }
    Ok(())
}
