//! The orchestrating state machine.
//!
//! One run is one transaction: schema DDL, every table load, the geometry
//! aggregation and the foreign key linking either all commit or all roll
//! back. The extraction directory lives exactly as long as the run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::{debug, error, info};

use crate::csv_read;
use crate::db::Database;
use crate::error::Error;
use crate::fetch::{self, FeedSource};
use crate::geometry;
use crate::integrity;
use crate::loader;
use crate::materializer;
use crate::record::ValidatedRecord;
use crate::schema::{GeometryKind, GeometrySpec, Registry, GTFS};
use crate::validator;

/// Where the run currently stands; terminal states are `Committed` and
/// `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Extracting,
    SchemaReady,
    Loading(&'static str),
    AggregatingGeometry,
    LinkingFks,
    Committed,
    Failed(String),
}

/// Per-table counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub seen: usize,
    pub loaded: usize,
    pub rejected: usize,
}

/// Seen/loaded/rejected counts per table, local to one run and never
/// persisted
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    tables: BTreeMap<String, TableStats>,
}

impl RunStats {
    fn entry(&mut self, table: &str) -> &mut TableStats {
        self.tables.entry(table.to_owned()).or_default()
    }

    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableStats)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn total_loaded(&self) -> usize {
        self.tables.values().map(|t| t.loaded).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.tables.values().map(|t| t.rejected).sum()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run summary:")?;
        for (table, stats) in &self.tables {
            writeln!(
                f,
                "  {table}: {} seen, {} loaded, {} rejected",
                stats.seen, stats.loaded, stats.rejected
            )?;
        }
        Ok(())
    }
}

/// Short failure tag for the terminal `Failed` state
fn failure_reason(error: &Error) -> String {
    match error {
        Error::Configuration(_) => "config".to_owned(),
        Error::Download(_) => "download".to_owned(),
        Error::Extract(_) => "extract".to_owned(),
        Error::MissingRequiredFile(_) => "missing_required_file".to_owned(),
        Error::Schema(_) => "schema".to_owned(),
        Error::LoadBatch { table, .. } => format!("load:{table}"),
        Error::CsvError { file_name, .. } => format!("load:{file_name}"),
        Error::Integrity(_) => "fk".to_owned(),
        Error::Database(_) => "database".to_owned(),
        // Plain I/O only arises from the extraction directory (temp dir
        // creation, unpacking, opening extracted files)
        Error::IO(_) => "extract".to_owned(),
    }
}

/// Drives one feed through extraction, validation, loading and linking.
///
/// The registry is injected so tests can run fixture registries; production
/// runs use the shared GTFS configuration via [run_pipeline]
pub struct Pipeline<'a> {
    registry: &'a Registry,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Pipeline {
            registry,
            state: PipelineState::Init,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!("pipeline: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Run the whole pipeline against one feed.
    ///
    /// On any fatal error the open transaction is rolled back and the
    /// extraction directory removed before the error is returned.
    pub fn run(&mut self, source: &FeedSource, db: &mut dyn Database) -> Result<RunStats, Error> {
        self.transition(PipelineState::Extracting);
        let feed = match fetch::obtain(source) {
            Ok(feed) => feed,
            // No transaction open yet; safe to abort outright
            Err(e) => return self.fail(e, db, false),
        };

        if let Err(e) = db.begin() {
            return self.fail(e, db, false);
        }
        match self.run_transaction(feed.path(), db) {
            Ok(stats) => {
                if let Err(e) = db.commit() {
                    return self.fail(e, db, true);
                }
                self.transition(PipelineState::Committed);
                info!("{stats}");
                Ok(stats)
            }
            Err(e) => self.fail(e, db, true),
        }
        // `feed` drops here, removing the extraction directory on both paths
    }

    fn fail(
        &mut self,
        err: Error,
        db: &mut dyn Database,
        rollback: bool,
    ) -> Result<RunStats, Error> {
        if rollback {
            if let Err(rb) = db.rollback() {
                error!("rollback after failure also failed: {rb}");
            }
        }
        let reason = failure_reason(&err);
        error!("pipeline failed ({reason}): {err}");
        self.transition(PipelineState::Failed(reason));
        Err(err)
    }

    fn run_transaction(&mut self, dir: &Path, db: &mut dyn Database) -> Result<RunStats, Error> {
        let registry = self.registry;
        materializer::ensure_schema(db, registry)?;
        // Loads truncate with CASCADE, so the deferred keys must be gone
        // first; this is still DDL, so its failures count as schema failures
        integrity::drop_all(db, registry.fk_rules())
            .map_err(|e| Error::Schema(e.to_string()))?;
        self.transition(PipelineState::SchemaReady);

        let mut stats = RunStats::default();
        for schema in registry.load_order() {
            stats.entry(schema.table);
        }

        let mut pending_lines: Vec<(GeometrySpec, Vec<ValidatedRecord>)> = Vec::new();

        for schema in registry.load_order() {
            let path = dir.join(schema.filename);
            if !path.exists() {
                if schema.required_file {
                    return Err(Error::MissingRequiredFile(schema.filename.to_owned()));
                }
                info!("optional file {} absent, skipping", schema.filename);
                continue;
            }
            self.transition(PipelineState::Loading(schema.filename));

            let raws = csv_read::read_records(&path)?;
            let mut valid = Vec::with_capacity(raws.len());
            let mut rejections = Vec::new();
            for raw in raws {
                stats.entry(schema.table).seen += 1;
                match validator::validate(raw, schema) {
                    Ok(mut record) => {
                        if let Some(spec) = &schema.geometry {
                            record.geometry = geometry::derive_point(&record, spec);
                        }
                        valid.push(record);
                    }
                    Err(rejection) => {
                        debug!(
                            "rejected row in {}: {}",
                            schema.filename,
                            rejection.errors_json()
                        );
                        rejections.push(rejection);
                    }
                }
            }

            let loaded = loader::load(db, schema, &valid)?;
            loader::store_rejections(db, &rejections)?;
            let entry = stats.entry(schema.table);
            entry.loaded += loaded;
            entry.rejected += rejections.len();

            if let Some(spec) = &schema.geometry {
                if matches!(spec.kind, GeometryKind::LineStringFromGroup { .. }) {
                    pending_lines.push((spec.clone(), valid));
                }
            }
        }

        self.transition(PipelineState::AggregatingGeometry);
        for (spec, records) in &pending_lines {
            let GeometryKind::LineStringFromGroup {
                group,
                target_table,
                ..
            } = &spec.kind
            else {
                continue;
            };
            let lines = geometry::aggregate_linestrings(records, spec);
            let loaded =
                loader::load_aggregate(db, target_table, group, spec.target_column, spec.srid, &lines)?;
            let entry = stats.entry(target_table);
            entry.seen += lines.len();
            entry.loaded += loaded;
        }

        self.transition(PipelineState::LinkingFks);
        integrity::add_all(db, registry.fk_rules())?;

        Ok(stats)
    }
}

/// Run one feed through the full validate/transform/load pipeline with the
/// standard GTFS configuration
pub fn run_pipeline(source: &FeedSource, db: &mut dyn Database) -> Result<RunStats, Error> {
    Pipeline::new(&GTFS).run(source, db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use std::fs;

    #[test]
    fn missing_required_file_fails_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // agency.txt only; stops.txt and friends are required
        fs::write(
            dir.path().join("agency.txt"),
            "agency_id,agency_name,agency_url,agency_timezone\na1,Metro,https://m,UTC\n",
        )
        .unwrap();

        let mut db = MemoryDb::new();
        let mut pipeline = Pipeline::new(&GTFS);
        let err = pipeline
            .run(&FeedSource::Path(dir.path().to_owned()), &mut db)
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredFile(_)));
        assert_eq!(
            pipeline.state(),
            &PipelineState::Failed("missing_required_file".to_owned())
        );
        // Rolled back: the agency rows loaded before the failure are gone
        assert!(db
            .table("agency")
            .map(|t| t.rows.is_empty())
            .unwrap_or(true));
    }

    /// Behaves like [MemoryDb] except that dropping constraints is refused,
    /// as a store without the needed DDL privilege would
    struct DropRefusingDb {
        inner: MemoryDb,
    }

    impl Database for DropRefusingDb {
        fn begin(&mut self) -> Result<(), Error> {
            self.inner.begin()
        }
        fn commit(&mut self) -> Result<(), Error> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<(), Error> {
            self.inner.rollback()
        }
        fn execute(&mut self, sql: &str) -> Result<(), Error> {
            if sql.contains("DROP CONSTRAINT") {
                return Err(Error::Database("permission denied".to_owned()));
            }
            self.inner.execute(sql)
        }
        fn bulk_insert(
            &mut self,
            table: &str,
            columns: &[String],
            rows: &[Vec<crate::db::SqlValue>],
        ) -> Result<(), Error> {
            self.inner.bulk_insert(table, columns, rows)
        }
        fn table_exists(&mut self, table: &str) -> Result<bool, Error> {
            self.inner.table_exists(table)
        }
        fn constraint_exists(&mut self, table: &str, constraint: &str) -> Result<bool, Error> {
            self.inner.constraint_exists(table, constraint)
        }
    }

    #[test]
    fn ddl_phase_failure_reports_as_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = DropRefusingDb {
            inner: MemoryDb::new(),
        };
        let mut pipeline = Pipeline::new(&GTFS);
        let err = pipeline
            .run(&FeedSource::Path(dir.path().to_owned()), &mut db)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert_eq!(pipeline.state(), &PipelineState::Failed("schema".to_owned()));
    }

    #[test]
    fn failure_tags_match_the_state_machine_vocabulary() {
        let io = Error::IO(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert_eq!(failure_reason(&io), "extract");
        assert_eq!(failure_reason(&Error::Schema("conflict".into())), "schema");
        assert_eq!(
            failure_reason(&Error::MissingRequiredFile("stops.txt".into())),
            "missing_required_file"
        );
    }

    #[test]
    fn unusable_source_fails_with_config_reason() {
        let mut db = MemoryDb::new();
        let mut pipeline = Pipeline::new(&GTFS);
        let err = pipeline
            .run(
                &FeedSource::Path("/nonexistent/feed.zip".into()),
                &mut db,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(pipeline.state(), &PipelineState::Failed("config".to_owned()));
    }
}
