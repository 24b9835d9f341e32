/*! Validate, transform and load [GTFS](https://gtfs.org/) transit feeds into a relational+spatial store.

A GTFS feed is a zip of CSV files of very uneven real-world quality. This
crate ingests one feed record-by-record: rows that validate are typed,
given derived geometry and bulk-loaded; rows that do not are diverted to a
dead-letter table without aborting the run.

## Design decisions

### Declarative schemas

Everything file-specific lives in an [EntitySchema] entry of the
[Registry]: fields, constraints, primary key, geometry derivation, record
rules. The validator, geometry transformer and loader dispatch on the
schema alone, so a new feed file needs configuration, not code.

### One run, one transaction

Schema DDL, every table load, the shape aggregation and the foreign key
linking all happen inside a single transaction. Either the whole run
commits or nothing does; tables are truncated before reload, making a run
idempotent at the table level.

### Deferred foreign keys

Constraints between feed tables are dropped before the loads and added
back afterwards as deferrable, initially deferred. Insertion order inside
the transaction therefore never fights referential integrity.

To get started, see [run_pipeline].
*/

pub mod csv_read;
pub mod db;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod integrity;
pub mod loader;
pub mod materializer;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod validator;

pub use db::{Database, MemoryDb, SqlValue};
pub use error::Error;
pub use fetch::FeedSource;
pub use geometry::Geometry;
pub use pipeline::{run_pipeline, Pipeline, PipelineState, RunStats, TableStats};
pub use record::{RawRecord, Rejection, ValidatedRecord, Value};
pub use schema::{EntitySchema, FieldDefinition, ForeignKeyRule, GeometrySpec, Registry};
