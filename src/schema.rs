//! Declarative entity schemas for the feed files.
//!
//! Everything the validator, geometry transformer, materializer and loader
//! need to know about a feed file lives in its [EntitySchema] entry: adding a
//! new file to the vocabulary means adding an entry here, never a new code
//! path. Geometry handling dispatches on the declared [GeometryKind], not on
//! filename comparisons.

use lazy_static::lazy_static;
use regex::Regex;

use crate::record::{Value, ValidatedRecord};

/// Semantic type of a feed field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    /// `YYYYMMDD` service day
    Date,
    /// `H:MM:SS` / `HH:MM:SS`, possibly past 24:00:00
    Time,
}

/// A check applied to a field value after type coercion
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Inclusive numeric bounds; use `f64::INFINITY` for an open end
    Range(f64, f64),
    /// Full-match regular expression for text fields
    Pattern(Regex),
    /// Closed set of allowed integer codes
    OneOf(&'static [i64]),
}

/// One column of a feed file
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub field_type: FieldType,
    /// A blank or absent value rejects the record when set
    pub required: bool,
    pub constraints: Vec<Constraint>,
    /// Substituted when the field is absent and not required
    pub default: Option<Value>,
}

impl FieldDefinition {
    pub fn required(name: &'static str, field_type: FieldType) -> Self {
        FieldDefinition {
            name,
            field_type,
            required: true,
            constraints: Vec::new(),
            default: None,
        }
    }

    pub fn optional(name: &'static str, field_type: FieldType) -> Self {
        FieldDefinition {
            name,
            field_type,
            required: false,
            constraints: Vec::new(),
            default: None,
        }
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.constraints.push(Constraint::Range(min, max));
        self
    }

    pub fn one_of(mut self, allowed: &'static [i64]) -> Self {
        self.constraints.push(Constraint::OneOf(allowed));
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        let re = Regex::new(pattern).unwrap();
        self.constraints.push(Constraint::Pattern(re));
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// How geometry is derived for an entity
#[derive(Debug, Clone)]
pub enum GeometryKind {
    /// One point per record, from a coordinate field pair
    Point {
        lon: &'static str,
        lat: &'static str,
    },
    /// One linestring per group of records, ordered by a sequence field.
    /// The lines land in a derived table, not on the point table itself
    LineStringFromGroup {
        group: &'static str,
        sequence: &'static str,
        lon: &'static str,
        lat: &'static str,
        /// Derived aggregate table receiving the linestrings
        target_table: &'static str,
    },
}

/// Declarative geometry derivation attached to an [EntitySchema]
#[derive(Debug, Clone)]
pub struct GeometrySpec {
    pub kind: GeometryKind,
    /// Geometry column on the target table
    pub target_column: &'static str,
    pub srid: u32,
}

/// A record-level predicate evaluated after all field checks pass.
/// `check` returns true when the record is acceptable
#[derive(Clone)]
pub struct RecordRule {
    pub message: &'static str,
    pub check: fn(&ValidatedRecord) -> bool,
}

impl std::fmt::Debug for RecordRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordRule")
            .field("message", &self.message)
            .finish()
    }
}

/// Everything known about one feed file
#[derive(Debug, Clone)]
pub struct EntitySchema {
    /// Filename inside the feed, e.g. `stops.txt`
    pub filename: &'static str,
    /// Target table
    pub table: &'static str,
    /// Absence of the file fails the run when set; otherwise it is skipped
    pub required_file: bool,
    /// Columns in target order
    pub fields: Vec<FieldDefinition>,
    /// Empty slice means no primary key constraint
    pub primary_key: &'static [&'static str],
    pub geometry: Option<GeometrySpec>,
    pub record_rules: Vec<RecordRule>,
}

impl EntitySchema {
    /// Column names in schema order
    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

/// A deferred foreign key between two loaded tables
#[derive(Debug, Clone)]
pub struct ForeignKeyRule {
    pub constraint: &'static str,
    pub from_table: &'static str,
    pub from_columns: &'static [&'static str],
    pub to_table: &'static str,
    pub to_columns: &'static [&'static str],
}

impl ForeignKeyRule {
    pub fn new(
        constraint: &'static str,
        from_table: &'static str,
        from_columns: &'static [&'static str],
        to_table: &'static str,
        to_columns: &'static [&'static str],
    ) -> Self {
        assert_eq!(
            from_columns.len(),
            to_columns.len(),
            "foreign key {constraint} has mismatched column counts"
        );
        ForeignKeyRule {
            constraint,
            from_table,
            from_columns,
            to_table,
            to_columns,
        }
    }
}

/// Immutable, constructed-once map of everything the pipeline loads.
///
/// Load order is the declaration order of the schemas; construction asserts
/// that every foreign key's referenced table loads no later than its
/// referencing table
#[derive(Debug)]
pub struct Registry {
    schemas: Vec<EntitySchema>,
    fk_rules: Vec<ForeignKeyRule>,
}

impl Registry {
    pub fn new(schemas: Vec<EntitySchema>, fk_rules: Vec<ForeignKeyRule>) -> Self {
        let position = |table: &str| schemas.iter().position(|s| s.table == table);
        for rule in &fk_rules {
            let from = position(rule.from_table);
            let to = position(rule.to_table);
            if let (Some(from), Some(to)) = (from, to) {
                assert!(
                    to <= from,
                    "foreign key {}: {} loads after {}",
                    rule.constraint,
                    rule.to_table,
                    rule.from_table
                );
            }
        }
        Registry { schemas, fk_rules }
    }

    pub fn lookup(&self, filename: &str) -> Option<&EntitySchema> {
        self.schemas.iter().find(|s| s.filename == filename)
    }

    /// Schemas in load order
    pub fn load_order(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.iter()
    }

    pub fn fk_rules(&self) -> &[ForeignKeyRule] {
        &self.fk_rules
    }

    /// The full GTFS static vocabulary
    pub fn gtfs() -> Registry {
        use FieldType::*;

        let agency = EntitySchema {
            filename: "agency.txt",
            table: "agency",
            required_file: true,
            fields: vec![
                FieldDefinition::required("agency_id", Text),
                FieldDefinition::required("agency_name", Text),
                FieldDefinition::required("agency_url", Text),
                FieldDefinition::required("agency_timezone", Text),
                FieldDefinition::optional("agency_lang", Text),
                FieldDefinition::optional("agency_phone", Text),
                FieldDefinition::optional("agency_fare_url", Text),
                FieldDefinition::optional("agency_email", Text),
            ],
            primary_key: &["agency_id"],
            geometry: None,
            record_rules: vec![],
        };

        let stops = EntitySchema {
            filename: "stops.txt",
            table: "stops",
            required_file: true,
            fields: vec![
                FieldDefinition::required("stop_id", Text),
                FieldDefinition::optional("stop_code", Text),
                FieldDefinition::optional("stop_name", Text),
                FieldDefinition::optional("stop_desc", Text),
                FieldDefinition::optional("stop_lat", Float).range(-90.0, 90.0),
                FieldDefinition::optional("stop_lon", Float).range(-180.0, 180.0),
                FieldDefinition::optional("zone_id", Text),
                FieldDefinition::optional("stop_url", Text),
                FieldDefinition::optional("location_type", Integer)
                    .one_of(&[0, 1, 2, 3, 4])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("parent_station", Text),
                FieldDefinition::optional("stop_timezone", Text),
                FieldDefinition::optional("wheelchair_boarding", Integer)
                    .one_of(&[0, 1, 2])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("platform_code", Text),
            ],
            primary_key: &["stop_id"],
            geometry: Some(GeometrySpec {
                kind: GeometryKind::Point {
                    lon: "stop_lon",
                    lat: "stop_lat",
                },
                target_column: "geom",
                srid: 4326,
            }),
            record_rules: vec![],
        };

        let routes = EntitySchema {
            filename: "routes.txt",
            table: "routes",
            required_file: true,
            fields: vec![
                FieldDefinition::required("route_id", Text),
                FieldDefinition::optional("agency_id", Text),
                FieldDefinition::optional("route_short_name", Text),
                FieldDefinition::optional("route_long_name", Text),
                FieldDefinition::optional("route_desc", Text),
                FieldDefinition::required("route_type", Integer)
                    .one_of(&[0, 1, 2, 3, 4, 5, 6, 7, 11, 12]),
                FieldDefinition::optional("route_url", Text),
                FieldDefinition::optional("route_color", Text).pattern("^[0-9A-Fa-f]{6}$"),
                FieldDefinition::optional("route_text_color", Text).pattern("^[0-9A-Fa-f]{6}$"),
                FieldDefinition::optional("route_sort_order", Integer).range(0.0, f64::INFINITY),
                FieldDefinition::optional("continuous_pickup", Integer).one_of(&[0, 1, 2, 3]),
                FieldDefinition::optional("continuous_drop_off", Integer).one_of(&[0, 1, 2, 3]),
            ],
            primary_key: &["route_id"],
            geometry: None,
            record_rules: vec![],
        };

        let calendar = EntitySchema {
            filename: "calendar.txt",
            table: "calendar",
            required_file: false,
            fields: vec![
                FieldDefinition::required("service_id", Text),
                FieldDefinition::required("monday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("tuesday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("wednesday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("thursday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("friday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("saturday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("sunday", Integer).one_of(&[0, 1]),
                FieldDefinition::required("start_date", Date),
                FieldDefinition::required("end_date", Date),
            ],
            primary_key: &["service_id"],
            geometry: None,
            record_rules: vec![],
        };

        let calendar_dates = EntitySchema {
            filename: "calendar_dates.txt",
            table: "calendar_dates",
            required_file: false,
            fields: vec![
                FieldDefinition::required("service_id", Text),
                FieldDefinition::required("date", Date),
                FieldDefinition::required("exception_type", Integer).one_of(&[1, 2]),
            ],
            primary_key: &["service_id", "date"],
            geometry: None,
            record_rules: vec![],
        };

        let trips = EntitySchema {
            filename: "trips.txt",
            table: "trips",
            required_file: true,
            fields: vec![
                FieldDefinition::required("trip_id", Text),
                FieldDefinition::required("route_id", Text),
                FieldDefinition::required("service_id", Text),
                FieldDefinition::optional("trip_headsign", Text),
                FieldDefinition::optional("trip_short_name", Text),
                FieldDefinition::optional("direction_id", Integer).one_of(&[0, 1]),
                FieldDefinition::optional("block_id", Text),
                FieldDefinition::optional("shape_id", Text),
                FieldDefinition::optional("wheelchair_accessible", Integer)
                    .one_of(&[0, 1, 2])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("bikes_allowed", Integer)
                    .one_of(&[0, 1, 2])
                    .default_value(Value::Integer(0)),
            ],
            primary_key: &["trip_id"],
            geometry: None,
            record_rules: vec![],
        };

        let stop_times = EntitySchema {
            filename: "stop_times.txt",
            table: "stop_times",
            required_file: true,
            fields: vec![
                FieldDefinition::required("trip_id", Text),
                FieldDefinition::optional("arrival_time", Time),
                FieldDefinition::optional("departure_time", Time),
                FieldDefinition::required("stop_id", Text),
                FieldDefinition::required("stop_sequence", Integer).range(0.0, f64::INFINITY),
                FieldDefinition::optional("stop_headsign", Text),
                FieldDefinition::optional("pickup_type", Integer)
                    .one_of(&[0, 1, 2, 3])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("drop_off_type", Integer)
                    .one_of(&[0, 1, 2, 3])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("continuous_pickup", Integer).one_of(&[0, 1, 2, 3]),
                FieldDefinition::optional("continuous_drop_off", Integer).one_of(&[0, 1, 2, 3]),
                FieldDefinition::optional("shape_dist_traveled", Float).range(0.0, f64::INFINITY),
                FieldDefinition::optional("timepoint", Integer).one_of(&[0, 1]),
            ],
            primary_key: &["trip_id", "stop_sequence"],
            geometry: None,
            record_rules: vec![],
        };

        let frequencies = EntitySchema {
            filename: "frequencies.txt",
            table: "frequencies",
            required_file: false,
            fields: vec![
                FieldDefinition::required("trip_id", Text),
                FieldDefinition::required("start_time", Time),
                FieldDefinition::required("end_time", Time),
                FieldDefinition::required("headway_secs", Integer).range(1.0, f64::INFINITY),
                FieldDefinition::optional("exact_times", Integer)
                    .one_of(&[0, 1])
                    .default_value(Value::Integer(0)),
            ],
            primary_key: &["trip_id", "start_time"],
            geometry: None,
            record_rules: vec![],
        };

        let transfers = EntitySchema {
            filename: "transfers.txt",
            table: "transfers",
            required_file: false,
            fields: vec![
                FieldDefinition::required("from_stop_id", Text),
                FieldDefinition::required("to_stop_id", Text),
                FieldDefinition::optional("transfer_type", Integer)
                    .one_of(&[0, 1, 2, 3])
                    .default_value(Value::Integer(0)),
                FieldDefinition::optional("min_transfer_time", Integer).range(0.0, f64::INFINITY),
            ],
            primary_key: &["from_stop_id", "to_stop_id"],
            geometry: None,
            record_rules: vec![RecordRule {
                message: "transfer_type 2 requires min_transfer_time",
                check: |record| {
                    record.get("transfer_type").and_then(Value::as_integer) != Some(2)
                        || record
                            .get("min_transfer_time")
                            .map(|v| !v.is_null())
                            .unwrap_or(false)
                },
            }],
        };

        let shapes = EntitySchema {
            filename: "shapes.txt",
            table: "shapes",
            required_file: false,
            fields: vec![
                FieldDefinition::required("shape_id", Text),
                FieldDefinition::optional("shape_pt_lat", Float).range(-90.0, 90.0),
                FieldDefinition::optional("shape_pt_lon", Float).range(-180.0, 180.0),
                FieldDefinition::required("shape_pt_sequence", Integer).range(0.0, f64::INFINITY),
                FieldDefinition::optional("shape_dist_traveled", Float).range(0.0, f64::INFINITY),
            ],
            primary_key: &["shape_id", "shape_pt_sequence"],
            geometry: Some(GeometrySpec {
                kind: GeometryKind::LineStringFromGroup {
                    group: "shape_id",
                    sequence: "shape_pt_sequence",
                    lon: "shape_pt_lon",
                    lat: "shape_pt_lat",
                    target_table: "shape_geoms",
                },
                target_column: "geom",
                srid: 4326,
            }),
            record_rules: vec![],
        };

        let feed_info = EntitySchema {
            filename: "feed_info.txt",
            table: "feed_info",
            required_file: false,
            fields: vec![
                FieldDefinition::required("feed_publisher_name", Text),
                FieldDefinition::required("feed_publisher_url", Text),
                FieldDefinition::required("feed_lang", Text),
                FieldDefinition::optional("feed_start_date", Date),
                FieldDefinition::optional("feed_end_date", Date),
                FieldDefinition::optional("feed_version", Text),
                FieldDefinition::optional("feed_contact_email", Text),
                FieldDefinition::optional("feed_contact_url", Text),
            ],
            primary_key: &[],
            geometry: None,
            record_rules: vec![],
        };

        let fk_rules = vec![
            ForeignKeyRule::new(
                "fk_routes_agency",
                "routes",
                &["agency_id"],
                "agency",
                &["agency_id"],
            ),
            ForeignKeyRule::new(
                "fk_trips_route",
                "trips",
                &["route_id"],
                "routes",
                &["route_id"],
            ),
            ForeignKeyRule::new(
                "fk_trips_service",
                "trips",
                &["service_id"],
                "calendar",
                &["service_id"],
            ),
            ForeignKeyRule::new(
                "fk_stop_times_trip",
                "stop_times",
                &["trip_id"],
                "trips",
                &["trip_id"],
            ),
            ForeignKeyRule::new(
                "fk_stop_times_stop",
                "stop_times",
                &["stop_id"],
                "stops",
                &["stop_id"],
            ),
            ForeignKeyRule::new(
                "fk_frequencies_trip",
                "frequencies",
                &["trip_id"],
                "trips",
                &["trip_id"],
            ),
            ForeignKeyRule::new(
                "fk_transfers_from_stop",
                "transfers",
                &["from_stop_id"],
                "stops",
                &["stop_id"],
            ),
            ForeignKeyRule::new(
                "fk_transfers_to_stop",
                "transfers",
                &["to_stop_id"],
                "stops",
                &["stop_id"],
            ),
        ];

        Registry::new(
            vec![
                agency,
                stops,
                routes,
                calendar,
                calendar_dates,
                trips,
                stop_times,
                frequencies,
                transfers,
                shapes,
                feed_info,
            ],
            fk_rules,
        )
    }
}

lazy_static! {
    /// The shared, read-only GTFS configuration used by [crate::run_pipeline]
    pub static ref GTFS: Registry = Registry::gtfs();
}
