//! Geometry derivation from validated coordinate fields.
//!
//! Points are derived per record; linestrings are aggregated from groups of
//! point records (shape points) keyed by a group id and ordered by a sequence
//! number. Both dispatch on the declared [GeometryKind] so new spatial
//! entities need configuration only.

use geo_types::{Coord, LineString, Point};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::record::{ValidatedRecord, Value};
use crate::schema::{GeometryKind, GeometrySpec};

/// A derived geometry value, rendered to WKT at load time
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point<f64>),
    Line(LineString<f64>),
}

impl Geometry {
    /// Well-Known Text rendering, as consumed by the store's
    /// geometry-from-text constructor
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(p) => format!("POINT({} {})", p.x(), p.y()),
            Geometry::Line(line) => {
                let coords: Vec<String> = line
                    .coords()
                    .map(|c| format!("{} {}", c.x, c.y))
                    .collect();
                format!("LINESTRING({})", coords.join(","))
            }
        }
    }
}

/// Derive a point for one record, if the spec declares one and both
/// coordinates are usable.
///
/// Missing or null coordinates leave the geometry null; range checking
/// already happened during validation, so anything still present is in
/// bounds.
pub fn derive_point(record: &ValidatedRecord, spec: &GeometrySpec) -> Option<Geometry> {
    let GeometryKind::Point { lon, lat } = &spec.kind else {
        return None;
    };
    let x = record.get(lon).and_then(Value::as_float)?;
    let y = record.get(lat).and_then(Value::as_float)?;
    Some(Geometry::Point(Point::new(x, y)))
}

/// Aggregate grouped point records into one linestring per group.
///
/// Points with unusable coordinates are dropped from their group; a group
/// left with fewer than 2 points is skipped with a warning. Neither case is
/// fatal and neither produces a rejection against the point table.
pub fn aggregate_linestrings(
    records: &[ValidatedRecord],
    spec: &GeometrySpec,
) -> Vec<(String, Geometry)> {
    let GeometryKind::LineStringFromGroup {
        group,
        sequence,
        lon,
        lat,
        ..
    } = &spec.kind
    else {
        return Vec::new();
    };

    let mut groups: FxHashMap<String, Vec<(i64, Coord<f64>)>> = FxHashMap::default();
    for record in records {
        let Some(id) = record.get(group).and_then(Value::as_text) else {
            continue;
        };
        let Some(seq) = record.get(sequence).and_then(Value::as_integer) else {
            continue;
        };
        let x = record.get(lon).and_then(Value::as_float);
        let y = record.get(lat).and_then(Value::as_float);
        match (x, y) {
            (Some(x), Some(y)) => groups
                .entry(id.to_owned())
                .or_default()
                .push((seq, Coord { x, y })),
            _ => {
                debug!("dropping point {seq} of group {id}: unusable coordinates");
                // Still claim the group so an all-bad group warns below
                groups.entry(id.to_owned()).or_default();
            }
        }
    }

    let mut lines: Vec<(String, Geometry)> = Vec::with_capacity(groups.len());
    for (id, mut points) in groups {
        if points.len() < 2 {
            warn!(
                "skipping group {id}: only {} usable point(s), need at least 2",
                points.len()
            );
            continue;
        }
        points.sort_by_key(|(seq, _)| *seq);
        let coords: Vec<Coord<f64>> = points.into_iter().map(|(_, c)| c).collect();
        lines.push((id, Geometry::Line(LineString::new(coords))));
    }
    lines.sort_by(|(a, _), (b, _)| a.cmp(b));
    lines
}
