//! End-to-end runs against programmatically built feeds.

use std::fs;
use std::io::Write;
use std::path::Path;

use gtfs_etl::{run_pipeline, Database, FeedSource, MemoryDb, SqlValue};

fn write_feed(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
}

fn basic_feed() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "agency.txt",
            "agency_id,agency_name,agency_url,agency_timezone\n\
             METRO,City Metro,https://metro.city.gov,America/New_York\n",
        ),
        (
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\n\
             s1,First Street,40.0,-74.0\n\
             s2,Second Street,999,-74.0\n",
        ),
        (
            "routes.txt",
            "route_id,agency_id,route_short_name,route_type\n\
             r1,METRO,1,3\n",
        ),
        (
            "calendar.txt",
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
             wk,1,1,1,1,1,0,0,20260101,20261231\n",
        ),
        (
            "trips.txt",
            "route_id,service_id,trip_id,shape_id\n\
             r1,wk,t1,A\n",
        ),
        (
            "stop_times.txt",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             t1,08:00:00,08:00:30,s1,1\n",
        ),
        (
            "shapes.txt",
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             A,45.0,-73.0,1\n\
             A,45.1,-73.1,2\n\
             A,45.2,-73.2,3\n\
             B,46.0,-74.0,1\n",
        ),
    ]
}

#[test]
fn end_to_end_valid_row_loads_and_bad_row_dead_letters() {
    let dir = tempfile::tempdir().unwrap();
    write_feed(dir.path(), &basic_feed());

    let mut db = MemoryDb::new();
    let stats = run_pipeline(&FeedSource::Path(dir.path().to_owned()), &mut db).unwrap();

    let stops = stats.table("stops").unwrap();
    assert_eq!((stops.seen, stops.loaded, stops.rejected), (2, 1, 1));

    // Only s1 made it, with a non-null point at the declared SRID
    assert_eq!(
        db.column("stops", "stop_id"),
        vec![SqlValue::Text("s1".into())]
    );
    assert_eq!(
        db.column("stops", "geom"),
        vec![SqlValue::Geometry {
            wkt: "POINT(-74 40)".into(),
            srid: 4326,
        }]
    );

    // Exactly one dead-letter entry, citing the file and a non-empty error list
    let filenames = db.column("etl_rejections", "filename");
    assert_eq!(filenames, vec![SqlValue::Text("stops.txt".into())]);
    match &db.column("etl_rejections", "errors")[0] {
        SqlValue::Text(errors) => {
            assert!(errors.contains("stop_lat"), "errors: {errors}");
        }
        other => panic!("expected text errors, got {other:?}"),
    }
    match &db.column("etl_rejections", "record")[0] {
        SqlValue::Text(record) => assert!(record.contains("999")),
        other => panic!("expected text record, got {other:?}"),
    }
}

#[test]
fn values_round_trip_after_coercion() {
    let dir = tempfile::tempdir().unwrap();
    write_feed(dir.path(), &basic_feed());

    let mut db = MemoryDb::new();
    run_pipeline(&FeedSource::Path(dir.path().to_owned()), &mut db).unwrap();

    assert_eq!(db.column("stops", "stop_lat"), vec![SqlValue::Float(40.0)]);
    // 08:00:00 and 08:00:30 as seconds since midnight
    assert_eq!(
        db.column("stop_times", "arrival_time"),
        vec![SqlValue::Time(28800)]
    );
    assert_eq!(
        db.column("stop_times", "departure_time"),
        vec![SqlValue::Time(28830)]
    );
    // Absent optional column with a declared default
    assert_eq!(
        db.column("trips", "wheelchair_accessible"),
        vec![SqlValue::Integer(0)]
    );
    // Calendar dates parse from YYYYMMDD
    match &db.column("calendar", "start_date")[0] {
        SqlValue::Date(d) => assert_eq!(d.to_string(), "2026-01-01"),
        other => panic!("expected a date, got {other:?}"),
    }
}

#[test]
fn shape_groups_aggregate_into_linestrings() {
    let dir = tempfile::tempdir().unwrap();
    write_feed(dir.path(), &basic_feed());

    let mut db = MemoryDb::new();
    let stats = run_pipeline(&FeedSource::Path(dir.path().to_owned()), &mut db).unwrap();

    // Three points for A make a line; the lone point of B is dropped
    assert_eq!(
        db.column("shape_geoms", "shape_id"),
        vec![SqlValue::Text("A".into())]
    );
    assert_eq!(
        db.column("shape_geoms", "geom"),
        vec![SqlValue::Geometry {
            wkt: "LINESTRING(-73 45,-73.1 45.1,-73.2 45.2)".into(),
            srid: 4326,
        }]
    );
    let geoms = stats.table("shape_geoms").unwrap();
    assert_eq!((geoms.seen, geoms.loaded), (1, 1));
    // The point table itself keeps all four rows; dropping B is not a rejection
    let shapes = stats.table("shapes").unwrap();
    assert_eq!((shapes.seen, shapes.loaded, shapes.rejected), (4, 4, 0));
}

#[test]
fn running_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_feed(dir.path(), &basic_feed());
    let source = FeedSource::Path(dir.path().to_owned());

    let mut db = MemoryDb::new();
    let first = run_pipeline(&source, &mut db).unwrap();
    let stops_after_first = db.table("stops").unwrap().clone();
    let trips_after_first = db.table("trips").unwrap().clone();

    let second = run_pipeline(&source, &mut db).unwrap();
    assert_eq!(first, second);
    assert_eq!(db.table("stops").unwrap(), &stops_after_first);
    assert_eq!(db.table("trips").unwrap(), &trips_after_first);
}

#[test]
fn optional_files_are_skipped_and_their_fks_still_link() {
    let dir = tempfile::tempdir().unwrap();
    let mut feed = basic_feed();
    feed.retain(|(name, _)| *name != "shapes.txt" && *name != "calendar.txt");
    write_feed(dir.path(), &feed);

    let mut db = MemoryDb::new();
    let stats = run_pipeline(&FeedSource::Path(dir.path().to_owned()), &mut db).unwrap();
    assert_eq!(stats.table("shapes").unwrap().seen, 0);
    // All tables exist (the materializer creates the whole registry), so
    // every declared key still links
    assert!(db.constraint_exists("trips", "fk_trips_service").unwrap());
    assert!(db
        .constraint_exists("stop_times", "fk_stop_times_stop")
        .unwrap());
}

#[test]
fn zipped_feed_loads_like_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("feed.zip");
    {
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in basic_feed() {
            writer
                .start_file(name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    let mut db = MemoryDb::new();
    let stats = run_pipeline(&FeedSource::Path(zip_path), &mut db).unwrap();
    assert_eq!(stats.table("stops").unwrap().loaded, 1);
    assert_eq!(stats.total_rejected(), 1);
}
