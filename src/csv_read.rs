//! Header-driven CSV reading into raw records.
//!
//! Column order is insignificant downstream, so rows are read as
//! header/value pairs rather than into fixed structs. A UTF-8 BOM at the
//! start of a file is probed and stripped before handing the stream to the
//! csv reader.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Error;
use crate::record::RawRecord;

/// Read every row of one feed file as a [RawRecord]
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>, Error> {
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("invalid_file_name")
        .to_string();
    let reader = File::open(path)?;
    read_records_from(reader, &file_name)
}

/// Read rows from any reader; `file_name` is only used in error context
pub fn read_records_from<T: Read>(mut reader: T, file_name: &str) -> Result<Vec<RawRecord>, Error> {
    let mut bom = [0; 3];
    let mut filled = 0;
    while filled < bom.len() {
        let n = reader.read(&mut bom[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    // Too short to hold even a header row: a present-but-empty file is a
    // degenerate feed, not a fatal one
    if filled < bom.len() {
        return Ok(Vec::new());
    }

    let chained = if bom != [0xefu8, 0xbbu8, 0xbfu8] {
        bom.chain(reader)
    } else {
        [].chain(reader)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(chained);

    let headers = csv_reader
        .headers()
        .map_err(|e| Error::CsvError {
            file_name: file_name.to_owned(),
            source: e,
        })?
        .clone();

    // Pre-allocate a StringRecord for performance reasons
    let mut rec = csv::StringRecord::new();
    let mut records = Vec::new();
    while csv_reader
        .read_record(&mut rec)
        .map_err(|e| Error::CsvError {
            file_name: file_name.to_owned(),
            source: e,
        })?
    {
        records.push(
            headers
                .iter()
                .zip(rec.iter())
                .map(|(h, v)| (h.to_owned(), v.to_owned()))
                .collect(),
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bom_is_stripped_from_first_header() {
        let data = b"\xef\xbb\xbfstop_id,stop_lat\ns1,40.0\n";
        let records = read_records_from(Cursor::new(&data[..]), "stops.txt").unwrap();
        assert_eq!(records[0].get("stop_id"), Some("s1"));
    }

    #[test]
    fn empty_or_tiny_files_read_as_no_records() {
        for data in [&b""[..], &b"\n"[..], &b"ab"[..]] {
            let records = read_records_from(Cursor::new(data), "calendar.txt").unwrap();
            assert!(records.is_empty(), "data: {data:?}");
        }
    }

    #[test]
    fn short_rows_are_tolerated() {
        let data = b"a,b,c\n1,2\n";
        let records = read_records_from(Cursor::new(&data[..]), "x.txt").unwrap();
        assert_eq!(records[0].get("b"), Some("2"));
        assert_eq!(records[0].get("c"), None);
    }
}
