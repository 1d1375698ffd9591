//! Catalogs ("sets") and the records they contribute to the index.
//!
//! A catalog list names the catalogs to index (`identifier` and `file`
//! columns). Each catalog is a fixed-width table whose rows carry either
//! four explicit corners, a WCS description of an image, or a bare
//! position; the first layout found in the header wins, in that order.
//!
//! Every record keeps its 0-based position in its catalog, so the original
//! line can be re-read with a single seek:
//! `header_bytes + record_len * record_offset`.

use crate::config::SearchConfig;
use crate::consts::{SET_NAME_BYTES, SET_PATH_BYTES, SET_REC_SIZE, SET_ROW_BYTES};
use crate::errors::{Result, SkyqError};
use crate::footprint::{point_entry, polygon_entry, BoundingBox, Entry};
use crate::sphere::Vec3;
use crate::table::{field, prefix_before, Column, TableReader};
use crate::utils::{get_str, get_u64, put_str, put_u64};
use crate::wcs::{resolve_equinox, Wcs};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub source_path: PathBuf,
    pub name: String,
    /// The catalog's row in the catalog list, cut before the file column.
    pub row: String,
    pub header_bytes: u64,
    pub record_len: u64,
    pub record_count: u64,
}

impl Catalog {
    /// Reads the header of `path` to learn its record geometry.
    pub fn describe(name: &str, path: &Path, row: &str) -> Result<Self> {
        let t = TableReader::open(path)?;
        Ok(Self {
            source_path: path.to_path_buf(),
            name: name.to_string(),
            row: row.to_string(),
            header_bytes: t.header().header_bytes,
            record_len: t.record_len(),
            record_count: t.record_count(),
        })
    }

    /// Byte position of record `offset` in the source file.
    pub fn record_position(&self, offset: u64) -> u64 { self.header_bytes + self.record_len * offset }

    pub fn open_records(&self) -> Result<RecordReader> {
        let f = File::open(&self.source_path)?;
        Ok(RecordReader { reader: BufReader::new(f), header_bytes: self.header_bytes, record_len: self.record_len })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_str(buf, 0, SET_PATH_BYTES, &self.source_path.to_string_lossy());
        put_str(buf, SET_PATH_BYTES, SET_NAME_BYTES, &self.name);
        put_str(buf, SET_PATH_BYTES + SET_NAME_BYTES, SET_ROW_BYTES, &self.row);
        let at = SET_REC_SIZE - 24;
        put_u64(buf, at, self.header_bytes);
        put_u64(buf, at + 8, self.record_len);
        put_u64(buf, at + 16, self.record_count);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let at = SET_REC_SIZE - 24;
        Self {
            source_path: PathBuf::from(get_str(buf, 0, SET_PATH_BYTES)),
            name: get_str(buf, SET_PATH_BYTES, SET_NAME_BYTES),
            row: get_str(buf, SET_PATH_BYTES + SET_NAME_BYTES, SET_ROW_BYTES),
            header_bytes: get_u64(buf, at),
            record_len: get_u64(buf, at + 8),
            record_count: get_u64(buf, at + 16),
        }
    }
}

/// Direct-offset access to the original lines of one catalog.
pub struct RecordReader {
    reader: BufReader<File>,
    header_bytes: u64,
    record_len: u64,
}

impl RecordReader {
    /// Line `offset` of the catalog's data section, newline stripped.
    pub fn fetch(&mut self, offset: u64) -> Result<String> {
        self.reader.seek(SeekFrom::Start(self.header_bytes + self.record_len * offset))?;
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') { line.pop(); }
        Ok(line)
    }
}

pub fn fetch_original_record(catalog: &Catalog, offset: u64) -> Result<String> {
    catalog.open_records()?.fetch(offset)
}

/// Header and type lines of the catalog list, cut at the file column; the
/// layout for summary tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListLayout {
    pub header: String,
    pub types: String,
}

#[derive(Debug, Clone)]
pub struct CatalogList {
    pub catalogs: Vec<Catalog>,
    pub layout: ListLayout,
    /// Sum of the record counts, for sizing the entry array.
    pub capacity_hint: u64,
}

/// Reads a catalog list and describes every catalog in it. Relative file
/// names are taken relative to the list's directory.
pub fn open_for_build(list_path: &Path) -> Result<CatalogList> {
    let mut list = TableReader::open(list_path)?;
    let cols = list.require(&["identifier", "file"]).map_err(|missing| SkyqError::MissingColumns {
        path: list_path.to_path_buf(),
        need: missing.join(", "),
    })?;
    let (id_col, file_col) = (&cols[0], &cols[1]);

    let layout = ListLayout {
        header: prefix_before(list.header().names_line(), file_col).to_string(),
        types: list.header().types_line().map(|t| prefix_before(t, file_col).to_string()).unwrap_or_default(),
    };
    let base = list_path.parent().unwrap_or(Path::new("."));

    let mut catalogs = Vec::new();
    let mut capacity_hint = 0;
    loop {
        let line = match list.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e @ SkyqError::Record { .. }) => {
                warn!(list = %list_path.display(), "{e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        let name = field(&line, id_col);
        let file = field(&line, file_col);
        if file.is_empty() {
            warn!(list = %list_path.display(), "catalog row without a file");
            continue;
        }
        let path = if Path::new(file).is_absolute() { PathBuf::from(file) } else { base.join(file) };
        let cat = Catalog::describe(name, &path, prefix_before(&line, file_col))?;
        debug!(catalog = %cat.name, records = cat.record_count, reclen = cat.record_len, "described");
        capacity_hint += cat.record_count;
        catalogs.push(cat);
    }
    info!(catalogs = catalogs.len(), records = capacity_hint, "catalog list read");
    Ok(CatalogList { catalogs, layout, capacity_hint })
}

const CORNER_COLS: [&str; 8] = ["ra1", "dec1", "ra2", "dec2", "ra3", "dec3", "ra4", "dec4"];
const WCS_COLS: [&str; 9] = ["ctype1", "ctype2", "crval1", "crval2", "crpix1", "crpix2", "cdelt1", "cdelt2", "crota2"];

/// How a catalog's rows describe their footprint.
#[derive(Debug, Clone)]
pub enum ColumnMode {
    Corners(Vec<Column>),
    Wcs { cols: Vec<Column>, ns: Column, nl: Column, equinox: Option<Column>, epoch: Option<Column> },
    Point { ra: Column, dec: Column },
}

impl ColumnMode {
    pub fn detect(t: &TableReader) -> Result<Self> {
        if let Ok(cols) = t.require(&CORNER_COLS) {
            return Ok(ColumnMode::Corners(cols));
        }
        if let Ok(cols) = t.require(&WCS_COLS) {
            let ns = t.find("ns").or_else(|| t.find("naxis1"));
            let nl = t.find("nl").or_else(|| t.find("naxis2"));
            if let (Some(ns), Some(nl)) = (ns, nl) {
                return Ok(ColumnMode::Wcs { cols, ns, nl, equinox: t.find("equinox"), epoch: t.find("epoch") });
            }
        }
        if let Ok(cols) = t.require(&["ra", "dec"]) {
            return Ok(ColumnMode::Point { ra: cols[0].clone(), dec: cols[1].clone() });
        }
        Err(SkyqError::MissingColumns {
            path: t.path().to_path_buf(),
            need: "ra1..dec4, WCS keywords, or ra/dec".into(),
        })
    }
}

fn number(line: &str, col: &Column, path: &Path, offset: u64) -> Result<f64> {
    let raw = field(line, col);
    if raw.is_empty() {
        return Err(SkyqError::Record { path: path.to_path_buf(), offset, msg: format!("blank {}", col.name) });
    }
    raw.parse().map_err(|_| SkyqError::Record {
        path: path.to_path_buf(),
        offset,
        msg: format!("bad {} '{raw}'", col.name),
    })
}

fn optional_number(line: &str, col: Option<&Column>) -> f64 {
    col.and_then(|c| field(line, c).parse().ok()).unwrap_or(0.0)
}

/// Entry and box for one catalog row.
pub fn build_entry(
    mode: &ColumnMode,
    line: &str,
    catalog_id: u32,
    offset: u64,
    path: &Path,
    cfg: &SearchConfig,
) -> Result<(Entry, BoundingBox)> {
    let num = |c: &Column| number(line, c, path, offset);
    match mode {
        ColumnMode::Corners(cols) => {
            let mut corners = [Vec3::ZERO; 4];
            for (i, c) in corners.iter_mut().enumerate() {
                *c = Vec3::from_radec(num(&cols[2 * i])?, num(&cols[2 * i + 1])?);
            }
            Ok(polygon_entry(catalog_id, offset, corners, cfg.polygon_pad_floor()))
        }
        ColumnMode::Wcs { cols, ns, nl, equinox, epoch } => {
            let ctype1 = field(line, &cols[0]);
            let ctype2 = field(line, &cols[1]);
            if ctype1.is_empty() || ctype2.is_empty() {
                return Err(SkyqError::Record { path: path.to_path_buf(), offset, msg: "blank ctype".into() });
            }
            let equinox = resolve_equinox(optional_number(line, equinox.as_ref()), optional_number(line, epoch.as_ref()));
            let corners = Wcs::new(
                ctype1,
                ctype2,
                [num(ns)?, num(nl)?],
                [num(&cols[2])?, num(&cols[3])?],
                [num(&cols[4])?, num(&cols[5])?],
                [num(&cols[6])?, num(&cols[7])?],
                num(&cols[8])?,
                equinox,
            )
            .and_then(|w| w.corners())
            .map_err(|e| SkyqError::Record { path: path.to_path_buf(), offset, msg: e.to_string() })?;
            Ok(polygon_entry(catalog_id, offset, corners, cfg.polygon_pad_floor()))
        }
        ColumnMode::Point { ra, dec } => {
            let p = Vec3::from_radec(num(ra)?, num(dec)?);
            Ok(point_entry(catalog_id, offset, p, cfg.point_pad()))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: u64,
    /// One message per skipped record.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

/// Streams every row of `catalog` through `sink`. Bad rows are reported and
/// skipped; their offsets are still consumed.
pub fn load_entries<F>(catalog: &Catalog, catalog_id: u32, cfg: &SearchConfig, mut sink: F) -> Result<LoadReport>
where
    F: FnMut(Entry, BoundingBox),
{
    let start = Instant::now();
    let mut t = TableReader::open(&catalog.source_path)?;
    let mode = ColumnMode::detect(&t)?;
    debug!(catalog = %catalog.name, ?mode, "column mode");

    let mut report = LoadReport::default();
    let mut offset = 0u64;
    loop {
        let built = match t.next_line() {
            Ok(Some(line)) => build_entry(&mode, &line, catalog_id, offset, &catalog.source_path, cfg),
            Ok(None) => break,
            Err(e @ SkyqError::Record { .. }) => Err(e),
            Err(e) => return Err(e),
        };
        match built {
            Ok((entry, bbox)) => {
                sink(entry, bbox);
                report.loaded += 1;
            }
            Err(e) => {
                warn!(catalog = %catalog.name, offset, "{e}");
                report.skipped.push(e.to_string());
            }
        }
        offset += 1;
    }
    report.elapsed = start.elapsed();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixed_table, write};

    fn points() -> String {
        fixed_table(&["ra", "dec"], &[&["10.0", "0.0"], &["20.0", ""], &["30.0", "5.0"]])
    }

    #[test]
    fn point_catalog_skips_blank_rows_but_keeps_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let text = points();
        let p = write(dir.path(), "pts.tbl", &text);
        let cat = Catalog::describe("pts", &p, "").unwrap();
        assert_eq!(cat.record_count, 3);

        let mut got = Vec::new();
        let rep = load_entries(&cat, 4, &SearchConfig::default(), |e, _| got.push(e)).unwrap();
        assert_eq!(rep.loaded, 2);
        assert_eq!(rep.skipped.len(), 1);
        assert_eq!(got.iter().map(|e| e.record_offset).collect::<Vec<_>>(), vec![0, 2]);
        assert!(got.iter().all(|e| e.catalog_id == 4));

        let third = text.lines().nth(3).unwrap();
        assert_eq!(fetch_original_record(&cat, 2).unwrap(), third);
    }

    #[test]
    fn undecodable_row_is_skipped_and_keeps_its_offset() {
        let dir = tempfile::tempdir().unwrap();
        let text = fixed_table(&["ra", "dec"], &[&["10.0", "0.0"], &["20.0", "1.0"], &["30.0", "5.0"]]);
        let mut bytes = text.into_bytes();
        let at = bytes.windows(4).position(|w| w == b"20.0").unwrap();
        bytes[at + 1] = 0xff;
        let p = dir.path().join("pts.tbl");
        std::fs::write(&p, &bytes).unwrap();

        let cat = Catalog::describe("pts", &p, "").unwrap();
        let mut got = Vec::new();
        let rep = load_entries(&cat, 0, &SearchConfig::default(), |e, _| got.push(e)).unwrap();
        assert_eq!(rep.loaded, 2);
        assert_eq!(rep.skipped.len(), 1);
        assert_eq!(got.iter().map(|e| e.record_offset).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn corners_win_over_points() {
        let dir = tempfile::tempdir().unwrap();
        let text = fixed_table(
            &["ra", "dec", "ra1", "dec1", "ra2", "dec2", "ra3", "dec3", "ra4", "dec4"],
            &[&["10", "0", "9", "-1", "11", "-1", "11", "1", "9", "1"]],
        );
        let p = write(dir.path(), "img.tbl", &text);
        let t = TableReader::open(&p).unwrap();
        assert!(matches!(ColumnMode::detect(&t).unwrap(), ColumnMode::Corners(_)));
    }

    #[test]
    fn missing_columns_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "bad.tbl", &fixed_table(&["x", "y"], &[&["1", "2"]]));
        let t = TableReader::open(&p).unwrap();
        let err = ColumnMode::detect(&t).unwrap_err();
        assert!(matches!(err, SkyqError::MissingColumns { .. }));

        let list = write(dir.path(), "list.tbl", &fixed_table(&["name", "file"], &[&["a", "bad.tbl"]]));
        assert!(matches!(open_for_build(&list), Err(SkyqError::MissingColumns { .. })));
    }

    #[test]
    fn wcs_rows_become_polygons() {
        let dir = tempfile::tempdir().unwrap();
        let cols = ["ctype1", "ctype2", "ns", "nl", "crval1", "crval2", "crpix1", "crpix2", "cdelt1", "cdelt2", "crota2"];
        let good = ["RA---TAN", "DEC--TAN", "100", "100", "10.0", "0.0", "50.5", "50.5", "-0.01", "0.01", "0.0"];
        let bad = ["RA---XXX", "DEC--XXX", "100", "100", "10.0", "0.0", "50.5", "50.5", "-0.01", "0.01", "0.0"];
        let p = write(dir.path(), "wcs.tbl", &fixed_table(&cols, &[&good, &bad]));
        let cat = Catalog::describe("wcs", &p, "").unwrap();
        let mut got = Vec::new();
        let rep = load_entries(&cat, 0, &SearchConfig::default(), |e, b| got.push((e, b))).unwrap();
        assert_eq!(rep.loaded, 1);
        assert_eq!(rep.skipped.len(), 1);
        let (e, b) = got[0];
        let (ra, dec) = e.center.to_radec();
        assert!((ra - 10.0).abs() < 1e-6 && dec.abs() < 1e-6);
        assert!(b.contains_point(Vec3::from_radec(10.4, 0.4)));
    }

    #[test]
    fn list_resolves_relative_files_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pts.tbl", &points());
        let list = write(
            dir.path(),
            "list.tbl",
            "| identifier | file    |\n| char       | char    |\n  stars        pts.tbl  \n",
        );
        let cl = open_for_build(&list).unwrap();
        assert_eq!(cl.catalogs.len(), 1);
        assert_eq!(cl.catalogs[0].name, "stars");
        assert_eq!(cl.catalogs[0].source_path, dir.path().join("pts.tbl"));
        assert_eq!(cl.catalogs[0].row, "  stars       ");
        assert_eq!(cl.layout.header, "| identifier |");
        assert_eq!(cl.layout.types, "| char       |");
        assert_eq!(cl.capacity_hint, 3);
    }

    #[test]
    fn descriptor_encoding() {
        let cat = Catalog {
            source_path: PathBuf::from("/data/a.tbl"),
            name: "a".into(),
            row: "  a   ".into(),
            header_bytes: 120,
            record_len: 44,
            record_count: 9,
        };
        let mut buf = vec![0u8; SET_REC_SIZE];
        cat.encode(&mut buf);
        assert_eq!(Catalog::decode(&buf), cat);
    }
}
