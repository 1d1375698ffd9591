//! Index lifecycle (build, persist, attach) and the query operations the
//! command loop runs against it.

use crate::catalog::{load_entries, open_for_build, Catalog, CatalogList, ListLayout};
use crate::config::SearchConfig;
use crate::consts::{ENTRY_REC_SIZE, NODE_REC_SIZE, SET_REC_SIZE};
use crate::errors::{Result, SkyqError};
use crate::footprint::{polygon_pad, BoundingBox, Entry, Shape};
use crate::index::SpatialIndex;
use crate::manifest::IndexManifest;
use crate::predicate::{overlaps, SearchRegion};
use crate::query::Aggregator;
use crate::rtree::{NodeId, RTree};
use crate::sphere::Vec3;
use crate::store::{self, EntryTable, IndexPaths};
use crate::table::{field, Column, TableReader};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Point-vs-point tolerance: cosine of the match radius, and the matching
/// widening of point query boxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchTolerance {
    pub cos: f64,
    pub delta: f64,
}

impl MatchTolerance {
    pub fn new(cfg: &SearchConfig, radius_deg: f64) -> Self {
        let (cos, delta) = cfg.match_tolerance(radius_deg);
        Self { cos, delta }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogLoad {
    pub catalog_id: usize,
    pub name: String,
    pub loaded: u64,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// A polygon whose corners spread less than its own padding along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinBox {
    pub catalog_id: u32,
    pub record_offset: u64,
    pub axis: char,
    pub extent: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub catalogs: Vec<CatalogLoad>,
    pub thin_boxes: Vec<ThinBox>,
    /// One message per skipped record.
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOutcome {
    /// Catalogs with at least one match.
    pub catalogs: usize,
    /// Entries matched.
    pub matches: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub nsrc: u64,
    pub nmatch: u64,
    pub nomatch: u64,
    /// Per catalog, in catalog order.
    pub sources_matched: Vec<u64>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchesOutcome {
    pub nsrc: u64,
    /// (source row, reference record) pairs written.
    pub pairs: u64,
    pub elapsed: Duration,
}

pub struct Engine {
    catalogs: Vec<Catalog>,
    entries: EntryTable,
    index: SpatialIndex,
    layout: ListLayout,
    config: SearchConfig,
    paths: Option<IndexPaths>,
}

fn thin_axes(entry: &Entry, bbox: &BoundingBox, floor: f64, out: &mut Vec<ThinBox>) {
    let pad = polygon_pad(&entry.corners, entry.center, floor);
    for (k, axis) in ['x', 'y', 'z'].into_iter().enumerate() {
        let extent = bbox.max[k] - bbox.min[k];
        if extent - 2.0 * pad < pad {
            out.push(ThinBox { catalog_id: entry.catalog_id, record_offset: entry.record_offset, axis, extent });
        }
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| SkyqError::Usage(format!("Cannot open output file ({}): {e}", path.display())))
}

/// A source table streamed by `table` and `matches`.
struct SourceTable {
    reader: TableReader,
    ra: Column,
    dec: Column,
}

impl SourceTable {
    fn open(path: &Path) -> Result<Self> {
        let reader = TableReader::open(path)
            .map_err(|e| SkyqError::Usage(format!("Error opening table {}: {e}", path.display())))?;
        let cols = reader
            .require(&["ra", "dec"])
            .map_err(|_| SkyqError::Usage("Table must have columns 'ra' and 'dec'".into()))?;
        let [ra, dec]: [Column; 2] = cols.try_into().map_err(|_| SkyqError::Usage("bad ra/dec columns".into()))?;
        Ok(Self { reader, ra, dec })
    }

    fn point(&self, line: &str) -> Option<Vec3> {
        let ra: f64 = field(line, &self.ra).parse().ok()?;
        let dec: f64 = field(line, &self.dec).parse().ok()?;
        Some(Vec3::from_radec(ra, dec))
    }

    /// Next row and its position. Rows without a usable position (bad
    /// ra/dec, undecodable bytes) come back with `None` and are not searched.
    fn next_row(&mut self) -> Result<Option<(String, Option<Vec3>)>> {
        let row = self.reader.rows_read();
        match self.reader.next_line() {
            Ok(Some(line)) => {
                let p = self.point(&line);
                if p.is_none() {
                    warn!(table = %self.reader.path().display(), row, "bad ra/dec, row not searched");
                }
                Ok(Some((line, p)))
            }
            Ok(None) => Ok(None),
            Err(e @ SkyqError::Record { .. }) => {
                warn!("{e}, row not searched");
                Ok(Some((String::new(), None)))
            }
            Err(e) => Err(e),
        }
    }
}

impl Engine {
    /// Reads the catalog list and every catalog in it and builds the index
    /// in memory.
    pub fn build(list: &Path, config: SearchConfig) -> Result<(Self, BuildReport)> {
        let start = Instant::now();
        let CatalogList { catalogs, layout, capacity_hint } = open_for_build(list)?;

        let mut entries: Vec<Entry> = Vec::with_capacity(usize::try_from(capacity_hint).unwrap_or(0));
        let mut tree = RTree::new();
        let mut report = BuildReport::default();
        let floor = config.polygon_pad_floor();

        for (i, cat) in catalogs.iter().enumerate() {
            let catalog_id = u32::try_from(i).map_err(|_| SkyqError::Usage("too many catalogs".into()))?;
            let thin = &mut report.thin_boxes;
            let rep = load_entries(cat, catalog_id, &config, |entry, bbox| {
                if entry.shape == Shape::Polygon {
                    thin_axes(&entry, &bbox, floor, thin);
                }
                entries.push(entry);
                tree.insert(bbox, entries.len() as u64);
            })?;
            debug!(catalog = %cat.name, loaded = rep.loaded, skipped = rep.skipped.len(), "catalog loaded");
            report.catalogs.push(CatalogLoad {
                catalog_id: i,
                name: cat.name.clone(),
                loaded: rep.loaded,
                skipped: rep.skipped.len(),
                elapsed: rep.elapsed,
            });
            report.warnings.extend(rep.skipped);
        }

        report.elapsed = start.elapsed();
        info!(catalogs = catalogs.len(), entries = entries.len(), nodes = tree.node_count(), "index built");
        let engine = Self {
            catalogs,
            entries: EntryTable::Resident(entries),
            index: SpatialIndex::Building(tree),
            layout,
            config,
            paths: None,
        };
        Ok((engine, report))
    }

    /// Converts the tree to offset addressing and writes the file set at `base`.
    pub fn persist(&mut self, base: &Path) -> Result<IndexManifest> {
        let paths = IndexPaths::new(base);
        self.index.convert_to_offsets();
        let (Some(tree), EntryTable::Resident(entries)) = (self.index.building_tree(), &self.entries) else {
            return Err(SkyqError::ReadOnlyIndex);
        };
        let manifest = store::persist(&paths, &self.catalogs, entries, tree, &self.layout)?;
        self.paths = Some(paths);
        Ok(manifest)
    }

    /// Maps a persisted file set read-only.
    pub fn attach(base: &Path, config: SearchConfig) -> Result<Self> {
        let paths = IndexPaths::new(base);
        let a = store::attach(&paths, config.verify_checksums)?;
        Ok(Self {
            catalogs: a.catalogs,
            entries: a.entries,
            index: SpatialIndex::Attached(a.tree),
            layout: ListLayout { header: a.manifest.list_header, types: a.manifest.list_types },
            config,
            paths: Some(paths),
        })
    }

    pub fn catalogs(&self) -> &[Catalog] { &self.catalogs }
    pub fn entry_count(&self) -> usize { self.entries.len() }
    pub fn entry(&self, id: u64) -> Option<Entry> { self.entries.get(id) }
    pub fn config(&self) -> &SearchConfig { &self.config }
    pub fn index(&self) -> &SpatialIndex { &self.index }
    pub fn is_attached(&self) -> bool { self.index.is_attached() }

    /// Bytes the index occupies in its persisted form.
    pub fn size_bytes(&self) -> u64 {
        (self.catalogs.len() * SET_REC_SIZE + self.entries.len() * ENTRY_REC_SIZE + self.index.node_count() * NODE_REC_SIZE)
            as u64
    }

    /// Catalog position by display name, case-insensitively.
    pub fn find_catalog(&self, name: &str) -> Result<usize> {
        self.catalogs
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SkyqError::UnknownCatalog(name.to_string()))
    }

    /// Runs `region` through the index and the exact predicates; `sink`
    /// sees every confirmed entry. Returns the number confirmed.
    pub fn for_each_match<F>(&self, region: &SearchRegion, tol: MatchTolerance, mut sink: F) -> u64
    where
        F: FnMut(u64, &Entry),
    {
        let query = region.query_box(&self.config, tol.delta);
        let mut matched = 0;
        self.index.search(&query, |id| {
            match self.entries.get(id) {
                Some(e) if overlaps(region, &e, tol.cos) => {
                    trace!(id, catalog = e.catalog_id, offset = e.record_offset, "match");
                    matched += 1;
                    sink(id, &e);
                }
                Some(_) => trace!(id, "candidate rejected"),
                None => warn!(id, "index refers to a missing entry"),
            }
            ControlFlow::Continue(())
        });
        matched
    }

    fn write_summary<W: Write>(&self, out: &mut W, counts: &[u64]) -> io::Result<()> {
        writeln!(out, "\\fixlen = T")?;
        writeln!(out, "{}{:>10}|", self.layout.header, "count")?;
        if !self.layout.types.is_empty() {
            writeln!(out, "{}{:>10}|", self.layout.types, "int")?;
        }
        let width = self.layout.header.len();
        for (cat, &n) in self.catalogs.iter().zip(counts) {
            if n > 0 {
                writeln!(out, "{:<width$}{n:>10} ", cat.row)?;
            }
        }
        Ok(())
    }

    /// One summary row per catalog with matches to `region`.
    pub fn region(&self, region: &SearchRegion, tol: MatchTolerance, out_path: &Path) -> Result<RegionOutcome> {
        let mut out = create_output(out_path)?;
        let mut agg = Aggregator::new(self.catalogs.len());
        agg.observe(0);
        let matches = self.for_each_match(region, tol, |_, e| agg.record(e.catalog_id as usize));
        let counts: Vec<u64> = agg.states().iter().map(|s| s.match_count).collect();
        agg.finish();

        self.write_summary(&mut out, &counts)?;
        out.flush()?;
        let catalogs = counts.iter().filter(|&&n| n > 0).count();
        debug!(catalogs, matches, "region");
        Ok(RegionOutcome { catalogs, matches })
    }

    /// Original records of `catalog` that match `region`, under the
    /// catalog's own header.
    pub fn subset(&self, region: &SearchRegion, tol: MatchTolerance, catalog: &str, out_path: &Path) -> Result<u64> {
        let cid = self.find_catalog(catalog)?;
        let cat = &self.catalogs[cid];
        let header = TableReader::open(&cat.source_path)?.header().text();
        let mut records = cat.open_records()?;

        let mut offsets = Vec::new();
        self.for_each_match(region, tol, |_, e| {
            if e.catalog_id as usize == cid {
                offsets.push(e.record_offset);
            }
        });

        let mut out = create_output(out_path)?;
        out.write_all(header.as_bytes())?;
        for &off in &offsets {
            writeln!(out, "{}", records.fetch(off)?)?;
        }
        out.flush()?;
        Ok(offsets.len() as u64)
    }

    /// Streams every row of `source` as a point and writes, per catalog,
    /// how many rows it matched.
    pub fn table(&self, source: &Path, out_path: &Path, tol: MatchTolerance) -> Result<TableOutcome> {
        let start = Instant::now();
        let mut src = SourceTable::open(source)?;
        let mut out = create_output(out_path)?;

        let mut agg = Aggregator::new(self.catalogs.len());
        let mut srcid = 0u64;
        while let Some((_, p)) = src.next_row()? {
            agg.observe(srcid);
            if let Some(p) = p {
                self.for_each_match(&SearchRegion::TableRow(p), tol, |_, e| agg.record(e.catalog_id as usize));
            }
            srcid += 1;
        }
        agg.finish();

        let sources_matched: Vec<u64> = agg.states().iter().map(|s| s.sources_matched).collect();
        self.write_summary(&mut out, &sources_matched)?;
        out.flush()?;
        Ok(TableOutcome {
            nsrc: srcid,
            nmatch: agg.nmatch(),
            nomatch: agg.nomatch(),
            sources_matched,
            elapsed: start.elapsed(),
        })
    }

    /// Like [`Engine::table`], but writes each source row next to every
    /// original record of `catalog` it matches.
    pub fn matches(&self, source: &Path, catalog: &str, out_path: &Path, tol: MatchTolerance) -> Result<MatchesOutcome> {
        let start = Instant::now();
        let cid = self.find_catalog(catalog)?;
        let cat = &self.catalogs[cid];
        let ref_header = TableReader::open(&cat.source_path)?.header().names_line().to_string();
        let mut refs = cat.open_records()?;
        let mut src = SourceTable::open(source)?;
        let src_header = src.reader.header().names_line().to_string();
        let mut out = create_output(out_path)?;

        writeln!(out, "|{:>12}{} |{}", "matchid", src_header, ref_header.get(1..).unwrap_or(""))?;
        let width = src_header.len();

        let mut srcid = 0u64;
        let mut pairs = 0u64;
        let mut hits = Vec::new();
        while let Some((line, p)) = src.next_row()? {
            hits.clear();
            if let Some(p) = p {
                self.for_each_match(&SearchRegion::TableRow(p), tol, |_, e| {
                    if e.catalog_id as usize == cid {
                        hits.push(e.record_offset);
                    }
                });
            }
            for &off in &hits {
                let rec = refs.fetch(off)?;
                writeln!(out, " {srcid:>12}{line:<width$}  {}", rec.get(1..).unwrap_or(""))?;
                pairs += 1;
            }
            srcid += 1;
        }
        out.flush()?;
        Ok(MatchesOutcome { nsrc: srcid, pairs, elapsed: start.elapsed() })
    }

    /// Writes a depth-first copy of the node arena to `<base>.ref`.
    pub fn organize(&self) -> Result<PathBuf> {
        let paths = self.paths.as_ref().ok_or_else(|| SkyqError::Usage("Not using memory mapped files".into()))?;
        let tree = self.index.relayout();
        let out = paths.reformatted();
        store::write_nodes(&out, tree.nodes())?;
        info!(path = %out.display(), nodes = tree.node_count(), "node arena reorganized");
        Ok(out)
    }

    pub fn dump<W: Write>(&self, out: &mut W, limit: Option<usize>) -> io::Result<usize> { self.index.dump(out, limit) }

    pub fn trace(&self, entry_id: u64) -> Option<Vec<(NodeId, usize)>> { self.index.trace(entry_id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixed_table, write};

    fn setup(dir: &Path) -> PathBuf {
        write(
            dir,
            "imgs.tbl",
            &fixed_table(
                &["ra1", "dec1", "ra2", "dec2", "ra3", "dec3", "ra4", "dec4"],
                &[&["9", "-1", "11", "-1", "11", "1", "9", "1"], &["200", "10", "201", "10", "201", "11", "200", "11"]],
            ),
        );
        write(dir, "list.tbl", "| identifier | file     |\n  A            imgs.tbl  \n")
    }

    #[test]
    fn build_counts_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, report) = Engine::build(&setup(dir.path()), SearchConfig::default()).unwrap();
        assert_eq!(engine.entry_count(), 2);
        assert_eq!(report.catalogs[0].loaded, 2);
        assert!(report.warnings.is_empty());
        assert_eq!(engine.find_catalog("a").unwrap(), 0);
        assert!(matches!(engine.find_catalog("B"), Err(SkyqError::UnknownCatalog(_))));
        assert!(!engine.is_attached());
        assert_eq!(engine.entry(1).unwrap().record_offset, 0);
    }

    #[test]
    fn organize_needs_a_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = Engine::build(&setup(dir.path()), SearchConfig::default()).unwrap();
        assert!(matches!(engine.organize(), Err(SkyqError::Usage(_))));
        engine.persist(&dir.path().join("idx")).unwrap();
        let out = engine.organize().unwrap();
        assert_eq!(std::fs::metadata(out).unwrap().len(), (engine.index().node_count() * NODE_REC_SIZE) as u64);
    }

    #[test]
    fn unwritable_output_is_a_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Engine::build(&setup(dir.path()), SearchConfig::default()).unwrap();
        let tol = MatchTolerance::new(engine.config(), 0.0);
        let err = engine.region(&SearchRegion::point(10.0, 0.0), tol, &dir.path().join("no/such/dir/out.tbl")).unwrap_err();
        assert!(matches!(err, SkyqError::Usage(_)));
    }

    #[test]
    fn thin_polygons_are_reported() {
        let c = [(0.0, -1e-9), (1e-9, -1e-9), (1e-9, 1e-9), (0.0, 1e-9)].map(|(r, d)| Vec3::from_radec(r, d));
        let floor = SearchConfig::default().polygon_pad_floor();
        let (e, b) = crate::footprint::polygon_entry(3, 7, c, floor);
        let mut out = Vec::new();
        thin_axes(&e, &b, floor, &mut out);
        assert!(out.iter().any(|t| t.axis == 'x' && t.catalog_id == 3 && t.record_offset == 7));
    }
}
