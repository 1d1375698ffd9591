//! Persisted index set and attach.
//!
//! `<base>.set`  catalog descriptors, `SET_REC_SIZE` bytes each
//! `<base>.rec`  entries, `ENTRY_REC_SIZE` bytes each (entry id n at slot n-1)
//! `<base>.rti`  tree nodes, `NODE_REC_SIZE` bytes each, offset-addressed
//! `<base>.info` manifest, written last
//!
//! Data files are sized up front, filled through a writable map in a temp
//! file next to the target, synced and renamed into place. Attaching maps
//! them read-only and decodes entries and nodes on demand.

use crate::catalog::{Catalog, ListLayout};
use crate::consts::{
    ENTRY_REC_SIZE, EXT_INFO, EXT_REC, EXT_REF, EXT_RTI, EXT_SET, FORMAT_VERSION, NODE_REC_SIZE, SET_REC_SIZE,
    SHAPE_POINT, SHAPE_POLYGON,
};
use crate::errors::{Result, SkyqError};
use crate::footprint::{Entry, Shape};
use crate::manifest::IndexManifest;
use crate::rtree::{encode_nodes, EncodedNodes, Node, NodeId, RTree};
use crate::sphere::Vec3;
use crate::utils::{crc32, fsync_dir, get_f64, get_u32, get_u64, put_f64, put_u32, put_u64};
use memmap2::{Mmap, MmapMut};
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

/// File names of one persisted set.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    base: PathBuf,
}

impl IndexPaths {
    pub fn new(base: impl AsRef<Path>) -> Self { Self { base: base.as_ref().to_path_buf() } }

    fn with(&self, ext: &str) -> PathBuf {
        let mut s = self.base.as_os_str().to_owned();
        s.push(".");
        s.push(ext);
        PathBuf::from(s)
    }

    pub fn base(&self) -> &Path { &self.base }
    pub fn info(&self) -> PathBuf { self.with(EXT_INFO) }
    pub fn set(&self) -> PathBuf { self.with(EXT_SET) }
    pub fn rec(&self) -> PathBuf { self.with(EXT_REC) }
    pub fn rti(&self) -> PathBuf { self.with(EXT_RTI) }
    pub fn reformatted(&self) -> PathBuf { self.with(EXT_REF) }
}

/// Read-only bytes of a data file. Empty files are not mapped.
pub enum MappedFile {
    Empty,
    Map(Mmap),
}

impl Deref for MappedFile {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            MappedFile::Empty => &[],
            MappedFile::Map(m) => m,
        }
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] { self }
}

pub fn map_file(path: &Path) -> Result<MappedFile> {
    let f = File::open(path)?;
    if f.metadata()?.len() == 0 {
        return Ok(MappedFile::Empty);
    }
    // SAFETY: the set is never rewritten in place; a rebuild publishes new files by rename.
    let map = unsafe { Mmap::map(&f) }.map_err(|source| SkyqError::Map { path: path.to_path_buf(), source })?;
    Ok(MappedFile::Map(map))
}

/// Publishes a `len`-byte file filled by `fill`; returns its checksum.
pub fn write_mapped_file<F>(path: &Path, len: usize, fill: F) -> Result<u32>
where
    F: FnOnce(&mut [u8]),
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new().prefix(".skyq_").tempfile_in(dir)?;
    tmp.as_file().set_len(len as u64)?;
    let crc = if len == 0 {
        crc32(&[])
    } else {
        // SAFETY: the temp file is private to this call until persisted.
        let mut map = unsafe { MmapMut::map_mut(tmp.as_file()) }
            .map_err(|source| SkyqError::Map { path: path.to_path_buf(), source })?;
        fill(&mut map);
        map.flush()?;
        crc32(&map)
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    let _ = fsync_dir(path);
    Ok(crc)
}

pub fn encode_entry(e: &Entry, buf: &mut [u8]) {
    put_u32(buf, 0, e.catalog_id);
    put_u32(buf, 4, if e.shape == Shape::Point { SHAPE_POINT } else { SHAPE_POLYGON });
    put_u64(buf, 8, e.record_offset);
    let vecs = std::iter::once(e.center).chain(e.corners);
    for (i, v) in vecs.enumerate() {
        let at = 16 + 24 * i;
        put_f64(buf, at, v.x);
        put_f64(buf, at + 8, v.y);
        put_f64(buf, at + 16, v.z);
    }
}

pub fn decode_entry(buf: &[u8]) -> Entry {
    let v = |i: usize| {
        let at = 16 + 24 * i;
        Vec3::new(get_f64(buf, at), get_f64(buf, at + 8), get_f64(buf, at + 16))
    };
    Entry {
        catalog_id: get_u32(buf, 0),
        shape: if get_u32(buf, 4) == SHAPE_POINT { Shape::Point } else { Shape::Polygon },
        record_offset: get_u64(buf, 8),
        center: v(0),
        corners: [v(1), v(2), v(3), v(4)],
    }
}

/// Entry storage, resident while building or mapped after attach.
pub enum EntryTable {
    Resident(Vec<Entry>),
    Mapped(MappedFile),
}

impl EntryTable {
    pub fn len(&self) -> usize {
        match self {
            EntryTable::Resident(v) => v.len(),
            EntryTable::Mapped(m) => m.len() / ENTRY_REC_SIZE,
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Entry with 1-based `id`.
    pub fn get(&self, id: u64) -> Option<Entry> {
        let slot = usize::try_from(id.checked_sub(1)?).ok()?;
        match self {
            EntryTable::Resident(v) => v.get(slot).copied(),
            EntryTable::Mapped(m) => {
                let at = slot.checked_mul(ENTRY_REC_SIZE)?;
                m.get(at..at + ENTRY_REC_SIZE).map(decode_entry)
            }
        }
    }
}

/// Writes the whole set for an offset-addressed tree (see `RTree::relayout`).
pub fn persist(
    paths: &IndexPaths,
    catalogs: &[Catalog],
    entries: &[Entry],
    tree: &RTree<Vec<Node>>,
    layout: &ListLayout,
) -> Result<IndexManifest> {
    let set_crc = write_mapped_file(&paths.set(), catalogs.len() * SET_REC_SIZE, |buf| {
        for (i, c) in catalogs.iter().enumerate() {
            c.encode(&mut buf[i * SET_REC_SIZE..(i + 1) * SET_REC_SIZE]);
        }
    })?;
    let rec_crc = write_mapped_file(&paths.rec(), entries.len() * ENTRY_REC_SIZE, |buf| {
        for (i, e) in entries.iter().enumerate() {
            encode_entry(e, &mut buf[i * ENTRY_REC_SIZE..(i + 1) * ENTRY_REC_SIZE]);
        }
    })?;
    let nodes = tree.nodes();
    let rti_crc = write_mapped_file(&paths.rti(), nodes.len() * NODE_REC_SIZE, |buf| encode_nodes(nodes, buf))?;

    let created = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let manifest = IndexManifest {
        version: FORMAT_VERSION,
        created,
        nset: catalogs.len() as u64,
        nrect: entries.len() as u64,
        nindex: nodes.len() as u64,
        rootid: u64::from(tree.root().0),
        maxlev: tree.root_level(),
        set_crc,
        rec_crc,
        rti_crc,
        list_header: layout.header.clone(),
        list_types: layout.types.clone(),
    };
    manifest.save_atomic(&paths.info())?;
    info!(base = %paths.base().display(), nset = manifest.nset, nrect = manifest.nrect, nindex = manifest.nindex, "index persisted");
    Ok(manifest)
}

/// Writes a node arena on its own (the `organize` output).
pub fn write_nodes(path: &Path, nodes: &[Node]) -> Result<u32> {
    write_mapped_file(path, nodes.len() * NODE_REC_SIZE, |buf| encode_nodes(nodes, buf))
}

pub struct AttachedIndex {
    pub manifest: IndexManifest,
    pub catalogs: Vec<Catalog>,
    pub entries: EntryTable,
    pub tree: RTree<EncodedNodes<MappedFile>>,
}

fn check_size(path: &Path, data: &[u8], count: u64, rec: usize) -> Result<()> {
    let expected = count * rec as u64;
    let found = data.len() as u64;
    if expected != found {
        return Err(SkyqError::SizeMismatch { path: path.to_path_buf(), expected, found });
    }
    Ok(())
}

fn check_crc(path: &Path, data: &[u8], want: u32) -> Result<()> {
    if crc32(data) != want {
        return Err(SkyqError::ChecksumMismatch { path: path.to_path_buf() });
    }
    Ok(())
}

/// Maps a persisted set. Any disagreement between the manifest and the
/// files is an error.
pub fn attach(paths: &IndexPaths, verify_checksums: bool) -> Result<AttachedIndex> {
    let manifest = IndexManifest::load(&paths.info())?;

    let set = map_file(&paths.set())?;
    let rec = map_file(&paths.rec())?;
    let rti = map_file(&paths.rti())?;
    check_size(&paths.set(), &set, manifest.nset, SET_REC_SIZE)?;
    check_size(&paths.rec(), &rec, manifest.nrect, ENTRY_REC_SIZE)?;
    check_size(&paths.rti(), &rti, manifest.nindex, NODE_REC_SIZE)?;
    if verify_checksums {
        check_crc(&paths.set(), &set, manifest.set_crc)?;
        check_crc(&paths.rec(), &rec, manifest.rec_crc)?;
        check_crc(&paths.rti(), &rti, manifest.rti_crc)?;
        debug!("checksums verified");
    }

    let catalogs = set.chunks_exact(SET_REC_SIZE).map(Catalog::decode).collect();
    let root = NodeId(u32::try_from(manifest.rootid).map_err(|_| SkyqError::BadManifest {
        path: paths.info(),
        msg: format!("root {} out of range", manifest.rootid),
    })?);
    let tree = RTree::from_parts(EncodedNodes::new(rti), root);
    info!(base = %paths.base().display(), nset = manifest.nset, nrect = manifest.nrect, "index attached");
    Ok(AttachedIndex { manifest, catalogs, entries: EntryTable::Mapped(rec), tree })
}
