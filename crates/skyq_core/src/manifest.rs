//! `<base>.info`: the text manifest of a persisted index.
//!
//! One `key = value` per line. Counts tie the three data files together;
//! the checksums are verified on attach when asked for. The manifest is
//! written last, so a readable manifest means a complete set.

use crate::consts::FORMAT_VERSION;
use crate::errors::{Result, SkyqError};
use crate::utils::fsync_dir;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexManifest {
    pub version: u32,
    pub created: String,
    /// Catalogs in `.set`.
    pub nset: u64,
    /// Entries in `.rec`.
    pub nrect: u64,
    /// Nodes in `.rti`.
    pub nindex: u64,
    pub rootid: u64,
    /// Level of the root node.
    pub maxlev: u32,
    pub set_crc: u32,
    pub rec_crc: u32,
    pub rti_crc: u32,
    /// Catalog-list header and type lines, cut at the file column.
    pub list_header: String,
    pub list_types: String,
}

fn field<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, path: &Path) -> Result<T> {
    let raw = map.get(key).ok_or_else(|| SkyqError::BadManifest {
        path: path.to_path_buf(),
        msg: format!("missing '{key}'"),
    })?;
    raw.parse().map_err(|_| SkyqError::BadManifest {
        path: path.to_path_buf(),
        msg: format!("bad value for '{key}': {raw}"),
    })
}

impl IndexManifest {
    pub fn to_text(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("version = {}\n", self.version));
        s.push_str(&format!("created = {}\n", self.created));
        s.push_str(&format!("nset = {}\n", self.nset));
        s.push_str(&format!("nrect = {}\n", self.nrect));
        s.push_str(&format!("nindex = {}\n", self.nindex));
        s.push_str(&format!("rootid = {}\n", self.rootid));
        s.push_str(&format!("maxlev = {}\n", self.maxlev));
        s.push_str(&format!("set_crc = {:08x}\n", self.set_crc));
        s.push_str(&format!("rec_crc = {:08x}\n", self.rec_crc));
        s.push_str(&format!("rti_crc = {:08x}\n", self.rti_crc));
        s.push_str(&format!("listhdr = {}\n", self.list_header));
        s.push_str(&format!("listtyp = {}\n", self.list_types));
        s
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let map: HashMap<String, String> = text
            .lines()
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let crc = |key: &str| -> Result<u32> {
            let raw: String = field(&map, key, path)?;
            u32::from_str_radix(&raw, 16).map_err(|_| SkyqError::BadManifest {
                path: path.to_path_buf(),
                msg: format!("bad checksum '{key}': {raw}"),
            })
        };

        let m = IndexManifest {
            version: field(&map, "version", path)?,
            created: map.get("created").cloned().unwrap_or_default(),
            nset: field(&map, "nset", path)?,
            nrect: field(&map, "nrect", path)?,
            nindex: field(&map, "nindex", path)?,
            rootid: field(&map, "rootid", path)?,
            maxlev: field(&map, "maxlev", path)?,
            set_crc: crc("set_crc")?,
            rec_crc: crc("rec_crc")?,
            rti_crc: crc("rti_crc")?,
            list_header: map.get("listhdr").cloned().unwrap_or_default(),
            list_types: map.get("listtyp").cloned().unwrap_or_default(),
        };
        if m.version != FORMAT_VERSION {
            return Err(SkyqError::BadManifest {
                path: path.to_path_buf(),
                msg: format!("unsupported version {}", m.version),
            });
        }
        if m.nindex == 0 || m.rootid >= m.nindex {
            return Err(SkyqError::BadManifest {
                path: path.to_path_buf(),
                msg: format!("root {} outside {} nodes", m.rootid, m.nindex),
            });
        }
        Ok(m)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Writes through a temp file in the same directory and renames it into place.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new().prefix(".skyq_info_").tempfile_in(dir)?;
        tmp.as_file_mut().write_all(self.to_text().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        let _ = fsync_dir(path);
        Ok(())
    }
}
