// crates/skyq_core/src/consts.rs

/// Format version written to `<base>.info`.
pub const FORMAT_VERSION: u32 = 1;

pub const EXT_INFO: &str = "info";
pub const EXT_SET: &str = "set";
pub const EXT_REC: &str = "rec";
pub const EXT_RTI: &str = "rti";
pub const EXT_REF: &str = "ref";

/// Catalog descriptor (`.set`): path, name, list row, header bytes, reclen, nrec.
pub const SET_PATH_BYTES: usize = 1024;
pub const SET_NAME_BYTES: usize = 256;
pub const SET_ROW_BYTES: usize = 256;
pub const SET_REC_SIZE: usize = SET_PATH_BYTES + SET_NAME_BYTES + SET_ROW_BYTES + 3 * 8;

/// Entry (`.rec`): catalog u32, shape u32, offset u64, center 3×f64, corners 12×f64.
pub const ENTRY_REC_SIZE: usize = 4 + 4 + 8 + 3 * 8 + 12 * 8;

/// Branches per tree node, leaf and internal alike.
pub const MAX_BRANCHES: usize = 16;
pub const MIN_FILL: usize = MAX_BRANCHES / 2;
/// Branch (`.rti`): box 6×f64 + child u64.
pub const BRANCH_SIZE: usize = 6 * 8 + 8;
/// Node (`.rti`): level u32, count u32, branches.
pub const NODE_REC_SIZE: usize = 4 + 4 + MAX_BRANCHES * BRANCH_SIZE;

pub const SHAPE_POINT: u32 = 0;
pub const SHAPE_POLYGON: u32 = 1;

pub const DTR: f64 = std::f64::consts::PI / 180.0;

const _: () = {
    assert!(SET_REC_SIZE == 1560);
    assert!(ENTRY_REC_SIZE == 136);
    assert!(NODE_REC_SIZE == 904);
};
