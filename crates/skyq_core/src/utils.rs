use byteorder::{ByteOrder, LittleEndian as LE};
use std::path::Path;

pub fn crc32(data: &[u8]) -> u32 { crc32fast::hash(data) }

pub fn put_u32(buf: &mut [u8], at: usize, v: u32) { LE::write_u32(&mut buf[at..at + 4], v) }
pub fn put_u64(buf: &mut [u8], at: usize, v: u64) { LE::write_u64(&mut buf[at..at + 8], v) }
pub fn put_f64(buf: &mut [u8], at: usize, v: f64) { LE::write_f64(&mut buf[at..at + 8], v) }
pub fn get_u32(buf: &[u8], at: usize) -> u32 { LE::read_u32(&buf[at..at + 4]) }
pub fn get_u64(buf: &[u8], at: usize) -> u64 { LE::read_u64(&buf[at..at + 8]) }
pub fn get_f64(buf: &[u8], at: usize) -> f64 { LE::read_f64(&buf[at..at + 8]) }

/// Writes `s` NUL-padded into a fixed field; overlong text is cut at a char
/// boundary so the field always ends with at least one NUL.
pub fn put_str(buf: &mut [u8], at: usize, width: usize, s: &str) {
    let field = &mut buf[at..at + width];
    field.fill(0);
    let mut n = s.len().min(width - 1);
    while !s.is_char_boundary(n) { n -= 1; }
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
}

pub fn get_str(buf: &[u8], at: usize, width: usize) -> String {
    let field = &buf[at..at + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(unix)]
pub fn fsync_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let f = std::fs::OpenOptions::new().read(true).custom_flags(libc::O_DIRECTORY).open(dir)?;
    f.sync_all()
}
#[cfg(not(unix))]
pub fn fsync_dir(_path: &Path) -> std::io::Result<()> { Ok(()) }
