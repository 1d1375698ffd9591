//! Fixed-width ASCII tables.
//!
//! Layout:
//!   `\key = value` keyword and `\ comment` lines
//!   `|name|name|` column header, optionally followed by type/unit/null lines
//!   data lines, one record per line
//!
//! Column extents come from the `|` positions of the name line and values
//! are sliced out of data lines by byte position. Every data line of a
//! catalog is expected to have the same length; `header_bytes` and
//! `record_len` turn a record number into a byte offset.

use crate::errors::{Result, SkyqError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Byte range `[start, end)` of the column in a data line.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TableHeader {
    /// `\` lines, newline stripped.
    pub keywords: Vec<String>,
    /// `|` lines (names, types, units, nulls), newline stripped.
    pub lines: Vec<String>,
    pub columns: Vec<Column>,
    /// Bytes before the first data line.
    pub header_bytes: u64,
}

impl TableHeader {
    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn names_line(&self) -> &str { self.lines.first().map(String::as_str).unwrap_or("") }

    pub fn types_line(&self) -> Option<&str> { self.lines.get(1).map(String::as_str) }

    /// Raw header text as it appears in the file.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for l in self.keywords.iter().chain(self.lines.iter()) {
            out.push_str(l);
            out.push('\n');
        }
        out
    }
}

/// Column extents from the `|` positions of a name line.
pub fn parse_columns(line: &str) -> Vec<Column> {
    let bars: Vec<usize> = line.bytes().enumerate().filter(|(_, b)| *b == b'|').map(|(i, _)| i).collect();
    bars.windows(2)
        .enumerate()
        .map(|(i, w)| Column {
            name: line[w[0] + 1..w[1]].trim().to_string(),
            start: if i == 0 { 0 } else { w[0] + 1 },
            end: w[1],
        })
        .collect()
}

/// Trimmed value of `col` in a data line; short lines yield "".
pub fn field<'a>(line: &'a str, col: &Column) -> &'a str {
    let bytes = line.as_bytes();
    let end = col.end.min(bytes.len());
    let start = col.start.min(end);
    std::str::from_utf8(&bytes[start..end]).map(str::trim).unwrap_or("")
}

/// Text of a line up to (not including) the start of `col`.
pub fn prefix_before<'a>(line: &'a str, col: &Column) -> &'a str {
    let n = col.start.min(line.len());
    line.get(..n).unwrap_or(line)
}

fn strip_newline(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) { line.pop(); }
}

pub struct TableReader {
    path: PathBuf,
    header: TableHeader,
    reader: BufReader<File>,
    record_len: u64,
    file_len: u64,
    pending: Option<Vec<u8>>,
    /// Data lines handed out so far.
    rows: u64,
}

impl TableReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let f = File::open(&path)?;
        let file_len = f.metadata()?.len();
        let mut reader = BufReader::new(f);

        let mut header = TableHeader::default();
        let mut pending = None;
        let mut record_len = 0u64;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 { break; }
            if buf.starts_with(b"\\") || buf.starts_with(b"|") || buf.trim_ascii().is_empty() {
                header.header_bytes += n as u64;
                let mut line = buf.clone();
                strip_newline(&mut line);
                let line = String::from_utf8_lossy(&line).into_owned();
                if line.starts_with('\\') {
                    header.keywords.push(line);
                } else if line.starts_with('|') {
                    header.lines.push(line);
                }
                continue;
            }
            record_len = n as u64;
            pending = Some(buf);
            break;
        }

        let names = header.lines.first().ok_or_else(|| SkyqError::NoTableHeader(path.clone()))?;
        header.columns = parse_columns(names);
        if header.columns.is_empty() {
            return Err(SkyqError::NoTableHeader(path));
        }
        Ok(Self { path, header, reader, record_len, file_len, pending, rows: 0 })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn header(&self) -> &TableHeader { &self.header }
    pub fn record_len(&self) -> u64 { self.record_len }
    /// Data lines handed out so far, undecodable ones included.
    pub fn rows_read(&self) -> u64 { self.rows }

    /// Number of records implied by the fixed record length.
    pub fn record_count(&self) -> u64 {
        if self.record_len == 0 { return 0; }
        self.file_len.saturating_sub(self.header.header_bytes) / self.record_len
    }

    /// Looks up every name, case-insensitively; the missing ones are returned as the error.
    pub fn require(&self, names: &[&str]) -> std::result::Result<Vec<Column>, Vec<String>> {
        let mut cols = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for n in names {
            match self.header.column(n) {
                Some(i) => cols.push(self.header.columns[i].clone()),
                None => missing.push((*n).to_string()),
            }
        }
        if missing.is_empty() { Ok(cols) } else { Err(missing) }
    }

    pub fn find(&self, name: &str) -> Option<Column> {
        self.header.column(name).map(|i| self.header.columns[i].clone())
    }

    /// Next data line (newline stripped), or `None` at end of file. A line
    /// that is not valid UTF-8 is consumed and reported as
    /// [`SkyqError::Record`]; reading can continue after it.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = match self.pending.take() {
            Some(line) => line,
            None => {
                let mut buf = Vec::new();
                if self.reader.read_until(b'\n', &mut buf)? == 0 {
                    return Ok(None);
                }
                buf
            }
        };
        strip_newline(&mut line);
        let offset = self.rows;
        self.rows += 1;
        String::from_utf8(line).map(Some).map_err(|e| SkyqError::Record {
            path: self.path.clone(),
            offset,
            msg: format!("not UTF-8 at byte {}", e.utf8_error().valid_up_to()),
        })
    }
}
