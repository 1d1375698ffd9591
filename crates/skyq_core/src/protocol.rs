//! Line protocol: one command per input line, one status line per command.
//!
//! Command words may be abbreviated down to a minimum length (one letter
//! for `quit`, two for the rest), case-insensitively. Responses look like
//! `[struct stat="OK", command="region", count="2"]`.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Point { ra: f64, dec: f64 },
    Cone { ra: f64, dec: f64, radius: f64 },
    Box([(f64, f64); 4]),
    Radius(f64),
    Region { outfile: PathBuf },
    Subset { catalog: String, outfile: PathBuf },
    Table { source: PathBuf, outfile: PathBuf },
    Matches { source: PathBuf, catalog: String, outfile: PathBuf },
    Dump(Option<usize>),
    Trace(u64),
    Organize,
    Debug(u8),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Null command.")]
    Empty,
    #[error("Invalid command.")]
    Unknown(String),
    #[error("Command usage: {0}")]
    Usage(&'static str),
}

const WORDS: [(&str, usize); 14] = [
    ("point", 2),
    ("cone", 2),
    ("box", 2),
    ("radius", 2),
    ("region", 2),
    ("subset", 2),
    ("table", 2),
    ("matches", 2),
    ("dump", 2),
    ("trace", 2),
    ("organize", 2),
    ("debug", 2),
    ("quit", 1),
    ("exit", 2),
];

/// Full command word for an abbreviation, if it is long enough and unambiguous.
pub fn resolve_word(token: &str) -> Option<&'static str> {
    let t = token.to_ascii_lowercase();
    WORDS
        .iter()
        .find(|(name, min)| t.len() >= *min && t.len() <= name.len() && name.starts_with(&t))
        .map(|(name, _)| *name)
}

fn num<T: std::str::FromStr>(s: &str, usage: &'static str) -> Result<T, ParseError> {
    s.parse().map_err(|_| ParseError::Usage(usage))
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = args.first() else { return Err(ParseError::Empty) };
        let word = resolve_word(first).ok_or_else(|| ParseError::Unknown((*first).to_string()))?;
        let rest = &args[1..];

        let cmd = match word {
            "point" => {
                const U: &str = "point <ra> <dec>";
                let [ra, dec] = rest else { return Err(ParseError::Usage(U)) };
                Command::Point { ra: num(ra, U)?, dec: num(dec, U)? }
            }
            "cone" => {
                const U: &str = "cone <ra> <dec> <radius>";
                let [ra, dec, r] = rest else { return Err(ParseError::Usage(U)) };
                Command::Cone { ra: num(ra, U)?, dec: num(dec, U)?, radius: num(r, U)? }
            }
            "box" => {
                const U: &str = "box <ra1> <dec1> <ra2> <dec2> <ra3> <dec3> <ra4> <dec4>";
                if rest.len() != 8 {
                    return Err(ParseError::Usage(U));
                }
                let mut corners = [(0.0, 0.0); 4];
                for (i, c) in corners.iter_mut().enumerate() {
                    *c = (num(rest[2 * i], U)?, num(rest[2 * i + 1], U)?);
                }
                Command::Box(corners)
            }
            "radius" => {
                const U: &str = "radius <matchradius>";
                let [r] = rest else { return Err(ParseError::Usage(U)) };
                Command::Radius(num::<f64>(r, U)?.abs())
            }
            "region" => {
                let [out] = rest else { return Err(ParseError::Usage("region <outfile>")) };
                Command::Region { outfile: PathBuf::from(out) }
            }
            "subset" => {
                let [cat, out] = rest else { return Err(ParseError::Usage("subset <setid> <outfile>")) };
                Command::Subset { catalog: (*cat).to_string(), outfile: PathBuf::from(out) }
            }
            "table" => {
                let [src, out] = rest else { return Err(ParseError::Usage("table <source.tbl> <summary.tbl>")) };
                Command::Table { source: PathBuf::from(src), outfile: PathBuf::from(out) }
            }
            "matches" => {
                let [src, cat, out] = rest else {
                    return Err(ParseError::Usage("matches <source.tbl> <setid> <summary.tbl>"));
                };
                Command::Matches { source: PathBuf::from(src), catalog: (*cat).to_string(), outfile: PathBuf::from(out) }
            }
            "dump" => {
                const U: &str = "dump [count]";
                match rest {
                    [] => Command::Dump(None),
                    [n] => Command::Dump(Some(num(n, U)?)),
                    _ => return Err(ParseError::Usage(U)),
                }
            }
            "trace" => {
                const U: &str = "trace <id>";
                let [id] = rest else { return Err(ParseError::Usage(U)) };
                Command::Trace(num(id, U)?)
            }
            "organize" => Command::Organize,
            "debug" => {
                const U: &str = "debug <level>";
                let [lvl] = rest else { return Err(ParseError::Usage(U)) };
                Command::Debug(num(lvl, U)?)
            }
            _ => Command::Quit,
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Point { .. } => "point",
            Command::Cone { .. } => "cone",
            Command::Box(_) => "box",
            Command::Radius(_) => "radius",
            Command::Region { .. } => "region",
            Command::Subset { .. } => "subset",
            Command::Table { .. } => "table",
            Command::Matches { .. } => "matches",
            Command::Dump(_) => "dump",
            Command::Trace(_) => "trace",
            Command::Organize => "organize",
            Command::Debug(_) => "debug",
            Command::Quit => "quit",
        }
    }
}

/// One `[struct stat="…", key="value", …]` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    stat: &'static str,
    fields: Vec<(&'static str, String)>,
}

impl StatusLine {
    pub fn ok() -> Self { Self { stat: "OK", fields: Vec::new() } }
    pub fn error() -> Self { Self { stat: "ERROR", fields: Vec::new() } }
    pub fn info() -> Self { Self { stat: "INFO", fields: Vec::new() } }

    pub fn command(name: &'static str) -> Self { Self::ok().with("command", name) }

    pub fn failure(msg: impl fmt::Display) -> Self { Self::error().with("msg", msg) }

    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string().replace('"', "'")));
        self
    }

    pub fn is_ok(&self) -> bool { self.stat == "OK" }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[struct stat=\"{}\"", self.stat)?;
        for (k, v) in &self.fields {
            write!(f, ", {k}=\"{v}\"")?;
        }
        write!(f, "]")
    }
}
