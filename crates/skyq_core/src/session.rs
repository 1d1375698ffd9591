//! The command loop.

use crate::engine::{Engine, MatchTolerance};
use crate::errors::SkyqError;
use crate::predicate::SearchRegion;
use crate::protocol::{Command, ParseError, StatusLine};
use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// First line written after start-up.
pub fn startup_line(engine: &Engine, elapsed: Duration) -> StatusLine {
    StatusLine::ok()
        .with("startuptime", format!("{:.4}", elapsed.as_secs_f64()))
        .with("nset", engine.catalogs().len())
        .with("count", engine.entry_count())
        .with("size", engine.size_bytes())
}

type DebugHook<'a> = Box<dyn FnMut(u8) + 'a>;

/// Active region, match radius and the engine they are applied to.
pub struct Session<'a> {
    engine: Engine,
    region: Option<SearchRegion>,
    radius_deg: f64,
    tol: MatchTolerance,
    info: bool,
    debug_hook: Option<DebugHook<'a>>,
    diag: Box<dyn Write + 'a>,
}

impl<'a> Session<'a> {
    pub fn new(engine: Engine) -> Self {
        let tol = MatchTolerance::new(engine.config(), 0.0);
        Self {
            engine,
            region: None,
            radius_deg: 0.0,
            tol,
            info: false,
            debug_hook: None,
            diag: Box::new(io::stderr()),
        }
    }

    /// Also write `INFO` lines (per-catalog counts after `table`).
    pub fn with_info(mut self, info: bool) -> Self {
        self.info = info;
        self
    }

    /// Called with the new level on `debug <level>`.
    pub fn on_debug(mut self, hook: impl FnMut(u8) + 'a) -> Self {
        self.debug_hook = Some(Box::new(hook));
        self
    }

    /// Where `dump` writes the tree; stderr by default.
    pub fn with_diagnostics(mut self, w: impl Write + 'a) -> Self {
        self.diag = Box::new(w);
        self
    }

    pub fn engine(&self) -> &Engine { &self.engine }
    pub fn region(&self) -> Option<&SearchRegion> { self.region.as_ref() }
    /// Point-vs-point match radius in degrees.
    pub fn match_radius(&self) -> f64 { self.radius_deg }

    /// Reads commands until `quit` or end of input. A `quit` status line is
    /// written in both cases.
    /// Undecodable bytes make that command fail to parse; the loop goes on.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            if self.handle_line(line.trim_end_matches(['\n', '\r']), out)?.is_break() {
                return Ok(());
            }
        }
        self.respond(out, Self::quit_line())?;
        Ok(())
    }

    fn quit_line() -> StatusLine { StatusLine::command("quit").with("msg", "Quitting") }

    fn respond<W: Write>(&self, out: &mut W, line: StatusLine) -> io::Result<()> {
        writeln!(out, "{line}")?;
        out.flush()
    }

    /// Runs one input line; `Break` after `quit`.
    pub fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<ControlFlow<()>> {
        let cmd = match Command::parse(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                let status = match &e {
                    ParseError::Unknown(word) => StatusLine::error().with("command", word).with("msg", &e),
                    _ => StatusLine::failure(&e),
                };
                self.respond(out, status)?;
                return Ok(ControlFlow::Continue(()));
            }
        };
        debug!(command = cmd.name(), "command");
        if cmd == Command::Quit {
            self.respond(out, Self::quit_line())?;
            return Ok(ControlFlow::Break(()));
        }
        let status = self.execute(cmd, out).unwrap_or_else(StatusLine::failure);
        self.respond(out, status)?;
        Ok(ControlFlow::Continue(()))
    }

    fn active_region(&self) -> crate::Result<SearchRegion> { self.region.ok_or(SkyqError::NoActiveRegion) }

    /// Runs one command and returns its status line. `INFO` lines, when
    /// enabled, go to `out` first.
    pub fn execute<W: Write>(&mut self, cmd: Command, out: &mut W) -> crate::Result<StatusLine> {
        let name = cmd.name();
        let status = match cmd {
            Command::Point { ra, dec } => {
                self.region = Some(SearchRegion::point(ra, dec));
                StatusLine::command(name).with("ra", format!("{ra:.6}")).with("dec", format!("{dec:.6}"))
            }
            Command::Cone { ra, dec, radius } => {
                self.region = Some(SearchRegion::cone(ra, dec, radius));
                StatusLine::command(name)
                    .with("ra", format!("{ra:.6}"))
                    .with("dec", format!("{dec:.6}"))
                    .with("radius", format!("{radius:.6}"))
            }
            Command::Box(corners) => {
                self.region = Some(SearchRegion::sky_box(corners));
                let keys = [("ra1", "dec1"), ("ra2", "dec2"), ("ra3", "dec3"), ("ra4", "dec4")];
                corners.iter().zip(keys).fold(StatusLine::command(name), |s, ((ra, dec), (kr, kd))| {
                    s.with(kr, format!("{ra:.6}")).with(kd, format!("{dec:.6}"))
                })
            }
            Command::Radius(r) => {
                self.radius_deg = r;
                self.tol = MatchTolerance::new(self.engine.config(), r);
                StatusLine::command(name).with("radius", format!("{r:.8}"))
            }
            Command::Region { outfile } => {
                let region = self.active_region()?;
                let res = self.engine.region(&region, self.tol, &outfile)?;
                StatusLine::command(name)
                    .with("outfile", outfile.display())
                    .with("count", res.catalogs)
                    .with("match", res.matches)
            }
            Command::Subset { catalog, outfile } => {
                let region = self.active_region()?;
                let n = self.engine.subset(&region, self.tol, &catalog, &outfile)?;
                StatusLine::command(name).with("dataset", catalog).with("outfile", outfile.display()).with("count", n)
            }
            Command::Table { source, outfile } => {
                let res = self.engine.table(&source, &outfile, self.tol)?;
                if self.info {
                    for (i, (cat, n)) in self.engine.catalogs().iter().zip(&res.sources_matched).enumerate() {
                        let line = StatusLine::info().with("setid", i).with("setname", &cat.name).with("matchedsrcs", n);
                        self.respond(out, line)?;
                    }
                }
                StatusLine::command(name)
                    .with("table", source.display())
                    .with("outfile", outfile.display())
                    .with("time", format!("{:.4}", res.elapsed.as_secs_f64()))
                    .with("nsrc", res.nsrc)
                    .with("match", res.nmatch)
                    .with("nomatch", res.nomatch)
            }
            Command::Matches { source, catalog, outfile } => {
                let res = self.engine.matches(&source, &catalog, &outfile, self.tol)?;
                StatusLine::command(name)
                    .with("table", source.display())
                    .with("dataset", catalog)
                    .with("outfile", outfile.display())
                    .with("time", format!("{:.4}", res.elapsed.as_secs_f64()))
                    .with("nsrc", res.nsrc)
                    .with("nmatch", res.pairs)
            }
            Command::Dump(limit) => {
                let nodes = self.engine.dump(&mut self.diag, limit)?;
                self.diag.flush()?;
                StatusLine::command(name).with("nodes", nodes)
            }
            Command::Trace(id) => {
                let path = self
                    .engine
                    .trace(id)
                    .ok_or_else(|| SkyqError::Usage(format!("Entry {id} not in index")))?;
                let text: Vec<String> = path.iter().map(|(node, slot)| format!("{}:{slot}", node.0)).collect();
                StatusLine::command(name).with("id", id).with("path", text.join(" "))
            }
            Command::Organize => {
                let path = self.engine.organize()?;
                StatusLine::command(name).with("outfile", path.display())
            }
            Command::Debug(level) => {
                if let Some(hook) = self.debug_hook.as_mut() {
                    hook(level);
                }
                StatusLine::command(name).with("level", level)
            }
            Command::Quit => Self::quit_line(),
        };
        Ok(status)
    }
}
