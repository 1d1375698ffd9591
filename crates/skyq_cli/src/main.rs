mod logging;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use skyq_core::engine::BuildReport;
use skyq_core::session::startup_line;
use skyq_core::{Engine, SearchConfig, Session, StatusLine};

const USAGE: &str = "Usage: skyq_cli [-d level][-m][-o|-i basepath][--config file] catlist";

#[derive(Parser)]
#[command(name = "skyq_cli", about = "Spatial catalog search: build or attach an index, then answer queries from stdin")]
struct Cli {
    /// Log verbosity: 0 warn, 1 info, 2 debug, 3 trace
    #[arg(short = 'd', value_name = "LEVEL", default_value_t = 0)]
    debug: u8,
    /// Write INFO status lines while loading and after `table`
    #[arg(short = 'm')]
    messages: bool,
    /// Build, then persist the index to BASE.{info,set,rec,rti}
    #[arg(short = 'o', value_name = "BASE", conflicts_with = "attach")]
    output: Option<PathBuf>,
    /// Attach to the index persisted at BASE instead of building
    #[arg(short = 'i', value_name = "BASE")]
    attach: Option<PathBuf>,
    /// Search tolerances (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Catalog list table (build mode)
    catlist: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            println!("{}", StatusLine::failure(USAGE));
            return ExitCode::FAILURE;
        }
    };

    let log = logging::init(cli.debug);
    match run(cli, &log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            println!("{}", StatusLine::failure(format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

fn print_report<W: Write>(out: &mut W, report: &BuildReport) -> io::Result<()> {
    for t in &report.thin_boxes {
        let line = StatusLine::info()
            .with("set", t.catalog_id)
            .with("rec", t.record_offset)
            .with(axis_key(t.axis), format!("{:e}", t.extent));
        writeln!(out, "{line}")?;
    }
    for c in &report.catalogs {
        let line = StatusLine::info()
            .with("time", format!("{:.4}", c.elapsed.as_secs_f64()))
            .with("setid", c.catalog_id)
            .with("setname", &c.name)
            .with("count", c.loaded);
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn axis_key(axis: char) -> &'static str {
    match axis {
        'x' => "xdiff",
        'y' => "ydiff",
        _ => "zdiff",
    }
}

fn run(cli: Cli, log: &logging::LogControl) -> Result<()> {
    let start = Instant::now();
    let config = match &cli.config {
        Some(p) => SearchConfig::load(p).with_context(|| format!("reading config {}", p.display()))?,
        None => SearchConfig::default(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let engine = match (&cli.attach, &cli.catlist) {
        (Some(base), _) => {
            Engine::attach(base, config).with_context(|| format!("attaching index {}", base.display()))?
        }
        (None, Some(list)) => {
            let (mut engine, report) =
                Engine::build(list, config).with_context(|| format!("loading catalog list {}", list.display()))?;
            if cli.messages {
                print_report(&mut out, &report)?;
            }
            if let Some(base) = &cli.output {
                engine.persist(base).with_context(|| format!("writing index {}", base.display()))?;
            }
            engine
        }
        (None, None) => bail!(USAGE),
    };

    writeln!(out, "{}", startup_line(&engine, start.elapsed()))?;
    out.flush()?;

    let mut session = Session::new(engine).with_info(cli.messages).on_debug(|level| log.set_level(level));
    session.run(io::stdin().lock(), &mut out)?;
    Ok(())
}
