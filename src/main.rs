//! school-map — place tiered school badges on a map and write it as SVG.
//!
//! Reads a JSON array of school records, optionally looks up schools that
//! have no coordinates through AMap place search (`AMAP_KEY`), and renders
//! the resulting markers to `map.svg`.

use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use school_map::{
    locate::{self, AmapPlaceSearch},
    record::load_records,
    svg::write_svg,
    MapConfig, MapEvent, MapSession, SvgMap,
};

const CONTAINER: &str = "map";

#[derive(Parser, Debug)]
#[command(name = "school-map", version, about = "Render tiered school markers to an SVG map")]
struct Args {
    /// JSON array of school records
    #[arg(long, value_name = "PATH")]
    records: PathBuf,

    /// Output SVG file
    #[arg(long, value_name = "PATH", default_value = "map.svg")]
    out: PathBuf,

    /// Look up schools without coordinates by name, then by address
    #[arg(long)]
    resolve_missing: bool,

    /// AMap web service key for --resolve-missing
    #[arg(long, env = "AMAP_KEY", hide_env_values = true)]
    amap_key: Option<String>,

    /// Open the detail popup of the school with this name
    #[arg(long, value_name = "NAME")]
    select: Option<String>,

    /// Also write each badge as a PNG into this directory
    #[arg(long, value_name = "DIR")]
    badges: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(path = %args.records.display(), "loading schools");
    let mut records = load_records(&args.records)
        .with_context(|| format!("reading {}", args.records.display()))?;
    info!(count = records.len(), "schools loaded");

    let config = MapConfig::default();
    if args.resolve_missing {
        let Some(key) = args.amap_key.as_deref() else {
            bail!("--resolve-missing needs an AMap key (--amap-key or AMAP_KEY)");
        };
        let search = AmapPlaceSearch::new(key, &config);
        let patched = locate::fill_missing(&mut records, &search);
        info!(patched, "coordinates filled by place search");
    }

    let mut session = MapSession::with_config(SvgMap::new(), config);
    session.mount(CONTAINER, records)?;
    session.handle_event(MapEvent::Ready);
    let Some(viewport) = session.viewport() else {
        bail!("map failed to load");
    };

    if let Some(name) = &args.select {
        let marker = session
            .registry()
            .pairs()
            .iter()
            .find(|p| &p.resolved.record.name == name)
            .map(|p| p.marker);
        match marker {
            Some(m) => session.handle_event(MapEvent::MarkerClick(m)),
            None => warn!(%name, "no marker for this school"),
        }
    }

    if let Some(dir) = &args.badges {
        fs::create_dir_all(dir)?;
        for (i, pair) in session.registry().pairs().iter().enumerate() {
            let path = dir.join(format!("{i:03}.png"));
            fs::write(&path, pair.resolved.badge.to_png()?)?;
        }
        info!(dir = %dir.display(), count = session.registry().len(), "badges written");
    }

    let svg = session.map().render(viewport)?;
    write_svg(&args.out, &svg).with_context(|| format!("writing {}", args.out.display()))?;
    info!(path = %args.out.display(), bytes = svg.len(), markers = session.registry().len(), "map written");

    session.unmount();
    Ok(())
}
