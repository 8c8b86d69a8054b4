use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tilecore::{
    EngineConfig, EngineContext, NameKey, OperationGraph, ParameterBlock, Raster,
    TileComputationListener, TileError, TileIndex, TileRequest, TileSource,
};

#[derive(Parser, Debug)]
#[command(name = "tilecore", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute every tile of a registered operation and write the image as a PNG.
    Render(RenderArgs),
    /// Print the preference order of a set of named candidates.
    Order(OrderArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Operation name, e.g. `gradient` or `constant`.
    #[arg(long)]
    op: String,

    /// JSON object with the operation parameters.
    #[arg(long)]
    params: PathBuf,

    /// Engine configuration JSON (defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Print engine counters as JSON on stdout.
    #[arg(long)]
    stats: bool,
}

#[derive(Parser, Debug)]
struct OrderArgs {
    /// JSON file: `{ "nodes": [..], "preferences": [["preferred", "other"], ..] }`.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Also print each node's in-degree and the nodes it is preferred over.
    #[arg(long)]
    details: bool,
}

#[derive(serde::Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PreferenceFile {
    nodes: Vec<String>,
    #[serde(default)]
    preferences: Vec<(String, String)>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Order(args) => cmd_order(args),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let f = File::open(path).with_context(|| format!("open {what} '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parse {what} JSON"))
}

/// Copies delivered tiles into an 8-bit interleaved image buffer.
struct Assembler {
    width: u32,
    height: u32,
    bands: u32,
    state: Mutex<AssemblyState>,
    delivered: Condvar,
}

#[derive(Default)]
struct AssemblyState {
    pixels: Vec<u8>,
    settled: usize,
    failures: Vec<String>,
}

impl Assembler {
    fn new(width: u32, height: u32, bands: u32) -> Self {
        let len = width as usize * height as usize * bands as usize;
        Self {
            width,
            height,
            bands,
            state: Mutex::new(AssemblyState {
                pixels: vec![0; len],
                ..AssemblyState::default()
            }),
            delivered: Condvar::new(),
        }
    }

    fn settle(&self, update: impl FnOnce(&mut AssemblyState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut state);
        state.settled += 1;
        self.delivered.notify_all();
    }

    // Waits for one callback per tile, which may trail the request's own completion.
    fn wait(&self, tiles: usize, timeout: Duration) -> anyhow::Result<AssemblyState> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (mut guard, res) = self
            .delivered
            .wait_timeout_while(guard, timeout, |s| s.settled < tiles)
            .unwrap_or_else(|e| e.into_inner());
        if res.timed_out() && guard.settled < tiles {
            anyhow::bail!("timed out with {} of {tiles} tiles delivered", guard.settled);
        }
        Ok(std::mem::take(&mut *guard))
    }
}

impl TileComputationListener for Assembler {
    fn tile_computed(
        &self,
        _requests: &[Arc<TileRequest>],
        _image: &Arc<dyn TileSource>,
        _index: TileIndex,
        tile: &Arc<Raster>,
    ) {
        let (w, h, bands) = (self.width, self.height, self.bands);
        self.settle(|state| {
            let o = tile.origin();
            for y in o.y.max(0)..(o.y + tile.height() as i32).min(h as i32) {
                for x in o.x.max(0)..(o.x + tile.width() as i32).min(w as i32) {
                    for band in 0..bands {
                        let v = tile.sample(x, y, band).unwrap_or(0.0);
                        let i = ((y as usize * w as usize) + x as usize) * bands as usize
                            + band as usize;
                        state.pixels[i] = v.round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        });
    }

    fn tile_cancelled(
        &self,
        _requests: &[Arc<TileRequest>],
        _image: &Arc<dyn TileSource>,
        index: TileIndex,
    ) {
        self.settle(|state| state.failures.push(format!("tile {index} cancelled")));
    }

    fn tile_computation_failure(
        &self,
        _requests: &[Arc<TileRequest>],
        _image: &Arc<dyn TileSource>,
        index: TileIndex,
        error: &TileError,
    ) {
        self.settle(|state| state.failures.push(format!("tile {index}: {error}")));
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let ctx = EngineContext::new(config)?;

    let params = ParameterBlock::from_json(read_json(&args.params, "parameters")?)?;
    let source = ctx
        .create(&args.op, &params)
        .with_context(|| format!("create operation '{}'", args.op))?;
    let layout = *source.layout();

    let color = match layout.bands {
        1 => image::ColorType::L8,
        2 => image::ColorType::La8,
        3 => image::ColorType::Rgb8,
        4 => image::ColorType::Rgba8,
        n => anyhow::bail!("cannot write a {n}-band image as PNG"),
    };

    let assembler = Arc::new(Assembler::new(layout.width, layout.height, layout.bands));
    let listener: Arc<dyn TileComputationListener> = assembler.clone();
    let indices = layout.all_tile_indices();
    let request = ctx
        .scheduler()
        .schedule_tiles(source, &indices, vec![listener])?;

    let timeout = Duration::from_secs(args.timeout_secs);
    let state = match assembler.wait(indices.len(), timeout) {
        Ok(state) => state,
        Err(e) => {
            request.cancel_tiles(None);
            return Err(e);
        }
    };
    if !state.failures.is_empty() {
        anyhow::bail!(
            "{} of {} tiles failed:\n  {}",
            state.failures.len(),
            indices.len(),
            state.failures.join("\n  ")
        );
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &state.pixels,
        layout.width,
        layout.height,
        color,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;
    eprintln!("wrote {} ({} tiles)", args.out.display(), indices.len());

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&ctx.stats())?);
    }
    Ok(())
}

fn cmd_order(args: OrderArgs) -> anyhow::Result<()> {
    let file: PreferenceFile = read_json(&args.in_path, "preference file")?;

    let graph: OperationGraph<NameKey, String> = OperationGraph::new();
    for name in &file.nodes {
        if !graph.add_node(NameKey::new(name.as_str()), name.clone()) {
            anyhow::bail!("duplicate node '{name}'");
        }
    }
    for (preferred, other) in &file.preferences {
        graph
            .set_preference(&NameKey::new(preferred.as_str()), &NameKey::new(other.as_str()))
            .with_context(|| format!("preference '{preferred}' over '{other}'"))?;
    }

    let Some(order) = graph.ordered_list() else {
        anyhow::bail!("preferences contain a cycle; no order exists");
    };
    for name in &order {
        if args.details
            && let Some(node) = graph.node(&NameKey::new(name.as_str()))
        {
            let over: Vec<&str> = node.neighbors().iter().map(NameKey::as_str).collect();
            println!(
                "{name}\tin-degree {}\tpreferred over [{}]",
                node.in_degree(),
                over.join(", ")
            );
        } else {
            println!("{name}");
        }
    }
    Ok(())
}
