use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use gs_lib::{Catalog, DiskCache, FetchPlan, StoreClient};
use seistream::{MemorySink, RendererCore, SessionConfig, StreamEvent};
use seistream_core::{Colormap, SoftwareRaster};

#[derive(Parser)]
#[command(name = "gs-fetch", about = "Inspect, plan, and fetch from a seismic chunk store")]
struct Cli {
    /// Store gateway base URL (or GS_BASE_URL env var / .env)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// On-disk cache directory for manifests and chunks (or GS_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a station's day manifest
    Manifest {
        /// Station code (e.g. ANMO)
        station: String,
        /// Day, YYYY-MM-DD
        date: NaiveDate,
    },
    /// Print the fetch plan and batch schedule for a window
    Plan {
        station: String,
        /// Window start, RFC 3339 (e.g. 2025-11-06T00:03:00Z)
        start: DateTime<Utc>,
        /// Window length in minutes
        #[arg(long, default_value_t = 60)]
        minutes: i64,
        /// Ask the gateway's progressive view instead of planning locally
        #[arg(long)]
        remote: bool,
    },
    /// HEAD-probe every stored chunk a window's plan would fetch
    Probe {
        station: String,
        start: DateTime<Utc>,
        #[arg(long, default_value_t = 60)]
        minutes: i64,
    },
    /// Fetch and decode a window, writing the playback stream as WAV
    Fetch {
        station: String,
        start: DateTime<Utc>,
        #[arg(long, default_value_t = 60)]
        minutes: i64,
        /// Output file
        #[arg(long, default_value = "out.wav")]
        out: PathBuf,
    },
    /// Render a window's spectrogram offline to a binary PPM image
    Render {
        station: String,
        start: DateTime<Utc>,
        #[arg(long, default_value_t = 60)]
        minutes: i64,
        #[arg(long, default_value = "out.ppm")]
        out: PathBuf,
        #[arg(long, default_value_t = 1280)]
        width: usize,
        #[arg(long, default_value_t = 512)]
        height: usize,
        /// Colormap: viridis, inferno, or grayscale
        #[arg(long, default_value = "viridis")]
        colormap: String,
    },
}

fn resolve_base_url(flag: &Option<String>) -> anyhow::Result<String> {
    if let Some(url) = flag {
        return Ok(url.clone());
    }
    if let Ok(url) = std::env::var("GS_BASE_URL") {
        if !url.is_empty() {
            return Ok(url);
        }
    }
    bail!("store URL required: pass --base-url or set GS_BASE_URL (or .env)");
}

fn make_client(base_url: &str, cache_dir: &Option<PathBuf>) -> StoreClient {
    let cache_dir = cache_dir.clone().or_else(|| {
        std::env::var("GS_CACHE_DIR").ok().map(PathBuf::from)
    });
    let client = StoreClient::new(base_url);
    match cache_dir {
        Some(dir) => client.with_cache(DiskCache::new(dir)),
        None => client,
    }
}

/// Load every day manifest the window touches into the catalog. Missing
/// days are reported and skipped (their intervals become silence).
async fn load_manifests(
    client: &StoreClient,
    catalog: &mut Catalog,
    station: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut day = start.date_naive();
    let last = end.date_naive();
    while day <= last {
        match client.load_manifest(station, day).await {
            Ok(manifest) => catalog.insert(manifest),
            Err(e) => eprintln!("warning: no manifest for {station} {day}: {e}"),
        }
        day = day.succ_opt().context("date overflow")?;
    }
    Ok(())
}

fn print_plan(plan: &FetchPlan) {
    println!(
        "{}: {} .. {} at {} Hz, {} entries ({} stored), range [{}, {}]",
        plan.station,
        plan.window_start,
        plan.window_end,
        plan.sample_rate,
        plan.entries.len(),
        plan.stored_count(),
        plan.normalization_min,
        plan.normalization_max,
    );
    for entry in &plan.entries {
        let kind = if entry.source.is_gap() { "gap " } else { "chunk" };
        println!(
            "  [{:3}] {} {:>3} {} .. {} ({} samples)",
            entry.index,
            kind,
            entry.granularity.label(),
            entry.start.format("%H:%M:%S"),
            entry.end.format("%H:%M:%S"),
            entry.samples,
        );
    }
    let batches = gs_lib::batch::schedule(plan);
    let sizes: Vec<String> = batches.iter().map(|b| b.entries.len().to_string()).collect();
    println!("batches: {}", sizes.join(", "));
}

async fn stream_window(
    client: StoreClient,
    station: &str,
    start: DateTime<Utc>,
    minutes: i64,
    config: SessionConfig,
) -> anyhow::Result<(RendererCore, MemorySink)> {
    let end = start + Duration::minutes(minutes);
    let mut core = RendererCore::new(config);

    {
        let mut catalog = Catalog::new();
        load_manifests(&client, &mut catalog, station, start, end).await?;
        let mut day = start.date_naive();
        while day <= end.date_naive() {
            if let Some(m) = catalog.get(station, day) {
                core.insert_manifest(m.clone());
            }
            day = day.succ_opt().context("date overflow")?;
        }
    }

    let plan = core.plan_request(station, start, minutes * 60)?;
    eprintln!(
        "plan: {} entries ({} stored)",
        plan.entries.len(),
        plan.stored_count(),
    );

    let mut sink = MemorySink::new();
    let fetcher = Arc::new(client);
    core.stream_window(fetcher, plan, &mut sink, |event| match event {
        StreamEvent::AudioStarted => eprintln!("first audio frame delivered"),
        StreamEvent::ChunkFailed { plan_index, error } => {
            eprintln!("chunk {plan_index} failed ({error}); silence substituted")
        }
        StreamEvent::SegmentReady { plan_index } => eprint!("\rsegment {plan_index} decoded"),
        StreamEvent::Complete { total_samples } => {
            eprintln!("\rstream complete: {total_samples} samples")
        }
    })
    .await?;

    Ok((core, sink))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest { station, date } => {
            let base = resolve_base_url(&cli.base_url)?;
            let client = make_client(&base, &cli.cache_dir);
            let manifest = client.load_manifest(&station, date).await?;
            println!(
                "{} {} at {} Hz: {} x 10m, {} x 1h, {} x 6h",
                manifest.station,
                manifest.date,
                manifest.sample_rate,
                manifest.ten_min.len(),
                manifest.one_hour.len(),
                manifest.six_hour.len(),
            );
            for chunk in manifest
                .ten_min
                .iter()
                .chain(&manifest.one_hour)
                .chain(&manifest.six_hour)
            {
                println!(
                    "  {:>3} {} .. {} ({} samples, [{}, {}])",
                    chunk.granularity.label(),
                    chunk.start,
                    chunk.end,
                    chunk.samples,
                    chunk.min,
                    chunk.max,
                );
            }
        }

        Commands::Plan {
            station,
            start,
            minutes,
            remote,
        } => {
            let base = resolve_base_url(&cli.base_url)?;
            let client = make_client(&base, &cli.cache_dir);
            let end = start + Duration::minutes(minutes);

            let plan = if remote {
                client.fetch_progressive_view(&station, start, end).await?
            } else {
                let mut catalog = Catalog::new();
                load_manifests(&client, &mut catalog, &station, start, end).await?;
                gs_lib::plan::plan_window(&catalog, &station, start, end)?
            };
            print_plan(&plan);
        }

        Commands::Probe {
            station,
            start,
            minutes,
        } => {
            let base = resolve_base_url(&cli.base_url)?;
            let client = make_client(&base, &cli.cache_dir);
            let end = start + Duration::minutes(minutes);
            let mut catalog = Catalog::new();
            load_manifests(&client, &mut catalog, &station, start, end).await?;
            let plan = gs_lib::plan::plan_window(&catalog, &station, start, end)?;

            let mut missing = 0usize;
            for entry in &plan.entries {
                let Some(chunk) = entry.source.chunk() else {
                    println!("  gap   {} .. {}", entry.start, entry.end);
                    continue;
                };
                let mut found = false;
                for key in gs_lib::paths::chunk_key_variants(&station, chunk) {
                    if client.head(&key).await? {
                        println!("  ok    {key}");
                        found = true;
                        break;
                    }
                }
                if !found {
                    println!("  MISSING {}", gs_lib::paths::chunk_key_variants(&station, chunk)[0]);
                    missing += 1;
                }
            }
            println!(
                "{} of {} stored chunks present",
                plan.stored_count() - missing,
                plan.stored_count(),
            );
        }

        Commands::Fetch {
            station,
            start,
            minutes,
            out,
        } => {
            let base = resolve_base_url(&cli.base_url)?;
            let client = make_client(&base, &cli.cache_dir);
            let (core, _sink) =
                stream_window(client, &station, start, minutes, SessionConfig::default()).await?;

            core.export_wav(&out)?;
            let stream = core.stream().context("no stream published")?;
            eprintln!(
                "wrote {} ({:.1} s at {} Hz)",
                out.display(),
                stream.duration_secs(),
                stream.sample_rate,
            );
        }

        Commands::Render {
            station,
            start,
            minutes,
            out,
            width,
            height,
            colormap,
        } => {
            let base = resolve_base_url(&cli.base_url)?;
            let client = make_client(&base, &cli.cache_dir);
            let colormap = match colormap.as_str() {
                "viridis" => Colormap::Viridis,
                "inferno" => Colormap::Inferno,
                "grayscale" | "greyscale" => Colormap::Grayscale,
                other => bail!("unknown colormap {other:?}"),
            };

            let (mut core, _sink) =
                stream_window(client, &station, start, minutes, SessionConfig::default()).await?;
            core.set_canvas_size(width, height);
            core.set_colormap(colormap);

            eprintln!("rendering tiles...");
            let rendered = tokio::task::block_in_place(|| core.pump());
            eprintln!("{rendered} base tiles rendered");

            let mut surface = SoftwareRaster::new(width, height, colormap);
            core.render_frame(&mut surface, 0.0);
            core.render_time_axis(&mut surface);
            std::fs::write(&out, surface.to_ppm())?;
            eprintln!("wrote {}", out.display());
        }
    }

    Ok(())
}
