use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use regionspace_common::{AvatarId, TeleportFlags};
use regionspace_crossing::{FrameLoop, LocalGrid, RegionConfig, RegionServer};
use regionspace_kernel::{ClientLog, ObjectSnapshot, ScenePresence};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regionspace-cli", about = "CLI tool for regionspace operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and default settings
    Info,
    /// Push a ridden object across the border between two regions
    Cross {
        /// Number of avatars sitting on the object
        #[arg(short, long, default_value = "1")]
        riders: usize,
    },
    /// Teleport an avatar within its region and then into a neighbour
    Teleport,
    /// Run a region from a YAML config with a walker heading for the east edge
    Run {
        /// Region config file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of frames to run
        #[arg(short, long, default_value = "100")]
        frames: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let grid = LocalGrid::new(runtime.handle().clone());

    match cli.command {
        Commands::Info => {
            let config = RegionConfig::default();
            println!("regionspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "region: {} at {},{}",
                config.region.name, config.region.location_x, config.region.location_y
            );
            println!(
                "crossing: nudge={}m, projection={}s",
                config.crossing.border_nudge, config.crossing.projection_step_secs
            );
            println!(
                "transit: release_timeout={}ms, object_result_timeout={}ms",
                config.transit.release_timeout_ms, config.transit.object_result_timeout_ms
            );
            println!("heartbeat: {:?} per frame", config.heartbeat.frame_interval());
        }
        Commands::Cross { riders } => {
            let (west, east) = two_regions(&grid)?;
            let cart = west
                .scene()
                .add_object(&ObjectSnapshot::single_part(
                    AvatarId::new(),
                    "cart",
                    Vec3::new(254.0, 128.0, 21.0),
                ))
                .context("adding cart")?;
            for i in 0..riders {
                let rider = login(&grid, &west, &format!("rider-{i}"), Vec3::new(250.0, 128.0, 25.0));
                rider
                    .sit(west.scene(), cart.id(), cart.root_part_id())
                    .with_context(|| format!("seating rider-{i}"))?;
            }
            println!("Crossing cart {} with {riders} rider(s)", cart.id());

            match west.coordinator().cross_object_at(&cart, Vec3::new(257.0, 128.0, 21.0)) {
                Ok(outcome) => {
                    println!(
                        "Crossed: riders={}, failed={}",
                        outcome.riders.len(),
                        outcome.rider_failures.len()
                    );
                    if let Some(arrived) = east.scene().object(cart.id()) {
                        println!("East: cart at {}", arrived.position());
                    }
                }
                Err(err) => println!("Crossing failed: {err}"),
            }
            println!(
                "Objects: west={}, east={}",
                west.scene().object_count(),
                east.scene().object_count()
            );
        }
        Commands::Teleport => {
            let (west, east) = two_regions(&grid)?;
            let p = login(&grid, &west, "traveller", Vec3::new(100.0, 100.0, 25.0));

            let local = west.coordinator().request_teleport_to_location(
                p.id(),
                west.handle(),
                Vec3::new(30.0, 40.0, 20.0),
                Vec3::X,
                TeleportFlags::VIA_LOCATION,
            )?;
            println!("Local teleport: {local:?}, now at {}", p.authority().get(false, false));

            let remote = west.coordinator().request_teleport_to_location(
                p.id(),
                east.handle(),
                Vec3::new(50.0, 60.0, 30.0),
                Vec3::X,
                TeleportFlags::VIA_LOCATION,
            )?;
            println!("Remote teleport: {remote:?}");
            println!("West: root={}", p.is_root());
            if let Some(arrived) = east.scene().presence(p.id()) {
                println!(
                    "East: root={}, at {}",
                    arrived.is_root(),
                    arrived.authority().get(false, false)
                );
            }
        }
        Commands::Run { config, frames } => {
            let config = match config {
                Some(path) => RegionConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RegionConfig::default(),
            };
            let server = grid
                .add_region(&config)
                .context("region location already taken")?;
            let east_name = format!("{}-east", config.region.name);
            let east_config =
                RegionConfig::named(east_name, config.region.location_x + 1, config.region.location_y);
            let east = grid
                .add_region(&east_config)
                .context("east neighbour location already taken")?;

            let walker = login(&grid, &server, "walker", Vec3::new(240.0, 128.0, 25.0));
            walker.authority().set_velocity(Vec3::new(20.0, 0.0, 0.0));

            println!(
                "Running {} for {frames} frames at {:?}",
                config.region.name,
                config.heartbeat.frame_interval()
            );
            let frame_loop = FrameLoop::start(Arc::clone(&server), config.heartbeat, Some(frames))
                .context("starting frame loop")?;
            let report = frame_loop.wait();
            server.shutdown();

            println!(
                "Frames: {}, avg={:?}, max={:?}",
                report.frames,
                report.timer.average(),
                report.timer.max()
            );
            let there = east
                .scene()
                .presence(walker.id())
                .is_some_and(|p| p.is_root());
            println!("Walker crossed east: {there}");
        }
    }

    Ok(())
}

fn two_regions(grid: &Arc<LocalGrid>) -> anyhow::Result<(Arc<RegionServer>, Arc<RegionServer>)> {
    let west = grid
        .add_region(&RegionConfig::named("west", 1000, 1000))
        .context("adding west")?;
    let east = grid
        .add_region(&RegionConfig::named("east", 1001, 1000))
        .context("adding east")?;
    Ok((west, east))
}

fn login(grid: &LocalGrid, server: &RegionServer, name: &str, position: Vec3) -> Arc<ScenePresence> {
    let avatar = AvatarId::new();
    let client = Arc::new(ClientLog::new());
    grid.connect_client(avatar, client.clone());
    server.login(avatar, name, position, client)
}
