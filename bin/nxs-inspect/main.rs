use clap::Parser;
use nexus::core::glam::{Mat4, Vec3};
use nexus::{
    open_location, Config, DatasetState, HeadlessContext, Nexus, PooledFetcher, StreamEvent, Viewport,
};

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "nxs-inspect", about = "Print a Nexus dataset's layout and stream it headlessly")]
struct Cli {
    /// Path or URL of the .nxs file
    location: String,
    /// RON file with a `Config`
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Overrides the configured target error, in pixels
    #[arg(long)]
    target_error: Option<f32>,
    /// Frames to stream before stopping
    #[arg(long, default_value_t = 100)]
    frames: u32,
    /// Camera distance from the dataset center, in dataset radii
    #[arg(long, default_value_t = 2.0)]
    distance: f32,
    /// Viewport size in pixels
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [1280.0, 720.0])]
    viewport: Vec<f32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::read_file(path)?,
        None => Config::default(),
    };
    if let Some(target_error) = cli.target_error {
        config.streaming.target_error = target_error;
    }
    let (width, height) = match cli.viewport.as_slice() {
        &[w, h] => (w, h),
        _ => (1280.0, 720.0),
    };

    let (redraw_tx, redraw_rx) = crossbeam_channel::unbounded();
    let fetcher = Arc::new(PooledFetcher::with_threads(config.fetch_threads)?);
    let mut nexus = Nexus::new(
        config.streaming,
        fetcher,
        Arc::new(move || {
            let _ = redraw_tx.send(());
        }),
    );
    nexus.set_viewport(Viewport::new(width, height));
    nexus.open(open_location(&cli.location)?);

    let mut gpu = HeadlessContext::new();
    let idle_wait = Duration::from_millis(50);

    // Header and index.
    while !nexus.is_ready() {
        let _ = redraw_rx.recv_timeout(idle_wait);
        nexus.begin(&mut gpu, |_| {});
        nexus.end();
        if let DatasetState::Failed(e) = nexus.state() {
            return Err(e.into());
        }
    }
    print_layout(&nexus);

    let center = nexus.dataset_center().unwrap_or_default();
    let radius = nexus.dataset_radius().unwrap_or(1.0);
    let eye = Vec3::from(center) + Vec3::Z * radius * cli.distance;
    nexus.set_view_matrix(Mat4::look_at_rh(eye, center.into(), Vec3::Y));
    nexus.set_projection_matrix(Mat4::perspective_rh_gl(
        std::f32::consts::FRAC_PI_4,
        width / height,
        radius * 0.01,
        radius * (cli.distance + 2.0),
    ));

    let mut num_failed = 0;
    for _ in 0..cli.frames {
        let _ = redraw_rx.recv_timeout(idle_wait);

        let mut requested = 0;
        nexus.begin(&mut gpu, |event| match event {
            StreamEvent::NodeRequested(_) => requested += 1,
            StreamEvent::NodeFailed(id) => {
                log::warn!("Node {} failed", id);
                num_failed += 1;
            }
            StreamEvent::TextureFailed(id) => log::warn!("Texture {} failed", id),
            _ => {}
        });
        let stats = nexus.render(&mut gpu);
        nexus.end();
        gpu.take_commands();

        log::info!(
            "Frame {}: {} selected, {} resident ({} KiB), {} pending, error {:.2}, {} triangles in {} draws",
            nexus.frame(),
            nexus.selected_count(),
            nexus.resident_count(),
            nexus.resident_bytes() >> 10,
            nexus.pending_requests(),
            nexus.current_error(),
            stats.triangles,
            stats.draw_calls,
        );

        if requested == 0 && nexus.pending_requests() == 0 {
            log::info!("Converged after {} frames", nexus.frame());
            break;
        }
    }

    println!(
        "streamed: {} resident nodes, {} KiB, {} failed, error {:.2}",
        nexus.resident_count(),
        nexus.resident_bytes() >> 10,
        num_failed,
        nexus.current_error()
    );
    println!(
        "gpu:      {} buffers ({} KiB), {} textures",
        gpu.live_buffer_count(),
        gpu.live_buffer_bytes() >> 10,
        gpu.live_texture_count()
    );
    nexus.close(&mut gpu);

    Ok(())
}

fn print_layout(nexus: &Nexus) {
    let (Some(header), Some(index)) = (nexus.header(), nexus.index()) else {
        return;
    };
    let signature = &header.signature;
    println!("version:     {}", header.version);
    println!("compression: {:?}", signature.compression());
    println!(
        "attributes:  normals {}, colors {}, texcoords {}, {}",
        signature.vertex.has_normal(),
        signature.vertex.has_color(),
        signature.vertex.has_texcoord(),
        if signature.is_point_cloud() { "point cloud" } else { "triangles" }
    );
    println!("vertices:    {}", header.vertex_count);
    println!("faces:       {}", header.face_count);
    println!(
        "index:       {} nodes, {} patches, {} textures",
        header.node_count, header.patch_count, header.texture_count
    );
    println!(
        "sphere:      center {:?}, radius {}",
        header.sphere.center, header.sphere.radius
    );

    let nodes = &index.nodes()[..index.sink() as usize];
    let payload_bytes: u64 = nodes.iter().map(|n| n.byte_size()).sum();
    let num_leaves = (0..index.sink())
        .filter(|&id| index.children(id).next().is_none())
        .count();
    let max_error = nodes.iter().map(|n| n.error).fold(0.0, f32::max);
    println!("payload:     {} KiB", payload_bytes >> 10);
    println!("leaves:      {}", num_leaves);
    println!("max error:   {}", max_error);
}
