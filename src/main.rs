use clap::Parser;
use drm::{control::Device as ControlDevice, Device};
use edgefirst_kmscast::{
    capture::{validate_region, Capture, Card, PixelFormat, Region},
    pipeline::{GstPipeline, PipelineSpec},
};
use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod args;
use args::Args;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    match tracing_journald::layer() {
        Ok(journald) => registry.with(journald).init(),
        Err(_) => registry.init(),
    }
    if let Err(err) = tracing_log::LogTracer::init() {
        warn!("log bridge init failed: {err}");
    }
}

fn update_fps(prev: &mut Instant, history: &mut Vec<i64>, index: &mut usize) -> i64 {
    let now = Instant::now();

    let elapsed = now.duration_since(*prev);
    *prev = Instant::now();

    history[*index] = 1e9 as i64 / elapsed.as_nanos().max(1) as i64;
    *index = (*index + 1) % history.len();

    (history.iter().sum::<i64>() as f64 / history.len() as f64).round() as i64
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("Maivin Display Capture");

    if args.fps == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            "fps must be nonzero",
        )));
    }

    if args.probe {
        return probe(args.device.as_deref());
    }

    let capture = match &args.device {
        Some(path) => Capture::open(path, args.crtc)?,
        None => Capture::discover(args.crtc)?,
    };
    info!("{capture}");

    let region = args.capture_region();
    validate_region(&region, capture.width(), capture.height())?;

    let format = match args.format.map(PixelFormat::from) {
        Some(format) => format,
        None => capture.format().ok_or_else(|| {
            io::Error::other(format!(
                "unrecognized framebuffer format (bpp {} depth {}), set --format",
                capture.bpp(),
                capture.depth()
            ))
        })?,
    };
    if format.bytes_per_pixel() != capture.bytes_per_pixel() {
        warn!(
            "format {} is {} bytes per pixel but the framebuffer stores {}",
            format,
            format.bytes_per_pixel(),
            capture.bytes_per_pixel()
        );
    }
    info!("capturing {} as {} at {} fps", region, format, args.fps);

    let spec = PipelineSpec {
        width: region.width,
        height: region.height,
        fps: args.fps,
        format,
        sink: args.sink.clone(),
        launch: args.launch.clone(),
    };
    let mut pipeline = GstPipeline::spawn(&spec)?;

    stream(&capture, &mut pipeline, &region, &args)?;

    match pipeline.shutdown() {
        Ok(status) => info!("pipeline exited: {status}"),
        Err(err) => warn!("pipeline shutdown failed: {err}"),
    }
    Ok(())
}

fn stream(
    capture: &Capture,
    pipeline: &mut GstPipeline,
    region: &Region,
    args: &Args,
) -> Result<(), Box<dyn Error>> {
    let mut frame = vec![0u8; region.size(capture.bytes_per_pixel())];
    let interval = Duration::from_secs(1) / args.fps;
    let mut deadline = Instant::now() + interval;

    let mut prev = Instant::now();
    let mut history = vec![0; 30];
    let mut index = 0;
    let mut frames: u64 = 0;

    loop {
        let fps = update_fps(&mut prev, &mut history, &mut index);
        let now = Instant::now();
        capture.read_region(region, &mut frame)?;
        let capture_time = now.elapsed();

        let now = Instant::now();
        match pipeline.write_frame(&frame) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                info!("pipeline closed, stopping after {frames} frames");
                return Ok(());
            }
            Err(err) => return Err(Box::new(err)),
        }
        let write_time = now.elapsed();

        debug!(
            "frame capture: {:?} write: {:?} fps: {}",
            capture_time, write_time, fps
        );

        frames += 1;
        if let Some(budget) = args.frames {
            if frames >= budget {
                info!("frame budget {budget} reached");
                return Ok(());
            }
        }

        // absolute deadline keeps the stream at the requested rate without
        // accumulating drift; late frames resynchronize to now
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
            deadline += interval;
        } else {
            deadline = now + interval;
        }
    }
}

fn probe(device: Option<&Path>) -> Result<(), Box<dyn Error>> {
    match device {
        Some(path) => probe_card(path),
        None => {
            let mut found = false;
            for n in 0..16 {
                let path = PathBuf::from(format!("/dev/dri/card{n}"));
                if !path.exists() {
                    continue;
                }
                found = true;
                if let Err(err) = probe_card(&path) {
                    warn!("{}: {}", path.display(), err);
                }
            }
            if !found {
                return Err(Box::new(io::Error::other("no DRM devices under /dev/dri")));
            }
            Ok(())
        }
    }
}

fn probe_card(path: &Path) -> Result<(), Box<dyn Error>> {
    let card = Card::open(path)?;
    let driver = card.get_driver()?;
    info!(
        "{}: driver {} ({})",
        path.display(),
        driver.name().to_string_lossy(),
        driver.description().to_string_lossy()
    );
    let resources = card.resource_handles()?;
    for (i, handle) in resources.crtcs().iter().enumerate() {
        let crtc = card.get_crtc(*handle)?;
        let mode = match crtc.mode() {
            Some(mode) => {
                let (w, h) = mode.size();
                format!("{}x{}@{}", w, h, mode.vrefresh())
            }
            None => "no mode".to_string(),
        };
        match crtc.framebuffer() {
            Some(fb) => match card.get_framebuffer(fb) {
                Ok(info) => {
                    let (w, h) = info.size();
                    info!(
                        "  crtc {} (index {}): {} framebuffer {} {}x{} pitch {} bpp {} depth {}",
                        u32::from(*handle),
                        i,
                        mode,
                        u32::from(fb),
                        w,
                        h,
                        info.pitch(),
                        info.bpp(),
                        info.depth()
                    );
                }
                Err(err) => info!(
                    "  crtc {} (index {}): {} framebuffer {} ({err})",
                    u32::from(*handle),
                    i,
                    mode,
                    u32::from(fb)
                ),
            },
            None => info!(
                "  crtc {} (index {}): {} no framebuffer",
                u32::from(*handle),
                i,
                mode
            ),
        }
    }
    Ok(())
}
