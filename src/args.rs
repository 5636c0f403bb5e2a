// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_kmscast::capture::{PixelFormat, Region};
use std::path::PathBuf;

/// Scanout pixel format override.
///
/// Names follow the in-memory byte order handed to the pipeline. Use this
/// when the format detected from the framebuffer query is wrong or
/// unrecognized.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum FormatSetting {
    /// 32-bit, B G R X byte order (XRGB8888 scanout)
    Bgrx,
    /// 32-bit, B G R A byte order (ARGB8888 scanout)
    Bgra,
    /// 24-bit, B G R byte order (RGB888 scanout)
    Bgr,
    /// 16-bit RGB 5:6:5 (RGB565 scanout)
    Rgb16,
}

impl From<FormatSetting> for PixelFormat {
    fn from(value: FormatSetting) -> Self {
        match value {
            FormatSetting::Bgrx => PixelFormat::Xrgb8888,
            FormatSetting::Bgra => PixelFormat::Argb8888,
            FormatSetting::Bgr => PixelFormat::Rgb888,
            FormatSetting::Rgb16 => PixelFormat::Rgb565,
        }
    }
}

/// Command-line arguments for EdgeFirst Display Capture.
///
/// This structure defines all configuration options for the capture
/// service, including device and CRTC selection, the capture region, and
/// the GStreamer pipeline handed the raw frames. Arguments can be
/// specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-kmscast --device /dev/dri/card1 --region "100 100 640 480"
///
/// # Via environment variables
/// export DEVICE=/dev/dri/card1
/// export REGION="100 100 640 480"
/// edgefirst-kmscast
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// DRM card device path (e.g., /dev/dri/card1); scans /dev/dri when
    /// omitted
    #[arg(short, long, env = "DEVICE")]
    pub device: Option<PathBuf>,

    /// CRTC index on the card; defaults to the first CRTC with a
    /// framebuffer attached
    #[arg(long, env = "CRTC")]
    pub crtc: Option<usize>,

    /// Capture region in pixels (x y width height)
    #[arg(
        short,
        long,
        env = "REGION",
        default_value = "0 0 640 480",
        value_delimiter = ' ',
        num_args = 4
    )]
    pub region: Vec<u32>,

    /// Stream frame rate in frames per second
    #[arg(long, env = "FPS", default_value = "25")]
    pub fps: u32,

    /// Pixel format override when framebuffer detection is wrong
    #[arg(long, env = "FORMAT", value_enum)]
    pub format: Option<FormatSetting>,

    /// GStreamer sink fragment closing the default pipeline (e.g.
    /// "waylandsink window-width=640 window-height=480 sync=false")
    #[arg(long, env = "SINK", default_value = "autovideosink sync=false")]
    pub sink: String,

    /// Full GStreamer chain after "fdsrc !", replacing the default
    /// pipeline (e.g. "videoparse ... ! imxvideoconvert_g2d ! ...")
    #[arg(long, env = "LAUNCH")]
    pub launch: Option<String>,

    /// Stop after this many frames (runs until the pipeline closes when
    /// omitted)
    #[arg(long, env = "FRAMES")]
    pub frames: Option<u64>,

    /// Report the card's CRTCs and framebuffers, then exit
    #[arg(long)]
    pub probe: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Capture region from the four-value region argument.
    pub fn capture_region(&self) -> Region {
        Region::new(
            self.region[0],
            self.region[1],
            self.region[2],
            self.region[3],
        )
    }
}
