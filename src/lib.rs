// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Display Capture Library
//!
//! This library provides the framebuffer capture functionality for the
//! EdgeFirst Display Capture service. It reads the framebuffer a display
//! CRTC is actively scanning out through the kernel DRM/KMS API, copies a
//! cropped region into plain pixel buffers, and feeds the raw frames to an
//! external GStreamer pipeline.
//!
//! ## Features
//!
//! - **Framebuffer Acquisition**: Open a DRM card, walk its CRTCs, and map
//!   the active scanout dumb buffer read-only into the process.
//! - **Region Capture**: Bounds-checked row-by-row copy of a sub-rectangle
//!   into a tightly packed frame buffer.
//! - **Format Detection**: Derive the packed pixel format from the
//!   framebuffer's bpp/depth pair, with an operator override.
//! - **GStreamer Streaming**: Spawn a gst-launch-1.0 child and pipe raw
//!   frames into it at a fixed rate.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_kmscast::capture::{Capture, Region};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Map the framebuffer the first active CRTC is scanning out
//! let capture = Capture::open("/dev/dri/card0", None)?;
//!
//! // Copy a 640x480 window from the framebuffer origin
//! let region = Region::new(0, 0, 640, 480);
//! let mut frame = vec![0u8; region.size(capture.bytes_per_pixel())];
//! capture.read_region(&region, &mut frame)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: Kernel with DRM/KMS dumb buffer support
//! - **Privileges**: DRM master or CAP_SYS_ADMIN, the kernel withholds
//!   framebuffer GEM handles from other callers
//! - **GStreamer**: gst-launch-1.0 on the PATH for the streaming path
//!
//! ## Safety
//!
//! This library uses `unsafe` code for the map-dumb and GEM-close ioctls
//! and for the framebuffer memory mapping. All unsafe operations are
//! isolated in the capture module and wrapped with safe APIs.

pub mod capture;
pub mod pipeline;
