// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use core::fmt;
use drm::{
    buffer::DrmFourcc,
    control::{crtc, framebuffer, Device as ControlDevice},
    Device,
};
use std::{
    error::Error,
    ffi::c_void,
    fs::{File, OpenOptions},
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd},
    path::{Path, PathBuf},
    ptr::null_mut,
    slice::from_raw_parts,
};
use tracing::{debug, info, warn};

/// Dumb-buffer ioctls the drm crate does not expose for foreign handles.
mod ioctl {
    #![allow(non_camel_case_types)]

    #[repr(C)]
    #[derive(Debug, Default, Copy, Clone)]
    pub struct drm_mode_map_dumb {
        pub handle: u32,
        pub pad: u32,
        pub offset: u64,
    }

    #[repr(C)]
    #[derive(Debug, Default, Copy, Clone)]
    pub struct drm_gem_close {
        pub handle: u32,
        pub pad: u32,
    }

    nix::ioctl_readwrite!(mode_map_dumb, b'd', 0xb3, drm_mode_map_dumb);
    nix::ioctl_write_ptr!(gem_close, b'd', 0x09, drm_gem_close);
}

/// A DRM card device node.
///
/// Implementing the drm crate device traits over the owned file gives
/// access to the kernel mode-setting API (resource enumeration, CRTC and
/// framebuffer queries) on this descriptor.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    /// Opens a DRM card device node read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(file))
    }
}

/// Packed scanout pixel formats understood by the capture path.
///
/// The legacy framebuffer query reports only bits-per-pixel and depth, so
/// detection is limited to the packed RGB layouts those two numbers can
/// distinguish. The format override flag covers drivers that report an
/// unusual pairing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit XRGB, stored B G R X in memory
    Xrgb8888,
    /// 32-bit ARGB, stored B G R A in memory
    Argb8888,
    /// 24-bit RGB, stored B G R in memory
    Rgb888,
    /// 16-bit RGB 5:6:5
    Rgb565,
}

impl PixelFormat {
    /// Maps the bpp/depth pair from a legacy framebuffer query to a format.
    pub const fn from_fb(bpp: u32, depth: u32) -> Option<Self> {
        match (bpp, depth) {
            (32, 24) => Some(PixelFormat::Xrgb8888),
            (32, 32) => Some(PixelFormat::Argb8888),
            (24, 24) => Some(PixelFormat::Rgb888),
            (16, 16) => Some(PixelFormat::Rgb565),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Xrgb8888 | PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 2,
        }
    }

    /// GStreamer videoparse format nick for the in-memory byte order.
    pub const fn gst_format(&self) -> &'static str {
        match self {
            PixelFormat::Xrgb8888 => "bgrx",
            PixelFormat::Argb8888 => "bgra",
            PixelFormat::Rgb888 => "bgr",
            PixelFormat::Rgb565 => "rgb16",
        }
    }

    pub const fn fourcc(&self) -> DrmFourcc {
        match self {
            PixelFormat::Xrgb8888 => DrmFourcc::Xrgb8888,
            PixelFormat::Argb8888 => DrmFourcc::Argb8888,
            PixelFormat::Rgb888 => DrmFourcc::Rgb888,
            PixelFormat::Rgb565 => DrmFourcc::Rgb565,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PixelFormat::Xrgb8888 => "XRGB8888",
            PixelFormat::Argb8888 => "ARGB8888",
            PixelFormat::Rgb888 => "RGB888",
            PixelFormat::Rgb565 => "RGB565",
        };
        write!(f, "{name}")
    }
}

/// Rectangular capture region within a framebuffer.
///
/// Coordinates are in pixels relative to the framebuffer origin.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of the region in pixels
    pub width: u32,
    /// Height of the region in pixels
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Buffer size in bytes for this region at `bytes_per_pixel`.
    pub const fn size(&self, bytes_per_pixel: usize) -> usize {
        self.width as usize * self.height as usize * bytes_per_pixel
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Checks a capture region against the framebuffer dimensions.
///
/// Rejects empty regions and regions extending past either framebuffer
/// edge. The arithmetic is checked so oversized offsets cannot wrap.
pub fn validate_region(
    region: &Region,
    fb_width: u32,
    fb_height: u32,
) -> Result<(), Box<dyn Error>> {
    if region.width == 0 || region.height == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            "capture region is empty",
        )));
    }
    let right = region.x.checked_add(region.width);
    let bottom = region.y.checked_add(region.height);
    match (right, bottom) {
        (Some(r), Some(b)) if r <= fb_width && b <= fb_height => Ok(()),
        _ => Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("capture region {region} exceeds framebuffer bounds {fb_width}x{fb_height}"),
        ))),
    }
}

/// Copies a rectangular region out of a larger pixel buffer.
///
/// Source rows are `src_pitch` bytes apart, destination rows are packed
/// tightly at `region.width * bytes_per_pixel`. Row `r` is read from
/// `(region.y + r) * src_pitch + region.x * bytes_per_pixel`.
pub fn copy_region(
    src: &[u8],
    src_pitch: usize,
    bytes_per_pixel: usize,
    region: &Region,
    dest: &mut [u8],
) -> Result<(), Box<dyn Error>> {
    if region.width == 0 || region.height == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("capture region {region} is empty"),
        )));
    }
    let row_len = region.width as usize * bytes_per_pixel;
    let x_bytes = region.x as usize * bytes_per_pixel;
    if dest.len() != row_len * region.height as usize {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "destination holds {} bytes, region {} needs {}",
                dest.len(),
                region,
                row_len * region.height as usize
            ),
        )));
    }
    if x_bytes + row_len > src_pitch {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("region {region} is wider than the source pitch {src_pitch}"),
        )));
    }
    let last_row = (region.y as usize + region.height as usize - 1) * src_pitch + x_bytes;
    if last_row + row_len > src.len() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("region {region} reads past the end of the source buffer"),
        )));
    }

    for (r, dest_row) in dest.chunks_exact_mut(row_len).enumerate() {
        let start = (region.y as usize + r) * src_pitch + x_bytes;
        dest_row.copy_from_slice(&src[start..start + row_len]);
    }
    Ok(())
}

/// Read-only memory mapping of a scanout dumb buffer.
///
/// The mapping covers `pitch * height` bytes of the card device at the
/// offset returned by the map-dumb ioctl and is unmapped on drop.
pub struct FramebufferMap {
    mmap: *mut u8,
    len: usize,
}

impl FramebufferMap {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.mmap, self.len) }
    }
}

impl Drop for FramebufferMap {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.mmap.cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed!");
        }
    }
}

/// GEM handle returned by the framebuffer query, closed on drop.
///
/// Holds a copy of the raw device fd; `Capture` field order guarantees the
/// descriptor outlives the handle.
struct GemHandle {
    fd: libc::c_int,
    handle: u32,
}

impl Drop for GemHandle {
    fn drop(&mut self) {
        let req = ioctl::drm_gem_close {
            handle: self.handle,
            pad: 0,
        };
        if let Err(err) = unsafe { ioctl::gem_close(self.fd, &req) } {
            warn!("GEM handle close failed: {err}");
        }
    }
}

/// An open capture session on the framebuffer a CRTC is scanning out.
///
/// Opening a session walks the device's CRTC list, queries the attached
/// framebuffer and maps its dumb buffer read-only into the process. Field
/// order keeps teardown safe: the mapping is released before the GEM
/// handle closes, and both before the device descriptor.
///
/// # Example
///
/// ```no_run
/// use edgefirst_kmscast::capture::{Capture, Region};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let capture = Capture::open("/dev/dri/card0", None)?;
/// let region = Region::new(0, 0, 640, 480);
/// let mut frame = vec![0u8; region.size(capture.bytes_per_pixel())];
/// capture.read_region(&region, &mut frame)?;
/// # Ok(())
/// # }
/// ```
pub struct Capture {
    map: FramebufferMap,
    _gem: GemHandle,
    _card: Card,
    fb_id: u32,
    width: u32,
    height: u32,
    pitch: u32,
    bpp: u32,
    depth: u32,
    format: Option<PixelFormat>,
}

impl Capture {
    /// Opens a card and maps the framebuffer the active CRTC scans out.
    ///
    /// With `crtc_index` set, the CRTC at that position in the card's CRTC
    /// list is used and must have a framebuffer attached. Without it the
    /// CRTCs are scanned in order and the first one driving a framebuffer
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device node cannot be opened
    /// - No CRTC is scanning out a framebuffer (display off or index wrong)
    /// - The kernel withholds the framebuffer GEM handle (requires DRM
    ///   master or CAP_SYS_ADMIN)
    /// - The dumb buffer cannot be mapped
    pub fn open<P: AsRef<Path>>(
        path: P,
        crtc_index: Option<usize>,
    ) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let card = Card::open(path)?;
        if let Ok(driver) = card.get_driver() {
            debug!(
                "{} opened, driver {}",
                path.display(),
                driver.name().to_string_lossy()
            );
        }

        let resources = card.resource_handles()?;
        let (crtc, fb_handle) = select_crtc(&card, resources.crtcs(), crtc_index)?;
        if let Some(mode) = crtc.mode() {
            let (mw, mh) = mode.size();
            debug!("CRTC mode {}x{}@{}", mw, mh, mode.vrefresh());
        }

        let fb_id = u32::from(fb_handle);
        let info = card.get_framebuffer(fb_handle)?;
        let (width, height) = info.size();
        let (pitch, bpp, depth) = (info.pitch(), info.bpp(), info.depth());
        debug!("framebuffer {fb_id}: {width}x{height} pitch {pitch} bpp {bpp} depth {depth}");
        if bpp % 8 != 0 {
            return Err(Box::new(io::Error::other(format!(
                "framebuffer bpp {bpp} is not byte aligned"
            ))));
        }

        let buffer = info.buffer().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::PermissionDenied,
                "kernel withheld the framebuffer GEM handle, run as DRM master or root",
            )
        })?;
        let gem = GemHandle {
            fd: card.as_fd().as_raw_fd(),
            handle: buffer.into(),
        };

        let mut req = ioctl::drm_mode_map_dumb {
            handle: gem.handle,
            ..Default::default()
        };
        unsafe { ioctl::mode_map_dumb(gem.fd, &mut req) }.map_err(|err| {
            io::Error::other(format!(
                "map-dumb failed ({err}), framebuffer {fb_id} may not be CPU mappable"
            ))
        })?;

        let len = pitch as usize * height as usize;
        let mmap = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                gem.fd,
                req.offset as libc::off_t,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(Box::new(io::Error::last_os_error()));
        }

        Ok(Self {
            map: FramebufferMap {
                mmap: mmap as *mut u8,
                len,
            },
            _gem: gem,
            _card: card,
            fb_id,
            width,
            height,
            pitch,
            bpp,
            depth,
            format: PixelFormat::from_fb(bpp, depth),
        })
    }

    /// Scans `/dev/dri/card0..15` and opens the first card with a CRTC
    /// actively scanning out.
    pub fn discover(crtc_index: Option<usize>) -> Result<Self, Box<dyn Error>> {
        let mut tried = Vec::new();
        for n in 0..16 {
            let path = PathBuf::from(format!("/dev/dri/card{n}"));
            if !path.exists() {
                continue;
            }
            match Self::open(&path, crtc_index) {
                Ok(capture) => {
                    info!("using {}", path.display());
                    return Ok(capture);
                }
                Err(err) => {
                    let reason = format!("{}: {err}", path.display());
                    debug!("{reason}");
                    tried.push(reason);
                }
            }
        }
        if tried.is_empty() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::NotFound,
                "no DRM card device found under /dev/dri",
            )));
        }
        Err(Box::new(io::Error::other(format!(
            "no DRM device with an active framebuffer found, tried {}",
            tried.join("; ")
        ))))
    }

    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Format detected from the framebuffer bpp/depth pair, when recognized.
    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bpp / 8) as usize
    }

    /// Copies `region` out of the live framebuffer into `dest`.
    ///
    /// `dest` must hold exactly `region.width * region.height` pixels at
    /// the framebuffer's byte depth. Bounds are checked on every call, not
    /// only at startup.
    pub fn read_region(&self, region: &Region, dest: &mut [u8]) -> Result<(), Box<dyn Error>> {
        validate_region(region, self.width, self.height)?;
        copy_region(
            self.map.as_slice(),
            self.pitch as usize,
            self.bytes_per_pixel(),
            region,
            dest,
        )
    }
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "framebuffer {} {}x{} pitch {} bpp {} depth {}",
            self.fb_id, self.width, self.height, self.pitch, self.bpp, self.depth
        )
    }
}

fn select_crtc(
    card: &Card,
    crtcs: &[crtc::Handle],
    index: Option<usize>,
) -> Result<(crtc::Info, framebuffer::Handle), Box<dyn Error>> {
    match index {
        Some(i) => {
            let handle = crtcs.get(i).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("CRTC index {i} out of range, device has {}", crtcs.len()),
                )
            })?;
            let info = card.get_crtc(*handle)?;
            match info.framebuffer() {
                Some(fb) => Ok((info, fb)),
                None => Err(Box::new(io::Error::other(format!(
                    "CRTC {} has no framebuffer attached",
                    u32::from(*handle)
                )))),
            }
        }
        None => {
            for (i, handle) in crtcs.iter().enumerate() {
                let info = match card.get_crtc(*handle) {
                    Ok(info) => info,
                    Err(err) => {
                        debug!("CRTC {} query failed: {}", u32::from(*handle), err);
                        continue;
                    }
                };
                if let Some(fb) = info.framebuffer() {
                    debug!("using CRTC {} (index {})", u32::from(*handle), i);
                    return Ok((info, fb));
                }
            }
            Err(Box::new(io::Error::other(
                "no CRTC is scanning out a framebuffer",
            )))
        }
    }
}
