// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_kmscast::{
    capture::{copy_region, validate_region, Capture, PixelFormat, Region},
    pipeline::PipelineSpec,
};
use serial_test::serial;
use std::{error::Error, io, path::Path};

/// Byte value for channel `c` of the pixel at `(x, y)`, position dependent
/// so shifted or misaligned copies change the data.
fn pixel_byte(x: usize, y: usize, c: usize) -> u8 {
    (x.wrapping_mul(31) ^ y.wrapping_mul(17) ^ c.wrapping_mul(7)) as u8
}

fn synthetic_fb(width: usize, height: usize, pitch: usize, bpp: usize) -> Vec<u8> {
    let mut fb = vec![0u8; pitch * height];
    for y in 0..height {
        for x in 0..width {
            for c in 0..bpp {
                fb[y * pitch + x * bpp + c] = pixel_byte(x, y, c);
            }
        }
    }
    fb
}

#[test]
fn test_copy() -> Result<(), Box<dyn Error>> {
    // tight pitch, full-frame region: output equals input
    let fb = synthetic_fb(8, 4, 8 * 4, 4);
    let region = Region::new(0, 0, 8, 4);
    let mut dest = vec![0u8; region.size(4)];

    copy_region(&fb, 8 * 4, 4, &region, &mut dest)?;
    assert_eq!(dest, fb);
    Ok(())
}

#[test]
fn test_copy_offset() -> Result<(), Box<dyn Error>> {
    // padded pitch and an interior region, every byte must come from the
    // matching framebuffer coordinate
    let (width, height, bpp) = (16, 8, 4);
    let pitch = width * bpp + 12;
    let fb = synthetic_fb(width, height, pitch, bpp);
    let region = Region::new(3, 5, 7, 2);
    let mut dest = vec![0u8; region.size(bpp)];

    copy_region(&fb, pitch, bpp, &region, &mut dest)?;
    for dy in 0..region.height as usize {
        for dx in 0..region.width as usize {
            for c in 0..bpp {
                let v = dest[(dy * region.width as usize + dx) * bpp + c];
                assert_eq!(v, pixel_byte(dx + 3, dy + 5, c));
            }
        }
    }
    Ok(())
}

#[test]
fn test_copy_edges() -> Result<(), Box<dyn Error>> {
    let (width, height, bpp) = (16, 8, 4);
    let pitch = width * bpp + 8;
    let fb = synthetic_fb(width, height, pitch, bpp);

    // flush with the right and bottom edges is still in bounds
    let region = Region::new(9, 4, 7, 4);
    validate_region(&region, width as u32, height as u32)?;
    let mut dest = vec![0u8; region.size(bpp)];
    copy_region(&fb, pitch, bpp, &region, &mut dest)?;
    for c in 0..bpp {
        let last = dest.len() - bpp + c;
        assert_eq!(dest[last], pixel_byte(15, 7, c));
    }

    // one pixel past either edge is not
    assert!(validate_region(&Region::new(10, 4, 7, 4), 16, 8).is_err());
    assert!(validate_region(&Region::new(9, 5, 7, 4), 16, 8).is_err());
    Ok(())
}

#[test]
fn test_copy_guards() -> Result<(), Box<dyn Error>> {
    let (width, height, bpp) = (8, 4, 4);
    let pitch = width * bpp;
    let fb = synthetic_fb(width, height, pitch, bpp);
    let region = Region::new(0, 0, 8, 4);

    // destination size must match the region exactly
    let mut small = vec![0u8; region.size(bpp) - 1];
    assert!(copy_region(&fb, pitch, bpp, &region, &mut small).is_err());

    // region wider than the source pitch
    let mut dest = vec![0u8; region.size(bpp)];
    assert!(copy_region(&fb, pitch - 4, bpp, &region, &mut dest).is_err());

    // source buffer missing its last row
    let truncated = &fb[..pitch * (height - 1)];
    assert!(copy_region(truncated, pitch, bpp, &region, &mut dest).is_err());
    Ok(())
}

#[test]
fn test_copy_empty() -> Result<(), Box<dyn Error>> {
    // zero-sized regions are rejected up front, never copied as zero rows
    let fb = synthetic_fb(8, 4, 8 * 4, 4);
    for region in [
        Region::new(0, 0, 0, 2),
        Region::new(0, 0, 4, 0),
        Region::new(2, 1, 0, 0),
    ] {
        let err = copy_region(&fb, 8 * 4, 4, &region, &mut []).unwrap_err();
        let err = err
            .downcast_ref::<io::Error>()
            .ok_or("copy error should be an io::Error")?;
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
    Ok(())
}

#[test]
fn test_region_bounds() -> Result<(), Box<dyn Error>> {
    assert!(validate_region(&Region::new(0, 0, 0, 480), 1920, 1080).is_err());
    assert!(validate_region(&Region::new(0, 0, 640, 0), 1920, 1080).is_err());
    assert!(validate_region(&Region::new(1920, 0, 1, 1), 1920, 1080).is_err());
    assert!(validate_region(&Region::new(0, 1080, 1, 1), 1920, 1080).is_err());

    // offsets near u32::MAX must not wrap into range
    assert!(validate_region(&Region::new(u32::MAX, 0, 2, 2), 1920, 1080).is_err());
    assert!(validate_region(&Region::new(0, u32::MAX, 2, 2), 1920, 1080).is_err());

    validate_region(&Region::new(0, 0, 1920, 1080), 1920, 1080)?;
    validate_region(&Region::new(100, 100, 640, 480), 1920, 1080)?;
    Ok(())
}

#[test]
fn test_formats() -> Result<(), Box<dyn Error>> {
    assert_eq!(PixelFormat::from_fb(32, 24), Some(PixelFormat::Xrgb8888));
    assert_eq!(PixelFormat::from_fb(32, 32), Some(PixelFormat::Argb8888));
    assert_eq!(PixelFormat::from_fb(24, 24), Some(PixelFormat::Rgb888));
    assert_eq!(PixelFormat::from_fb(16, 16), Some(PixelFormat::Rgb565));
    assert_eq!(PixelFormat::from_fb(32, 30), None);
    assert_eq!(PixelFormat::from_fb(8, 8), None);
    // no format covers a bpp that is not byte aligned
    assert_eq!(PixelFormat::from_fb(15, 15), None);

    assert_eq!(PixelFormat::Xrgb8888.bytes_per_pixel(), 4);
    assert_eq!(PixelFormat::Argb8888.bytes_per_pixel(), 4);
    assert_eq!(PixelFormat::Rgb888.bytes_per_pixel(), 3);
    assert_eq!(PixelFormat::Rgb565.bytes_per_pixel(), 2);

    assert_eq!(PixelFormat::Xrgb8888.gst_format(), "bgrx");
    assert_eq!(PixelFormat::Argb8888.gst_format(), "bgra");
    assert_eq!(PixelFormat::Rgb888.gst_format(), "bgr");
    assert_eq!(PixelFormat::Rgb565.gst_format(), "rgb16");

    let region = Region::new(100, 100, 640, 480);
    assert_eq!(region.size(4), 1228800);
    assert_eq!(region.to_string(), "640x480+100+100");
    Ok(())
}

#[test]
fn test_pipeline_args() -> Result<(), Box<dyn Error>> {
    let spec = PipelineSpec {
        width: 640,
        height: 480,
        fps: 25,
        format: PixelFormat::Xrgb8888,
        sink: "autovideosink sync=false".to_string(),
        launch: None,
    };
    let expected: Vec<String> = [
        "fdsrc",
        "!",
        "videoparse",
        "width=640",
        "height=480",
        "format=bgrx",
        "framerate=25/1",
        "!",
        "videoconvert",
        "!",
        "videorate",
        "!",
        "video/x-raw,framerate=25/1",
        "!",
        "autovideosink",
        "sync=false",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(spec.to_args(), expected);
    Ok(())
}

#[test]
fn test_pipeline_sink() -> Result<(), Box<dyn Error>> {
    let spec = PipelineSpec {
        width: 640,
        height: 480,
        fps: 30,
        format: PixelFormat::Argb8888,
        sink: "waylandsink window-width=640 window-height=480 sync=false".to_string(),
        launch: None,
    };
    let args = spec.to_args();
    assert_eq!(args[5], "format=bgra");
    assert_eq!(args[6], "framerate=30/1");
    let tail: Vec<&str> = args[args.len() - 4..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        [
            "waylandsink",
            "window-width=640",
            "window-height=480",
            "sync=false"
        ]
    );
    Ok(())
}

#[test]
fn test_pipeline_launch() -> Result<(), Box<dyn Error>> {
    let spec = PipelineSpec {
        width: 640,
        height: 480,
        fps: 25,
        format: PixelFormat::Xrgb8888,
        sink: "autovideosink sync=false".to_string(),
        launch: Some("fakesink dump=true".to_string()),
    };
    let expected: Vec<String> = ["fdsrc", "!", "fakesink", "dump=true"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(spec.to_args(), expected);
    Ok(())
}

#[test]
#[serial]
fn test_discover_error() -> Result<(), Box<dyn Error>> {
    // an impossible CRTC index fails on every card, and the terminal error
    // names each device that was tried
    let err = match Capture::discover(Some(usize::MAX)) {
        Ok(_) => return Err("discover accepted an out-of-range CRTC index".into()),
        Err(err) => err.to_string(),
    };
    let cards: Vec<String> = (0..16)
        .map(|n| format!("/dev/dri/card{n}"))
        .filter(|path| Path::new(path).exists())
        .collect();
    if cards.is_empty() {
        assert!(err.contains("no DRM card device"), "{err}");
    } else {
        for card in &cards {
            assert!(err.contains(card.as_str()), "{err}");
        }
    }
    Ok(())
}

#[test]
#[serial]
#[ignore = "framebuffer test is disabled by default (run with --include-ignored to enable)"]
fn test_capture() -> Result<(), Box<dyn Error>> {
    let capture = Capture::discover(None)?;
    println!("{}", capture);

    let region = Region::new(0, 0, capture.width().min(64), capture.height().min(64));
    let mut frame = vec![0u8; region.size(capture.bytes_per_pixel())];
    capture.read_region(&region, &mut frame)?;

    println!("captured {} bytes from {}", frame.len(), region);
    Ok(())
}
