// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::capture::PixelFormat;
use std::{
    error::Error,
    io::{self, Write},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};
use tracing::{debug, warn};

/// Parameters for the spawned gst-launch-1.0 process.
///
/// The default chain parses the raw frames written to the child's stdin
/// and hands them to a sink:
///
/// ```text
/// fdsrc ! videoparse width=W height=H format=F framerate=FPS/1
///       ! videoconvert ! videorate ! video/x-raw,framerate=FPS/1 ! SINK
/// ```
///
/// `sink` replaces the sink element verbatim, e.g. `waylandsink
/// window-width=640 window-height=480 sync=false` or an i.MX chain
/// starting with `imxvideoconvert_g2d`. `launch` replaces the entire
/// chain after `fdsrc !` for full control.
pub struct PipelineSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub sink: String,
    pub launch: Option<String>,
}

impl PipelineSpec {
    /// Builds the gst-launch-1.0 argument list for this spec.
    ///
    /// Tokens are split on whitespace; the caps used here never contain
    /// spaces.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["fdsrc".to_string(), "!".to_string()];
        match &self.launch {
            Some(launch) => args.extend(launch.split_whitespace().map(str::to_string)),
            None => {
                args.extend([
                    "videoparse".to_string(),
                    format!("width={}", self.width),
                    format!("height={}", self.height),
                    format!("format={}", self.format.gst_format()),
                    format!("framerate={}/1", self.fps),
                    "!".to_string(),
                    "videoconvert".to_string(),
                    "!".to_string(),
                    "videorate".to_string(),
                    "!".to_string(),
                    format!("video/x-raw,framerate={}/1", self.fps),
                    "!".to_string(),
                ]);
                args.extend(self.sink.split_whitespace().map(str::to_string));
            }
        }
        args
    }
}

/// A running gst-launch-1.0 child consuming raw frames on stdin.
pub struct GstPipeline {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl GstPipeline {
    /// Spawns gst-launch-1.0 with a piped stdin.
    ///
    /// The child inherits stdout and stderr so pipeline messages stay
    /// visible alongside the service logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary is missing (GStreamer tools not
    /// installed) or the process cannot be spawned.
    pub fn spawn(spec: &PipelineSpec) -> Result<Self, Box<dyn Error>> {
        let args = spec.to_args();
        debug!("gst-launch-1.0 {}", args.join(" "));
        let mut child = Command::new("gst-launch-1.0")
            .args(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        "gst-launch-1.0 not found, install the GStreamer tools",
                    )
                } else {
                    err
                }
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not piped"))?;
        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    /// Writes one raw frame into the pipeline.
    ///
    /// A `BrokenPipe` error means the pipeline has gone away (sink window
    /// closed or the child exited) and the stream is over.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match &mut self.stdin {
            Some(stdin) => {
                stdin.write_all(frame)?;
                stdin.flush()
            }
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipeline already shut down",
            )),
        }
    }

    /// Closes the frame pipe and waits for the child to drain and exit.
    pub fn shutdown(&mut self) -> io::Result<ExitStatus> {
        drop(self.stdin.take());
        self.child.wait()
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(err) = self.child.kill() {
            warn!("gst-launch kill failed: {err}");
        }
        _ = self.child.wait();
    }
}
