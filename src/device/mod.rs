//! Frame sources.
//!
//! A depth source is a small capability interface — poll a frame, start,
//! stop — rather than a device class hierarchy. Two implementations:
//! [`RawFileDevice`] replays recorded depth dumps, [`SyntheticDevice`]
//! renders an analytic plane scene for tests and benchmarks without
//! hardware.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

use crate::geometry::camera::CameraIntrinsics;
use crate::imaging::image::Image;

/// A source of depth frames in raw sensor units (millimeters).
pub trait DepthSource {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn intrinsics(&self) -> CameraIntrinsics;

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    /// Fill `buffer` with the next depth frame. Returns `false` when the
    /// source is exhausted.
    fn poll_depth(&mut self, buffer: &mut Image<f32>) -> Result<bool>;
}

/// Replays depth frames from a binary dump: consecutive frames of
/// `width × height` little-endian u16 millimeter values, no header.
pub struct RawFileDevice {
    reader: BufReader<File>,
    width: usize,
    height: usize,
    intrinsics: CameraIntrinsics,
    frame_bytes: Vec<u8>,
}

impl RawFileDevice {
    pub fn open<P: AsRef<Path>>(
        path: P,
        width: usize,
        height: usize,
        intrinsics: CameraIntrinsics,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening depth dump {}", path.as_ref().display()))?;
        Ok(Self {
            reader: BufReader::new(file),
            width,
            height,
            intrinsics,
            frame_bytes: vec![0; width * height * 2],
        })
    }
}

impl DepthSource for RawFileDevice {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    fn poll_depth(&mut self, buffer: &mut Image<f32>) -> Result<bool> {
        anyhow::ensure!(
            buffer.width() == self.width && buffer.height() == self.height,
            "depth buffer is {}x{}, device is {}x{}",
            buffer.width(),
            buffer.height(),
            self.width,
            self.height
        );

        match self.reader.read_exact(&mut self.frame_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e).context("reading depth frame"),
        }

        for (out, bytes) in buffer
            .as_mut_slice()
            .iter_mut()
            .zip(self.frame_bytes.chunks_exact(2))
        {
            *out = u16::from_le_bytes([bytes[0], bytes[1]]) as f32;
        }
        Ok(true)
    }
}

/// Renders a static fronto-parallel plane at a fixed distance, for a
/// fixed number of frames. Every pixel observes the same depth, which is
/// exactly the scene the end-to-end tracking scenario expects.
pub struct SyntheticDevice {
    width: usize,
    height: usize,
    intrinsics: CameraIntrinsics,
    plane_depth_m: f32,
    remaining: usize,
}

impl SyntheticDevice {
    pub fn new(
        width: usize,
        height: usize,
        intrinsics: CameraIntrinsics,
        plane_depth_m: f32,
        frames: usize,
    ) -> Self {
        Self {
            width,
            height,
            intrinsics,
            plane_depth_m,
            remaining: frames,
        }
    }
}

impl DepthSource for SyntheticDevice {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    fn poll_depth(&mut self, buffer: &mut Image<f32>) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.remaining -= 1;
        buffer.fill(self.plane_depth_m * 1000.0);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(531.15, 531.15, 320.0, 240.0)
    }

    #[test]
    fn synthetic_device_emits_requested_frames() {
        let mut device = SyntheticDevice::new(8, 6, intrinsics(), 1.0, 2);
        let mut buffer = Image::filled(8, 6, 0.0f32);
        assert!(device.poll_depth(&mut buffer).unwrap());
        assert_eq!(buffer.get(3, 3), 1000.0);
        assert!(device.poll_depth(&mut buffer).unwrap());
        assert!(!device.poll_depth(&mut buffer).unwrap());
    }

    #[test]
    fn raw_file_device_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("rust_kinfu_raw_device_test.bin");

        // Two 2x2 frames of known millimeter values.
        let frames: [[u16; 4]; 2] = [[1000, 1500, 2000, 0], [1100, 1600, 2100, 50]];
        let mut bytes = Vec::new();
        for frame in &frames {
            for value in frame {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        std::fs::write(&path, &bytes).unwrap();

        let mut device = RawFileDevice::open(&path, 2, 2, intrinsics()).unwrap();
        let mut buffer = Image::filled(2, 2, 0.0f32);

        assert!(device.poll_depth(&mut buffer).unwrap());
        assert_eq!(buffer.get(0, 0), 1000.0);
        assert_eq!(buffer.get(1, 1), 0.0);

        assert!(device.poll_depth(&mut buffer).unwrap());
        assert_eq!(buffer.get(0, 0), 1100.0);

        assert!(!device.poll_depth(&mut buffer).unwrap());
        std::fs::remove_file(&path).ok();
    }
}
