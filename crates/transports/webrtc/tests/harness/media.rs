//! Synthetic camera frames for scan tests

use docscan_core::{VideoFrame, VideoSource};
use parking_lot::Mutex;

/// Frame generator for document-like test images
pub struct FrameGenerator {
    width: u32,
    height: u32,
}

impl FrameGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A white sheet on a dark desk, shifted `offset` pixels to the right
    ///
    /// Different offsets simulate the camera moving between samples.
    pub fn page(&self, offset: u32) -> VideoFrame {
        let (w, h) = (self.width, self.height);
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let sx = x.wrapping_sub(offset);
                let on_sheet = sx >= w / 4 && sx < w * 3 / 4 && y >= h / 8 && y < h * 7 / 8;
                let text_line = on_sheet && (y / 4) % 3 == 0 && sx % 7 != 0;
                let rgb = if text_line {
                    [20, 20, 20]
                } else if on_sheet {
                    [245, 245, 240]
                } else {
                    [60, 40, 30]
                };
                data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
            }
        }
        match VideoFrame::from_rgba(w, h, data) {
            Ok(frame) => frame,
            Err(e) => panic!("generated frame invalid: {}", e),
        }
    }

    /// Uniform frame, maximally different from `page`
    pub fn flat(&self, rgb: [u8; 3]) -> VideoFrame {
        VideoFrame::filled(self.width, self.height, [rgb[0], rgb[1], rgb[2], 255])
    }
}

/// Camera preview whose current frame the test controls
#[derive(Default)]
pub struct ScriptedVideo {
    frame: Mutex<Option<VideoFrame>>,
}

impl ScriptedVideo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, frame: VideoFrame) {
        *self.frame.lock() = Some(frame);
    }

    pub fn blank(&self) {
        *self.frame.lock() = None;
    }
}

impl VideoSource for ScriptedVideo {
    fn current_frame(&self) -> Option<VideoFrame> {
        self.frame.lock().clone()
    }
}
