//! Captured pages and the document assembled from them

use crate::frame::VideoFrame;
use crate::session::SessionId;
use crate::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One full-resolution page, JPEG encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPage {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl CapturedPage {
    /// Encode a full-resolution frame at the given JPEG quality (1-100)
    pub fn encode(frame: &VideoFrame, quality: u8) -> Result<Self> {
        let rgb = frame.to_rgb();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
            .map_err(|e| Error::Encoding(e.to_string()))?;

        Ok(Self {
            width: frame.width(),
            height: frame.height(),
            jpeg,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.jpeg.len()
    }
}

impl fmt::Debug for CapturedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedPage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("jpeg_bytes", &self.jpeg.len())
            .finish()
    }
}

/// Append-only page list in capture order
///
/// The only removal is [`CapturedPages::retake_last`], which pops the tail.
#[derive(Debug, Clone, Default)]
pub struct CapturedPages {
    pages: Vec<CapturedPage>,
}

impl CapturedPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page and return the new page count
    pub fn push(&mut self, page: CapturedPage) -> usize {
        self.pages.push(page);
        self.pages.len()
    }

    /// Discard the most recent page
    pub fn retake_last(&mut self) -> Option<CapturedPage> {
        self.pages.pop()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[CapturedPage] {
        &self.pages
    }

    /// Snapshot the pages as a document for `session_id`
    pub fn to_document(&self, session_id: &SessionId) -> ScanDocument {
        ScanDocument {
            session_id: session_id.clone(),
            pages: self.pages.clone(),
        }
    }
}

/// Ordered pages of one completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDocument {
    pub session_id: SessionId,
    pub pages: Vec<CapturedPage>,
}

impl ScanDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}
