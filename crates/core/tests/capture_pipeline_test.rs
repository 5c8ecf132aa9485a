//! Frames in, document out: detector, page encoding and assembly together

use async_trait::async_trait;
use docscan_core::{
    CapturedPage, CapturedPages, CollaboratorError, DocumentSink, SampleOutcome, ScanDocument,
    SessionId, StabilityConfig, StabilityDetector, VideoFrame,
};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Vertical bar at column `x` on a grey background
fn bar_frame(x: u32) -> VideoFrame {
    let (w, h) = (80, 60);
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for _y in 0..h {
        for col in 0..w {
            let v = if col >= x && col < x + 10 { 250 } else { 40 };
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    VideoFrame::from_rgba(w, h, data).unwrap()
}

fn config() -> StabilityConfig {
    StabilityConfig {
        analysis_width: 40,
        analysis_height: 30,
        ..Default::default()
    }
}

#[derive(Default)]
struct CollectingSink {
    documents: Mutex<Vec<ScanDocument>>,
}

#[async_trait]
impl DocumentSink for CollectingSink {
    async fn submit(&self, document: &ScanDocument) -> Result<(), CollaboratorError> {
        self.documents.lock().unwrap().push(document.clone());
        Ok(())
    }
}

#[test]
fn test_panning_then_holding_captures_once_per_hold() {
    let mut detector = StabilityDetector::new(config()).unwrap();
    let mut pages = CapturedPages::new();
    let start = Instant::now();
    let tick = |n: u64| start + Duration::from_millis(200 * n);

    // Camera sweeping across the desk: every frame differs.
    let mut n = 0;
    for x in (0..60).step_by(15) {
        let outcome = detector.sample(&bar_frame(x), tick(n)).unwrap();
        assert!(!outcome.is_capture(), "captured while panning at tick {}", n);
        n += 1;
    }

    // Held still over the page for two seconds.
    let held = bar_frame(30);
    let mut captures = Vec::new();
    for _ in 0..10 {
        if let SampleOutcome::Capture { score } = detector.sample(&held, tick(n)).unwrap() {
            assert!(score >= 0.88);
            pages.push(CapturedPage::encode(&held, 85).unwrap());
            captures.push(n);
        }
        n += 1;
    }
    // Three stable comparisons after the first held frame, then 2.5 s of cooldown.
    assert_eq!(captures, vec![7]);
    assert!(detector.in_cooldown(tick(n - 1)));

    // Next page after the cooldown.
    let next = bar_frame(45);
    n += 10;
    let mut later = Vec::new();
    for _ in 0..5 {
        if detector.sample(&next, tick(n)).unwrap().is_capture() {
            pages.push(CapturedPage::encode(&next, 85).unwrap());
            later.push(n);
        }
        n += 1;
    }
    assert_eq!(later.len(), 1);
    assert_eq!(pages.len(), 2);

    let session = SessionId::generate();
    let document = pages.to_document(&session);
    assert_eq!(document.page_count(), 2);
    assert!(document.pages.iter().all(|p| p.width == 80 && p.height == 60));

    let sink = CollectingSink::default();
    tokio_test::block_on(sink.submit(&document)).unwrap();
    assert_eq!(sink.documents.lock().unwrap()[0].session_id, session);
}

#[test]
fn test_retake_then_recapture() {
    let mut detector = StabilityDetector::new(StabilityConfig {
        cooldown_ms: 0,
        ..config()
    })
    .unwrap();
    let mut pages = CapturedPages::new();
    let frame = bar_frame(20);
    let start = Instant::now();

    let mut captured_at = Vec::new();
    for n in 0..8u64 {
        let now = start + Duration::from_millis(200 * n);
        if detector.sample(&frame, now).unwrap().is_capture() {
            captured_at.push(n);
            pages.push(CapturedPage::encode(&frame, 70).unwrap());
            if pages.len() == 1 {
                assert!(pages.retake_last().is_some());
            }
        }
    }

    // With no cooldown the run restarts right after each capture.
    assert_eq!(captured_at, vec![3, 6]);
    assert_eq!(pages.len(), 1);
}
