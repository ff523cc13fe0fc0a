//! Per-frame capture orchestration
//!
//! The capture callback thread drives [`CaptureSession::frame_arrived`]:
//! lazy dimension derivation on the first frame, parallel conversion,
//! optional resize, enqueue, then release of the vendor buffer. The
//! consumer thread polls the paired [`PreviewReceiver`] independently.

use crate::convert::ConversionEngine;
use crate::frame_queue::{self, FrameConsumer, FrameProducer};
use crate::framerate::FrameRateTracker;
use crate::resize::resize;
use crate::types::{PixelFormat, RawFrame, VideoError, VideoFrame};
use crate::worker_pool::WorkerPool;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Session configuration, consumed once at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Conversion workers; 0 derives a size from available parallelism.
    pub workers: usize,
    /// Pin conversion workers to cores past the reserved ones.
    pub pin_workers: bool,
    /// Target preview width; 0 disables resizing.
    pub preview_width: u32,
    /// Target preview height; 0 disables resizing.
    pub preview_height: u32,
    /// Pending-frame cap with drop-newest overflow; `None` processes every
    /// arrived frame unconditionally (the default).
    pub queue_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            workers: 0,
            pin_workers: false,
            preview_width: 0,
            preview_height: 0,
            queue_capacity: None,
        }
    }
}

/// Per-run constants derived from the first arrived frame.
#[derive(Debug, Clone, Copy)]
struct Dimensions {
    width: u32,
    height: u32,
    row_bytes: u32,
}

impl Dimensions {
    fn matches(&self, frame: &RawFrame) -> bool {
        self.width == frame.width()
            && self.height == frame.height()
            && self.row_bytes == frame.row_bytes()
    }
}

/// State shared between the capture and consumer halves.
struct SessionShared {
    frame_count: AtomicU64,
    framerate: FrameRateTracker,
    native_width: AtomicU32,
    native_height: AtomicU32,
    preview_width: AtomicU32,
    preview_height: AtomicU32,
}

/// Create a capture session and its consumer-side receiver.
pub fn session(config: SessionConfig) -> (CaptureSession, PreviewReceiver) {
    let workers = if config.workers == 0 {
        WorkerPool::default_size()
    } else {
        config.workers
    };
    let pool = WorkerPool::with_pinning(workers, config.pin_workers);
    let engine = ConversionEngine::new(pool);

    let (producer, consumer) = match config.queue_capacity {
        Some(capacity) => frame_queue::bounded(capacity),
        None => frame_queue::unbounded(),
    };

    let shared = Arc::new(SessionShared {
        frame_count: AtomicU64::new(0),
        framerate: FrameRateTracker::new(),
        native_width: AtomicU32::new(0),
        native_height: AtomicU32::new(0),
        preview_width: AtomicU32::new(config.preview_width),
        preview_height: AtomicU32::new(config.preview_height),
    });

    let session = CaptureSession {
        engine,
        producer,
        shared: Arc::clone(&shared),
        dims: None,
    };
    let receiver = PreviewReceiver { consumer, shared };
    (session, receiver)
}

/// Capture half: owned by the capture callback thread.
pub struct CaptureSession {
    engine: ConversionEngine,
    producer: FrameProducer,
    shared: Arc<SessionShared>,
    dims: Option<Dimensions>,
}

impl CaptureSession {
    /// Handle one arrived frame: convert, optionally resize, enqueue.
    ///
    /// Synchronous; returns after the conversion barrier, at which point
    /// the raw frame's release hook has run exactly once.
    pub fn frame_arrived(&mut self, frame: RawFrame) -> Result<(), VideoError> {
        self.shared.frame_count.fetch_add(1, Ordering::Relaxed);
        self.shared.framerate.record();

        if frame.format() != PixelFormat::Uyvy8 {
            return Err(VideoError::UnsupportedFormat(frame.format()));
        }

        match self.dims {
            Some(dims) if dims.matches(&frame) => {}
            Some(_) => {
                // geometry changed without a format-change notification
                log::warn!("frame geometry changed mid-stream, re-deriving dimensions");
                self.init_dimensions(&frame);
            }
            None => self.init_dimensions(&frame),
        }

        let converted = Arc::new(self.engine.convert_rgb(&frame));

        let preview_w = self.shared.preview_width.load(Ordering::Relaxed);
        let preview_h = self.shared.preview_height.load(Ordering::Relaxed);
        let delivered = if preview_w != 0 && preview_h != 0 {
            // resize() itself skips frames already matching on either axis
            resize(&converted, preview_w, preview_h)
        } else {
            converted
        };

        self.producer.produce(delivered);

        // all chunk workers are done; hand the vendor its buffer back
        drop(frame);
        Ok(())
    }

    /// Input format changed upstream. Geometry is not readable inside the
    /// notification, so dimensions are re-derived on the next arrival.
    pub fn format_changed(&mut self) {
        log::debug!("input format changed, dimensions reset");
        self.dims = None;
    }

    /// Set the preview target; 0 on either axis disables resizing.
    pub fn set_preview_size(&self, width: u32, height: u32) {
        self.shared.preview_width.store(width, Ordering::Relaxed);
        self.shared.preview_height.store(height, Ordering::Relaxed);
    }

    /// Resize the conversion pool. Configuration, not a hot-path call.
    pub fn set_worker_count(&mut self, workers: usize) {
        self.engine.set_worker_count(workers);
    }

    pub fn worker_count(&self) -> usize {
        self.engine.worker_count()
    }

    /// Frames discarded by the bounded overflow policy, if configured.
    pub fn dropped_frames(&self) -> u64 {
        self.producer.dropped_frames()
    }

    fn init_dimensions(&mut self, frame: &RawFrame) {
        let dims = Dimensions {
            width: frame.width(),
            height: frame.height(),
            row_bytes: frame.row_bytes(),
        };
        log::info!(
            "capture dimensions: {}x{}, {} row bytes",
            dims.width,
            dims.height,
            dims.row_bytes
        );
        self.shared.native_width.store(dims.width, Ordering::Relaxed);
        self.shared
            .native_height
            .store(dims.height, Ordering::Relaxed);
        self.dims = Some(dims);
    }
}

/// Consumer half: polled by the display/processing thread.
pub struct PreviewReceiver {
    consumer: FrameConsumer,
    shared: Arc<SessionShared>,
}

impl PreviewReceiver {
    /// Take the next converted frame, or `None` when nothing is pending.
    /// Never blocks; only fully converted frames are ever returned.
    pub fn poll_frame(&mut self) -> Option<Arc<VideoFrame>> {
        self.consumer.consume()
    }

    /// Estimated delivered frame rate.
    pub fn frame_rate(&self) -> f32 {
        self.shared.framerate.rate()
    }

    /// Cumulative number of arrived frames.
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    /// Configured preview width, or the native width when no preview size
    /// is set. 0 until the first frame has arrived.
    pub fn width(&self) -> u32 {
        match self.shared.preview_width.load(Ordering::Relaxed) {
            0 => self.native_width(),
            w => w,
        }
    }

    /// See [`width`](Self::width).
    pub fn height(&self) -> u32 {
        match self.shared.preview_height.load(Ordering::Relaxed) {
            0 => self.native_height(),
            h => h,
        }
    }

    /// Native capture width, known after the first frame.
    pub fn native_width(&self) -> u32 {
        self.shared.native_width.load(Ordering::Relaxed)
    }

    /// Native capture height, known after the first frame.
    pub fn native_height(&self) -> u32 {
        self.shared.native_height.load(Ordering::Relaxed)
    }

    /// Frames currently pending consumption.
    pub fn pending(&self) -> usize {
        self.consumer.len()
    }
}
