//! Parallel UYVY to RGB/grayscale conversion
//!
//! A frame's byte range is split into contiguous, macropixel-aligned chunks
//! (one per worker, aligned to whole source rows when they fit) and fanned
//! out over the pool; each worker writes a disjoint destination range, so
//! no locking is needed. The engine returns only after the barrier, so a
//! partially converted frame is never observable downstream.

use crate::lut::LookupTables;
use crate::types::{ColorSpace, RawFrame, VideoFrame};
use crate::worker_pool::{Task, WorkerPool};
use std::sync::Arc;
use std::time::Instant;

/// Bytes per UYVY macropixel (two pixels sharing one chroma pair).
const MACROPIXEL_BYTES: usize = 4;

/// One contiguous source byte range assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkSpan {
    pub offset: usize,
    pub len: usize,
}

/// Split `total_bytes` into up to `workers` chunks.
///
/// All chunks but the last share one size, rounded down to whole source
/// rows when a row fits in a chunk (cache locality), otherwise to whole
/// macropixels. The last chunk absorbs the remainder, so the spans always
/// cover the input exactly; when the total is an exact multiple the last
/// chunk is a full-size chunk, never empty.
pub(crate) fn chunk_spans(total_bytes: usize, workers: usize, row_bytes: usize) -> Vec<ChunkSpan> {
    if total_bytes == 0 {
        return Vec::new();
    }

    let workers = workers.max(1);
    let base = total_bytes / workers;

    let align = if row_bytes >= MACROPIXEL_BYTES
        && row_bytes % MACROPIXEL_BYTES == 0
        && base >= row_bytes
    {
        row_bytes
    } else {
        MACROPIXEL_BYTES
    };

    let chunk = base - base % align;
    if chunk == 0 {
        // frame smaller than one aligned chunk per worker
        return vec![ChunkSpan {
            offset: 0,
            len: total_bytes,
        }];
    }

    let mut spans = Vec::with_capacity(workers);
    for i in 0..workers - 1 {
        spans.push(ChunkSpan {
            offset: i * chunk,
            len: chunk,
        });
    }
    spans.push(ChunkSpan {
        offset: (workers - 1) * chunk,
        len: total_bytes - (workers - 1) * chunk,
    });
    spans
}

#[derive(Clone, Copy)]
struct SrcPtr(*const u8);
#[derive(Clone, Copy)]
struct DstPtr(*mut u8);

// SAFETY: the pointers address buffers that outlive the conversion barrier,
// and every worker writes a disjoint destination range.
unsafe impl Send for SrcPtr {}
unsafe impl Send for DstPtr {}

/// Converts raw frames using precomputed tables, parallelized over a fixed
/// worker pool. Synchronous from the caller's perspective.
pub struct ConversionEngine {
    tables: Arc<LookupTables>,
    pool: WorkerPool,
}

impl ConversionEngine {
    /// Build the lookup tables and take ownership of the pool.
    pub fn new(pool: WorkerPool) -> Self {
        let start = Instant::now();
        let tables = Arc::new(LookupTables::build());
        log::debug!("lookup tables built in {:?}", start.elapsed());

        ConversionEngine { tables, pool }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Resize the worker pool. Only callable between frames (exclusive
    /// access), never during a conversion.
    pub fn set_worker_count(&mut self, workers: usize) {
        self.pool.set_size(workers);
    }

    /// Convert one packed 4:2:2 frame into interleaved RGB of the same
    /// pixel dimensions.
    pub fn convert_rgb(&self, src: &RawFrame) -> VideoFrame {
        let width = src.width();
        let height = src.height();
        let mut out = VideoFrame::new(width, height, width * 3, ColorSpace::Rgb);

        let spans = chunk_spans(
            src.total_bytes(),
            self.pool.size(),
            src.row_bytes() as usize,
        );
        let src_ptr = SrcPtr(src.bytes().as_ptr());
        let dst_ptr = DstPtr(out.pixels_mut().as_mut_ptr());

        let tasks: Vec<Task> = spans
            .into_iter()
            .map(|span| {
                let tables = Arc::clone(&self.tables);
                Box::new(move || {
                    // SAFETY: span offsets are macropixel-aligned and
                    // disjoint; the barrier below keeps both buffers alive
                    // until every chunk is done
                    unsafe { convert_chunk_rgb(&tables, src_ptr, dst_ptr, span) };
                }) as Task
            })
            .collect();

        self.pool.run_batch(tasks);
        out
    }

    /// Convert one packed 4:2:2 frame to grayscale by keeping only the luma
    /// samples. Same chunking and pool as the RGB path.
    pub fn convert_grayscale(&self, src: &RawFrame) -> VideoFrame {
        let width = src.width();
        let height = src.height();
        let mut out = VideoFrame::new(width, height, width, ColorSpace::Grayscale);

        let spans = chunk_spans(
            src.total_bytes(),
            self.pool.size(),
            src.row_bytes() as usize,
        );
        let src_ptr = SrcPtr(src.bytes().as_ptr());
        let dst_ptr = DstPtr(out.pixels_mut().as_mut_ptr());

        let tasks: Vec<Task> = spans
            .into_iter()
            .map(|span| {
                Box::new(move || {
                    // SAFETY: as in convert_rgb
                    unsafe { convert_chunk_grayscale(src_ptr, dst_ptr, span) };
                }) as Task
            })
            .collect();

        self.pool.run_batch(tasks);
        out
    }
}

/// Convert one source chunk: each 4-byte macropixel [U, Y0, V, Y1] expands
/// to two RGB pixels via the tables.
///
/// # Safety
/// `span` must be macropixel-aligned and within the source buffer; the
/// corresponding destination range (`offset/4*6`, `len/4*6`) must be within
/// the destination buffer and disjoint from every other chunk's range.
unsafe fn convert_chunk_rgb(tables: &LookupTables, src: SrcPtr, dst: DstPtr, span: ChunkSpan) {
    let src = std::slice::from_raw_parts(src.0.add(span.offset), span.len);
    let dst = std::slice::from_raw_parts_mut(dst.0.add(span.offset / 4 * 6), span.len / 4 * 6);

    let mut j = 0;
    for macropixel in src.chunks_exact(4) {
        let u = macropixel[0];
        let y0 = macropixel[1];
        let v = macropixel[2];
        let y1 = macropixel[3];

        dst[j] = tables.red(y0, v);
        dst[j + 1] = tables.green(y0, u, v);
        dst[j + 2] = tables.blue(y0, u);

        dst[j + 3] = tables.red(y1, v);
        dst[j + 4] = tables.green(y1, u, v);
        dst[j + 5] = tables.blue(y1, u);

        j += 6;
    }
}

/// Grayscale chunk conversion: keep every luma byte, discard the chroma.
///
/// # Safety
/// Same contract as [`convert_chunk_rgb`], with a destination range of
/// (`offset/2`, `len/2`).
unsafe fn convert_chunk_grayscale(src: SrcPtr, dst: DstPtr, span: ChunkSpan) {
    let src = std::slice::from_raw_parts(src.0.add(span.offset), span.len);
    let dst = std::slice::from_raw_parts_mut(dst.0.add(span.offset / 2), span.len / 2);

    for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
        // UYVY interleaves chroma and luma; the luma is the second byte
        *out = pair[1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    fn reference_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
        let clamp = |x: f64| x.clamp(0.0, 255.0).round() as u8;
        let luma = 1.164 * (y as f64 - 16.0);
        [
            clamp(luma + 1.793 * (v as f64 - 128.0)),
            clamp(luma - 0.534 * (v as f64 - 128.0) - 0.213 * (u as f64 - 128.0)),
            clamp(luma + 2.115 * (u as f64 - 128.0)),
        ]
    }

    fn uyvy_frame(width: u32, height: u32, data: &[u8]) -> RawFrame {
        unsafe {
            RawFrame::from_raw_parts(
                data.as_ptr(),
                data.len(),
                width,
                height,
                width * 2,
                PixelFormat::Uyvy8,
                || {},
            )
        }
        .unwrap()
    }

    #[test]
    fn test_chunk_spans_cover_total_exactly() {
        for &(total, workers, row) in &[
            (3840usize * 1080, 8usize, 3840usize),
            (3840 * 1080, 6, 3840),
            (1280 * 720 * 2, 4, 1280 * 2),
            (100, 3, 20),
            (4, 8, 4),
            (1024, 1, 64),
        ] {
            let spans = chunk_spans(total, workers, row);
            assert!(!spans.is_empty());

            let mut expected_offset = 0;
            for span in &spans {
                assert_eq!(span.offset, expected_offset, "spans must be contiguous");
                assert_eq!(span.offset % 4, 0, "chunk boundary not macropixel aligned");
                expected_offset += span.len;
            }
            assert_eq!(expected_offset, total, "spans must cover the input");
        }
    }

    #[test]
    fn test_chunk_aligned_total_has_full_last_chunk() {
        // total divisible by workers and rows: last chunk is a full chunk
        let spans = chunk_spans(3840 * 1080, 8, 3840);
        let first = spans[0].len;
        assert_eq!(spans.last().unwrap().len, first);
        assert!(first > 0);
    }

    #[test]
    fn test_chunk_spans_row_aligned_when_possible() {
        let row = 1920 * 2;
        let spans = chunk_spans(row * 1080, 8, row);
        for span in &spans {
            assert_eq!(span.offset % row, 0, "chunk should start on a row boundary");
        }
    }

    #[test]
    fn test_tiny_frame_single_span() {
        let spans = chunk_spans(8, 16, 8);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], ChunkSpan { offset: 0, len: 8 });
    }

    #[test]
    fn test_peak_white_macropixel() {
        let engine = ConversionEngine::new(WorkerPool::new(2));

        // BT.601 peak white with neutral chroma
        let data = [128u8, 235, 128, 235];
        let raw = uyvy_frame(2, 1, &data);
        let rgb = engine.convert_rgb(&raw);

        assert_eq!(rgb.colorspace(), ColorSpace::Rgb);
        assert_eq!(rgb.pixels(), &[255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_conversion_matches_reference() {
        let engine = ConversionEngine::new(WorkerPool::new(3));

        // 4x2 frame with varied luma/chroma per macropixel
        let width = 4u32;
        let height = 2u32;
        let mut data = Vec::new();
        let macropixels: [[u8; 4]; 4] = [
            [128, 16, 128, 235],
            [90, 81, 240, 145],
            [54, 100, 34, 200],
            [255, 0, 0, 255],
        ];
        for m in &macropixels {
            data.extend_from_slice(m);
        }

        let raw = uyvy_frame(width, height, &data);
        let rgb = engine.convert_rgb(&raw);
        assert_eq!(rgb.pixels().len(), (width * height * 3) as usize);

        for (i, &[u, y0, v, y1]) in macropixels.iter().enumerate() {
            let p0 = reference_rgb(y0, u, v);
            let p1 = reference_rgb(y1, u, v);
            assert_eq!(&rgb.pixels()[i * 6..i * 6 + 3], &p0, "macropixel {i} pixel 0");
            assert_eq!(&rgb.pixels()[i * 6 + 3..i * 6 + 6], &p1, "macropixel {i} pixel 1");
        }
    }

    #[test]
    fn test_multi_worker_matches_single_worker() {
        let single = ConversionEngine::new(WorkerPool::new(1));
        let multi = ConversionEngine::new(WorkerPool::new(4));

        let width = 64u32;
        let height = 8u32;
        let data: Vec<u8> = (0..width as usize * 2 * height as usize)
            .map(|i| (i * 31 % 256) as u8)
            .collect();

        let raw_a = uyvy_frame(width, height, &data);
        let raw_b = uyvy_frame(width, height, &data);

        let a = single.convert_rgb(&raw_a);
        let b = multi.convert_rgb(&raw_b);
        assert_eq!(a.pixels(), b.pixels());
    }

    #[test]
    fn test_grayscale_keeps_luma_only() {
        let engine = ConversionEngine::new(WorkerPool::new(2));

        let data = [10u8, 50, 20, 60, 30, 70, 40, 80];
        let raw = uyvy_frame(4, 1, &data);
        let gray = engine.convert_grayscale(&raw);

        assert_eq!(gray.colorspace(), ColorSpace::Grayscale);
        assert_eq!(gray.pixels(), &[50, 60, 70, 80]);
    }

    #[test]
    fn test_engine_pool_resize() {
        let mut engine = ConversionEngine::new(WorkerPool::new(2));
        engine.set_worker_count(4);
        assert_eq!(engine.worker_count(), 4);

        let data = [128u8, 235, 128, 235];
        let raw = uyvy_frame(2, 1, &data);
        let rgb = engine.convert_rgb(&raw);
        assert_eq!(rgb.pixels(), &[255, 255, 255, 255, 255, 255]);
    }
}
