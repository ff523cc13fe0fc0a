//! Area-average frame resizing
//!
//! Each destination pixel averages the source rectangle it covers, with
//! fractional coverage at the edges. Appropriate primarily for downscaling.

use crate::types::VideoFrame;
use std::sync::Arc;

/// Resize a converted frame to `target_width` x `target_height`.
///
/// Returns the input unchanged (same `Arc` identity, no copy) whenever the
/// source already matches the target in width *or* height. That is the
/// behavior the capture path has always had; a frame needing a one-axis
/// resize is skipped by it.
pub fn resize(frame: &Arc<VideoFrame>, target_width: u32, target_height: u32) -> Arc<VideoFrame> {
    if frame.height() == target_height || frame.width() == target_width {
        return Arc::clone(frame);
    }

    let channels = frame.colorspace().bytes_per_pixel();
    let mut out = VideoFrame::new(
        target_width,
        target_height,
        target_width * channels as u32,
        frame.colorspace(),
    );

    area_average(
        frame.pixels(),
        frame.width() as usize,
        frame.height() as usize,
        frame.row_bytes() as usize,
        out.pixels_mut(),
        target_width as usize,
        target_height as usize,
        channels,
    );

    Arc::new(out)
}

/// Weighted box average: destination pixel (dx, dy) covers the source
/// rectangle [dx*xr, (dx+1)*xr) x [dy*yr, (dy+1)*yr), and every source
/// pixel contributes its overlap with that rectangle.
fn area_average(
    src: &[u8],
    src_width: usize,
    src_height: usize,
    src_row_bytes: usize,
    dst: &mut [u8],
    dst_width: usize,
    dst_height: usize,
    channels: usize,
) {
    let x_ratio = src_width as f64 / dst_width as f64;
    let y_ratio = src_height as f64 / dst_height as f64;

    let mut acc = vec![0.0f64; channels];

    for dy in 0..dst_height {
        let y0 = dy as f64 * y_ratio;
        let y1 = (y0 + y_ratio).min(src_height as f64);
        let sy_start = y0.floor() as usize;
        let sy_end = (y1.ceil() as usize).min(src_height);

        for dx in 0..dst_width {
            let x0 = dx as f64 * x_ratio;
            let x1 = (x0 + x_ratio).min(src_width as f64);
            let sx_start = x0.floor() as usize;
            let sx_end = (x1.ceil() as usize).min(src_width);

            acc.iter_mut().for_each(|a| *a = 0.0);
            let mut total_weight = 0.0f64;

            for sy in sy_start..sy_end {
                let wy = overlap(sy as f64, y0, y1);
                let row = sy * src_row_bytes;
                for sx in sx_start..sx_end {
                    let weight = wy * overlap(sx as f64, x0, x1);
                    let p = row + sx * channels;
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += src[p + c] as f64 * weight;
                    }
                    total_weight += weight;
                }
            }

            let d = (dy * dst_width + dx) * channels;
            for (c, a) in acc.iter().enumerate() {
                dst[d + c] = (a / total_weight).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Overlap of the unit interval [cell, cell+1) with [lo, hi).
fn overlap(cell: f64, lo: f64, hi: f64) -> f64 {
    (hi.min(cell + 1.0) - lo.max(cell)).max(0.0)
}
