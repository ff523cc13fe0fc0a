//! Precomputed BT.601 YUV to RGB lookup tables
//!
//! Trades ~16 MB of memory for removing floating point and branching from
//! the per-pixel conversion path. Coefficients follow the DeckLink SDK's
//! colorspace notes (ITU-R BT.601, full 0-255 output domain):
//!
//! ```text
//! R = 1.164(Y - 16) + 1.793(V - 128)
//! G = 1.164(Y - 16) - 0.534(V - 128) - 0.213(U - 128)
//! B = 1.164(Y - 16) + 2.115(U - 128)
//! ```

/// Read-only conversion tables, built once and shared by all workers.
///
/// Stored as flat contiguous buffers: `red[y][v]` and `blue[y][u]` are
/// 256x256, `green[y][u][v]` is 256^3.
pub struct LookupTables {
    red: Box<[u8]>,
    green: Box<[u8]>,
    blue: Box<[u8]>,
}

fn clamp_byte(value: f64) -> u8 {
    if value < 0.0 {
        0
    } else if value > 255.0 {
        255
    } else {
        value.round() as u8
    }
}

impl LookupTables {
    /// Populate all three tables over the full 256^3 domain.
    pub fn build() -> Self {
        let mut luma = [0.0f64; 256];
        let mut r_chroma = [0.0f64; 256];
        let mut g_chroma_v = [0.0f64; 256];
        let mut g_chroma_u = [0.0f64; 256];
        let mut b_chroma = [0.0f64; 256];

        for i in 0..256 {
            luma[i] = 1.164 * (i as f64 - 16.0);
            r_chroma[i] = 1.793 * (i as f64 - 128.0);
            g_chroma_v[i] = -0.534 * (i as f64 - 128.0);
            g_chroma_u[i] = -0.213 * (i as f64 - 128.0);
            b_chroma[i] = 2.115 * (i as f64 - 128.0);
        }

        let mut red = vec![0u8; 1 << 16].into_boxed_slice();
        let mut blue = vec![0u8; 1 << 16].into_boxed_slice();
        let mut green = vec![0u8; 1 << 24].into_boxed_slice();

        for y in 0..256 {
            for c in 0..256 {
                red[(y << 8) | c] = clamp_byte(luma[y] + r_chroma[c]);
                blue[(y << 8) | c] = clamp_byte(luma[y] + b_chroma[c]);
            }
        }

        for y in 0..256 {
            for u in 0..256 {
                let partial = luma[y] + g_chroma_u[u];
                let base = (y << 16) | (u << 8);
                for v in 0..256 {
                    green[base | v] = clamp_byte(partial + g_chroma_v[v]);
                }
            }
        }

        LookupTables { red, green, blue }
    }

    #[inline(always)]
    pub fn red(&self, y: u8, v: u8) -> u8 {
        self.red[((y as usize) << 8) | v as usize]
    }

    #[inline(always)]
    pub fn green(&self, y: u8, u: u8, v: u8) -> u8 {
        self.green[((y as usize) << 16) | ((u as usize) << 8) | v as usize]
    }

    #[inline(always)]
    pub fn blue(&self, y: u8, u: u8) -> u8 {
        self.blue[((y as usize) << 8) | u as usize]
    }
}
