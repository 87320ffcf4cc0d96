//! Fallback tile synthesis.
//!
//! When a tile cannot be fetched (retries exhausted, offline mode) the
//! fetcher serves a synthesized neutral placeholder instead of failing the
//! caller. The placeholder is generated once and reused.

use std::io::Cursor;
use std::sync::OnceLock;

use image::{ImageFormat, Rgba, RgbaImage};

/// Edge length of the placeholder tile in pixels.
pub const FALLBACK_TILE_SIZE: u32 = 256;

const FILL: Rgba<u8> = Rgba([0xE4, 0xE4, 0xE0, 0xFF]);
const BORDER: Rgba<u8> = Rgba([0xC9, 0xC9, 0xC4, 0xFF]);

/// PNG bytes of the neutral placeholder tile.
pub fn fallback_tile() -> &'static [u8] {
    static TILE: OnceLock<Vec<u8>> = OnceLock::new();
    TILE.get_or_init(synthesize)
}

fn synthesize() -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(FALLBACK_TILE_SIZE, FALLBACK_TILE_SIZE, FILL);

    // One-pixel border so adjacent placeholders read as a grid.
    for i in 0..FALLBACK_TILE_SIZE {
        img.put_pixel(i, 0, BORDER);
        img.put_pixel(i, FALLBACK_TILE_SIZE - 1, BORDER);
        img.put_pixel(0, i, BORDER);
        img.put_pixel(FALLBACK_TILE_SIZE - 1, i, BORDER);
    }

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap_or_else(|e| {
            // Encoding a freshly built in-memory image into a Vec cannot
            // fail with I/O; keep the panic message useful regardless.
            panic!("failed to encode fallback tile: {e}")
        });
    bytes
}
