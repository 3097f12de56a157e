//! Hard-coded geometry and texture data.

use crate::hal::{ColorVertex, TexturedVertex, TextureFormat};

pub const TEXTURE_SIZE: u32 = 256;

/// Cells per checkerboard row and column.
pub const CHECKER_CELLS: u32 = 8;

pub const TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Red/green/blue triangle, scaled so it keeps its shape at any aspect ratio.
pub fn triangle(aspect_ratio: f32) -> [ColorVertex; 3] {
    [
        ColorVertex { position: [0.0, 0.25 * aspect_ratio, 0.0], color: [1.0, 0.0, 0.0, 1.0] },
        ColorVertex { position: [0.25, -0.25 * aspect_ratio, 0.0], color: [0.0, 1.0, 0.0, 1.0] },
        ColorVertex { position: [-0.25, -0.25 * aspect_ratio, 0.0], color: [0.0, 0.0, 1.0, 1.0] },
    ]
}

/// Two clockwise triangles covering a centered quad.
pub fn textured_quad(aspect_ratio: f32) -> [TexturedVertex; 6] {
    let (x, y) = (0.5, 0.5 * aspect_ratio);
    let v = |px: f32, py: f32, u: f32, w: f32| TexturedVertex { position: [px, py, 0.0], uv: [u, w] };
    [
        v(-x, y, 0.0, 0.0),
        v(x, y, 1.0, 0.0),
        v(x, -y, 1.0, 1.0),
        v(-x, y, 0.0, 0.0),
        v(x, -y, 1.0, 1.0),
        v(-x, -y, 0.0, 1.0),
    ]
}

/// Black and white checkerboard, tightly packed RGBA rows.
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells).max(1);
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let shade = if (x / cell) % 2 == (y / cell) % 2 { 0x00 } else { 0xff };
            data.extend_from_slice(&[shade, shade, shade, 0xff]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_every_cell() {
        let data = checkerboard(TEXTURE_SIZE, CHECKER_CELLS);
        assert_eq!(data.len(), 256 * 256 * 4);

        let texel = |x: u32, y: u32| data[((y * 256 + x) * 4) as usize];
        assert_eq!(texel(0, 0), 0x00);
        assert_eq!(texel(31, 31), 0x00);
        assert_eq!(texel(32, 0), 0xff);
        assert_eq!(texel(0, 32), 0xff);
        assert_eq!(texel(32, 32), 0x00);
        assert!(data.chunks(4).all(|px| px[3] == 0xff));
    }

    #[test]
    fn triangle_scales_with_aspect() {
        let wide = triangle(16.0 / 9.0);
        assert_eq!(wide[0].position[1], 0.25 * 16.0 / 9.0);
        assert_eq!(wide[1].position[0], 0.25);
    }
}
