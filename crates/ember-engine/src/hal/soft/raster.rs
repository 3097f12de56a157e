use crate::hal::{ScissorRect, TextureFormat, Viewport};

/// Render target pixels borrowed for the duration of a draw.
pub(super) struct Canvas<'a> {
    pub pixels: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl Canvas<'_> {
    pub fn fill(&mut self, rgba: [f32; 4]) {
        let texel = self.format.encode(rgba);
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    }

    fn put(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let at = ((y * self.width + x) * 4) as usize;
        self.pixels[at..at + 4].copy_from_slice(&self.format.encode(rgba));
    }
}

/// Read-only texture bound at the shader-resource slot.
pub(super) struct Sampled<'a> {
    pub texels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl Sampled<'_> {
    /// Nearest-neighbour sample with clamp-to-edge addressing.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let texel = |coord: f32, size: u32| {
            let i = (coord * size as f32).floor();
            i.clamp(0.0, (size - 1) as f32) as u32
        };
        let x = texel(uv[0], self.width);
        let y = texel(uv[1], self.height);
        let at = ((y * self.width + x) * 4) as usize;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.texels[at..at + 4]);
        self.format.decode(raw)
    }
}

/// Post-transform vertex: normalized device position plus up to four varyings.
#[derive(Debug, Copy, Clone)]
pub(super) struct RasterVertex {
    pub ndc: [f32; 2],
    pub varying: [f32; 4],
}

/// Fills one triangle.
///
/// Pixel centers are sampled at `+0.5`. Both windings are filled (no culling)
/// and pixels exactly on an edge count as covered.
pub(super) fn triangle(
    canvas: &mut Canvas<'_>,
    viewport: &Viewport,
    scissor: &ScissorRect,
    tri: [RasterVertex; 3],
    shade: impl Fn([f32; 4]) -> [f32; 4],
) {
    let screen = tri.map(|v| {
        [
            viewport.x + (v.ndc[0] + 1.0) * 0.5 * viewport.width,
            viewport.y + (1.0 - v.ndc[1]) * 0.5 * viewport.height,
        ]
    });

    let area = edge(screen[0], screen[1], screen[2]);
    if area == 0.0 {
        return;
    }

    let min_x = screen.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
    let max_x = screen.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
    let min_y = screen.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
    let max_y = screen.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);

    let x0 = (min_x.floor().max(0.0) as u32).max(scissor.left);
    let y0 = (min_y.floor().max(0.0) as u32).max(scissor.top);
    let x1 = (max_x.ceil().max(0.0) as u32)
        .min(scissor.right)
        .min(canvas.width)
        .min((viewport.x + viewport.width).ceil().max(0.0) as u32);
    let y1 = (max_y.ceil().max(0.0) as u32)
        .min(scissor.bottom)
        .min(canvas.height)
        .min((viewport.y + viewport.height).ceil().max(0.0) as u32);

    for y in y0..y1 {
        for x in x0..x1 {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let w0 = edge(screen[1], screen[2], p) / area;
            let w1 = edge(screen[2], screen[0], p) / area;
            let w2 = edge(screen[0], screen[1], p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }

            let mut varying = [0.0; 4];
            for (i, out) in varying.iter_mut().enumerate() {
                *out = w0 * tri[0].varying[i] + w1 * tri[1].varying[i] + w2 * tri[2].varying[i];
            }
            canvas.put(x, y, shade(varying));
        }
    }
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(pixels: &mut Vec<u8>, size: u32) -> Canvas<'_> {
        pixels.resize((size * size * 4) as usize, 0);
        Canvas { pixels, width: size, height: size, format: TextureFormat::Rgba8Unorm }
    }

    fn vertex(x: f32, y: f32) -> RasterVertex {
        RasterVertex { ndc: [x, y], varying: [1.0, 0.0, 0.0, 1.0] }
    }

    fn at(pixels: &[u8], size: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * size + x) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    #[test]
    fn fills_center_and_leaves_corners() {
        let mut pixels = Vec::new();
        let size = 16;
        let mut c = canvas(&mut pixels, size);
        let vp = Viewport::from_size(size, size);
        let sc = ScissorRect::from_size(size, size);

        triangle(&mut c, &vp, &sc, [vertex(0.0, 0.8), vertex(0.8, -0.8), vertex(-0.8, -0.8)], |v| v);

        assert_eq!(at(&pixels, size, 8, 8), [255, 0, 0, 255]);
        assert_eq!(at(&pixels, size, 0, 0), [0, 0, 0, 0]);
        assert_eq!(at(&pixels, size, 15, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn both_windings_are_filled() {
        let mut pixels = Vec::new();
        let size = 8;
        let mut c = canvas(&mut pixels, size);
        let vp = Viewport::from_size(size, size);
        let sc = ScissorRect::from_size(size, size);

        triangle(&mut c, &vp, &sc, [vertex(-1.0, -1.0), vertex(1.0, -1.0), vertex(-1.0, 1.0)], |v| v);
        assert_eq!(at(&pixels, size, 1, 6), [255, 0, 0, 255]);
    }

    #[test]
    fn scissor_clips_coverage() {
        let mut pixels = Vec::new();
        let size = 8;
        let mut c = canvas(&mut pixels, size);
        let vp = Viewport::from_size(size, size);
        let sc = ScissorRect { left: 0, top: 0, right: 4, bottom: 8 };

        triangle(&mut c, &vp, &sc, [vertex(-1.0, 1.0), vertex(3.0, 1.0), vertex(-1.0, -3.0)], |v| v);
        assert_eq!(at(&pixels, size, 3, 3), [255, 0, 0, 255]);
        assert_eq!(at(&pixels, size, 4, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn nearest_sampling_clamps_to_edge() {
        let texels = [
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        let tex = Sampled { texels: &texels, width: 2, height: 2, format: TextureFormat::Rgba8Unorm };
        assert_eq!(tex.sample([0.1, 0.1]), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.sample([0.9, 0.1]), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(tex.sample([1.5, 1.5]), [1.0, 1.0, 1.0, 1.0]);
    }
}
