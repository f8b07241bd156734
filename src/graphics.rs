use crate::vertex::ProjectedVertex;

/// Packs an opaque color into `0xAARRGGBB`
pub const fn argb(r: u8, g: u8, b: u8) -> u32 {
    0xFF00_0000 | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Splits a packed color into its red, green and blue channels
pub const fn rgb_channels(color: u32) -> (u8, u8, u8) {
    ((color >> 16) as u8, (color >> 8) as u8, color as u8)
}

/// Row-major index of column `x`, row `row` (from the top) in a `size × size` image
pub fn pixel_index(size: usize, x: usize, row: usize) -> Option<usize> {
    (x < size && row < size).then(|| row * size + x)
}

/// Height interval used to normalize heights before color lookup
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightRange {
    pub min: f32,
    pub max: f32,
}

impl Default for HeightRange {
    fn default() -> Self {
        HeightRange { min: 0.0, max: 1.0 }
    }
}

impl HeightRange {
    /// Builds a range that is safe to divide by; non-finite bounds fall back to `[0, 1]`
    /// and a span narrower than `0.0001` is widened by one unit.
    pub fn new(min: f32, max: f32) -> Self {
        if !min.is_finite() || !max.is_finite() {
            return HeightRange::default();
        }
        if (max - min).abs() < 0.0001 {
            log::debug!("degenerate height range {min}..{max}, widening");
            return HeightRange {
                min,
                max: min + 1.0,
            };
        }
        HeightRange { min, max }
    }

    /// Position of `height` inside the range, clamped to `[0, 1]`
    pub fn normalize(&self, height: f32) -> f32 {
        ((height - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

/// Linear RGB ramp from `low` (minimum height) to `high` (maximum height)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightGradient {
    pub low: u32,
    pub high: u32,
}

impl Default for HeightGradient {
    fn default() -> Self {
        HeightGradient {
            low: argb(30, 110, 255),
            high: argb(255, 70, 60),
        }
    }
}

impl HeightGradient {
    pub fn color_at(&self, height: f32, range: &HeightRange) -> u32 {
        let t = range.normalize(height);
        let (r0, g0, b0) = rgb_channels(self.low);
        let (r1, g1, b1) = rgb_channels(self.high);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t) as u8;
        argb(mix(r0, r1), mix(g0, g1), mix(b0, b1))
    }
}

/// How a rasterized line picks the color of each pixel
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LineColor {
    /// Every pixel gets this color
    Fixed(u32),
    /// Heights at the two endpoints, interpolated along the line and run through the gradient
    Heights(f32, f32),
}

/// Square color + depth surface.
///
/// Depth starts at negative infinity and a pixel is only replaced by a fragment with a
/// strictly greater depth value. View space looks down -Z, so every visible fragment has a
/// negative depth.
pub struct Framebuffer {
    size: usize,
    colors: Vec<u32>,
    depths: Vec<f32>,
}

impl Framebuffer {
    pub fn new(size: usize, background: u32) -> Self {
        Framebuffer {
            size,
            colors: vec![background; size * size],
            depths: vec![f32::NEG_INFINITY; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Colors in row-major order, top row first
    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    pub fn depths(&self) -> &[f32] {
        &self.depths
    }

    /// Color at column `x`, row `row` counted from the top
    pub fn color_at(&self, x: usize, row: usize) -> Option<u32> {
        pixel_index(self.size, x, row).map(|i| self.colors[i])
    }

    pub fn clear(&mut self, background: u32) {
        self.colors.fill(background);
        self.depths.fill(f32::NEG_INFINITY);
    }

    /// Depth-tests a fragment at screen position `(x, y)` with `y` growing upwards.
    /// Returns whether the pixel was written.
    pub fn draw_pixel(&mut self, x: i32, y: i32, z: f32, color: u32) -> bool {
        let size = self.size as i32;
        if x < 0 || x >= size || y < 0 || y >= size {
            return false;
        }

        let idx = (x + size * (size - 1 - y)) as usize;
        if self.depths[idx] >= z {
            return false;
        }

        self.depths[idx] = z;
        self.colors[idx] = color;
        true
    }

    /// Rasterizes a line between two projected vertices using a simple linear stepper,
    /// interpolating depth and (for height coloring) the endpoint heights.
    pub fn draw_line(
        &mut self,
        a: ProjectedVertex,
        b: ProjectedVertex,
        color: LineColor,
        gradient: &HeightGradient,
        range: &HeightRange,
    ) {
        let dx = b.screen_position[0] - a.screen_position[0];
        let dy = b.screen_position[1] - a.screen_position[1];
        let steps = (dx.abs().max(dy.abs()) as i64).max(1);

        let sx = dx / steps as f32;
        let sy = dy / steps as f32;
        let dz = (b.depth - a.depth) / steps as f32;

        let [mut x, mut y] = a.screen_position;
        let mut z = a.depth;

        for i in 0..=steps {
            let pixel_color = match color {
                LineColor::Fixed(c) => c,
                LineColor::Heights(from, to) => {
                    let t = i as f32 / steps as f32;
                    gradient.color_at(from + (to - from) * t, range)
                }
            };
            self.draw_pixel(x as i32, y as i32, z, pixel_color);
            x += sx;
            y += sy;
            z += dz;
        }
    }
}
