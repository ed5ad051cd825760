//! CPU pixel programs.
//!
//! Every program is evaluated per destination pixel in normalized texture
//! coordinates, the way a fragment shader would be. Inputs are sampled with
//! clamp-to-edge addressing; an absent input samples as transparent black.

use image::RgbaImage;

use crate::device::{Program, ProgramKind, Rgba, TRANSPARENT};
use crate::render_graph::Filter;

/// Gaussian weights for the separable 9-tap blur (center, then ±1..±4).
const GAUSS_9: [f32; 5] = [
    0.227_027_03,
    0.194_594_6,
    0.121_621_62,
    0.054_054_055,
    0.016_216_217,
];

/// Luma range above which the antialias filter smooths.
const EDGE_THRESHOLD: f32 = 0.1;

pub(crate) fn to_rgba(px: [u8; 4]) -> Rgba {
    px.map(|c| c as f32 / 255.0)
}

pub(crate) fn to_u8(color: Rgba) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn add(a: Rgba, b: Rgba) -> Rgba {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
}

fn scale(a: Rgba, s: f32) -> Rgba {
    a.map(|c| c * s)
}

fn mix(a: Rgba, b: Rgba, t: f32) -> Rgba {
    add(scale(a, 1.0 - t), scale(b, t))
}

fn luma(c: Rgba) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// A sampleable view of one input.
#[derive(Clone, Copy)]
struct Sampler<'a> {
    image: Option<&'a RgbaImage>,
}

impl Sampler<'_> {
    fn texel(&self) -> (f32, f32) {
        match self.image {
            Some(img) => (1.0 / img.width() as f32, 1.0 / img.height() as f32),
            None => (1.0, 1.0),
        }
    }

    fn fetch(img: &RgbaImage, x: i64, y: i64) -> Rgba {
        let x = x.clamp(0, img.width() as i64 - 1) as u32;
        let y = y.clamp(0, img.height() as i64 - 1) as u32;
        to_rgba(img.get_pixel(x, y).0)
    }

    fn nearest(&self, u: f32, v: f32) -> Rgba {
        let Some(img) = self.image else {
            return TRANSPARENT;
        };
        let x = (u * img.width() as f32).floor() as i64;
        let y = (v * img.height() as f32).floor() as i64;
        Self::fetch(img, x, y)
    }

    fn linear(&self, u: f32, v: f32) -> Rgba {
        let Some(img) = self.image else {
            return TRANSPARENT;
        };
        let fx = u * img.width() as f32 - 0.5;
        let fy = v * img.height() as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let top = mix(Self::fetch(img, x0, y0), Self::fetch(img, x0 + 1, y0), tx);
        let bottom = mix(
            Self::fetch(img, x0, y0 + 1),
            Self::fetch(img, x0 + 1, y0 + 1),
            tx,
        );
        mix(top, bottom, ty)
    }

    fn sample(&self, u: f32, v: f32, linear: bool) -> Rgba {
        if linear {
            self.linear(u, v)
        } else {
            self.nearest(u, v)
        }
    }

    /// Edge-aware smoothing: blends toward the neighbour average where the
    /// local luma contrast exceeds [`EDGE_THRESHOLD`].
    fn antialiased(&self, u: f32, v: f32, linear: bool) -> Rgba {
        let (tx, ty) = self.texel();
        let center = self.sample(u, v, linear);
        let around = [
            self.sample(u - tx, v, linear),
            self.sample(u + tx, v, linear),
            self.sample(u, v - ty, linear),
            self.sample(u, v + ty, linear),
        ];
        let lumas = around.map(luma);
        let lo = lumas.iter().copied().fold(luma(center), f32::min);
        let hi = lumas.iter().copied().fold(luma(center), f32::max);
        if hi - lo < EDGE_THRESHOLD {
            return center;
        }
        let avg = scale(around.iter().copied().fold(TRANSPARENT, add), 0.25);
        mix(center, avg, 0.5)
    }

    fn box_blur(&self, u: f32, v: f32, radius: i32) -> Rgba {
        let (tx, ty) = self.texel();
        let mut acc = TRANSPARENT;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                acc = add(acc, self.nearest(u + dx as f32 * tx, v + dy as f32 * ty));
            }
        }
        let taps = ((2 * radius + 1) * (2 * radius + 1)) as f32;
        scale(acc, 1.0 / taps)
    }

    fn gaussian(&self, u: f32, v: f32, step: (f32, f32)) -> Rgba {
        let mut acc = scale(self.linear(u, v), GAUSS_9[0]);
        for (i, weight) in GAUSS_9.iter().enumerate().skip(1) {
            let (du, dv) = (step.0 * i as f32, step.1 * i as f32);
            acc = add(acc, scale(self.linear(u + du, v + dv), *weight));
            acc = add(acc, scale(self.linear(u - du, v - dv), *weight));
        }
        acc
    }
}

fn apply_gamma(color: Rgba, gamma: f32) -> Rgba {
    if gamma == 1.0 {
        return color;
    }
    [
        color[0].max(0.0).powf(gamma),
        color[1].max(0.0).powf(gamma),
        color[2].max(0.0).powf(gamma),
        color[3],
    ]
}

fn filter_pixel(
    filter: Filter,
    program: &Program,
    primary: Sampler<'_>,
    secondary: Sampler<'_>,
    u: f32,
    v: f32,
) -> Rgba {
    let (tx, ty) = primary.texel();
    let base = match filter {
        Filter::None if program.antialias => primary.antialiased(u, v, false),
        Filter::LinearInterp if program.antialias => primary.antialiased(u, v, true),
        Filter::None => primary.nearest(u, v),
        Filter::LinearInterp => primary.linear(u, v),
        Filter::BlurHorizontal => primary.gaussian(u, v, (tx, 0.0)),
        Filter::BlurVertical => primary.gaussian(u, v, (0.0, ty)),
        Filter::LightThreshold => {
            let c = primary.linear(u, v);
            let k = smoothstep(0.5, 1.0, luma(c));
            [c[0] * k, c[1] * k, c[2] * k, c[3]]
        }
        Filter::Blur3x3 => primary.box_blur(u, v, 1),
        Filter::Blur5x5 => primary.box_blur(u, v, 2),
        Filter::Antialias => primary.antialiased(u, v, false),
        Filter::AntialiasLinear => primary.antialiased(u, v, true),
    };
    let color = match secondary.image {
        Some(_) => add(base, secondary.linear(u, v)),
        None => base,
    };
    apply_gamma(color, program.gamma)
}

fn composite_pixel(program: &Program, primary: Sampler<'_>, secondary: Sampler<'_>, u: f32, v: f32) -> Rgba {
    let p = if program.antialias {
        primary.antialiased(u, v, true)
    } else {
        primary.linear(u, v)
    };
    let s = secondary.linear(u, v);
    let inv = 1.0 / program.gamma;
    let rgb = [p[0] + s[0], p[1] + s[1], p[2] + s[2]].map(|c| c.max(0.0).powf(inv).clamp(0.0, 1.0));
    [rgb[0], rgb[1], rgb[2], p[3].max(s[3])]
}

/// Runs `program` over `inputs`, writing the viewport region of `dest`.
pub(crate) fn run(dest: &mut RgbaImage, program: &Program, inputs: &[Option<&RgbaImage>]) {
    let primary = Sampler {
        image: inputs.first().copied().flatten(),
    };
    let secondary = Sampler {
        image: inputs.get(1).copied().flatten(),
    };
    let (x0, y0, w, h) = program.viewport.to_pixels(dest.width(), dest.height());

    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let u = (x - x0) as f32 / w as f32 + 0.5 / w as f32;
            let v = (y - y0) as f32 / h as f32 + 0.5 / h as f32;
            let color = match program.kind {
                ProgramKind::Filter(filter) => {
                    filter_pixel(filter, program, primary, secondary, u, v)
                }
                ProgramKind::Composite => composite_pixel(program, primary, secondary, u, v),
                ProgramKind::Blit => primary.linear(u, v),
            };
            dest.put_pixel(x, y, image::Rgba(to_u8(color)));
        }
    }
}
