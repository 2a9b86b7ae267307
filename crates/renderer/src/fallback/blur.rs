//! Separable Gaussian blur over premultiplied pixmaps.

use core::f32::consts::PI;
use tiny_skia::Pixmap;

/// Pixels sampled on each side of the centre for `sigma`.
#[must_use]
pub fn blur_radius(sigma: f32) -> u32 {
    (sigma.abs() * 3.0).ceil() as u32
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = blur_radius(sigma) as i32;
    if radius == 0 {
        return Vec::new();
    }
    let sigma_sq = sigma * sigma;
    let factor = 1.0 / (2.0 * PI * sigma_sq);
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|offset| {
            let distance = offset as f32;
            factor * (-distance * distance / (2.0 * sigma_sq)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    if sum > 0.0 {
        for weight in &mut kernel {
            *weight /= sum;
        }
    }
    kernel
}

/// Blur `pixmap` in place. Samples outside the pixmap are transparent, so
/// content fades out towards the edges rather than smearing.
pub fn apply_gaussian_blur(pixmap: &mut Pixmap, sigma: f32) {
    let kernel = gaussian_kernel(sigma);
    if kernel.is_empty() {
        return;
    }
    let radius = (kernel.len() / 2) as isize;
    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let source: Vec<[f32; 4]> = pixmap
        .data()
        .chunks_exact(4)
        .map(to_unit)
        .collect();

    let blur_pass = |input: &[[f32; 4]], horizontal: bool| -> Vec<[f32; 4]> {
        let mut output = vec![[0.0; 4]; input.len()];
        for y in 0..height {
            for x in 0..width {
                let mut accum = [0.0f32; 4];
                for (index, weight) in kernel.iter().enumerate() {
                    let offset = index as isize - radius;
                    let (sx, sy) = if horizontal {
                        (x as isize + offset, y as isize)
                    } else {
                        (x as isize, y as isize + offset)
                    };
                    if sx < 0 || sy < 0 || sx >= width as isize || sy >= height as isize {
                        continue;
                    }
                    let sample = input[sy as usize * width + sx as usize];
                    for (channel, value) in accum.iter_mut().zip(sample) {
                        *channel += value * weight;
                    }
                }
                output[y * width + x] = accum;
            }
        }
        output
    };

    let horizontal = blur_pass(&source, true);
    let blurred = blur_pass(&horizontal, false);

    for (pixel, values) in pixmap.data_mut().chunks_exact_mut(4).zip(blurred) {
        let alpha = (values[3] * 255.0).round().clamp(0.0, 255.0) as u8;
        for (channel, value) in pixel.iter_mut().zip(values) {
            // Premultiplied channels never exceed alpha.
            *channel = ((value * 255.0).round().clamp(0.0, 255.0) as u8).min(alpha);
        }
    }
}

fn to_unit(pixel: &[u8]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (channel, byte) in out.iter_mut().zip(pixel) {
        *channel = f32::from(*byte) / 255.0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sigma_is_a_no_op() {
        let mut pixmap = Pixmap::new(3, 3).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 0, 0, 255));
        let before = pixmap.data().to_vec();
        apply_gaussian_blur(&mut pixmap, 0.0);
        assert_eq!(pixmap.data(), &before[..]);
    }

    #[test]
    fn blur_spreads_and_conserves_coverage() {
        let mut pixmap = Pixmap::new(9, 9).unwrap();
        let centre = (4 * 9 + 4) * 4;
        pixmap.data_mut()[centre..centre + 4].copy_from_slice(&[255, 255, 255, 255]);
        apply_gaussian_blur(&mut pixmap, 1.0);
        let data = pixmap.data();
        assert!(data[centre + 3] < 255);
        let neighbour = (4 * 9 + 5) * 4;
        assert!(data[neighbour + 3] > 0);
        let total: u32 = data.chunks_exact(4).map(|pixel| u32::from(pixel[3])).sum();
        assert!((200..=310).contains(&total), "total alpha {total}");
        assert!(data.chunks_exact(4).all(|pixel| pixel[0] <= pixel[3]));
    }
}
