// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image geometry — device extents and transform rescaling on top of
// `kurbo::Affine`. The transform maps image pixel coordinates (x across a
// scanline, y down the lines) to device pixels.

pub use kurbo::Affine;

/// Direction in which image scanlines run on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Image rows stay horizontal on the device.
    Rows,
    /// Image rows run vertically on the device (quarter-turn rotation).
    Columns,
}

/// Size in device pixels covered by a `width` x `height` image.
///
/// Measured along the transformed image axes, so a rotated image reports
/// the lengths of its own edges rather than its bounding box.
pub fn device_extent(transform: &Affine, width: u32, height: u32) -> (u32, u32) {
    let [a, b, c, d, _, _] = transform.as_coeffs();
    let device_width = (a.hypot(b) * f64::from(width)).round();
    let device_height = (c.hypot(d) * f64::from(height)).round();
    (clamp_to_u32(device_width), clamp_to_u32(device_height))
}

/// Rescale `transform` for an image whose size changed from `from` to `to`,
/// so the new image still covers the same device area.
pub fn rescale(transform: &Affine, from: (u32, u32), to: (u32, u32)) -> Affine {
    if from == to || to.0 == 0 || to.1 == 0 {
        return *transform;
    }
    let sx = f64::from(from.0) / f64::from(to.0);
    let sy = f64::from(from.1) / f64::from(to.1);
    *transform * Affine::scale_non_uniform(sx, sy)
}

/// Transform for a mask whose pixel grid differs from its image's. Both
/// cover the same area, so this is the image transform rescaled to the mask
/// size.
pub fn mask_to_device(
    image_transform: &Affine,
    image_size: (u32, u32),
    mask_size: (u32, u32),
) -> Affine {
    rescale(image_transform, image_size, mask_size)
}

/// Classify a transform as row- or column-aligned, allowing each off-axis
/// coefficient up to `tolerance` times its on-axis partner. Returns `None`
/// for skewed or degenerate transforms.
pub fn axis_alignment(transform: &Affine, tolerance: f64) -> Option<Axis> {
    let [a, b, c, d, _, _] = transform.as_coeffs();
    if a != 0.0 && d != 0.0 && b.abs() <= tolerance * a.abs() && c.abs() <= tolerance * d.abs() {
        return Some(Axis::Rows);
    }
    if b != 0.0 && c != 0.0 && a.abs() <= tolerance * b.abs() && d.abs() <= tolerance * c.abs() {
        return Some(Axis::Columns);
    }
    None
}

fn clamp_to_u32(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value as u32
    }
}
