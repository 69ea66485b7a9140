//! Synthetic RGBX buffers for end-to-end tests.

/// Uniform image of one color.
pub fn uniform_rgbx(width: usize, height: usize, color: [u8; 3]) -> Vec<u8> {
    assert!(width > 0 && height > 0);
    let mut data = Vec::with_capacity(width * height * 4);
    for _ in 0..width * height {
        data.extend_from_slice(&[color[0], color[1], color[2], 0]);
    }
    data
}

/// Background-colored image with a filled axis-aligned object.
///
/// The object covers `x0..x1` by `y0..y1` in pixel coordinates.
pub fn two_tone_rgbx(
    width: usize,
    height: usize,
    object: (usize, usize, usize, usize),
    background: [u8; 3],
    foreground: [u8; 3],
) -> Vec<u8> {
    let (x0, y0, x1, y1) = object;
    assert!(x1 <= width && y1 <= height && x0 < x1 && y0 < y1);
    let mut data = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let c = if x >= x0 && x < x1 && y >= y0 && y < y1 {
                foreground
            } else {
                background
            };
            data.extend_from_slice(&[c[0], c[1], c[2], 0]);
        }
    }
    data
}
