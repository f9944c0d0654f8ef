//! Packed `0xRRGGBB` color helpers.

/// Pack 8-bit components into `0xRRGGBB`.
#[inline]
pub const fn pack(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split `0xRRGGBB` into `(r, g, b)`. The top byte is ignored.
#[inline]
pub fn unpack(color: u32) -> (u8, u8, u8) {
    ((color >> 16) as u8, (color >> 8) as u8, color as u8)
}

/// Color as normalized floats in `[0, 1]`.
#[inline]
pub fn to_unit_rgb(color: u32) -> [f32; 3] {
    let (r, g, b) = unpack(color);
    [
        f32::from(r) / 255.0,
        f32::from(g) / 255.0,
        f32::from(b) / 255.0,
    ]
}

/// Scale a single component by `brightness / 255`, rounding to nearest.
#[inline]
pub fn scale_component(value: u8, brightness: u8) -> u8 {
    ((u16::from(value) * u16::from(brightness) + 127) / 255) as u8
}

/// Encode a strip buffer as WS281x wire bytes (GRB order), brightness scaled.
pub fn encode_grb(colors: &[u32], brightness: u8, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(colors.len() * 3);
    for &color in colors {
        let (r, g, b) = unpack(color);
        out.push(scale_component(g, brightness));
        out.push(scale_component(r, brightness));
        out.push(scale_component(b, brightness));
    }
}
