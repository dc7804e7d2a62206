use anyhow::{anyhow, Result};

/// Capture layouts a device may hand back when RGB3 was not honored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }
}

pub(crate) fn to_rgb(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            expect_len(pixels, plane * 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => {
            expect_len(pixels, plane + plane / 2, "NV12")?;
            let mut rgb = vec![0u8; plane * 3];
            for j in 0..h {
                for i in 0..w {
                    let uv = plane + (j / 2) * w + (i / 2) * 2;
                    write_yuv(
                        &mut rgb[(j * w + i) * 3..],
                        pixels[j * w + i],
                        pixels[uv],
                        pixels[uv + 1],
                    );
                }
            }
            Ok(rgb)
        }
        PixelFormat::Yuyv => {
            expect_len(pixels, plane * 2, "YUYV")?;
            let mut rgb = vec![0u8; plane * 3];
            // Each 4-byte group carries two pixels sharing one U/V pair.
            for (pair, chunk) in pixels.chunks_exact(4).enumerate() {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                write_yuv(&mut rgb[pair * 6..], y0, u, v);
                write_yuv(&mut rgb[pair * 6 + 3..], y1, u, v);
            }
            Ok(rgb)
        }
    }
}

fn expect_len(pixels: &[u8], expected: usize, name: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            name,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn write_yuv(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
