use super::CaptureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CaptureError> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| CaptureError::Read("frame dimensions overflow".to_string()))?;
    match format {
        PixelFormat::Rgb24 => {
            check_len("RGB", pixels, plane * 3)?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Yuyv => {
            check_len("YUYV", pixels, plane * 2)?;
            let mut rgb = Vec::with_capacity(plane * 3);
            for chunk in pixels.chunks_exact(4) {
                let u = chunk[1] as f32 - 128.0;
                let v = chunk[3] as f32 - 128.0;
                push_rgb(&mut rgb, chunk[0] as f32, u, v);
                push_rgb(&mut rgb, chunk[2] as f32, u, v);
            }
            Ok(rgb)
        }
        PixelFormat::Nv12 => {
            check_len("NV12", pixels, plane + plane / 2)?;
            let mut rgb = Vec::with_capacity(plane * 3);
            for j in 0..h {
                for i in 0..w {
                    let y = pixels[j * w + i] as f32;
                    let uv_index = plane + (j / 2) * w + (i / 2) * 2;
                    let u = pixels[uv_index] as f32 - 128.0;
                    let v = pixels[uv_index + 1] as f32 - 128.0;
                    push_rgb(&mut rgb, y, u, v);
                }
            }
            Ok(rgb)
        }
    }
}

fn check_len(label: &str, pixels: &[u8], expected: usize) -> Result<(), CaptureError> {
    if pixels.len() != expected {
        return Err(CaptureError::Read(format!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

fn push_rgb(out: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    out.push(clamp_to_u8(y + 1.402_f32 * v));
    out.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
    out.push(clamp_to_u8(y + 1.772_f32 * u));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
