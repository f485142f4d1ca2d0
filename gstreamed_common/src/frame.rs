use anyhow::Context;
use gstreamer as gst;
use gstreamer_video as gst_video;
use image::RgbImage;

/// Copies an RGB sample into an owned image, dropping row padding.
pub fn image_from_sample(sample: &gst::Sample) -> anyhow::Result<RgbImage> {
    let caps = sample.caps().context("Sample without caps")?;
    let info = gst_video::VideoInfo::from_caps(caps).context("Sample caps are not raw video")?;
    let buffer = sample.buffer().context("Sample without buffer")?;
    let map = buffer.map_readable().context("Failed to map buffer")?;

    let stride = info.stride()[0].max(0) as usize;
    image_from_strided(map.as_slice(), info.width(), info.height(), stride)
        .with_context(|| format!("Buffer of {} bytes does not hold {}x{} RGB", map.size(), info.width(), info.height()))
}

/// Packs `height` rows of `stride` bytes into a tightly packed RGB image.
pub fn image_from_strided(data: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbImage> {
    let row_len = width as usize * 3;
    if stride < row_len || height == 0 {
        return None;
    }
    let needed = stride * (height as usize - 1) + row_len;
    if data.len() < needed {
        return None;
    }

    if stride == row_len {
        return RgbImage::from_raw(width, height, data[..row_len * height as usize].to_vec());
    }

    let mut packed = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        packed.extend_from_slice(&data[start..start + row_len]);
    }
    RgbImage::from_raw(width, height, packed)
}
