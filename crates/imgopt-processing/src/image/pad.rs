use image::{imageops, ImageResult, Rgb, RgbImage};

/// Decode any supported format and flatten it to 8-bit RGB. Alpha is dropped.
pub fn decode_rgb(bytes: &[u8]) -> ImageResult<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Center `img` on a white canvas at least `min_side` pixels on each side.
///
/// Images never shrink: a side already longer than `min_side` keeps its length.
pub fn resize_and_pad(img: &RgbImage, min_side: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let canvas_width = width.max(min_side);
    let canvas_height = height.max(min_side);

    if canvas_width == width && canvas_height == height {
        return img.clone();
    }

    let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, Rgb([255, 255, 255]));
    let x = (canvas_width - width) / 2;
    let y = (canvas_height - height) / 2;
    imageops::overlay(&mut canvas, img, x as i64, y as i64);
    canvas
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(img)?;
    Ok(out)
}

/// Decode, pad and re-encode in one go. CPU-bound; run it on the blocking pool.
pub fn optimize(bytes: &[u8], min_side: u32, quality: u8) -> ImageResult<Vec<u8>> {
    let decoded = decode_rgb(bytes)?;
    let padded = resize_and_pad(&decoded, min_side);
    encode_jpeg(&padded, quality)
}
