//! Frame decoding and re-encoding
//!
//! Inbound frames arrive as base64 text, usually with a browser data-URI
//! header (`data:image/jpeg;base64,`). Outbound preview frames are JPEG,
//! optionally wrapped as a multipart MJPEG part.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::{CodecError, VideoFrame};

/// Multipart boundary used by the MJPEG preview stream
pub const MJPEG_BOUNDARY: &str = "frame";

/// Strip an optional data-URI header, keeping only the base64 body
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decode a client frame payload into an RGB frame
pub fn decode_payload(payload: &str) -> Result<VideoFrame, CodecError> {
    let body = strip_data_uri(payload.trim()).trim();
    if body.is_empty() {
        return Err(CodecError::Empty);
    }
    let bytes = STANDARD.decode(body)?;
    decode_image_bytes(&bytes)
}

/// Decode encoded image bytes (JPEG, PNG, ...) into an RGB frame
pub fn decode_image_bytes(bytes: &[u8]) -> Result<VideoFrame, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(VideoFrame::from_rgb(image.to_rgb8()))
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(frame.data.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
    Ok(out)
}

/// Wrap a JPEG as one part of a `multipart/x-mixed-replace` stream
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_base64(width: u32, height: u32) -> String {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }

    #[test]
    fn test_decode_with_and_without_header() {
        let body = png_base64(12, 8);
        let plain = decode_payload(&body).unwrap();
        let prefixed = decode_payload(&format!("data:image/png;base64,{body}")).unwrap();
        assert_eq!((plain.width, plain.height), (12, 8));
        assert_eq!(plain.data, prefixed.data);
        assert_eq!(plain.get_pixel(3, 2), Some([30, 20, 128]));
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode_payload(""), Err(CodecError::Empty)));
        assert!(matches!(decode_payload("data:image/png;base64,"), Err(CodecError::Empty)));
        assert!(matches!(decode_payload("!!not base64!!"), Err(CodecError::Base64(_))));
        // Valid base64, not an image
        let garbage = STANDARD.encode(b"definitely not an image");
        assert!(matches!(decode_payload(&garbage), Err(CodecError::Image(_))));
    }

    #[test]
    fn test_jpeg_reencode_decodes() {
        let frame = decode_payload(&png_base64(16, 16)).unwrap();
        let jpeg = encode_jpeg(&frame, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let back = decode_image_bytes(&jpeg).unwrap();
        assert_eq!((back.width, back.height), (16, 16));
    }

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&[1, 2, 3]);
        let expected_head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(expected_head));
        assert!(part.ends_with(&[1, 2, 3, b'\r', b'\n']));
        // Servers build the multipart content type from the crate-root export
        assert_eq!(crate::MJPEG_BOUNDARY, "frame");
    }
}
