//! Converting binary image data to Base64 and `data:` URLs.

use base64::{Engine as _, prelude::BASE64_STANDARD};

/// MIME type we assume when we can't sniff one.
pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/png";

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    // Some sources indicate that the Base64 data should be percent-encoded, but
    // in practice this breaks most OpenAI-compatible servers.
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}

/// Guess the MIME type of an image from its leading bytes.
pub fn sniff_image_mime_type(data: &[u8]) -> &'static str {
    match infer::get(data) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.mime_type(),
        _ => DEFAULT_IMAGE_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_data_url() {
        assert_eq!(data_url("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn sniffs_known_images_and_falls_back() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(sniff_image_mime_type(&jpeg_header), "image/jpeg");
        assert_eq!(sniff_image_mime_type(b"not an image"), "image/png");
    }
}
