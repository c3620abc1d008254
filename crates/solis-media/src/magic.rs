//! Magic-byte format detection.
//!
//! Exact signatures rank HIGH; container formats that need an inner probe
//! (DOCX inside ZIP, Opus inside Ogg) rank MEDIUM; a mime/extension fallback
//! ranks LOW. Anything else is rejected as unknown.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Png,
    Jpeg,
    Pdf,
    Docx,
    Zip,
    Ogg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

const PNG_SIG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIG: &[u8] = &[0xFF, 0xD8, 0xFF];
const PDF_SIG: &[u8] = b"%PDF-";
const ZIP_SIG: &[u8] = &[b'P', b'K', 0x03, 0x04];
const OGG_SIG: &[u8] = b"OggS";

/// How far into a ZIP we look for DOCX markers. Central directory entries for
/// small documents land well within this window.
const ZIP_PROBE_WINDOW: usize = 4096;

/// Detect the format of `bytes`, using `mime_hint` only as a LOW-confidence
/// fallback when no signature matches.
pub fn detect(bytes: &[u8], mime_hint: Option<&str>) -> Option<(MediaFormat, Confidence)> {
    if bytes.starts_with(PNG_SIG) {
        return Some((MediaFormat::Png, Confidence::High));
    }
    if bytes.starts_with(JPEG_SIG) {
        return Some((MediaFormat::Jpeg, Confidence::High));
    }
    if bytes.starts_with(PDF_SIG) {
        return Some((MediaFormat::Pdf, Confidence::High));
    }
    if bytes.starts_with(ZIP_SIG) {
        // ZIP container: prefer DOCX when the inner XML markers are present.
        let window = &bytes[..bytes.len().min(ZIP_PROBE_WINDOW)];
        if contains(window, b"word/") || contains(window, b"[Content_Types].xml") {
            return Some((MediaFormat::Docx, Confidence::Medium));
        }
        return Some((MediaFormat::Zip, Confidence::Medium));
    }
    if bytes.starts_with(OGG_SIG) {
        // Ogg container; confirm the Opus codec header if it is in view.
        let window = &bytes[..bytes.len().min(512)];
        let confidence = if contains(window, b"OpusHead") {
            Confidence::High
        } else {
            Confidence::Medium
        };
        return Some((MediaFormat::Ogg, confidence));
    }

    match mime_hint {
        Some("image/png") => Some((MediaFormat::Png, Confidence::Low)),
        Some("image/jpeg") | Some("image/jpg") => Some((MediaFormat::Jpeg, Confidence::Low)),
        Some("application/pdf") => Some((MediaFormat::Pdf, Confidence::Low)),
        Some("audio/ogg") | Some("audio/opus") | Some("audio/ogg; codecs=opus") => {
            Some((MediaFormat::Ogg, Confidence::Low))
        }
        Some(m)
            if m == "application/vnd.openxmlformats-officedocument.wordprocessingml.document" =>
        {
            Some((MediaFormat::Docx, Confidence::Low))
        }
        _ => None,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_signature_is_high() {
        let mut bytes = PNG_SIG.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!(detect(&bytes, None), Some((MediaFormat::Png, Confidence::High)));
    }

    #[test]
    fn jpeg_signature_is_high() {
        assert_eq!(
            detect(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00], None),
            Some((MediaFormat::Jpeg, Confidence::High))
        );
    }

    #[test]
    fn pdf_signature_is_high() {
        assert_eq!(
            detect(b"%PDF-1.7 rest", None),
            Some((MediaFormat::Pdf, Confidence::High))
        );
    }

    #[test]
    fn docx_preferred_over_raw_zip_when_markers_exist() {
        let mut bytes = ZIP_SIG.to_vec();
        bytes.extend_from_slice(b"........[Content_Types].xml......word/document.xml");
        assert_eq!(detect(&bytes, None), Some((MediaFormat::Docx, Confidence::Medium)));
    }

    #[test]
    fn plain_zip_without_markers_stays_zip() {
        let mut bytes = ZIP_SIG.to_vec();
        bytes.extend_from_slice(b"some/other/file.txt");
        assert_eq!(detect(&bytes, None), Some((MediaFormat::Zip, Confidence::Medium)));
    }

    #[test]
    fn ogg_with_opus_head_is_high() {
        let mut bytes = OGG_SIG.to_vec();
        bytes.extend_from_slice(b"\x00\x02....OpusHead....");
        assert_eq!(detect(&bytes, None), Some((MediaFormat::Ogg, Confidence::High)));
    }

    #[test]
    fn ogg_without_opus_head_is_medium() {
        let mut bytes = OGG_SIG.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        assert_eq!(detect(&bytes, None), Some((MediaFormat::Ogg, Confidence::Medium)));
    }

    #[test]
    fn mime_fallback_is_low() {
        assert_eq!(
            detect(&[0u8; 8], Some("image/jpeg")),
            Some((MediaFormat::Jpeg, Confidence::Low))
        );
    }

    #[test]
    fn unknown_is_rejected() {
        assert_eq!(detect(&[0u8; 8], None), None);
        assert_eq!(detect(&[0u8; 8], Some("application/x-mystery")), None);
    }
}
