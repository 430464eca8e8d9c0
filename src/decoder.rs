//! Decodes the live stream.
//!
//! A stream can be served as MP3 or AAC, and the player is given an ordered list
//! of candidate MIME types, the same way an HTML `<audio>` element is given a
//! list of `<source>` tags. The first candidate that matches is passed to
//! symphonia as a format hint. With no match, the decoder probes the data
//! without one.

use rodio::decoder::DecoderError;
use rodio::Decoder;

use crate::error::MediaErrorCode;
use crate::reader::LiveReader;

/// MIME types the enabled symphonia codecs can handle.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/aac",
    "audio/aacp",
    "audio/mp4",
    "audio/x-m4a",
];

pub fn is_supported(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES
        .iter()
        .any(|m| m.eq_ignore_ascii_case(mime.trim()))
}

/// Picks the format hint for a stream.
///
/// The server's `Content-Type` wins when it is one of the candidates and is
/// supported. Otherwise the first supported candidate is used. `None` means
/// "probe without a hint".
pub fn select_mime_type<'a>(
    content_type: Option<&'a str>,
    candidates: &'a [String],
) -> Option<&'a str> {
    if let Some(ct) = content_type {
        if is_supported(ct) && candidates.iter().any(|c| c.eq_ignore_ascii_case(ct)) {
            return Some(ct);
        }
    }
    candidates
        .iter()
        .map(String::as_str)
        .find(|c| is_supported(c))
}

/// Builds a non-seekable decoder over the live reader.
///
/// Blocks until enough data has arrived to probe the format, so call it from a
/// blocking thread.
pub fn open(reader: LiveReader, mime_type: Option<&str>) -> Result<Decoder<LiveReader>, DecoderError> {
    let builder = Decoder::<LiveReader>::builder()
        .with_data(reader)
        .with_seekable(false);
    match mime_type {
        Some(mime) => builder.with_mime_type(mime).build(),
        None => builder.build(),
    }
}

/// Media error code for a failed decoder build.
pub fn error_code(err: &DecoderError) -> MediaErrorCode {
    match err {
        DecoderError::UnrecognizedFormat => MediaErrorCode::SrcNotSupported,
        DecoderError::IoError(_) => MediaErrorCode::Network,
        _ => MediaErrorCode::Decode,
    }
}
