//! Charset-aware page decoding
//!
//! Korean malls still serve EUC-KR / CP949 pages, often with a wrong or
//! missing `Content-Type` charset. Decoding order: the profile's declared
//! encoding, the response header, UTF-8. If the chosen encoding rejects
//! the bytes, fall back to UTF-8 and then to lossy UTF-8, and report it.

use encoding_rs::{Encoding, UTF_8};
use tracing::warn;

/// Decoded page text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    /// Encoding actually used
    pub encoding: &'static str,
    /// The declared encoding did not decode cleanly
    pub fallback: bool,
}

/// Extract `charset=` from a Content-Type header value
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Decode `bytes` using the profile label, then the header label, then UTF-8
pub fn decode_page(bytes: &[u8], profile_label: Option<&str>, header_label: Option<&str>) -> DecodedText {
    let declared = profile_label
        .or(header_label)
        .and_then(|label| {
            let encoding = Encoding::for_label(label.trim().as_bytes());
            if encoding.is_none() {
                warn!(label, "Unknown charset label, assuming UTF-8");
            }
            encoding
        })
        .unwrap_or(UTF_8);

    if let Some(text) = declared.decode_without_bom_handling_and_without_replacement(bytes) {
        return DecodedText {
            text: text.into_owned(),
            encoding: declared.name(),
            fallback: false,
        };
    }

    warn!(encoding = declared.name(), "Page did not decode with declared charset");

    if declared != UTF_8 {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return DecodedText {
                text: text.to_string(),
                encoding: UTF_8.name(),
                fallback: true,
            };
        }
    }

    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: UTF_8.name(),
        fallback: true,
    }
}
