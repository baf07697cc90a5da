//! RFC 3986 percent-encoding as required by OAuth 1.0 (RFC 5849 §3.6).
//!
//! Only the unreserved characters `A-Z a-z 0-9 - . _ ~` pass through;
//! every other byte of the UTF-8 encoding becomes `%XX` with uppercase hex.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a string for use in a signature base string or header.
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Reverse of [`percent_encode`].
///
/// Returns `None` if the decoded bytes are not valid UTF-8.
pub fn percent_decode(value: &str) -> Option<String> {
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
