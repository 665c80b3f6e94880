//! Request payload sources.

use bytes::Bytes;

use crate::session::Request;

/// Fixed 160-character latin filler, the classic single-segment payload.
const LOREM_160: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Proin feugiat, \
                         leo id commodo tincidunt, nibh diam ornare est, vitae accumsan risus \
                         lacus sed sem.";

/// Supplies the content of each outbound request.
///
/// The send loop calls this once per send; implementations decide whether
/// payloads vary over time.
pub trait RequestSource: Send + Sync {
    /// Produce the next request to send.
    fn next_request(&self) -> Request;
}

/// A request source that repeats one fixed request.
#[derive(Debug, Clone)]
pub struct FixedRequest {
    source: String,
    dest: String,
    payload: Bytes,
    want_receipt: bool,
}

impl FixedRequest {
    /// Build a fixed request with explicit addresses and payload.
    pub fn new(source: &str, dest: &str, payload: Bytes, want_receipt: bool) -> Self {
        Self { source: source.to_string(), dest: dest.to_string(), payload, want_receipt }
    }

    /// The default load payload: a 160-character text between two fixed
    /// short-code style addresses.
    pub fn lorem(want_receipt: bool) -> Self {
        Self::new("40404", "44555519205", Bytes::from_static(LOREM_160.as_bytes()), want_receipt)
    }
}

impl RequestSource for FixedRequest {
    fn next_request(&self) -> Request {
        Request {
            source: self.source.clone(),
            dest: self.dest.clone(),
            // Bytes clones are reference-counted, not copied.
            payload: self.payload.clone(),
            want_receipt: self.want_receipt,
        }
    }
}
