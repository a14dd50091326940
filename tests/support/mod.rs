//! Shared helpers for integration tests: a byte-range-aware mock server.

#![allow(dead_code)]

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic pseudo-random payload of `len` bytes.
pub fn deterministic_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7) % 251) as u8).collect()
}

/// Responds to `GET` requests honoring `Range: bytes=<start>-<end>` with a
/// 206 slice of the body, or the full body with 200 when no range is sent.
pub struct RangeResponder {
    body: Vec<u8>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, end)) => {
                let end = end.min(self.body.len() as u64 - 1);
                let slice = self.body[start as usize..=end as usize].to_vec();
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
                    .set_body_bytes(slice)
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Parses `bytes=<start>-<end>` (both bounds required, as the engine sends).
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Mounts HEAD (size + range support) and ranged GET mocks for one file.
pub async fn mount_ranged_file(server: &MockServer, url_path: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", body.len().to_string().as_str())
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(RangeResponder::new(body.to_vec()))
        .mount(server)
        .await;
}

/// Mounts a file whose server does not advertise range support and always
/// answers GET with the full body.
pub async fn mount_plain_file(server: &MockServer, url_path: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", body.len().to_string().as_str()),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}
