use std::fmt;

/// Smallest payload accepted as a rule-set artifact.
pub const MIN_ARTIFACT_BYTES: usize = 100;

const UTF8_BOM: &[u8] = &[0xef, 0xbb, 0xbf];
const HTML_MARKERS: [&[u8]; 4] = [b"<!doctype html", b"<html", b"<head", b"<body"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Html,
    TooSmall(usize),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            Rejection::Html => write!(f, "payload is an html page"),
            Rejection::TooSmall(len) => write!(
                f,
                "payload is {} bytes, expected at least {}",
                len, MIN_ARTIFACT_BYTES
            ),
        }
    }
}

/// Captive portals and mirror error pages answer with html and a 200.
pub fn looks_like_html(data: &[u8]) -> bool {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let head = &data[start..];
    HTML_MARKERS.iter().any(|marker| {
        head.len() >= marker.len() && head[..marker.len()].eq_ignore_ascii_case(marker)
    })
}

pub fn validate(data: &[u8]) -> Result<(), Rejection> {
    if looks_like_html(data) {
        return Err(Rejection::Html);
    }
    if data.len() < MIN_ARTIFACT_BYTES {
        return Err(Rejection::TooSmall(data.len()));
    }
    Ok(())
}
