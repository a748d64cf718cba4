//! Remote module source.
//!
//! Feature-gated behind `http` to keep the default build free of a network
//! stack.

use std::io::Read;

use crate::error::StrategyError;

/// Download a module. Bodies are read through the streaming reader so large
/// engines are not cut off by the client's in-memory body limit.
pub fn fetch(url: &str) -> Result<Vec<u8>, StrategyError> {
    if !is_http_url(url) {
        return Err(StrategyError::Http { url: url.to_string(), message: "not an http(s) URL".into() });
    }
    let http_err = |e: &dyn std::fmt::Display| StrategyError::Http { url: url.to_string(), message: e.to_string() };

    let response = ureq::get(url).call().map_err(|e| http_err(&e))?;
    let mut reader = response.into_body().into_reader();
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|e| http_err(&e))?;
    log::debug!("tagbridge: fetched {} bytes from {}", bytes.len(), url);
    Ok(bytes)
}

/// Check if a location looks like an HTTP URL.
pub fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
