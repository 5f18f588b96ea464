use axum::http::HeaderValue;
use axum::http::request::Parts;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Builds the CORS layer guarding the loopback HTTP/SSE bridge (spec §4.3).
/// Requests with no `Origin` header (curl, the daemon's own health checks)
/// never reach the predicate at all -- `tower-http` only evaluates it for
/// requests that carry one. Among those, admit: the bare loopback origins a
/// local web UI would use, the Tauri webview scheme, and whatever origin the
/// configured directory server itself serves from (so a directory-hosted
/// control UI can reach the local bridge directly).
pub fn build(directory_origin: Option<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
            origin_allowed(origin, directory_origin.as_deref())
        }))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

fn origin_allowed(origin: &HeaderValue, directory_origin: Option<&str>) -> bool {
    let origin = match origin.to_str() {
        Ok(o) => o,
        Err(_) => return false,
    };

    if origin.starts_with("http://127.0.0.1") || origin.starts_with("http://localhost") {
        return true;
    }
    if origin.starts_with("tauri://") {
        return true;
    }
    if let Some(directory_origin) = directory_origin
        && !directory_origin.is_empty()
        && origin.starts_with(directory_origin)
    {
        return true;
    }
    false
}

#[cfg(test)]
#[path = "cors_tests.rs"]
mod tests;
