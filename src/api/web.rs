//! Static web interfaces under `/web/`, served from the configured web root.

use http::{header, StatusCode};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{escape_html, respond, ApiError, AppState, Response};
use crate::request::Request;

pub fn serve<W: Write>(state: &AppState, request: &Request, out: &mut W) -> Result<(), ApiError> {
    let sub = request
        .path
        .strip_prefix("/web")
        .unwrap_or_default()
        .trim_start_matches('/');
    let response = if sub.is_empty() {
        interface_listing(&state.config.web_root)?
    } else {
        asset(&state.config.web_root, sub)?
    };
    respond(out, &response);
    Ok(())
}

/// Names of the non-hidden directories in `root`, sorted.
pub fn interfaces(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if !name.starts_with('.') {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// With exactly one interface installed, go straight to it.
fn interface_listing(root: &Path) -> Result<Response, ApiError> {
    let names = interfaces(root).map_err(|e| {
        tracing::warn!(root = %root.display(), ?e, "cannot read web root");
        ApiError::InternalError("cannot read web root".to_string())
    })?;

    if let [only] = names.as_slice() {
        return Ok(Response::redirect(
            StatusCode::TEMPORARY_REDIRECT,
            format!("/web/{only}/"),
        ));
    }

    let mut body = String::from(
        "<!DOCTYPE html>\n<html><head><title>Panels</title></head><body>\n<h1>Available interfaces</h1>\n<ul>\n",
    );
    for name in &names {
        let name = escape_html(name);
        body.push_str(&format!("<li><a href=\"/web/{name}/\">{name}</a></li>\n"));
    }
    body.push_str("</ul>\n</body></html>\n");
    Ok(Response::new(StatusCode::OK).html(body))
}

/// Resolve `sub` below `root`, refusing anything that climbs out of it.
fn resolve(root: &Path, sub: &str) -> Option<PathBuf> {
    if sub.split('/').any(|segment| segment == ".." || segment.contains('\\')) {
        return None;
    }
    let mut path = root.join(sub.trim_start_matches('/'));
    if path.is_dir() {
        path.push("index.html");
    }
    Some(path)
}

fn asset(root: &Path, sub: &str) -> Result<Response, ApiError> {
    let path = resolve(root, sub).ok_or(ApiError::NotFound)?;
    let body = std::fs::read(&path).map_err(|e| {
        tracing::debug!(path = %path.display(), ?e, "asset not readable");
        ApiError::NotFound
    })?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok(Response::new(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.essence_str())
        .body(body))
}
