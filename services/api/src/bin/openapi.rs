//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI 3 document for the attendance API to disk, for client
//! generation without a running server.
//!
//! Usage: `openapi [output-path]` (defaults to `openapi.json`).

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn write_document(api_doc: utoipa::openapi::OpenApi, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let doc_json = api_doc.to_pretty_json()?;
    std::fs::write(path, doc_json)?;
    println!("OpenAPI document with {} paths written to {}", api_doc.paths.paths.len(), path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    write_document(ApiDoc::openapi(), &path)
}
