// src/hub/mod.rs

//! Content type hub client
//!
//! This module provides functionality for:
//! - Fetching the hub catalog of available content types
//! - Downloading a single content type archive
//!
//! Both calls make exactly one attempt; a failed sync is retried by the next
//! scheduled run, not here.

pub mod models;

pub use models::{
    ApiRequirement, ApiVersion, CatalogEntry, CatalogPayload, CatalogResponse, PackageVersion,
    VersionedName,
};

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Path segment of the catalog and archive endpoints
const CONTENT_TYPES_ENDPOINT: &str = "content-types";

/// Source of the remote catalog
pub trait CatalogSource {
    /// Fetch the catalog; failures are folded into `CatalogResponse::Error`
    fn fetch_catalog(&self) -> CatalogResponse;
}

/// Source of package archive bytes
pub trait ArchiveFetcher {
    /// Download the archive for one content type. Never cached.
    fn fetch_archive(&self, id: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP client for one hub endpoint
pub struct HubClient {
    client: Client,
    base_url: String,
}

impl HubClient {
    /// Create a client for the given endpoint base (e.g. `api.h5p.org/v1`)
    pub fn new(endpoint_base: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(endpoint_base),
        })
    }

    /// Base URL requests are built from, scheme included
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the catalog, or of one content type's archive when `id` is given
    pub fn endpoint_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, CONTENT_TYPES_ENDPOINT, id),
            None => format!("{}/{}", self.base_url, CONTENT_TYPES_ENDPOINT),
        }
    }

    fn request_catalog(&self) -> std::result::Result<CatalogPayload, String> {
        let url = self.endpoint_url(None);
        let token = correlation_token();

        info!("Fetching content type catalog from {}", url);
        debug!("Catalog request correlation token: {}", token);

        let response = self
            .client
            .post(&url)
            .form(&[("uuid", token.as_str())])
            .send()
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(format!("HTTP {}", status));
        }

        response.json::<CatalogPayload>().map_err(|e| {
            if e.is_decode() {
                format!("invalid catalog JSON: {}", e)
            } else {
                e.to_string()
            }
        })
    }
}

impl CatalogSource for HubClient {
    fn fetch_catalog(&self) -> CatalogResponse {
        match self.request_catalog() {
            Ok(payload) => {
                info!(
                    "Catalog lists {} content types",
                    payload.content_types.len()
                );
                CatalogResponse::Entries(payload.content_types)
            }
            Err(reason) => {
                warn!("Catalog fetch failed: {}", reason);
                CatalogResponse::Error(format!("Error fetching content types: {}", reason))
            }
        }
    }
}

impl ArchiveFetcher for HubClient {
    fn fetch_archive(&self, id: &str) -> Result<Vec<u8>> {
        // Catalog ids end up as a URL path segment
        if !is_valid_content_type_id(id) {
            return Err(Error::DownloadError(format!(
                "Error fetching content type {:?}: invalid content type id",
                id
            )));
        }

        let url = self.endpoint_url(Some(id));
        info!("Downloading content type {} from {}", id, url);

        let response = self.client.get(&url).send().map_err(|e| {
            Error::DownloadError(format!("Error fetching content type {}: {}", id, e))
        })?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "Error fetching content type {}: HTTP {}",
                id,
                response.status()
            )));
        }

        let bytes = response.bytes().map_err(|e| {
            Error::DownloadError(format!("Error fetching content type {}: {}", id, e))
        })?;

        debug!("Downloaded {} bytes for {}", bytes.len(), id);
        Ok(bytes.to_vec())
    }
}

/// Fresh random token in canonical 8-4-4-4-12 form (version 4, RFC 4122 variant).
///
/// The hub does not register or check it.
pub fn correlation_token() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

/// Machine names are `[A-Za-z0-9._-]+`, excluding the `.` and `..` segments
pub fn is_valid_content_type_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Prepend `https://` to a scheme-less base and drop trailing slashes
fn normalize_base_url(endpoint_base: &str) -> String {
    let trimmed = endpoint_base.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Serve a single canned HTTP response; the handle yields the raw request
    fn serve_once(status: &str, body: &[u8]) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let body = body.to_vec();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                request.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            request.push_str(&String::from_utf8_lossy(&request_body));

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            )
            .unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
            request
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_correlation_token_format() {
        let token = correlation_token();
        assert_eq!(token.len(), 36);

        let groups: Vec<&str> = token.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);
        assert!(token.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
        assert!(groups[2].starts_with('4'));
        assert!(matches!(groups[3].chars().next(), Some('8' | '9' | 'a' | 'b')));

        assert_ne!(token, correlation_token());
    }

    #[test]
    fn test_endpoint_urls() {
        let client = HubClient::new("api.h5p.org/v1/").unwrap();
        assert_eq!(client.base_url(), "https://api.h5p.org/v1");
        assert_eq!(
            client.endpoint_url(None),
            "https://api.h5p.org/v1/content-types"
        );
        assert_eq!(
            client.endpoint_url(Some("H5P.Accordion")),
            "https://api.h5p.org/v1/content-types/H5P.Accordion"
        );

        let client = HubClient::new("http://hub.local/api").unwrap();
        assert_eq!(client.base_url(), "http://hub.local/api");
    }

    #[test]
    fn test_fetch_catalog_success() {
        let body = br#"{"contentTypes": [
            {"id": "example.widget", "version": {"major": 1, "minor": 2, "patch": 0}},
            {"id": "example.gadget", "version": {"major": 2, "minor": 0, "patch": 1},
             "coreApiVersionNeeded": {"major": 1, "minor": 19}}
        ]}"#;
        let (base, server) = serve_once("200 OK", body);

        let client = HubClient::new(&base).unwrap();
        let response = client.fetch_catalog();
        let request = server.join().unwrap();

        match response {
            CatalogResponse::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].id, "example.widget");
                assert_eq!(entries[1].version, Some(PackageVersion::new(2, 0, 1)));
            }
            CatalogResponse::Error(e) => panic!("unexpected error: {}", e),
        }

        assert!(request.starts_with("POST /content-types "));
        assert!(request.contains("uuid="));
    }

    #[test]
    fn test_fetch_catalog_http_error() {
        let (base, server) = serve_once("503 Service Unavailable", b"");

        let client = HubClient::new(&base).unwrap();
        let response = client.fetch_catalog();
        server.join().unwrap();

        match response {
            CatalogResponse::Error(e) => {
                assert!(e.contains("503"), "error should carry status: {}", e);
                assert!(e.starts_with("Error fetching content types"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_catalog_malformed_json() {
        let (base, server) = serve_once("200 OK", b"{not json");

        let client = HubClient::new(&base).unwrap();
        let response = client.fetch_catalog();
        server.join().unwrap();

        assert!(matches!(response, CatalogResponse::Error(_)));
    }

    #[test]
    fn test_fetch_catalog_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let client = HubClient::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        assert!(matches!(client.fetch_catalog(), CatalogResponse::Error(_)));
    }

    #[test]
    fn test_fetch_archive() {
        let (base, server) = serve_once("200 OK", b"PK\x03\x04archive");

        let client = HubClient::new(&base).unwrap();
        let bytes = client.fetch_archive("example.widget").unwrap();
        let request = server.join().unwrap();

        assert_eq!(bytes, b"PK\x03\x04archive");
        assert!(request.starts_with("GET /content-types/example.widget "));
    }

    #[test]
    fn test_fetch_archive_not_found_names_package() {
        let (base, server) = serve_once("404 Not Found", b"");

        let client = HubClient::new(&base).unwrap();
        let err = client.fetch_archive("example.widget").unwrap_err();
        server.join().unwrap();

        let message = err.to_string();
        assert!(message.contains("example.widget"));
        assert!(message.contains("404"));
    }

    #[test]
    fn test_content_type_id_validation() {
        assert!(is_valid_content_type_id("H5P.Accordion"));
        assert!(is_valid_content_type_id("example_widget-2"));

        assert!(!is_valid_content_type_id(""));
        assert!(!is_valid_content_type_id(".."));
        assert!(!is_valid_content_type_id("../admin"));
        assert!(!is_valid_content_type_id("H5P.Text?download=1"));
        assert!(!is_valid_content_type_id("H5P Text"));
        assert!(!is_valid_content_type_id("H5P%2FText"));
    }

    #[test]
    fn test_fetch_archive_rejects_unsafe_id_without_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let client = HubClient::new(&base).unwrap();
        for id in ["../../admin/reset", "H5P.Text?x=1", "H5P.Text#frag", ""] {
            let err = client.fetch_archive(id).unwrap_err();
            assert!(matches!(err, Error::DownloadError(_)));
            assert!(err.to_string().contains("invalid content type id"));
        }

        let accepted = listener.accept();
        assert!(
            matches!(&accepted, Err(e) if e.kind() == std::io::ErrorKind::WouldBlock),
            "no request should reach the hub"
        );
    }
}
