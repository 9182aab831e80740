//! Request and Response types seen by handlers and filters.
//!
//! A [`Request`] is built from the CGI variables and body of one FastCGI
//! request; a [`Response`] is rendered back as a CGI header block followed
//! by the body.
//!
//! # Examples
//!
//! ```
//! use fcgi_container::request::{Request, Response};
//!
//! let request = Request::new("GET", "/hello")
//!     .with_header("Accept", "text/plain")
//!     .with_query("name=world");
//! assert_eq!(request.arg("name"), Some("world"));
//!
//! let response = Response::ok().with_body_str("Hello, world!");
//! assert!(response.is_success());
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::components::Session;
use crate::constants::{CONTENT_TYPE_FORM, CONTENT_TYPE_TEXT};

/// Reasons a FastCGI request cannot be turned into a [`Request`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("REQUEST_METHOD is missing")]
    MissingMethod,

    #[error("CONTENT_LENGTH is not a number: {0}")]
    InvalidContentLength(String),

    #[error("body length {actual} does not match CONTENT_LENGTH {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A request as seen by filters and handlers.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method (e.g., "GET", "POST").
    pub method: String,
    script_name: String,
    /// Extra path after the script name.
    pub path_info: String,
    /// Raw query string without the leading `?`.
    pub query_string: String,
    /// Peer address reported by the web server.
    pub remote_addr: String,
    /// Host the request was addressed to.
    pub host: String,
    /// Every CGI variable, in the order received.
    pub params: Vec<(String, String)>,
    /// HTTP headers recovered from `HTTP_*` variables.
    pub headers: Vec<(String, String)>,
    /// Decoded query and form arguments.
    pub args: Vec<(String, String)>,
    /// Cookies from the `Cookie` header.
    pub cookies: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Session attached by the session manager, if one is configured.
    pub session: Option<Arc<Session>>,
    /// Key under which the request cache holds this request.
    pub cache_key: Option<String>,
}

impl Request {
    /// Create a request with the given method and script name.
    #[must_use]
    pub fn new(method: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            script_name: script_name.into(),
            path_info: String::new(),
            query_string: String::new(),
            remote_addr: String::new(),
            host: String::new(),
            params: Vec::new(),
            headers: Vec::new(),
            args: Vec::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            session: None,
            cache_key: None,
        }
    }

    /// Build a request from CGI variables and the STDIN body.
    ///
    /// # Errors
    ///
    /// Returns an [`AttachError`] when the variables do not describe a
    /// well-formed request.
    pub fn from_cgi(params: Vec<(String, String)>, body: Vec<u8>) -> Result<Self, AttachError> {
        let lookup = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let method = lookup("REQUEST_METHOD")
            .filter(|m| !m.is_empty())
            .ok_or(AttachError::MissingMethod)?;

        if let Some(raw) = lookup("CONTENT_LENGTH").filter(|v| !v.is_empty()) {
            let expected: usize = raw
                .trim()
                .parse()
                .map_err(|_| AttachError::InvalidContentLength(raw.clone()))?;
            if expected != body.len() {
                return Err(AttachError::LengthMismatch {
                    expected,
                    actual: body.len(),
                });
            }
        }

        let mut request = Self::new(method, lookup("SCRIPT_NAME").unwrap_or_default());
        request.path_info = lookup("PATH_INFO").unwrap_or_default();
        request.query_string = lookup("QUERY_STRING").unwrap_or_default();
        request.remote_addr = lookup("REMOTE_ADDR").unwrap_or_default();
        request.host = lookup("HTTP_HOST")
            .or_else(|| lookup("SERVER_NAME"))
            .unwrap_or_default();

        for (name, value) in &params {
            if let Some(header) = name.strip_prefix("HTTP_") {
                request.headers.push((header_name(header), value.clone()));
            }
        }
        // CGI passes these two without the HTTP_ prefix.
        if let Some(ct) = lookup("CONTENT_TYPE").filter(|v| !v.is_empty()) {
            request.headers.push(("Content-Type".to_string(), ct));
        }
        if let Some(cl) = lookup("CONTENT_LENGTH").filter(|v| !v.is_empty()) {
            request.headers.push(("Content-Length".to_string(), cl));
        }

        request.params = params;
        request.body = body;
        request.parse_args();
        request.parse_cookies();
        Ok(request)
    }

    /// Path used for handler resolution.
    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Rewrite the path used for handler resolution.
    ///
    /// Filters use this to route a request somewhere else, e.g. to a login
    /// handler.
    pub fn set_script_name(&mut self, script_name: impl Into<String>) {
        self.script_name = script_name.into();
    }

    /// Add a header to the request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self.parse_cookies();
        self
    }

    /// Set the query string and re-parse arguments.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self.parse_args();
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self.parse_args();
        self
    }

    /// Get a CGI variable by exact name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the Content-Type header value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// First query or form argument with `name`.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the argument `name`.
    pub fn args_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Cookie value by name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn parse_args(&mut self) {
        self.args = parse_urlencoded(&self.query_string);
        let is_form = self
            .content_type()
            .is_some_and(|ct| ct.starts_with(CONTENT_TYPE_FORM));
        if is_form {
            let body = String::from_utf8_lossy(&self.body).into_owned();
            self.args.extend(parse_urlencoded(&body));
        }
    }

    fn parse_cookies(&mut self) {
        self.cookies = self
            .header("cookie")
            .map(|raw| {
                raw.split(';')
                    .filter_map(|part| {
                        let (name, value) = part.trim().split_once('=')?;
                        Some((name.trim().to_string(), value.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new("GET", "/")
    }
}

/// `ACCEPT_LANGUAGE` -> `Accept-Language`
fn header_name(cgi: &str) -> String {
    cgi.split('_')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

/// Canonical reason phrase for a status code.
#[must_use]
pub const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A response produced by a filter or handler chain.
///
/// # Example
///
/// ```
/// use fcgi_container::request::Response;
///
/// let response = Response::ok()
///     .with_header("Content-Type", "application/json")
///     .with_body_str(r#"{"success": true}"#);
/// assert_eq!(response.status, 200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// HTTP headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Response body as raw bytes.
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response with the given status code.
    #[must_use]
    pub const fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Create a 200 OK response.
    #[must_use]
    pub const fn ok() -> Self {
        Self::new(200)
    }

    /// Plain text error page for `status`.
    #[must_use]
    pub fn error(status: u16) -> Self {
        Self::new(status)
            .with_header("Content-Type", CONTENT_TYPE_TEXT)
            .with_body_str(format!("{status} {}\n", reason_phrase(status)))
    }

    /// 302 redirect to `location`.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302).with_header("Location", location)
    }

    /// Add a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the response body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Set the response body from a string.
    #[must_use]
    pub fn with_body_str(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if the response is successful (2xx status).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Check if the response is a client error (4xx status).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }

    /// Check if the response is a server error (5xx status).
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500 && self.status < 600
    }

    /// Get the body as a UTF-8 string.
    pub fn body_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// CGI header block: `Status:` line, headers, blank line.
    ///
    /// A `Content-Type` is added when the response has a body but no type.
    #[must_use]
    pub fn cgi_head(&self) -> String {
        let mut head = String::new();
        let _ = write!(head, "Status: {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        if !self.body.is_empty() && self.header("content-type").is_none() {
            let _ = write!(head, "Content-Type: {CONTENT_TYPE_TEXT}\r\n");
        }
        head.push_str("\r\n");
        head
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cgi(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_cgi_basic() {
        let request = Request::from_cgi(
            cgi(&[
                ("REQUEST_METHOD", "GET"),
                ("SCRIPT_NAME", "/hello"),
                ("QUERY_STRING", "name=a+b&x=%2F"),
                ("HTTP_HOST", "example.com"),
                ("HTTP_ACCEPT_LANGUAGE", "en"),
                ("HTTP_COOKIE", "session_id=abc; theme=dark"),
                ("REMOTE_ADDR", "10.0.0.1"),
            ]),
            Vec::new(),
        )
        .unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.script_name(), "/hello");
        assert_eq!(request.host, "example.com");
        assert_eq!(request.remote_addr, "10.0.0.1");
        assert_eq!(request.arg("name"), Some("a b"));
        assert_eq!(request.arg("x"), Some("/"));
        assert_eq!(request.header("Accept-Language"), Some("en"));
        assert_eq!(request.cookie("session_id"), Some("abc"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.param("REMOTE_ADDR"), Some("10.0.0.1"));
    }

    #[test]
    fn test_form_body_args() {
        let body = b"user=alice&tag=1&tag=2".to_vec();
        let request = Request::from_cgi(
            cgi(&[
                ("REQUEST_METHOD", "POST"),
                ("SCRIPT_NAME", "/form"),
                ("CONTENT_TYPE", CONTENT_TYPE_FORM),
                ("CONTENT_LENGTH", "22"),
            ]),
            body,
        )
        .unwrap();

        assert_eq!(request.arg("user"), Some("alice"));
        assert_eq!(request.args_named("tag").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(request.header("content-length"), Some("22"));
    }

    #[test]
    fn test_missing_method_is_rejected() {
        let err = Request::from_cgi(cgi(&[("SCRIPT_NAME", "/")]), Vec::new()).unwrap_err();
        assert_eq!(err, AttachError::MissingMethod);
    }

    #[test]
    fn test_bad_content_length_is_rejected() {
        let err = Request::from_cgi(
            cgi(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "ten")]),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AttachError::InvalidContentLength(_)));

        let err = Request::from_cgi(
            cgi(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "10")]),
            b"short".to_vec(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AttachError::LengthMismatch {
                expected: 10,
                actual: 5
            }
        );
    }

    #[test]
    fn test_set_script_name() {
        let mut request = Request::new("GET", "/private");
        request.set_script_name("/login");
        assert_eq!(request.script_name(), "/login");
    }

    #[test]
    fn test_header_name_conversion() {
        assert_eq!(header_name("ACCEPT_LANGUAGE"), "Accept-Language");
        assert_eq!(header_name("X_FORWARDED_FOR"), "X-Forwarded-For");
        assert_eq!(header_name("HOST"), "Host");
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(404);
        assert!(response.is_client_error());
        assert_eq!(response.body_str().unwrap(), "404 Not Found\n");
        assert_eq!(response.header("content-type"), Some(CONTENT_TYPE_TEXT));

        assert!(Response::error(500).is_server_error());
    }

    #[test]
    fn test_redirect() {
        let response = Response::redirect("/login");
        assert_eq!(response.status, 302);
        assert_eq!(response.header("location"), Some("/login"));
    }

    #[test]
    fn test_cgi_head() {
        let response = Response::ok()
            .with_header("X-Custom", "1")
            .with_body_str("body");
        assert_eq!(
            response.cgi_head(),
            format!("Status: 200 OK\r\nX-Custom: 1\r\nContent-Type: {CONTENT_TYPE_TEXT}\r\n\r\n")
        );

        let empty = Response::new(204);
        assert_eq!(empty.cgi_head(), "Status: 204 No Content\r\n\r\n");
    }
}
