//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. Query parameters are
/// percent-decoded once at parse time; the path is kept exactly as received.
///
/// # Examples
///
/// ```
/// use readthru::http::request::Request;
///
/// let raw = b"GET /collections/items?value=a%20b HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/collections/items");
/// assert_eq!(request.query_param("value"), Some("a b"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let Ok(method) = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>();

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();

        // Anything past Content-Length belongs to the next pipelined request.
        let declared = header_map
            .get("content-length")
            .and_then(|len| len.parse::<usize>().ok())
            .unwrap_or(0);
        let body_end = body_offset.saturating_add(declared).min(buf.len());
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
                params,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string), still percent-encoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a decoded query parameter value by key.
    ///
    /// When a key repeats, the first occurrence wins.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Decodes one path segment. Only `%XX` escapes are resolved; `+` is a
/// literal plus in a path. Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn decode_path_segment(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Decodes one query-string component: `+` becomes a space, then `%XX`
/// escapes are resolved. Invalid UTF-8 is replaced rather than rejected.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(key))
            .or_insert_with(|| decode_component(value));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn parse_lookup_query() {
        let raw = b"GET /collections/items?value=x HTTP/1.1\r\nHost: proxy\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/collections/items");
        assert_eq!(req.query_string(), Some("value=x"));
        assert_eq!(req.query_param("value"), Some("x"));
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let raw = b"GET /c?value=caf%C3%A9+au+lait&k%3D=1 HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("value"), Some("café au lait"));
        assert_eq!(req.query_param("k="), Some("1"));
    }

    #[test]
    fn empty_and_bare_query_values() {
        let raw = b"GET /c?value=&flag HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("value"), Some(""));
        assert_eq!(req.query_param("flag"), Some(""));
        assert_eq!(req.query_param("absent"), None);
    }

    #[test]
    fn repeated_query_key_keeps_first() {
        let raw = b"GET /c?value=1&value=2 HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("value"), Some("1"));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn malformed_request() {
        let raw = b"GET\0 / HTTP/1.1\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn keep_alive_defaults() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"hello");

        let (req, _) = Request::parse(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.body().is_empty());
    }

    #[test]
    fn body_is_truncated_when_not_yet_received() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"hel");
    }

    #[test]
    fn path_segments_keep_plus_signs() {
        assert_eq!(decode_path_segment("c++"), "c++");
        assert_eq!(decode_path_segment("my%20items%2Bmore"), "my items+more");
        assert_eq!(decode_component("c++"), "c  ");
    }

    #[test]
    fn decode_component_handles_invalid_escapes() {
        assert_eq!(decode_component("a%2Fb"), "a/b");
        assert_eq!(decode_component("100%"), "100%");
    }
}
