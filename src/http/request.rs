//! HTTP/1.1 request parsing.
//!
//! A deliberately lenient, line-oriented parser: unknown methods and
//! versions are values rather than errors, duplicate headers are preserved,
//! and the body is whatever follows the blank line. This is why the toolkit
//! does not use an off-the-shelf strict parser.

use thiserror::Error;

use super::{Headers, Method, Version};
use crate::arena::Tag;

/// Errors for requests the parser cannot make sense of. Either one closes
/// the connection; nothing here is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer contains no CRLF-terminated request line.
    #[error("request line missing or unterminated")]
    MissingRequestLine,

    /// The request line does not have the `METHOD TARGET VERSION` shape.
    #[error("malformed request line: {line:?}")]
    MalformedRequestLine { line: String },
}

/// A parsed HTTP request, scoped to one cycle's [`Tag`].
///
/// # Examples
///
/// ```
/// use taghttp::arena::Tag;
/// use taghttp::http::{Method, Request, Version};
///
/// let raw = "GET /echo/hi HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw, Tag::from_raw(1)).unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.target(), "/echo/hi");
/// assert_eq!(request.version(), Version::Http11);
/// assert_eq!(request.header("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: String,
    tag: Tag,
}

impl Request {
    /// Parses one receive buffer into a request.
    ///
    /// Line-oriented CRLF scan: the first non-empty line is the request
    /// line, split on spaces into method token, target and version suffix.
    /// Subsequent lines up to the first empty line are headers, split on the
    /// first `": "`; lines without the separator are skipped. Everything
    /// after the blank line is the body, verbatim.
    ///
    /// The parser does not consult `Content-Length`: it consumes exactly the
    /// bytes present in this buffer, so a body spanning multiple socket
    /// reads is not reassembled.
    ///
    /// # Errors
    ///
    /// [`ParseError::MissingRequestLine`] when no CRLF-terminated line
    /// exists, [`ParseError::MalformedRequestLine`] when the first line does
    /// not split into three tokens.
    pub fn parse(raw: &str, tag: Tag) -> Result<Self, ParseError> {
        let (mut line, mut rest) =
            split_crlf(raw).ok_or(ParseError::MissingRequestLine)?;
        while line.is_empty() {
            (line, rest) = split_crlf(rest).ok_or(ParseError::MissingRequestLine)?;
        }

        let malformed = || ParseError::MalformedRequestLine {
            line: line.to_owned(),
        };
        let (method_token, after_method) = line.split_once(' ').ok_or_else(malformed)?;
        let (target, version_token) = after_method.split_once(' ').ok_or_else(malformed)?;

        let mut headers = Headers::new();
        let body = loop {
            match split_crlf(rest) {
                Some((header_line, after)) => {
                    rest = after;
                    if header_line.is_empty() {
                        break rest;
                    }
                    if let Some((key, value)) = header_line.split_once(": ") {
                        headers.append(key, value);
                    }
                }
                // No terminating blank line: the unterminated tail is the body.
                None => break rest,
            }
        };

        Ok(Self {
            method: Method::from_token(method_token),
            target: target.to_owned(),
            version: Version::from_token(version_token),
            headers,
            body: body.to_owned(),
            tag,
        })
    }

    /// An empty placeholder request. The connection handler uses it to
    /// drive teardown layers for a cycle whose request never parsed.
    pub(crate) fn empty(tag: Tag) -> Self {
        Self {
            method: Method::Unknown,
            target: String::new(),
            version: Version::Unknown,
            headers: Headers::new(),
            body: String::new(),
            tag,
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The request target path, exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The request-line HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The ordered header map.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of the named header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The request body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The cycle tag this request was allocated under.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Returns `true` when the request asked for the connection to close.
    pub fn wants_close(&self) -> bool {
        self.header("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

fn split_crlf(s: &str) -> Option<(&str, &str)> {
    s.split_once("\r\n")
}
