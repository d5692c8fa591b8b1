//! HTTP/1.1 protocol types.
//!
//! Core primitives shared by the parser, router, layers and server:
//! [`Method`], [`MethodSet`], [`Version`], [`StatusCode`], [`Encoding`],
//! [`Headers`], [`Request`] and [`Response`].

use std::fmt;
use std::ops::BitOr;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{ParseError, Request};
pub use response::Response;

/// An HTTP request method.
///
/// The toolkit recognizes a fixed set; any other token parses to
/// [`Method::Unknown`] rather than failing the request.
///
/// # Examples
///
/// ```
/// use taghttp::http::Method;
///
/// assert_eq!(Method::from_token("GET"), Method::Get);
/// assert_eq!(Method::from_token("BREW"), Method::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    /// A token outside the recognized set.
    Unknown,
}

impl Method {
    /// Maps a request-line token to a method. Unmapped tokens are `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "OPTIONS" => Self::Options,
            "HEAD" => Self::Head,
            _ => Self::Unknown,
        }
    }

    /// Returns the method as a string slice.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn bit(self) -> u16 {
        match self {
            Self::Get => 1,
            Self::Post => 1 << 1,
            Self::Put => 1 << 2,
            Self::Delete => 1 << 3,
            Self::Patch => 1 << 4,
            Self::Options => 1 << 5,
            Self::Head => 1 << 6,
            // Unknown carries no bit, so it never passes a route's method check.
            Self::Unknown => 0,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bitmask of methods, used when registering routes.
///
/// # Examples
///
/// ```
/// use taghttp::http::{Method, MethodSet};
///
/// let set = MethodSet::from(Method::Get) | Method::Post;
/// assert!(set.contains(Method::Post));
/// assert!(!set.contains(Method::Delete));
/// assert!(!set.contains(Method::Unknown));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSet(u16);

impl MethodSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Returns `true` when `method` is a member. `Unknown` is never a member.
    pub fn contains(self, method: Method) -> bool {
        let bit = method.bit();
        bit != 0 && self.0 & bit == bit
    }
}

impl From<Method> for MethodSet {
    fn from(method: Method) -> Self {
        Self(method.bit())
    }
}

impl BitOr for Method {
    type Output = MethodSet;

    fn bitor(self, rhs: Method) -> MethodSet {
        MethodSet(self.bit() | rhs.bit())
    }
}

impl BitOr<Method> for MethodSet {
    type Output = Self;

    fn bitor(self, rhs: Method) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl BitOr for MethodSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The HTTP version found on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    Http11,
    Http20,
    /// Any suffix other than `HTTP/1.0`, `HTTP/1.1` or `HTTP/2.0`.
    #[default]
    Unknown,
}

impl Version {
    /// Maps a request-line version suffix to a version.
    pub fn from_token(token: &str) -> Self {
        match token {
            "HTTP/1.0" => Self::Http10,
            "HTTP/1.1" => Self::Http11,
            "HTTP/2.0" => Self::Http20,
            _ => Self::Unknown,
        }
    }
}

/// The response status codes the toolkit emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    Created = 201,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    InternalServerError = 500,
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Returns the numeric status code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Body encoding negotiated for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    None,
    Gzip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_token_round_trip() {
        for token in ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"] {
            assert_eq!(Method::from_token(token).as_str(), token);
        }
        assert_eq!(Method::from_token("TRACE"), Method::Unknown);
        assert_eq!(Method::from_token(""), Method::Unknown);
    }

    #[test]
    fn method_set_membership() {
        let set = Method::Get | Method::Post;
        assert!(set.contains(Method::Get));
        assert!(set.contains(Method::Post));
        assert!(!set.contains(Method::Head));
    }

    #[test]
    fn unknown_method_never_matches() {
        let all = MethodSet::from(Method::Get)
            | Method::Post
            | Method::Put
            | Method::Delete
            | Method::Patch
            | Method::Options
            | Method::Head;
        assert!(!all.contains(Method::Unknown));
        assert!(!MethodSet::EMPTY.contains(Method::Unknown));
    }

    #[test]
    fn version_tokens() {
        assert_eq!(Version::from_token("HTTP/1.1"), Version::Http11);
        assert_eq!(Version::from_token("HTTP/2.0"), Version::Http20);
        assert_eq!(Version::from_token("HTTP/1.0"), Version::Http10);
        assert_eq!(Version::from_token("HTTP/9.9"), Version::Unknown);
    }

    #[test]
    fn status_code_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
    }
}
