//! HTTP/1.1 response construction and wire serialization.
//!
//! A [`Response`] is mutated in place by the matched route handler and the
//! layer pipeline, then serialized with [`Response::encode`] into a single
//! buffer for one write. The serializer is deliberately dumb: headers such
//! as `Content-Length` and `Connection` are the layers' responsibility.

use bytes::{BufMut, BytesMut};

use super::{Encoding, Headers, StatusCode};
use crate::arena::{AllocId, Arena, Tag};

/// An HTTP response under construction, sharing its paired request's [`Tag`].
///
/// The textual body lives inline; a gzip-compressed raw body lives in the
/// cycle's arena and is referenced by handle, so it is reclaimed with the
/// rest of the cycle when the tag is released.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    encoding: Encoding,
    body: Vec<u8>,
    raw_body: Option<AllocId>,
    tag: Tag,
}

impl Response {
    /// Creates an empty `200 OK` response under `tag`.
    pub fn new(tag: Tag) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            encoding: Encoding::None,
            body: Vec::new(),
            raw_body: None,
            tag,
        }
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The ordered response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Appends a response header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// The textual body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replaces the textual body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// The negotiated body encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Marks the body as gzip-encoded, pointing at a compressed buffer in
    /// the cycle's arena.
    pub fn set_gzip_body(&mut self, raw: AllocId) {
        self.encoding = Encoding::Gzip;
        self.raw_body = Some(raw);
    }

    /// The arena handle of the compressed body, when one was negotiated.
    pub fn raw_body(&self) -> Option<AllocId> {
        self.raw_body
    }

    /// The cycle tag this response belongs to.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Serializes the response into one buffer: status line, `key: value`
    /// per header, blank line, then the compressed raw body when gzip was
    /// negotiated, otherwise the textual body.
    pub fn encode(&self, arena: &Arena) -> BytesMut {
        let payload: &[u8] = match (self.encoding, self.raw_body) {
            (Encoding::Gzip, Some(id)) => arena.bytes(id),
            _ => &self.body,
        };

        let mut buf =
            BytesMut::with_capacity(64 + self.headers.len() * 48 + payload.len());
        buf.put(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(payload);
        buf
    }
}
