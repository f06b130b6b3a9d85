//! Article type definitions

use chrono::{DateTime, Utc};

use super::header;
use super::parsing::parse_multipart;
use super::signature::verify_body;
use crate::Result;
use crate::validation::parse_date;

/// Ordered, multi-valued article headers
///
/// Header names compare case-insensitively. Insertion order and repeated
/// headers are preserved so that an article can be relayed byte-for-byte
/// apart from the Path rewrite.
///
/// # Examples
///
/// ```
/// use nntp_feed::article::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Newsgroups", "overchan.test");
/// headers.append("X-Note", "one");
/// headers.append("x-note", "two");
///
/// assert_eq!(headers.get("NEWSGROUPS"), Some("overchan.test"));
/// assert_eq!(headers.get_all("X-Note").count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present at all
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, keeping existing values
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of a header with a single one
    ///
    /// The new value takes the position of the first existing occurrence, or is
    /// appended when the header was absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Remove every value of a header
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterate headers in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A binary part carried by a multipart article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME type of the part
    pub mime: String,
    /// Filename from Content-Disposition or Content-Type `name=`
    pub filename: String,
    /// Decoded bytes
    pub data: Vec<u8>,
    /// Hex SHA-256 of `data`
    pub hash: String,
}

/// A news article
///
/// Content is immutable once stored; the only rewrite an article sees in
/// transit is the Path header, see [`Article::prepend_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Article headers
    pub headers: Headers,
    /// Raw body bytes (after the blank line separator), CRLF line endings
    pub body: Vec<u8>,
}

impl Article {
    /// Create a new article with the given headers and body
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Message-ID header value
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(header::MESSAGE_ID).map(str::trim)
    }

    /// The article's newsgroup (first entry of Newsgroups)
    pub fn newsgroup(&self) -> Option<&str> {
        self.headers
            .get(header::NEWSGROUPS)?
            .split(',')
            .map(str::trim)
            .find(|g| !g.is_empty())
    }

    /// Message-ID of the thread root this article replies to
    ///
    /// `None` for an OP.
    pub fn reference(&self) -> Option<&str> {
        self.headers
            .get(header::REFERENCES)?
            .split_whitespace()
            .next()
    }

    /// Whether this article starts a thread
    pub fn is_op(&self) -> bool {
        self.reference().is_none()
    }

    /// Path header, empty when absent
    pub fn path(&self) -> &str {
        self.headers.get(header::PATH).map(str::trim).unwrap_or("")
    }

    /// Whether `instance` already relayed this article
    pub fn path_contains(&self, instance: &str) -> bool {
        self.path().split('!').any(|hop| hop.trim() == instance)
    }

    /// Record that this article passed through `instance`
    ///
    /// Path grows at the front, newest relay first.
    pub fn prepend_path(&mut self, instance: &str) {
        let path = match self.path() {
            "" => instance.to_string(),
            existing => format!("{instance}!{existing}"),
        };
        self.headers.set(header::PATH, path);
    }

    /// Time the article was posted, from the Date header
    pub fn posted(&self) -> Option<DateTime<Utc>> {
        parse_date(self.headers.get(header::DATE)?.trim()).ok()
    }

    /// Reply that must not bump its thread
    pub fn is_sage(&self) -> bool {
        self.headers.contains(header::SAGE)
    }

    /// Encrypted poster address, if the origin instance attached one
    pub fn encrypted_ip(&self) -> Option<&str> {
        self.headers
            .get(header::ENCRYPTED_IP)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Posted through Tor
    pub fn is_tor(&self) -> bool {
        self.headers.contains(header::TOR_POSTER)
    }

    /// Posted through I2P
    pub fn is_i2p(&self) -> bool {
        self.headers.contains(header::I2P_DESTHASH)
    }

    /// Anonymous poster: no encrypted address, or arrived via Tor/I2P
    pub fn is_anonymous(&self) -> bool {
        self.encrypted_ip().is_none() || self.is_tor() || self.is_i2p()
    }

    /// Hex public key of a signed post
    pub fn pubkey(&self) -> Option<&str> {
        self.headers.get(header::PUBKEY).map(str::trim)
    }

    /// Hex signature of a signed post
    pub fn signature(&self) -> Option<&str> {
        self.headers.get(header::SIGNATURE).map(str::trim)
    }

    /// Carries signature headers, whether or not they verify
    pub fn claims_signature(&self) -> bool {
        self.pubkey().is_some() || self.signature().is_some()
    }

    /// Signature headers are present and verify against the body
    pub fn is_signed(&self) -> bool {
        match (self.pubkey(), self.signature()) {
            (Some(pubkey), Some(signature)) => verify_body(pubkey, signature, &self.body),
            _ => false,
        }
    }

    /// MIME content type, if any
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE)
    }

    /// Decode the binary parts of a multipart body
    ///
    /// Plain articles have no attachments.
    pub fn attachments(&self) -> Result<Vec<Attachment>> {
        match self.content_type() {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("multipart/") => {
                parse_multipart(ct, &self.body)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Whether the body carries at least one attachment
    ///
    /// A malformed multipart body counts as carrying one.
    pub fn has_attachments(&self) -> bool {
        self.attachments().map(|a| !a.is_empty()).unwrap_or(true)
    }

    /// Body as text, lossily decoded
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serialize headers and body with CRLF line endings
    ///
    /// This is the on-disk form; use [`crate::commands::dot_stuff`] for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1024 + self.body.len());
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
