//! Article parsing functions
//!
//! Raw article bytes (on-disk form or un-stuffed wire form) to [`Article`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use super::header;
use super::types::{Article, Attachment, Headers};
use crate::{FeedError, Result};

/// Split raw article bytes into header block and body
///
/// Splits at the first blank line (CRLF CRLF or LF LF). With no separator the
/// whole input is headers.
pub fn split_article(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse a header block
///
/// Header field format is `name: value`; continuation lines start with
/// whitespace and are unfolded into the previous value with a single space.
pub fn parse_headers(headers_text: &str) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut current: Option<(String, String)> = None;

    for line in headers_text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                None => {
                    return Err(FeedError::InvalidArticle(
                        "continuation line before first header".to_string(),
                    ));
                }
            }
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            FeedError::InvalidArticle(format!("malformed header line: {line:.100}"))
        })?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(FeedError::InvalidArticle(format!(
                "malformed header name: {name:.100}"
            )));
        }

        if let Some((n, v)) = current.take() {
            headers.append(n, v);
        }
        current = Some((name.to_string(), value.trim().to_string()));
    }

    if let Some((n, v)) = current {
        headers.append(n, v);
    }

    Ok(headers)
}

/// Parse raw article bytes
///
/// Header bytes must be UTF-8 (invalid sequences are replaced); the body is
/// kept byte-for-byte.
///
/// # Examples
///
/// ```
/// use nntp_feed::article::parse_article;
///
/// let raw = b"Message-ID: <m1@a>\r\nNewsgroups: overchan.test\r\n\r\nhello\r\n";
/// let article = parse_article(raw).unwrap();
/// assert_eq!(article.message_id(), Some("<m1@a>"));
/// assert_eq!(article.body, b"hello\r\n");
/// ```
pub fn parse_article(raw: &[u8]) -> Result<Article> {
    let (head, body) = split_article(raw);
    let headers = parse_headers(&String::from_utf8_lossy(head))?;
    if headers.is_empty() {
        return Err(FeedError::InvalidArticle("article has no headers".to_string()));
    }
    Ok(Article::new(headers, body.to_vec()))
}

/// Extract a `key=value` parameter from a structured header value
fn header_param<'a>(value: &'a str, key: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case(key)
            .then(|| v.trim().trim_matches('"'))
    })
}

/// Split a multipart body into its binary parts
///
/// Text parts without a filename are the message itself and are skipped.
pub(crate) fn parse_multipart(content_type: &str, body: &[u8]) -> Result<Vec<Attachment>> {
    let boundary = header_param(content_type, "boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| FeedError::InvalidArticle("multipart body without boundary".to_string()))?;
    let delimiter = format!("--{boundary}");

    let text = String::from_utf8_lossy(body);
    let mut attachments = Vec::new();

    for section in text.split(delimiter.as_str()).skip(1) {
        if section.starts_with("--") {
            break;
        }
        let section = section.trim_start_matches(['\r', '\n']);
        let (head, content) = split_article(section.as_bytes());
        let part_headers = parse_headers(&String::from_utf8_lossy(head))?;

        let mime = part_headers
            .get(header::CONTENT_TYPE)
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text/plain".to_string());
        let filename = part_headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|cd| header_param(cd, "filename"))
            .or_else(|| {
                part_headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|ct| header_param(ct, "name"))
            })
            .map(str::to_string);

        let Some(filename) = filename else {
            if mime.starts_with("text/") {
                continue;
            }
            return Err(FeedError::InvalidArticle(format!(
                "attachment of type {mime} has no filename"
            )));
        };

        let content = trim_trailing_newline(content);
        let encoding = part_headers
            .get(header::CONTENT_TRANSFER_ENCODING)
            .unwrap_or("")
            .trim();
        let data = if encoding.eq_ignore_ascii_case("base64") {
            let compact: Vec<u8> = content
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD
                .decode(compact)
                .map_err(|e| FeedError::InvalidArticle(format!("bad base64 in {filename}: {e}")))?
        } else {
            content.to_vec()
        };

        let hash = hex::encode(Sha256::digest(&data));
        attachments.push(Attachment {
            mime,
            filename,
            data,
            hash,
        });
    }

    Ok(attachments)
}

fn trim_trailing_newline(content: &[u8]) -> &[u8] {
    content
        .strip_suffix(b"\r\n")
        .or_else(|| content.strip_suffix(b"\n"))
        .unwrap_or(content)
}
