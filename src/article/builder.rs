//! Article builder for local posts

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::SigningKey;

use super::header;
use super::signature::sign_body;
use super::types::{Article, Headers};
use crate::validation::{validate_message_id, validate_newsgroup_name};
use crate::{FeedError, Result};

/// Line width for base64 attachment bodies
const BASE64_LINE: usize = 76;

#[derive(Debug, Clone)]
struct PendingAttachment {
    filename: String,
    mime: String,
    data: Vec<u8>,
}

/// Builds articles submitted through the local frontend
///
/// # Examples
///
/// ```
/// use nntp_feed::article::ArticleBuilder;
/// use nntp_feed::validation::is_valid_message_id;
///
/// let article = ArticleBuilder::new("node-a.example")
///     .newsgroup("overchan.test")
///     .subject("hello")
///     .body("first post")
///     .build()
///     .unwrap();
///
/// assert!(article.is_op());
/// assert_eq!(article.newsgroup(), Some("overchan.test"));
/// assert!(is_valid_message_id(article.message_id().unwrap()));
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct ArticleBuilder {
    instance: String,
    newsgroup: Option<String>,
    subject: String,
    from: String,
    body: String,
    message_id: Option<String>,
    reference: Option<String>,
    date: Option<String>,
    sage: bool,
    encrypted_ip: Option<String>,
    signing_key: Option<SigningKey>,
    attachments: Vec<PendingAttachment>,
    extra: Vec<(String, String)>,
}

impl ArticleBuilder {
    /// Start a post originating at `instance`
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            newsgroup: None,
            subject: "None".to_string(),
            from: "anonymous <poster@anon.tld>".to_string(),
            body: String::new(),
            message_id: None,
            reference: None,
            date: None,
            sage: false,
            encrypted_ip: None,
            signing_key: None,
            attachments: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Set the newsgroup (required)
    pub fn newsgroup(mut self, newsgroup: impl Into<String>) -> Self {
        self.newsgroup = Some(newsgroup.into());
        self
    }

    /// Set the Subject header
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the From header
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Set the message text
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the Message-ID (generated if not provided)
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Make this a reply to the thread rooted at `root`
    pub fn reply_to(mut self, root: impl Into<String>) -> Self {
        self.reference = Some(root.into());
        self
    }

    /// Set the Date header (current time if not provided)
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Do not bump the thread
    pub fn sage(mut self, sage: bool) -> Self {
        self.sage = sage;
        self
    }

    /// Attach the instance-encrypted poster address
    pub fn encrypted_ip(mut self, encrypted_ip: impl Into<String>) -> Self {
        self.encrypted_ip = Some(encrypted_ip.into());
        self
    }

    /// Sign the body with a tripcode key
    pub fn sign_with(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Add a file; the body becomes `multipart/mixed`
    pub fn attachment(
        mut self,
        filename: impl Into<String>,
        mime: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.attachments.push(PendingAttachment {
            filename: filename.into(),
            mime: mime.into(),
            data: data.into(),
        });
        self
    }

    /// Add a custom header
    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    /// Build the article, validating identifiers and generating defaults
    pub fn build(self) -> Result<Article> {
        let newsgroup = self
            .newsgroup
            .ok_or_else(|| FeedError::InvalidArticle("newsgroup is required".to_string()))?;
        validate_newsgroup_name(&newsgroup)?;

        let message_id = match self.message_id {
            Some(id) => id,
            None => generate_message_id(&self.instance),
        };
        validate_message_id(&message_id)?;
        if let Some(reference) = &self.reference {
            validate_message_id(reference)?;
        }

        let date = self.date.unwrap_or_else(|| {
            chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S %z")
                .to_string()
        });

        let mut headers = Headers::new();
        headers.append(header::MESSAGE_ID, message_id);
        headers.append(header::NEWSGROUPS, newsgroup);
        headers.append(header::SUBJECT, self.subject);
        headers.append(header::FROM, self.from);
        headers.append(header::DATE, date);
        headers.append(header::PATH, self.instance.clone());
        if let Some(reference) = self.reference {
            headers.append(header::REFERENCES, reference);
        }
        if self.sage {
            headers.append(header::SAGE, "1");
        }
        if let Some(encrypted_ip) = self.encrypted_ip {
            headers.append(header::ENCRYPTED_IP, encrypted_ip);
        }
        for (name, value) in self.extra {
            headers.append(name, value);
        }

        let body = if self.attachments.is_empty() {
            headers.append(header::CONTENT_TYPE, "text/plain; charset=UTF-8");
            crlf_lines(&self.body)
        } else {
            let boundary = format!("{}", uuid::Uuid::new_v4().simple());
            headers.append(
                header::CONTENT_TYPE,
                format!("multipart/mixed; boundary=\"{boundary}\""),
            );
            multipart_body(&boundary, &self.body, &self.attachments)
        };

        if let Some(key) = self.signing_key {
            let (pubkey, signature) = sign_body(&key, &body);
            headers.append(header::PUBKEY, pubkey);
            headers.append(header::SIGNATURE, signature);
        }

        Ok(Article::new(headers, body))
    }
}

/// Generate a grammar-valid message-id at `instance`
///
/// Characters outside the message-id alphabet are dropped from the domain.
pub fn generate_message_id(instance: &str) -> String {
    let domain: String = instance
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    let domain = if domain.is_empty() {
        "localhost".to_string()
    } else {
        domain
    };
    format!("<{}@{domain}>", uuid::Uuid::new_v4().simple())
}

/// Normalise text to CRLF lines with a trailing CRLF
fn crlf_lines(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 16);
    for line in text.lines() {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn multipart_body(boundary: &str, text: &str, attachments: &[PendingAttachment]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(b"Content-Type: text/plain; charset=UTF-8\r\n\r\n");
    out.extend_from_slice(&crlf_lines(text));

    for attachment in attachments {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        out.extend_from_slice(format!("Content-Type: {}\r\n", attachment.mime).as_bytes());
        out.extend_from_slice(
            format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                attachment.filename
            )
            .as_bytes(),
        );
        out.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n\r\n");
        let encoded = STANDARD.encode(&attachment.data);
        for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}
