//! News article model
//!
//! Provides the in-memory representation of an article as it travels between
//! peers: ordered headers, raw body bytes, and the derived classification the
//! acceptance rules need (thread root or reply, sage, anonymous, signed).
//!
//! This module is organized into:
//! - `types`: Article, Headers and Attachment
//! - `parsing`: wire/raw bytes to Article, multipart splitting
//! - `builder`: ArticleBuilder for local posts
//! - `signature`: ed25519 signing and verification of bodies

mod builder;
mod parsing;
mod signature;
mod types;

pub use self::builder::{ArticleBuilder, generate_message_id};
pub use self::parsing::{parse_article, parse_headers, split_article};
pub use self::signature::{sign_body, verify_body};
pub use self::types::{Article, Attachment, Headers};

/// Well-known header names
pub mod header {
    /// Unique article identifier
    pub const MESSAGE_ID: &str = "Message-ID";
    /// Target newsgroup; only the first one is used
    pub const NEWSGROUPS: &str = "Newsgroups";
    /// Parent thread root of a reply
    pub const REFERENCES: &str = "References";
    /// Relay trail, `!`-delimited, newest first
    pub const PATH: &str = "Path";
    /// Creation time
    pub const DATE: &str = "Date";
    /// Author
    pub const FROM: &str = "From";
    /// Subject line
    pub const SUBJECT: &str = "Subject";
    /// Presence suppresses the thread bump
    pub const SAGE: &str = "X-Sage";
    /// Instance-encrypted poster address
    pub const ENCRYPTED_IP: &str = "X-Encrypted-IP";
    /// Set by instances that received the post over Tor
    pub const TOR_POSTER: &str = "X-Tor-Poster";
    /// Set by instances that received the post over I2P
    pub const I2P_DESTHASH: &str = "X-I2P-DestHash";
    /// Hex ed25519 public key of a signed post
    pub const PUBKEY: &str = "X-PubKey-Ed25519";
    /// Hex ed25519 signature of the SHA-512 body digest
    pub const SIGNATURE: &str = "X-Signature-Ed25519-SHA512";
    /// MIME content type
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// MIME transfer encoding of a part
    pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
    /// MIME disposition of a part, carries the filename
    pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
}

/// Newsgroup reserved for control messages
pub const CONTROL_GROUP: &str = "ctl";
