//! Message-id and newsgroup grammar

use nntp_feed::{is_valid_message_id, validate_newsgroup_name};

#[test]
fn test_message_id_grammar() {
    assert!(is_valid_message_id("<a@b>"));
    assert!(is_valid_message_id("<m1@A>"));
    assert!(is_valid_message_id("<1234.abcd@news.example.org>"));

    assert!(!is_valid_message_id("<><><>"));
    assert!(!is_valid_message_id("<ab>"));
    assert!(!is_valid_message_id("<a@b@c>"));
    assert!(!is_valid_message_id("a@b"));
    assert!(!is_valid_message_id("<a@>"));
    assert!(!is_valid_message_id("<@b>"));
    assert!(!is_valid_message_id("<a b@c>"));
    assert!(!is_valid_message_id("<a/b@c>"));
}

#[test]
fn test_newsgroup_grammar() {
    assert!(validate_newsgroup_name("overchan.test").is_ok());
    assert!(validate_newsgroup_name("ctl").is_ok());
    assert!(validate_newsgroup_name("").is_err());
    assert!(validate_newsgroup_name("overchan..test").is_err());
    assert!(validate_newsgroup_name("over chan").is_err());
}
