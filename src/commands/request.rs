//! Parsing of command lines received by inbound sessions

/// A command line sent by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `CAPABILITIES [keyword]`
    Capabilities,
    /// `MODE STREAM`
    ModeStream,
    /// `MODE READER`
    ModeReader,
    /// `CHECK <msgid>`
    Check(String),
    /// `TAKETHIS <msgid>`; the article follows on the wire
    Takethis(String),
    /// `ARTICLE <msgid>`
    Article(String),
    /// `QUIT`
    Quit,
    /// Known command with a missing or extra argument
    Syntax(String),
    /// Anything else
    Unknown(String),
}

impl Request {
    /// Parse one command line (without the line terminator)
    ///
    /// Command words are case-insensitive; arguments are kept verbatim.
    /// Message-id grammar is checked by the session, not here.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Request::Unknown(String::new());
        };
        let args: Vec<&str> = parts.collect();
        let verb = verb.to_ascii_uppercase();

        let single_arg = |make: fn(String) -> Request, verb: String| match args.as_slice() {
            [arg] => make(arg.to_string()),
            _ => Request::Syntax(verb),
        };

        match verb.as_str() {
            "CAPABILITIES" => Request::Capabilities,
            "QUIT" => Request::Quit,
            "MODE" => match args.as_slice() {
                [mode] if mode.eq_ignore_ascii_case("STREAM") => Request::ModeStream,
                [mode] if mode.eq_ignore_ascii_case("READER") => Request::ModeReader,
                _ => Request::Syntax(verb.clone()),
            },
            "CHECK" => single_arg(Request::Check, verb.clone()),
            "TAKETHIS" => single_arg(Request::Takethis, verb.clone()),
            "ARTICLE" => single_arg(Request::Article, verb.clone()),
            _ => Request::Unknown(verb.clone()),
        }
    }
}
