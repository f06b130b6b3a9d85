//! NNTP capabilities parsing and rendering (RFC 3977 Section 5.2)
//!
//! Outbound feeds parse the peer's list to decide whether it can be fed over
//! streaming; inbound sessions render our own list.

use std::collections::HashMap;

/// Capabilities advertised by a peer
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Map of capability name to its arguments
    /// Example: "VERSION" -> ["2"]
    capabilities: HashMap<String, Vec<String>>,
}

impl Capabilities {
    /// Create an empty Capabilities instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse capabilities from the lines of a `101` response
    ///
    /// # Format
    /// Each line is: `CAPABILITY [arg1 arg2 ...]`
    pub fn parse(lines: &[String]) -> Self {
        let mut capabilities = HashMap::new();

        for line in lines {
            let mut parts = line.split_whitespace();
            let Some(name) = parts.next() else {
                continue;
            };
            let args = parts.map(str::to_string).collect();
            capabilities.insert(name.to_uppercase(), args);
        }

        Self { capabilities }
    }

    /// Check if a capability is supported
    #[must_use]
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains_key(&capability.to_uppercase())
    }

    /// Get arguments for a capability
    #[must_use]
    pub fn get_args(&self, capability: &str) -> Option<&Vec<String>> {
        self.capabilities.get(&capability.to_uppercase())
    }

    /// Peer accepts `MODE STREAM`, `CHECK` and `TAKETHIS`
    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.has("STREAMING")
    }

    /// Peer can switch to reader mode for `ARTICLE` pulls
    ///
    /// Some peers advertise `MODE-READER` instead of `READER`.
    #[must_use]
    pub fn supports_reader(&self) -> bool {
        self.has("READER") || self.has("MODE-READER")
    }
}

/// Render the capability list sent by inbound sessions, without the status
/// line and terminator.
///
/// `STREAMING` is always last.
pub fn server_capabilities(reader: bool) -> Vec<String> {
    let mut lines = vec![
        "VERSION 2".to_string(),
        format!("IMPLEMENTATION nntp-feed {}", env!("CARGO_PKG_VERSION")),
    ];
    if reader {
        lines.push("READER".to_string());
    }
    lines.push("STREAMING".to_string());
    lines
}
