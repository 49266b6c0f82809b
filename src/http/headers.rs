//! HTTP header model and hop-by-hop scrubbing (spec §4.1, §8 property 4).

/// Order-preserving header list; HTTP/1.1 allows repeated header names and
/// clients may rely on ordering, so this is not a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "upgrade",
];

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn remove_all(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Removes the fixed hop-by-hop set, case-insensitively, plus every token
    /// named in a `Connection` header (spec §4.1, §8 property 4).
    pub fn scrub_hop_by_hop(&mut self) {
        let mut to_remove: Vec<String> = HOP_BY_HOP.iter().map(|s| s.to_string()).collect();
        if let Some(connection_value) = self.get("connection") {
            for token in connection_value.split(',') {
                let token = token.trim();
                if !token.is_empty() {
                    to_remove.push(token.to_string());
                }
            }
        }
        for name in &to_remove {
            self.remove_all(name);
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_all(&name);
        self.entries.push((name, value.into()));
    }

    pub fn render_into(&self, out: &mut String) {
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_fixed_hop_by_hop_set_case_insensitively() {
        let mut h = Headers::new();
        h.push("Host", "example.invalid");
        h.push("Proxy-Connection", "keep-alive");
        h.push("Keep-Alive", "timeout=5");
        h.scrub_hop_by_hop();
        assert!(h.get("proxy-connection").is_none());
        assert!(h.get("keep-alive").is_none());
        assert_eq!(h.get("host"), Some("example.invalid"));
    }

    #[test]
    fn scrubs_tokens_named_in_connection_header() {
        let mut h = Headers::new();
        h.push("Connection", "close, X-Custom-Token");
        h.push("X-Custom-Token", "value");
        h.push("Host", "example.invalid");
        h.scrub_hop_by_hop();
        assert!(h.get("connection").is_none());
        assert!(h.get("x-custom-token").is_none());
        assert_eq!(h.get("host"), Some("example.invalid"));
    }
}
