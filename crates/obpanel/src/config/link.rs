//! Structured view of the streaming agent's argument vector
//!
//! Layout:
//! `<config-host> <node> <link> <mode> [peer] -e <encoding> -r <rate> -j <jitter> -a <audio>`.
//! This is only a reading aid for the operator; the supervisor forwards the
//! raw tokens untouched.

use std::fmt;

/// Default argument line for the streaming agent (sender role)
pub const DEFAULT_AGENT_ARGS: &str =
    "127.0.0.1 emetteur transmission tx 192.168.1.17 -e pcm -r 48000 -j 60 -a auto";

/// Transmission direction of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMode {
    Tx,
    Rx,
    Other(String),
}

impl LinkMode {
    fn parse(token: &str) -> Self {
        match token {
            "tx" => LinkMode::Tx,
            "rx" => LinkMode::Rx,
            other => LinkMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinkMode::Tx => "tx",
            LinkMode::Rx => "rx",
            LinkMode::Other(s) => s,
        }
    }
}

/// Link settings parsed from the agent's argument tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub config_host: Option<String>,
    pub node_name: Option<String>,
    pub link_name: Option<String>,
    pub mode: Option<LinkMode>,
    pub peer: Option<String>,
    pub encoding: String,
    pub sample_rate: String,
    pub jitter_buffer: String,
    pub audio_backend: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            config_host: None,
            node_name: None,
            link_name: None,
            mode: None,
            peer: None,
            encoding: "pcm".to_string(),
            sample_rate: String::new(),
            jitter_buffer: String::new(),
            audio_backend: "auto".to_string(),
        }
    }
}

impl LinkSettings {
    /// Parse settings from argument tokens. Unknown flags are skipped.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let tokens: Vec<&str> = tokens.iter().map(|t| t.as_ref()).collect();
        let positional = |i: usize| tokens.get(i).map(|t| t.to_string());

        let mut settings = Self {
            config_host: positional(0),
            node_name: positional(1),
            link_name: positional(2),
            mode: tokens.get(3).map(|t| LinkMode::parse(t)),
            ..Self::default()
        };

        if let Some(peer) = tokens.get(4).filter(|t| !t.starts_with('-')) {
            settings.peer = Some(peer.to_string());
        }

        let mut i = if settings.peer.is_some() { 5 } else { 4 };
        while i < tokens.len() {
            let value = tokens.get(i + 1).map(|v| v.to_string());
            let slot = match tokens[i] {
                "-e" => Some(&mut settings.encoding),
                "-r" => Some(&mut settings.sample_rate),
                "-j" => Some(&mut settings.jitter_buffer),
                "-a" => Some(&mut settings.audio_backend),
                _ => None,
            };
            match (slot, value) {
                (Some(slot), Some(value)) => {
                    *slot = value;
                    i += 2;
                }
                _ => i += 1,
            }
        }

        settings
    }

    /// Rebuild the argument tokens. The peer is only emitted for the `tx` mode.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = [&self.config_host, &self.node_name, &self.link_name]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        if let Some(mode) = &self.mode {
            tokens.push(mode.as_str().to_string());
            if *mode == LinkMode::Tx {
                tokens.extend(self.peer.clone());
            }
        }

        for (flag, value) in [
            ("-e", &self.encoding),
            ("-r", &self.sample_rate),
            ("-j", &self.jitter_buffer),
            ("-a", &self.audio_backend),
        ] {
            if !value.is_empty() {
                tokens.push(flag.to_string());
                tokens.push(value.clone());
            }
        }

        tokens
    }
}

impl fmt::Display for LinkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        writeln!(f, "Link: {}", or_dash(&self.link_name))?;
        writeln!(f, "  Config host: {}", or_dash(&self.config_host))?;
        writeln!(f, "  Node: {}", or_dash(&self.node_name))?;
        writeln!(
            f,
            "  Mode: {}",
            self.mode.as_ref().map(|m| m.as_str()).unwrap_or("-")
        )?;
        writeln!(f, "  Peer: {}", or_dash(&self.peer))?;
        write!(
            f,
            "  Encoding: {}  Rate: {}  Jitter: {}  Audio: {}",
            self.encoding, self.sample_rate, self.jitter_buffer, self.audio_backend
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_default_sender_line() {
        let link = LinkSettings::from_tokens(&tokens(DEFAULT_AGENT_ARGS));
        assert_eq!(link.config_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(link.node_name.as_deref(), Some("emetteur"));
        assert_eq!(link.link_name.as_deref(), Some("transmission"));
        assert_eq!(link.mode, Some(LinkMode::Tx));
        assert_eq!(link.peer.as_deref(), Some("192.168.1.17"));
        assert_eq!(link.encoding, "pcm");
        assert_eq!(link.sample_rate, "48000");
        assert_eq!(link.jitter_buffer, "60");
        assert_eq!(link.audio_backend, "auto");
        assert_eq!(link.to_tokens(), tokens(DEFAULT_AGENT_ARGS));
    }

    #[test]
    fn test_receiver_line_has_no_peer() {
        let link =
            LinkSettings::from_tokens(&tokens("192.168.1.15 recepteur transmission rx -a auto"));
        assert_eq!(link.mode, Some(LinkMode::Rx));
        assert_eq!(link.peer, None);
        assert_eq!(link.audio_backend, "auto");
        assert_eq!(link.sample_rate, "");
    }

    #[test]
    fn test_unknown_and_dangling_flags_are_skipped() {
        let link = LinkSettings::from_tokens(&tokens("h n l tx -v -e opus -r"));
        assert_eq!(link.peer, None);
        assert_eq!(link.encoding, "opus");
        assert_eq!(link.sample_rate, "");
    }

    #[test]
    fn test_peer_dropped_outside_tx() {
        let link = LinkSettings {
            mode: Some(LinkMode::Rx),
            peer: Some("10.0.0.1".to_string()),
            ..LinkSettings::default()
        };
        assert!(!link.to_tokens().contains(&"10.0.0.1".to_string()));
    }
}
