//! Minimal IRCv3 message parser — just enough for Twitch chat frames.
//!
//! Grammar: `['@' tags ' '] [':' prefix ' '] command [params] [' :' trailing]`.
//! Tag values use the IRCv3 escaping rules (`\:` `\s` `\\` `\r` `\n`).

use std::collections::HashMap;

/// One parsed IRC message.
#[derive(Debug, Clone, PartialEq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a single line (without the trailing CRLF). Returns `None` for
    /// empty or structurally hopeless input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(after) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = after.split_once(' ')?;
            for pair in raw_tags.split(';') {
                match pair.split_once('=') {
                    Some((key, value)) => {
                        tags.insert(key.to_string(), unescape_tag(value));
                    }
                    None => {
                        tags.insert(pair.to_string(), String::new());
                    }
                }
            }
            rest = remainder;
        }

        let mut prefix = None;
        if let Some(after) = rest.strip_prefix(':') {
            let (raw_prefix, remainder) = after.split_once(' ')?;
            prefix = Some(raw_prefix.to_string());
            rest = remainder;
        }

        let (command_and_middle, trailing) = match rest.split_once(" :") {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };

        let mut parts = command_and_middle.split_ascii_whitespace();
        let command = parts.next()?.to_string();
        let mut params: Vec<String> = parts.map(String::from).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nickname portion of the prefix (`nick!user@host` → `nick`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split('!').next().unwrap_or(p))
    }

    /// The trailing parameter — the message text for PRIVMSG.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Undo IRCv3 tag-value escaping.
fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ping() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing(), Some("tmi.twitch.tv"));
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn parses_tagged_privmsg() {
        let line = "@badge-info=subscriber/8;badges=subscriber/6,premium/1;display-name=Alice;\
                    mod=0;subscriber=1;user-id=12345 \
                    :alice!alice@alice.tmi.twitch.tv PRIVMSG #somechannel :hello world";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.nick(), Some("alice"));
        assert_eq!(msg.params[0], "#somechannel");
        assert_eq!(msg.trailing(), Some("hello world"));
        assert_eq!(msg.tag("subscriber"), Some("1"));
        assert_eq!(msg.tag("badges"), Some("subscriber/6,premium/1"));
        assert_eq!(msg.tag("display-name"), Some("Alice"));
    }

    #[test]
    fn parses_usernotice_raid() {
        let line = "@msg-id=raid;msg-param-viewerCount=42;msg-param-login=bob;login=bob \
                    :tmi.twitch.tv USERNOTICE #somechannel";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, "USERNOTICE");
        assert_eq!(msg.tag("msg-id"), Some("raid"));
        assert_eq!(msg.tag("msg-param-viewerCount"), Some("42"));
    }

    #[test]
    fn unescapes_tag_values() {
        let line = "@system-msg=5\\sraiders\\sfrom\\sbob :tmi.twitch.tv USERNOTICE #c";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.tag("system-msg"), Some("5 raiders from bob"));
    }

    #[test]
    fn message_with_colons_in_trailing() {
        let msg = IrcMessage::parse(
            ":alice!a@a.tmi.twitch.tv PRIVMSG #c :check this: https://example.com",
        )
        .unwrap();
        assert_eq!(msg.trailing(), Some("check this: https://example.com"));
    }

    #[test]
    fn empty_and_garbage_lines() {
        assert!(IrcMessage::parse("").is_none());
        assert!(IrcMessage::parse("\r\n").is_none());
        // a bare command is still a message
        let msg = IrcMessage::parse("RECONNECT").unwrap();
        assert_eq!(msg.command, "RECONNECT");
    }

    #[test]
    fn valueless_tags_parse_as_empty() {
        let msg = IrcMessage::parse("@flag;key=v :x PRIVMSG #c :t").unwrap();
        assert_eq!(msg.tag("flag"), Some(""));
        assert_eq!(msg.tag("key"), Some("v"));
    }
}
