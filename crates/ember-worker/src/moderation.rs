//! Pure chat classifiers for the moderation chain: banned words, spam,
//! links, caps, symbols. The toxicity classifier lives in ember-ai; this
//! module hosts everything that needs no network.

use std::collections::VecDeque;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Sliding window the spam detector looks at.
const SPAM_WINDOW: Duration = Duration::from_secs(30);
/// Message count inside the window that can constitute spam.
const SPAM_MESSAGE_THRESHOLD: usize = 5;
/// Spam needs this few distinct message bodies among those messages.
const SPAM_DISTINCT_MAX: usize = 2;
/// Emoji count that flags a single message as spam.
const SPAM_EMOJI_MAX: usize = 10;

/// Caps rule minimums.
const CAPS_MIN_LEN: usize = 10;
const CAPS_MIN_LETTERS: usize = 5;
const CAPS_RATIO: f64 = 0.5;

/// Symbols rule thresholds.
const SYMBOL_RUN_LEN: usize = 5;
const SYMBOL_RATIO: f64 = 0.3;

/// Case-insensitive whole-word scan. Returns the banned word that matched.
pub fn banned_word_hit(text: &str, banned_words: &[String]) -> Option<String> {
    if banned_words.is_empty() {
        return None;
    }
    let words: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    banned_words
        .iter()
        .find(|banned| words.contains(&banned.to_lowercase()))
        .cloned()
}

/// Per-username message history for the spam rule.
pub struct SpamTracker {
    history: HashMap<String, VecDeque<(Instant, String)>>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }

    /// Record a message and decide whether it tips the user into spam.
    pub fn observe(&mut self, username: &str, text: &str) -> bool {
        if emoji_count(text) > SPAM_EMOJI_MAX {
            return true;
        }

        let now = Instant::now();
        let window = self.history.entry(username.to_lowercase()).or_default();
        window.push_back((now, text.to_lowercase()));
        while window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > SPAM_WINDOW)
        {
            window.pop_front();
        }

        if window.len() < SPAM_MESSAGE_THRESHOLD {
            return false;
        }
        let distinct: HashSet<&str> = window.iter().map(|(_, t)| t.as_str()).collect();
        distinct.len() <= SPAM_DISTINCT_MAX
    }

    /// Drop users whose whole window has aged out. Called from the
    /// maintenance sweep.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.history.retain(|_, window| {
            window
                .back()
                .is_some_and(|(at, _)| now.duration_since(*at) <= SPAM_WINDOW)
        });
    }
}

impl Default for SpamTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Rough emoji counter: pictographs, symbols, and the misc emoji planes.
fn emoji_count(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            let cp = *c as u32;
            matches!(cp,
                0x1F000..=0x1FAFF  // emoji & pictograph blocks
                | 0x2600..=0x27BF  // misc symbols, dingbats
                | 0xFE0F           // variation selector
                | 0x2190..=0x21FF  // arrows
            )
        })
        .count()
}

/// Extract domains from anything URL-shaped in the text.
///
/// Handles `https://…`, `http://…`, and bare `www.…` forms. Domains come
/// back normalized: lowercase, no leading `www.`.
pub fn extract_domains(text: &str) -> Vec<String> {
    let mut domains = Vec::new();
    for word in text.split_whitespace() {
        let candidate = word
            .strip_prefix("https://")
            .or_else(|| word.strip_prefix("http://"))
            .or_else(|| word.starts_with("www.").then_some(word));
        let Some(candidate) = candidate else { continue };
        let host = candidate
            .split(['/', '?', '#'])
            .next()
            .unwrap_or("")
            .split('@')
            .next_back()
            .unwrap_or("")
            .split(':')
            .next()
            .unwrap_or("");
        if host.contains('.') {
            domains.push(normalize_domain(host));
        }
    }
    domains
}

fn normalize_domain(host: &str) -> String {
    let lower = host.trim_end_matches('.').to_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

/// Whitelisted iff the domain equals an entry or is a subdomain of one.
pub fn domain_whitelisted(domain: &str, whitelist: &[String]) -> bool {
    whitelist.iter().any(|entry| {
        domain == entry.as_str() || domain.ends_with(&format!(".{}", entry))
    })
}

/// First non-whitelisted domain in the text, if any.
pub fn link_violation(text: &str, whitelist: &[String]) -> Option<String> {
    extract_domains(text)
        .into_iter()
        .find(|domain| !domain_whitelisted(domain, whitelist))
}

/// Shouting detector. Short or letter-poor messages are exempt.
pub fn caps_violation(text: &str) -> bool {
    if text.chars().count() < CAPS_MIN_LEN {
        return false;
    }
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < CAPS_MIN_LETTERS {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    (upper as f64 / letters.len() as f64) > CAPS_RATIO
}

/// Symbol flood: a run of one repeated non-alphanumeric char, or a high
/// overall symbol ratio (whitespace excluded on both sides).
pub fn symbols_violation(text: &str) -> bool {
    let mut run_char = None;
    let mut run_len = 0;
    for c in text.chars() {
        if !c.is_alphanumeric() && !c.is_whitespace() {
            if run_char == Some(c) {
                run_len += 1;
            } else {
                run_char = Some(c);
                run_len = 1;
            }
            if run_len >= SYMBOL_RUN_LEN {
                return true;
            }
        } else {
            run_char = None;
            run_len = 0;
        }
    }

    let non_space: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if non_space.is_empty() {
        return false;
    }
    let symbols = non_space.iter().filter(|c| !c.is_alphanumeric()).count();
    (symbols as f64 / non_space.len() as f64) > SYMBOL_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_words_match_whole_words_case_insensitively() {
        let banned = vec!["badword".to_string()];
        assert_eq!(
            banned_word_hit("hello BADword world", &banned),
            Some("badword".to_string())
        );
        // substring inside a larger word does not match
        assert_eq!(banned_word_hit("notbadwordhere", &banned), None);
        // punctuation boundaries count as word breaks
        assert!(banned_word_hit("so... badword!", &banned).is_some());
        assert_eq!(banned_word_hit("clean message", &banned), None);
    }

    #[test]
    fn spam_fires_on_repetition_within_window() {
        let mut tracker = SpamTracker::new();
        for i in 0..4 {
            assert!(!tracker.observe("alice", "buy my merch"), "message {}", i);
        }
        // 5th near-duplicate message trips the rule
        assert!(tracker.observe("alice", "BUY MY MERCH"));
    }

    #[test]
    fn varied_messages_are_not_spam() {
        let mut tracker = SpamTracker::new();
        for text in ["one", "two", "three", "four", "five"] {
            assert!(!tracker.observe("alice", text));
        }
    }

    #[test]
    fn spam_windows_are_per_user() {
        let mut tracker = SpamTracker::new();
        for _ in 0..4 {
            tracker.observe("alice", "same");
        }
        assert!(!tracker.observe("bob", "same"));
    }

    #[test]
    fn emoji_flood_is_spam() {
        let mut tracker = SpamTracker::new();
        let flood = "🔥".repeat(11);
        assert!(tracker.observe("alice", &flood));
        assert!(!tracker.observe("bob", "🔥🔥 nice stream"));
    }

    #[test]
    fn domains_extract_and_normalize() {
        assert_eq!(
            extract_domains("watch https://WWW.Evil.Example.com/x?q=1 now"),
            vec!["evil.example.com"]
        );
        assert_eq!(extract_domains("go to www.twitch.tv/foo"), vec!["twitch.tv"]);
        assert_eq!(
            extract_domains("http://host.com:8080/path"),
            vec!["host.com"]
        );
        assert!(extract_domains("no links here").is_empty());
    }

    #[test]
    fn whitelist_matches_exact_and_subdomains() {
        let whitelist = vec!["twitch.tv".to_string()];
        assert!(domain_whitelisted("twitch.tv", &whitelist));
        assert!(domain_whitelisted("clips.twitch.tv", &whitelist));
        assert!(!domain_whitelisted("evil.example.com", &whitelist));
        // suffix without a dot boundary is not a subdomain
        assert!(!domain_whitelisted("eviltwitch.tv", &whitelist));
    }

    #[test]
    fn link_violation_scenarios() {
        let whitelist = vec!["twitch.tv".to_string()];
        assert_eq!(
            link_violation("watch https://evil.example.com/x", &whitelist),
            Some("evil.example.com".to_string())
        );
        assert_eq!(
            link_violation("watch https://clips.twitch.tv/foo", &whitelist),
            None
        );
    }

    #[test]
    fn caps_thresholds() {
        assert!(caps_violation("STOP DOING THAT NOW"));
        // below minimum length
        assert!(!caps_violation("STOP NOW"));
        // exactly half uppercase is allowed
        assert!(!caps_violation("AAAAAbbbbb"));
        assert!(caps_violation("AAAAAAbbbb"));
        // numbers don't count as letters
        assert!(!caps_violation("1234567890 A b"));
    }

    #[test]
    fn symbol_runs_and_ratio() {
        assert!(symbols_violation("wow!!!!!"));
        assert!(!symbols_violation("wow!!!!"));
        assert!(symbols_violation("$$ %% ## @@ aa"));
        assert!(!symbols_violation("a normal sentence, with punctuation."));
        assert!(!symbols_violation("   "));
    }
}
