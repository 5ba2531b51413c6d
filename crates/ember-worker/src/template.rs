//! Command response templates.
//!
//! Templates are parsed once into a small AST instead of regex-replaced:
//! literal runs, named variables, and `{random:min-max}` ranges. Unknown or
//! malformed tokens are preserved verbatim.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// A parsed template node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Var(Var),
    RandomRange { min: i64, max: i64 },
}

/// Known substitution variables (matched case-insensitively).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    User,
    Channel,
    Count,
    Time,
    Uptime,
}

/// Values available to one render.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub user: String,
    pub channel: String,
    /// Post-increment usage count of the command being rendered.
    pub count: u32,
    /// Wall-clock now (kept injectable for tests).
    pub now: DateTime<Utc>,
    /// Uptime of the active stream session, `None` when offline.
    pub uptime: Option<Duration>,
}

/// Parse a template into tokens. Never fails — anything unrecognized stays
/// literal text.
pub fn parse(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, from_open) = rest.split_at(open);
        literal.push_str(before);

        let Some(close) = from_open.find('}') else {
            // unbalanced brace — the remainder is literal
            literal.push_str(from_open);
            rest = "";
            break;
        };
        let raw = &from_open[..=close];
        let inner = &raw[1..raw.len() - 1];

        match classify(inner) {
            Some(token) => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(token);
            }
            None => literal.push_str(raw),
        }
        rest = &from_open[close + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Map `{...}` contents onto a token; `None` keeps the raw text literal.
fn classify(inner: &str) -> Option<Token> {
    let lower = inner.to_lowercase();
    match lower.as_str() {
        "user" => return Some(Token::Var(Var::User)),
        "channel" => return Some(Token::Var(Var::Channel)),
        "count" => return Some(Token::Var(Var::Count)),
        "time" => return Some(Token::Var(Var::Time)),
        "uptime" => return Some(Token::Var(Var::Uptime)),
        _ => {}
    }

    let spec = lower.strip_prefix("random:")?;
    let (min_raw, max_raw) = spec.split_once('-')?;
    let min: i64 = min_raw.trim().parse().ok()?;
    let max: i64 = max_raw.trim().parse().ok()?;
    if min > max {
        return None;
    }
    Some(Token::RandomRange { min, max })
}

/// Render parsed tokens with the given context.
pub fn render(tokens: &[Token], ctx: &RenderContext, rng: &mut impl Rng) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Var(Var::User) => out.push_str(&ctx.user),
            Token::Var(Var::Channel) => out.push_str(&ctx.channel),
            Token::Var(Var::Count) => out.push_str(&ctx.count.to_string()),
            Token::Var(Var::Time) => out.push_str(&ctx.now.format("%I:%M %p").to_string()),
            Token::Var(Var::Uptime) => out.push_str(&format_uptime(ctx.uptime)),
            Token::RandomRange { min, max } => {
                out.push_str(&rng.gen_range(*min..=*max).to_string())
            }
        }
    }
    out
}

/// One-shot parse + render.
pub fn expand(template: &str, ctx: &RenderContext, rng: &mut impl Rng) -> String {
    render(&parse(template), ctx, rng)
}

/// `Xh Ym` / `Ym`, or the literal offline marker.
fn format_uptime(uptime: Option<Duration>) -> String {
    let Some(uptime) = uptime else {
        return "Stream offline".to_string();
    };
    let minutes = uptime.as_secs() / 60;
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> RenderContext {
        RenderContext {
            user: "alice".to_string(),
            channel: "emberfall".to_string(),
            count: 7,
            now: Utc.with_ymd_and_hms(2025, 6, 1, 14, 5, 0).unwrap(),
            uptime: Some(Duration::from_secs(2 * 3600 + 13 * 60)),
        }
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            expand("just words", &ctx(), &mut rand::thread_rng()),
            "just words"
        );
    }

    #[test]
    fn variables_substitute_case_insensitively() {
        let out = expand("Hey {USER}, welcome to {Channel}!", &ctx(), &mut rand::thread_rng());
        assert_eq!(out, "Hey alice, welcome to emberfall!");
    }

    #[test]
    fn count_and_time_render() {
        let out = expand("used {count} times at {time}", &ctx(), &mut rand::thread_rng());
        assert_eq!(out, "used 7 times at 02:05 PM");
    }

    #[test]
    fn uptime_formats() {
        let out = expand("{uptime}", &ctx(), &mut rand::thread_rng());
        assert_eq!(out, "2h 13m");

        let mut short = ctx();
        short.uptime = Some(Duration::from_secs(45 * 60));
        assert_eq!(expand("{uptime}", &short, &mut rand::thread_rng()), "45m");

        let mut offline = ctx();
        offline.uptime = None;
        assert_eq!(
            expand("{uptime}", &offline, &mut rand::thread_rng()),
            "Stream offline"
        );
    }

    #[test]
    fn random_range_is_inclusive() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let out = expand("{random:1-3}", &ctx(), &mut rng);
            let n: i64 = out.parse().unwrap();
            assert!((1..=3).contains(&n));
        }
        // degenerate single-value range
        assert_eq!(expand("{random:5-5}", &ctx(), &mut rng), "5");
    }

    #[test]
    fn malformed_tokens_are_preserved_verbatim() {
        let mut rng = rand::thread_rng();
        for raw in [
            "{random:9-2}",   // inverted
            "{random:a-b}",   // not numbers
            "{random:5}",     // missing dash
            "{unknown}",      // unknown name
            "{user",          // unbalanced
        ] {
            assert_eq!(expand(raw, &ctx(), &mut rng), raw, "case {}", raw);
        }
    }

    #[test]
    fn mixed_template_parses_into_expected_tokens() {
        let tokens = parse("hi {user}, roll {random:1-6}!");
        assert_eq!(
            tokens,
            vec![
                Token::Literal("hi ".to_string()),
                Token::Var(Var::User),
                Token::Literal(", roll ".to_string()),
                Token::RandomRange { min: 1, max: 6 },
                Token::Literal("!".to_string()),
            ]
        );
    }
}
