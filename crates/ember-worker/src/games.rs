//! Chat games: 8-ball, trivia, duels, slots, roulette.
//!
//! All state here is transient and per-worker — a restart forgets active
//! questions and pending duels, which is acceptable for chat games. Point
//! awards go through the currency ledger in the command layer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use ember_core::types::Platform;

/// Active trivia questions and pending duels expire after this long.
const GAME_TTL: Duration = Duration::from_secs(60);

/// One trivia question with its accepted answers.
pub struct TriviaQuestion {
    pub question: &'static str,
    pub answers: &'static [&'static str],
}

/// A small built-in bank; enough for chat pacing.
pub const TRIVIA_QUESTIONS: &[TriviaQuestion] = &[
    TriviaQuestion {
        question: "What planet is known as the Red Planet?",
        answers: &["mars"],
    },
    TriviaQuestion {
        question: "How many continents are there on Earth?",
        answers: &["7", "seven"],
    },
    TriviaQuestion {
        question: "What is the largest ocean on Earth?",
        answers: &["pacific", "the pacific", "pacific ocean"],
    },
    TriviaQuestion {
        question: "What year did the first human land on the Moon?",
        answers: &["1969"],
    },
    TriviaQuestion {
        question: "What is the chemical symbol for gold?",
        answers: &["au"],
    },
    TriviaQuestion {
        question: "Which language has the most native speakers?",
        answers: &["mandarin", "chinese", "mandarin chinese"],
    },
    TriviaQuestion {
        question: "How many sides does a hexagon have?",
        answers: &["6", "six"],
    },
    TriviaQuestion {
        question: "What is the fastest land animal?",
        answers: &["cheetah"],
    },
];

pub const EIGHTBALL_ANSWERS: &[&str] = &[
    "It is certain.",
    "Without a doubt.",
    "Yes, definitely.",
    "Most likely.",
    "Signs point to yes.",
    "Reply hazy, try again.",
    "Ask again later.",
    "Better not tell you now.",
    "Don't count on it.",
    "My reply is no.",
    "Outlook not so good.",
    "Very doubtful.",
];

const SLOT_SYMBOLS: &[&str] = &["🍒", "🍋", "🔔", "⭐", "💎", "7️⃣"];

/// Result of a slots spin.
#[derive(Debug, Clone)]
pub struct SlotsSpin {
    pub reels: [&'static str; 3],
    /// Points won (0 on a miss).
    pub payout: i64,
}

/// Result of pulling the roulette trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouletteOutcome {
    Survived,
    /// The chamber was loaded — the player gets a short timeout.
    Shot { timeout_seconds: u32 },
}

/// A duel waiting for the challenged user to accept.
#[derive(Debug, Clone)]
struct PendingDuel {
    challenger: String,
    wager: i64,
    issued_at: Instant,
}

struct ActiveTrivia {
    question: &'static TriviaQuestion,
    asked_at: Instant,
}

/// Per-worker game state machine.
pub struct GameEngine {
    cooldowns: HashMap<(String, &'static str), Instant>,
    trivia: HashMap<(String, Platform), ActiveTrivia>,
    duels: HashMap<String, PendingDuel>,
}

impl GameEngine {
    pub fn new() -> Self {
        Self {
            cooldowns: HashMap::new(),
            trivia: HashMap::new(),
            duels: HashMap::new(),
        }
    }

    /// Check and arm the per-(user, game) cooldown. Returns the remaining
    /// wait when still cooling down.
    pub fn check_cooldown(
        &mut self,
        username: &str,
        game: &'static str,
        cooldown_minutes: u32,
    ) -> Option<Duration> {
        let key = (username.to_lowercase(), game);
        let cooldown = Duration::from_secs(u64::from(cooldown_minutes) * 60);
        let now = Instant::now();
        if let Some(last) = self.cooldowns.get(&key) {
            let elapsed = now.duration_since(*last);
            if elapsed < cooldown {
                return Some(cooldown - elapsed);
            }
        }
        self.cooldowns.insert(key, now);
        None
    }

    pub fn eightball(&self, rng: &mut impl Rng) -> &'static str {
        EIGHTBALL_ANSWERS[rng.gen_range(0..EIGHTBALL_ANSWERS.len())]
    }

    /// Ask the user a trivia question, replacing any stale one.
    pub fn start_trivia(
        &mut self,
        username: &str,
        platform: Platform,
        rng: &mut impl Rng,
    ) -> &'static str {
        let question = &TRIVIA_QUESTIONS[rng.gen_range(0..TRIVIA_QUESTIONS.len())];
        self.trivia.insert(
            (username.to_lowercase(), platform),
            ActiveTrivia {
                question,
                asked_at: Instant::now(),
            },
        );
        question.question
    }

    /// Whether this user has a live question pending.
    pub fn has_active_trivia(&self, username: &str, platform: Platform) -> bool {
        self.trivia
            .get(&(username.to_lowercase(), platform))
            .is_some_and(|t| t.asked_at.elapsed() < GAME_TTL)
    }

    /// Try a message as a trivia answer. Correct answers clear the
    /// question; wrong ones leave it active until it expires.
    pub fn try_trivia_answer(&mut self, username: &str, platform: Platform, text: &str) -> bool {
        let key = (username.to_lowercase(), platform);
        let Some(active) = self.trivia.get(&key) else {
            return false;
        };
        if active.asked_at.elapsed() >= GAME_TTL {
            self.trivia.remove(&key);
            return false;
        }
        let guess = text.trim().to_lowercase();
        let correct = active
            .question
            .answers
            .iter()
            .any(|answer| guess == *answer || guess.contains(*answer));
        if correct {
            self.trivia.remove(&key);
        }
        correct
    }

    pub fn slots(&self, rng: &mut impl Rng) -> SlotsSpin {
        fn pick<R: Rng>(rng: &mut R) -> &'static str {
            SLOT_SYMBOLS[rng.gen_range(0..SLOT_SYMBOLS.len())]
        }
        let reels = [pick(rng), pick(rng), pick(rng)];
        let payout = if reels[0] == reels[1] && reels[1] == reels[2] {
            100
        } else if reels[0] == reels[1] || reels[1] == reels[2] || reels[0] == reels[2] {
            10
        } else {
            0
        };
        SlotsSpin { reels, payout }
    }

    /// One-in-six chamber.
    pub fn roulette(&self, rng: &mut impl Rng) -> RouletteOutcome {
        if rng.gen_range(0..6) == 0 {
            RouletteOutcome::Shot {
                timeout_seconds: 60,
            }
        } else {
            RouletteOutcome::Survived
        }
    }

    /// Issue a duel challenge against `target` for `wager` points.
    pub fn challenge_duel(&mut self, challenger: &str, target: &str, wager: i64) {
        self.duels.insert(
            target.to_lowercase(),
            PendingDuel {
                challenger: challenger.to_lowercase(),
                wager,
                issued_at: Instant::now(),
            },
        );
    }

    /// Accept a pending duel. Returns `(challenger, wager, accepter_won)`.
    pub fn accept_duel(
        &mut self,
        accepter: &str,
        rng: &mut impl Rng,
    ) -> Option<(String, i64, bool)> {
        let key = accepter.to_lowercase();
        let pending = self.duels.remove(&key)?;
        if pending.issued_at.elapsed() >= GAME_TTL {
            return None;
        }
        Some((pending.challenger, pending.wager, rng.gen_bool(0.5)))
    }

    /// Evict expired questions, duels, and stale cooldown entries.
    pub fn sweep(&mut self) {
        self.trivia.retain(|_, t| t.asked_at.elapsed() < GAME_TTL);
        self.duels.retain(|_, d| d.issued_at.elapsed() < GAME_TTL);
        // Cooldowns older than an hour can't matter for any sane config.
        self.cooldowns
            .retain(|_, at| at.elapsed() < Duration::from_secs(3600));
    }
}

impl Default for GameEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_arms_and_blocks() {
        let mut games = GameEngine::new();
        assert!(games.check_cooldown("alice", "slots", 5).is_none());
        let remaining = games.check_cooldown("alice", "slots", 5).unwrap();
        assert!(remaining <= Duration::from_secs(300));
        // different game, different clock
        assert!(games.check_cooldown("alice", "trivia", 5).is_none());
        // different user too
        assert!(games.check_cooldown("bob", "slots", 5).is_none());
    }

    #[test]
    fn zero_cooldown_never_blocks() {
        let mut games = GameEngine::new();
        assert!(games.check_cooldown("alice", "8ball", 0).is_none());
        assert!(games.check_cooldown("alice", "8ball", 0).is_none());
    }

    #[test]
    fn trivia_round_trip() {
        let mut games = GameEngine::new();
        let mut rng = rand::thread_rng();
        let question_text = games.start_trivia("alice", Platform::Twitch, &mut rng);
        assert!(games.has_active_trivia("alice", Platform::Twitch));
        assert!(!games.has_active_trivia("alice", Platform::Kick));

        // find the question to answer it correctly
        let question = TRIVIA_QUESTIONS
            .iter()
            .find(|q| q.question == question_text)
            .unwrap();
        assert!(!games.try_trivia_answer("alice", Platform::Twitch, "definitely wrong"));
        assert!(games.try_trivia_answer("alice", Platform::Twitch, question.answers[0]));
        // question is consumed
        assert!(!games.has_active_trivia("alice", Platform::Twitch));
    }

    #[test]
    fn trivia_answers_are_case_insensitive() {
        let mut games = GameEngine::new();
        games.trivia.insert(
            ("alice".to_string(), Platform::Twitch),
            ActiveTrivia {
                question: &TRIVIA_QUESTIONS[0], // mars
                asked_at: Instant::now(),
            },
        );
        assert!(games.try_trivia_answer("ALICE", Platform::Twitch, "MARS"));
    }

    #[test]
    fn slots_payouts_are_sane() {
        let games = GameEngine::new();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let spin = games.slots(&mut rng);
            assert!(matches!(spin.payout, 0 | 10 | 100));
            if spin.payout == 100 {
                assert_eq!(spin.reels[0], spin.reels[1]);
                assert_eq!(spin.reels[1], spin.reels[2]);
            }
        }
    }

    #[test]
    fn roulette_sometimes_fires() {
        let games = GameEngine::new();
        let mut rng = rand::thread_rng();
        let shots = (0..600)
            .filter(|_| matches!(games.roulette(&mut rng), RouletteOutcome::Shot { .. }))
            .count();
        // 1/6 odds over 600 pulls — wide bounds to keep the test stable
        assert!((40..=170).contains(&shots), "got {} shots", shots);
    }

    #[test]
    fn duel_flow() {
        let mut games = GameEngine::new();
        let mut rng = rand::thread_rng();
        games.challenge_duel("alice", "Bob", 25);
        let (challenger, wager, _won) = games.accept_duel("bob", &mut rng).unwrap();
        assert_eq!(challenger, "alice");
        assert_eq!(wager, 25);
        // consumed
        assert!(games.accept_duel("bob", &mut rng).is_none());
    }
}
