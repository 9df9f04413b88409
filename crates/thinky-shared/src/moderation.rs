//! Content moderation for anonymous messages.
//!
//! Moderation is a plain substring blocklist plus a violation counter: five
//! flagged messages and the device is banned for good. Matching is
//! case-insensitive containment with no stemming or fuzzing; over-blocking
//! is the accepted failure mode.

use serde::{Deserialize, Serialize};

use crate::constants::BAN_THRESHOLD;

/// Disallowed terms, grouped by category. A message containing any of these
/// (case-insensitive) counts as one violation.
const BLOCKED_TERMS: &[&str] = &[
    // Profanity
    "fuck", "shit", "bitch", "asshole", "bastard", "dickhead",
    // Harassment
    "kill yourself", "kys", "go die", "nobody likes you", "you are worthless",
    // Spam / scam
    "free robux", "free v-bucks", "crypto giveaway", "double your money",
    "click this link to claim", "earn $500 a day",
    // Sexual content
    "send nudes", "nude pics", "porn", "sex chat", "onlyfans",
    // Hate speech
    "nazi", "heil hitler", "white power", "gas the",
    // Violence
    "i will kill", "shoot up", "bomb the", "stab you",
    // Drugs
    "buy cocaine", "meth for sale", "weed dealer", "drug hookup",
    // PII phishing
    "send me your password", "give me your login", "credit card number",
    "social security number",
    // Doxxing
    "home address is", "dox", "doxx", "leak your address",
    // Filter-bypass spellings
    "f u c k", "fvck", "fuk", "sh1t", "b1tch", "p0rn", "k y s",
    // Platform spam
    "sub to my channel", "follow for follow", "join my discord server now",
    "check out my onlyfans",
];

/// Patterns screened out of direct messages before any moderation pass.
/// A hit rejects the message outright without counting a violation.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script", "</script", "javascript:", "onerror=", "onload=", "onclick=",
    "srcdoc=", "drop table", "union select", "insert into", "delete from",
    "update set", "exec(", "eval(",
];

/// True if the text contains any blocklisted term, case-insensitively.
pub fn scan_for_violation(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BLOCKED_TERMS.iter().any(|term| lowered.contains(term))
}

/// True if the text matches an XSS/SQL injection pattern.
pub fn looks_suspicious(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SUSPICIOUS_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Escape `& < > " '` so stored message text is inert when rendered as HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Where a device stands in the moderation state machine.
///
/// Transitions only move forward: `Clean` → `Warned` → `Banned`, and
/// `Banned` is terminal short of manual intervention on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanState {
    Clean,
    Warned(u32),
    Banned,
}

impl BanState {
    /// Reconstruct the state from the authoritative stored pair.
    ///
    /// `is_banned` wins over the raw count so a manually banned device stays
    /// banned even with a low counter.
    pub fn from_record(violation_count: u32, is_banned: bool) -> Self {
        if is_banned || violation_count >= BAN_THRESHOLD {
            BanState::Banned
        } else if violation_count > 0 {
            BanState::Warned(violation_count)
        } else {
            BanState::Clean
        }
    }

    pub fn is_banned(&self) -> bool {
        matches!(self, BanState::Banned)
    }

    /// Violations left before the ban threshold.
    pub fn remaining(&self) -> u32 {
        match self {
            BanState::Clean => BAN_THRESHOLD,
            BanState::Warned(n) => BAN_THRESHOLD.saturating_sub(*n),
            BanState::Banned => 0,
        }
    }
}

/// Graded response handed to the UI after a violation is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModerationVerdict {
    /// Message blocked; the device has `remaining` strikes left.
    Warned { new_count: u32, remaining: u32 },
    /// Fifth strike (or already banned): outbound messaging is disabled.
    Banned,
}

impl ModerationVerdict {
    /// Build the verdict from the authoritative post-increment state.
    pub fn from_outcome(new_count: u32, is_now_banned: bool) -> Self {
        if is_now_banned {
            ModerationVerdict::Banned
        } else {
            ModerationVerdict::Warned {
                new_count,
                remaining: BAN_THRESHOLD.saturating_sub(new_count),
            }
        }
    }
}
