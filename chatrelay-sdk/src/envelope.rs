//! Message envelopes: the single-line text form of every chat message.
//!
//! ```text
//! [HH:MM:SS] sender: content              public
//! [HH:MM:SS] [PM from sender] content     private
//! [HH:MM:SS] content                      system
//! [HH:MM:SS] sender sent a file: content  file announcement
//! ```
//!
//! Public and private content is in the `ENC:` form when obfuscated; see
//! [`crate::obfuscate`]. The `encrypted` flag is recovered on parse from
//! that prefix. Plain content that would read as obfuscated (`ENC:...`,
//! `\ENC:...`, and so on) gets one extra leading backslash on the wire.

use std::fmt;

use chrono::{Local, NaiveTime, Timelike};

use crate::obfuscate::{ObfuscationError, Obfuscator, is_obfuscated};
use crate::protocol::is_valid_name;

const TIME_FORMAT: &str = "%H:%M:%S";
const PM_PREFIX: &str = "[PM from ";
const FILE_MARKER: &str = "sent a file: ";
const ESCAPE: char = '\\';

/// Plain content of the form `\*ENC:` is escaped with one more backslash.
fn needs_escape(content: &str) -> bool {
    is_obfuscated(content.trim_start_matches(ESCAPE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Public,
    Private,
    System,
    FileAnnounce,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing [HH:MM:SS] timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),
    #[error("unterminated private message header")]
    BadPrivateHeader,
}

/// One transmitted message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    content: String,
    sender: Option<String>,
    category: Category,
    timestamp: NaiveTime,
    encrypted: bool,
}

/// Wall-clock time of day, truncated to what the wire carries.
fn now() -> NaiveTime {
    let t = Local::now().time();
    t.with_nanosecond(0).unwrap_or(t)
}

impl Envelope {
    pub fn public(sender: &str, content: String, encrypted: bool) -> Self {
        Self::build(Category::Public, Some(sender), content, encrypted)
    }

    pub fn private(sender: &str, content: String, encrypted: bool) -> Self {
        Self::build(Category::Private, Some(sender), content, encrypted)
    }

    /// Server notice. System content is never obfuscated.
    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Category::System, None, content.into(), false)
    }

    /// File announcement; the filename travels in the clear.
    pub fn file(sender: &str, filename: String) -> Self {
        Self::build(Category::FileAnnounce, Some(sender), filename, false)
    }

    fn build(category: Category, sender: Option<&str>, content: String, encrypted: bool) -> Self {
        debug_assert!(!encrypted || is_obfuscated(&content));
        Self {
            content,
            sender: sender.map(str::to_string),
            category,
            timestamp: now(),
            encrypted,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn timestamp(&self) -> NaiveTime {
        self.timestamp
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// A copy with the content revealed and the flag cleared, for display.
    /// Envelopes that are not encrypted are returned unchanged.
    pub fn revealed(&self, obfuscator: &dyn Obfuscator) -> Result<Self, ObfuscationError> {
        if !self.encrypted {
            return Ok(self.clone());
        }
        Ok(Self {
            content: obfuscator.reveal(&self.content)?,
            encrypted: false,
            ..self.clone()
        })
    }

    /// Parse one envelope line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, EnvelopeError> {
        let rest = line.strip_prefix('[').ok_or(EnvelopeError::MissingTimestamp)?;
        let (stamp, rest) = rest.split_once("] ").ok_or(EnvelopeError::MissingTimestamp)?;
        let timestamp = NaiveTime::parse_from_str(stamp, TIME_FORMAT)
            .map_err(|_| EnvelopeError::BadTimestamp(stamp.to_string()))?;

        let (category, sender, content) = if let Some(pm) = rest.strip_prefix(PM_PREFIX) {
            let (sender, content) = pm.split_once("] ").ok_or(EnvelopeError::BadPrivateHeader)?;
            (Category::Private, Some(sender), content)
        } else {
            let (head, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            match head.strip_suffix(':') {
                Some(sender) if is_valid_name(sender) => (Category::Public, Some(sender), tail),
                _ => match tail.strip_prefix(FILE_MARKER) {
                    Some(filename) if is_valid_name(head) => {
                        (Category::FileAnnounce, Some(head), filename)
                    }
                    _ => (Category::System, None, rest),
                },
            }
        };

        let (content, encrypted) = match category {
            Category::Public | Category::Private if is_obfuscated(content) => (content, true),
            Category::Public | Category::Private if needs_escape(content) => (&content[1..], false),
            _ => (content, false),
        };
        Ok(Self {
            content: content.to_string(),
            sender: sender.map(str::to_string),
            category,
            timestamp,
            encrypted,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.timestamp.format(TIME_FORMAT))?;
        let sender = self.sender.as_deref().unwrap_or_default();
        let escape = if !self.encrypted && needs_escape(&self.content) { "\\" } else { "" };
        match self.category {
            Category::Public => write!(f, "{sender}: {escape}{}", self.content),
            Category::Private => write!(f, "{PM_PREFIX}{sender}] {escape}{}", self.content),
            Category::System => write!(f, "{}", self.content),
            Category::FileAnnounce => write!(f, "{sender} {FILE_MARKER}{}", self.content),
        }
    }
}
