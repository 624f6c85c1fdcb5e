//! Line protocol: control tokens, client commands, and server line parsing.
//!
//! Every message is one UTF-8 line terminated by `\n`.
//!
//! Server → client: `SUBMITNAME`, `NAMEINUSE`, `NAMEINVALID`,
//! `NAMEACCEPTED <name>`, `USERLIST <a,b,c>`, or an [`Envelope`] line.
//!
//! Client → server: `/quit`, `/pm <target> <body>`, `/file <filename>`,
//! anything else is public chat.

use std::fmt;

use crate::envelope::{Envelope, EnvelopeError};

pub const SUBMIT_NAME: &str = "SUBMITNAME";
pub const NAME_IN_USE: &str = "NAMEINUSE";
pub const NAME_INVALID: &str = "NAMEINVALID";
pub const NAME_ACCEPTED: &str = "NAMEACCEPTED";
pub const USER_LIST: &str = "USERLIST";

pub const QUIT_COMMAND: &str = "/quit";
pub const PM_COMMAND: &str = "/pm";
pub const FILE_COMMAND: &str = "/file";

/// Longest display name accepted at registration, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Check a candidate display name.
///
/// Names are addressed by `/pm`, split on whitespace, and joined with `,`
/// in presence lists, so none of those may appear in one.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ',' || c == ':' || c == '[' || c == ']')
}

/// Render the presence list line for the given names.
pub fn presence_line<S: AsRef<str>>(names: &[S]) -> String {
    let joined: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    format!("{USER_LIST} {}", joined.join(","))
}

/// A classified client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    PrivateMessage { target: String, body: String },
    FileAnnounce { filename: String },
    PlainText { body: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("/pm needs a target")]
    MissingTarget,
    #[error("/pm needs a message body")]
    MissingBody,
    #[error("/file needs a filename")]
    MissingFilename,
}

impl ClientCommand {
    /// Classify one inbound line. Precedence: quit, private message, file
    /// announcement, plain text. The command word must be followed by
    /// whitespace or end of line, so `/pmx` is plain text.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };

        match word {
            QUIT_COMMAND => Ok(Self::Quit),
            PM_COMMAND => {
                let (target, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if target.is_empty() {
                    return Err(CommandError::MissingTarget);
                }
                let body = body.trim_start();
                if body.is_empty() {
                    return Err(CommandError::MissingBody);
                }
                Ok(Self::PrivateMessage {
                    target: target.to_string(),
                    body: body.to_string(),
                })
            }
            FILE_COMMAND => {
                let filename = rest.trim();
                if filename.is_empty() {
                    return Err(CommandError::MissingFilename);
                }
                Ok(Self::FileAnnounce {
                    filename: filename.to_string(),
                })
            }
            _ => Ok(Self::PlainText {
                body: line.to_string(),
            }),
        }
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quit => f.write_str(QUIT_COMMAND),
            Self::PrivateMessage { target, body } => write!(f, "{PM_COMMAND} {target} {body}"),
            Self::FileAnnounce { filename } => write!(f, "{FILE_COMMAND} {filename}"),
            Self::PlainText { body } => f.write_str(body),
        }
    }
}

/// A classified server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    SubmitName,
    NameInUse,
    NameInvalid,
    NameAccepted(String),
    UserList(Vec<String>),
    Envelope(Envelope),
}

impl ServerLine {
    pub fn parse(line: &str) -> Result<Self, EnvelopeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        Ok(match word {
            SUBMIT_NAME => Self::SubmitName,
            NAME_IN_USE => Self::NameInUse,
            NAME_INVALID => Self::NameInvalid,
            NAME_ACCEPTED => Self::NameAccepted(rest.to_string()),
            USER_LIST => Self::UserList(
                rest.split(',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Self::Envelope(Envelope::parse(line)?),
        })
    }
}
