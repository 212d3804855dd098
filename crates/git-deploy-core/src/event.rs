use std::str::FromStr;

use thiserror::Error;

/// Errors raised while parsing a push line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushEventError {
    /// The line does not hold exactly `<old> <new> <ref>`.
    #[error("expected `<old> <new> <ref>`, got `{0}`")]
    Malformed(String),
}

/// One updated reference, as git writes it to `pre-receive`/`post-receive` stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Object id before the push (all zeros for a new ref).
    pub old: String,
    /// Object id after the push (all zeros for a deletion).
    pub new: String,
    /// Full ref name, e.g. `refs/heads/main`.
    pub refname: String,
}

impl PushEvent {
    /// Branch the event applies to: the last `/`-separated segment of the ref.
    #[must_use]
    pub fn branch(&self) -> &str {
        self.refname
            .rsplit('/')
            .next()
            .unwrap_or(self.refname.as_str())
    }
}

impl FromStr for PushEvent {
    type Err = PushEventError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(old), Some(new), Some(refname), None) => Ok(Self {
                old: old.to_owned(),
                new: new.to_owned(),
                refname: refname.to_owned(),
            }),
            _ => Err(PushEventError::Malformed(line.trim().to_owned())),
        }
    }
}
