use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Key whose settings apply to every branch without an entry of its own.
pub const WILDCARD: &str = "*";

/// Errors raised while reading the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document does not exist.
    #[error("No config file found at {}", path.display())]
    Missing {
        /// Location that was probed.
        path: PathBuf,
    },

    /// The document exists but could not be read.
    #[error("Config file {} could not be read: {source}", path.display())]
    Read {
        /// Location of the document.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The document is not valid JSON or its top level is not an object.
    #[error("Config file is broken: {source}")]
    Parse {
        /// Location of the document.
        path: PathBuf,
        /// Parser diagnostics.
        #[source]
        source: serde_json::Error,
    },
}

/// Problem confined to one entry or field; the rest of the document still applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    /// The entry is not a settings object and is ignored.
    #[error("Ignoring config entry `{branch}`: expected an object")]
    NotAnObject {
        /// Key of the entry.
        branch: String,
    },

    /// The field has the wrong type and falls back to its default.
    #[error("Ignoring `{field}` in config entry `{branch}`: {reason}")]
    BadField {
        /// Key of the entry.
        branch: String,
        /// Field name as written in the document.
        field: &'static str,
        /// Decoder diagnostics.
        reason: String,
    },
}

/// Errors raised while turning an `exec` value into an argument vector.
#[derive(Debug, Error)]
pub enum CommandSpecError {
    /// The command string has unbalanced quotes or a dangling escape.
    #[error("Cannot parse command: {0}")]
    Split(#[from] shell_words::ParseError),

    /// The command has no program to run.
    #[error("Command is empty")]
    Empty,
}

/// Follow-up command as written in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecSpec {
    /// Single string, split with shell word rules before running.
    Shell(String),
    /// Already separated program and arguments.
    Argv(Vec<String>),
}

impl ExecSpec {
    /// True when there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Shell(line) => line.is_empty(),
            Self::Argv(args) => args.is_empty(),
        }
    }

    /// Resolve the command into program and arguments.
    ///
    /// # Errors
    /// Returns an error when the string cannot be tokenized or yields no program.
    pub fn to_argv(&self) -> Result<Vec<String>, CommandSpecError> {
        let argv = match self {
            Self::Shell(line) => shell_words::split(line)?,
            Self::Argv(args) => args.clone(),
        };
        if argv.is_empty() {
            return Err(CommandSpecError::Empty);
        }
        Ok(argv)
    }
}

impl fmt::Display for ExecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Argv(args) => f.write_str(&shell_words::join(args)),
        }
    }
}

/// Settings record for one branch (or for the wildcard).
///
/// Every field is optional in the document. Apart from `allow`, `null` and
/// absent mean the same thing. Accessors apply the effective semantics: empty
/// strings count as unset and an absent `allow` means allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BranchSettings {
    allow: Option<bool>,
    work_tree: Option<PathBuf>,
    pre_message: Option<String>,
    post_message: Option<String>,
    timeout_message: Option<String>,
    timeout: Option<f64>,
    exec: Option<ExecSpec>,
}

impl BranchSettings {
    /// Decode one entry field by field, recording fields that do not fit.
    fn from_entry(
        branch: &str,
        entry: &Map<String, Value>,
        issues: &mut Vec<ConfigIssue>,
    ) -> Self {
        let mut field = FieldReader {
            branch,
            entry,
            issues,
        };
        Self {
            allow: entry.get("allow").map(truthy),
            work_tree: field.read("work-tree"),
            pre_message: field.read("pre-message"),
            post_message: field.read("post-message"),
            timeout_message: field.read("timeout-message"),
            timeout: field.read("timeout"),
            exec: field.read("exec"),
        }
    }

    /// Whether pushes to the branch are accepted.
    #[must_use]
    pub fn allows(&self) -> bool {
        self.allow.unwrap_or(true)
    }

    /// Directory the branch is checked out into after a push.
    #[must_use]
    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Message shown before the allow/deny decision.
    #[must_use]
    pub fn pre_message(&self) -> Option<&str> {
        non_empty(self.pre_message.as_deref())
    }

    /// Message shown once the push has been accepted.
    #[must_use]
    pub fn post_message(&self) -> Option<&str> {
        non_empty(self.post_message.as_deref())
    }

    /// Message shown when the follow-up command runs out of time.
    #[must_use]
    pub fn timeout_message(&self) -> Option<&str> {
        non_empty(self.timeout_message.as_deref())
    }

    /// Time budget of the follow-up command.
    ///
    /// Negative values clamp to zero; values too large for a `Duration` mean no limit.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.and_then(|secs| {
            if secs.is_sign_negative() {
                Some(Duration::ZERO)
            } else {
                Duration::try_from_secs_f64(secs).ok()
            }
        })
    }

    /// Follow-up command, if a non-empty one is configured.
    #[must_use]
    pub fn exec(&self) -> Option<&ExecSpec> {
        self.exec.as_ref().filter(|spec| !spec.is_empty())
    }

    /// Wildcard entry written into freshly provisioned repositories.
    fn seed() -> Self {
        Self {
            allow: Some(true),
            ..Self::default()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}

/// JSON truthiness: `null`, `false`, zero and empty values are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

struct FieldReader<'a> {
    branch: &'a str,
    entry: &'a Map<String, Value>,
    issues: &'a mut Vec<ConfigIssue>,
}

impl FieldReader<'_> {
    fn read<T: DeserializeOwned>(&mut self, field: &'static str) -> Option<T> {
        let value = self.entry.get(field).filter(|value| !value.is_null())?;
        match T::deserialize(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                self.issues.push(ConfigIssue::BadField {
                    branch: self.branch.to_owned(),
                    field,
                    reason: err.to_string(),
                });
                None
            }
        }
    }
}

/// Parsed configuration document: branch name (or `*`) to settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployConfig {
    branches: BTreeMap<String, BranchSettings>,
    issues: Vec<ConfigIssue>,
}

impl DeployConfig {
    /// Parse a document from its JSON text.
    ///
    /// Entries and fields that do not fit are dropped one by one and listed in
    /// [`DeployConfig::issues`].
    ///
    /// # Errors
    /// Returns the parser error when the text is not JSON or its top level is not an object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let document: Map<String, Value> = serde_json::from_str(text)?;
        let mut issues = Vec::new();
        let branches = document
            .iter()
            .filter_map(|(branch, entry)| match entry {
                Value::Object(fields) => Some((
                    branch.clone(),
                    BranchSettings::from_entry(branch, fields, &mut issues),
                )),
                _ => {
                    issues.push(ConfigIssue::NotAnObject {
                        branch: branch.clone(),
                    });
                    None
                }
            })
            .collect();
        Ok(Self { branches, issues })
    }

    /// Entries and fields that were ignored while parsing.
    #[must_use]
    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    /// Read and parse the document at `path`.
    ///
    /// # Errors
    /// Returns an error when the file is missing, unreadable or malformed.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        for issue in &config.issues {
            warn!(path = %path.display(), "{issue}");
        }
        debug!(path = %path.display(), entries = config.branches.len(), "Loaded config");
        Ok(config)
    }

    /// Read the document at `path`, degrading to an empty configuration on any failure.
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Self {
        Self::try_load(path).unwrap_or_else(|err| {
            warn!("{err}; using defaults");
            Self::default()
        })
    }

    /// Settings in effect for `branch`.
    ///
    /// An explicit entry wins outright; otherwise the wildcard entry applies;
    /// otherwise the defaults. Entries are never layered on top of each other.
    #[must_use]
    pub fn resolve(&self, branch: &str) -> BranchSettings {
        self.branches
            .get(branch)
            .or_else(|| self.branches.get(WILDCARD))
            .cloned()
            .unwrap_or_default()
    }

    /// True when the document configures nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Document committed to the configuration branch of a new repository.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn seed_document() -> Result<String, serde_json::Error> {
        let seed = BTreeMap::from([(WILDCARD, BranchSettings::seed())]);
        let mut text = serde_json::to_string_pretty(&seed)?;
        text.push('\n');
        Ok(text)
    }
}
