//! `zv_config` parses zaver's line-oriented `key = value` configuration
//! format into a [`RawConfig`] and then, via [`FromConfig`], into a typed
//! struct. Pair with `#[derive(FromConfig)]` from `zv_config_derive`.

mod lexer;

use std::fmt;
use std::path::Path;

pub use lexer::Entry;

/// A one-based line number, used to point diagnostics back at the source
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Loc {
    pub line: usize,
}

impl Loc {
    pub fn new(line: usize) -> Self {
        Loc { line }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("{loc}: {message}")]
    Syntax { loc: Loc, message: String },

    #[error("{loc}: invalid value for '{key}': {message}")]
    InvalidValue {
        loc: Loc,
        key: String,
        message: String,
    },
}

/// The flat set of `key = value` pairs read from a config file, in source
/// order, before any struct has been built out of them.
#[derive(Debug, Default, Clone)]
pub struct RawConfig {
    entries: Vec<Entry>,
}

impl RawConfig {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(RawConfig {
            entries: lexer::lex(input)?,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// All entries, in the order they appeared in the source.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The value for `key`, or `None` if it was never set. When a key
    /// repeats, the last occurrence wins, matching how later lines shadow
    /// earlier ones when a file is re-read into the same map.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Converts a single config value's raw string into a typed field. Every
/// field type a `#[derive(FromConfig)]` struct uses must implement this.
pub trait FromConfigValue: Sized {
    fn from_config_value(raw: &str) -> Result<Self, String>;
}

impl FromConfigValue for String {
    fn from_config_value(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl FromConfigValue for bool {
    fn from_config_value(raw: &str) -> Result<Self, String> {
        match raw {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got '{other}'")),
        }
    }
}

macro_rules! impl_from_config_value_num {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromConfigValue for $t {
                fn from_config_value(raw: &str) -> Result<Self, String> {
                    raw.trim()
                        .parse::<$t>()
                        .map_err(|_| format!("expected a number, got '{raw}'"))
                }
            }
        )*
    };
}

impl_from_config_value_num!(u8, u16, u32, u64, usize, i32, i64);

impl<T: FromConfigValue> FromConfigValue for Option<T> {
    fn from_config_value(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            Ok(None)
        } else {
            Ok(Some(T::from_config_value(raw)?))
        }
    }
}

/// Implemented by `#[derive(FromConfig)]`. Builds `Self` from a
/// [`RawConfig`], starting from `Self::default()` and overwriting each
/// field whose name matches a key present in the file. Keys with no
/// matching field are silently ignored — an unrecognized directive is not
/// an error.
pub trait FromConfig: Sized + Default {
    fn from_config(raw: &RawConfig) -> Result<Self, ConfigError>;
}

/// Helper used by generated `from_config` impls to turn a
/// [`FromConfigValue`] error into a located [`ConfigError`].
pub fn invalid_value<T>(
    entry: &Entry,
    result: Result<T, String>,
) -> Result<T, ConfigError> {
    result.map_err(|message| ConfigError::InvalidValue {
        loc: entry.loc,
        key: entry.key.clone(),
        message,
    })
}
