//! Field types that validate their input when constructed or deserialized, so a record holding
//! one never holds an invalid value.

use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;
use std::ops::Deref;

pub mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Name must not be empty"))]
        EmptyName,

        #[snafu(display("Can't create name containing line terminator: {:?}", input))]
        NameContainsLineTerminator { input: String },

        #[snafu(display("Name '{}' is longer than {} characters", input, max))]
        NameTooLong { input: String, max: usize },
    }
}

pub use error::Error as ValidationError;

// Unicode line terminators beyond the ones `str::lines` splits on.
const LINE_TERMINATORS: [char; 7] = [
    '\n', '\r', '\u{000B}', '\u{000C}', '\u{0085}', '\u{2028}', '\u{2029}',
];

/// The user-facing name of a cluster, instance or configuration group: non-empty, one line, at
/// most 255 characters.  Names are not unique.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    pub const MAX_LEN: usize = 255;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceName {
    type Error = ValidationError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        ensure!(!input.trim().is_empty(), error::EmptyNameSnafu);
        ensure!(
            !input.contains(&LINE_TERMINATORS[..]),
            error::NameContainsLineTerminatorSnafu { input }
        );
        ensure!(
            input.chars().count() <= Self::MAX_LEN,
            error::NameTooLongSnafu {
                input,
                max: Self::MAX_LEN
            }
        );
        Ok(Self(input))
    }
}

impl TryFrom<&str> for ResourceName {
    type Error = ValidationError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Self::try_from(input.to_string())
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

impl Deref for ResourceName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ResourceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ResourceName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
