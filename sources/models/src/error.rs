use snafu::Snafu;

use crate::rules::RuleType;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Stored value '{}' for parameter '{}' is not a valid {}",
        value,
        name,
        expected
    ))]
    StoredValue {
        name: String,
        value: String,
        expected: RuleType,
    },

    #[snafu(display("Invalid validation rules descriptor: {}", source))]
    RulesParse { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;
