use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub(super) enum Error {
    #[snafu(display("Catalog error: {}", source))]
    Catalog { source: catalog::Error },

    #[snafu(display("{}", source))]
    Api { source: trove_api::Error },

    #[snafu(display(
        "Unknown schema version {}, the latest is {}",
        version,
        latest
    ))]
    UnknownVersion { version: u32, latest: u32 },

    #[snafu(display(
        "Can't {} from schema version {} to {}",
        action,
        current,
        target
    ))]
    WrongDirection {
        current: u32,
        target: u32,
        action: &'static str,
    },

    #[snafu(display("Invalid value '{}' for 'active', expected true/false or 1/0", value))]
    InvalidActive { value: String },

    #[snafu(display("Logger setup error: {}", source))]
    Logger { source: log::SetLoggerError },
}

pub(super) type Result<T> = std::result::Result<T, Error>;
