use snafu::Snafu;

/// Everything that can go wrong in this crate.
///
/// Bootstrap failures (`MissingSetting`, `Transport`, `Timeout`, `Fetch`,
/// `Format`, `AlreadyInitialized`) are fatal to initialization; lookup-time
/// failures (`MissingKey`, `Immutable`, `NotInitialized`) are local to the
/// offending call and leave the installed override untouched.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "{name} is required. Set NOT_ENV_URL and NOT_ENV_API_KEY environment variables. \
         Get your API key from 'not-env env import' or 'not-env env create' output"
    ))]
    MissingSetting { name: &'static str },

    #[snafu(display("Request failed: {source}"))]
    Transport { source: reqwest::Error },

    #[snafu(display(
        "Request timeout: failed to fetch variables within {} seconds",
        crate::fetch::FETCH_TIMEOUT.as_secs()
    ))]
    Timeout { source: reqwest::Error },

    #[snafu(display("Failed to fetch variables: {status} - {message}"))]
    Fetch { status: u16, message: String },

    #[snafu(display("Unexpected response format: {shape}"))]
    Format { shape: String },

    #[snafu(display("environment variable {key:?} is not set"))]
    MissingKey { key: String },

    #[snafu(display("Cannot {action} environment variables. Variables are managed by not-env"))]
    Immutable { action: &'static str },

    #[snafu(display("not-env is already initialized and the installed override cannot be replaced"))]
    AlreadyInitialized,

    #[snafu(display("not-env is not initialized; call initialize() before reading variables"))]
    NotInitialized,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
