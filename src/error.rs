use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no case source configured (set CASES_URL or CASES_FILE)")]
    NoSource,

    #[error("network error: {0}")]
    Network(String),

    #[error("case source returned HTTP {0}")]
    Status(u16),

    #[error("could not decode case catalog response: {0}")]
    Decode(String),

    #[error("could not parse case catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("could not read case file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username must be 3-20 characters of letters, digits, '-' or '_'")]
    InvalidUsername,

    #[error("incorrect admin password")]
    BadAdminPassword,

    #[error("admin login is disabled (ADMIN_PWD is not set)")]
    AdminDisabled,

    #[error("this command requires the admin account")]
    AdminRequired,

    #[error("results are not visible to students yet")]
    ResultsHidden,

    #[error("case {0} is not in the catalog")]
    UnknownCase(i64),
}

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("no reset has been requested; run `reset` first")]
    NotRequested,

    #[error("confirmation code does not match the pending reset")]
    CodeMismatch,

    #[error("reset request expired; run `reset` again")]
    Expired,
}
