use crate::config::AppConfig;
use crate::error::SessionError;

pub const ADMIN_USERNAME: &str = "admin";

/// Who is running the command. Resolved fresh on each invocation from the
/// caller-supplied username and password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub is_admin: bool,
}

impl Session {
    pub fn login(
        username: &str,
        password: Option<&str>,
        admin_pwd: Option<&str>,
    ) -> Result<Self, SessionError> {
        validate_username(username)?;

        let is_admin = username.eq_ignore_ascii_case(ADMIN_USERNAME);
        if is_admin {
            let expected = admin_pwd.ok_or(SessionError::AdminDisabled)?;
            if password != Some(expected) {
                return Err(SessionError::BadAdminPassword);
            }
        }

        Ok(Self {
            username: username.to_string(),
            is_admin,
        })
    }

    pub fn require_admin(&self) -> Result<(), SessionError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(SessionError::AdminRequired)
        }
    }

    /// Students see results only once the admin has published them.
    pub fn require_results_visible(&self, config: &AppConfig) -> Result<(), SessionError> {
        if self.is_admin || config.show_results_to_students {
            Ok(())
        } else {
            Err(SessionError::ResultsHidden)
        }
    }
}

pub fn validate_username(username: &str) -> Result<(), SessionError> {
    let valid_len = (3..=20).contains(&username.chars().count());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(SessionError::InvalidUsername)
    }
}
