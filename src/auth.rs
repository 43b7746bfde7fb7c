use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Participant;

/// Shared connection password. It admits a client to the server; who the
/// client is comes from the startup user name.
#[derive(Debug)]
pub struct TidyslotAuthSource {
    password: String,
}

impl TidyslotAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for TidyslotAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    Missing,
    UnknownRole(String),
    BadId(String),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Missing => write!(f, "no user given; connect as requester:<id> or provider:<id>"),
            IdentityError::UnknownRole(role) => write!(f, "unknown role '{role}'"),
            IdentityError::BadId(id) => write!(f, "invalid participant id '{id}'"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Parse a startup user name of the form `requester:<id>` or `provider:<id>`.
pub fn parse_identity(user: &str) -> Result<Participant, IdentityError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(IdentityError::Missing);
    }
    let (role, id) = user
        .split_once(':')
        .ok_or_else(|| IdentityError::UnknownRole(user.to_string()))?;
    let id: u64 = id
        .parse()
        .map_err(|_| IdentityError::BadId(id.to_string()))?;
    match role.to_ascii_lowercase().as_str() {
        "requester" => Ok(Participant::Requester { id }),
        "provider" => Ok(Participant::Provider { id }),
        _ => Err(IdentityError::UnknownRole(role.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse() {
        assert_eq!(
            parse_identity("requester:7"),
            Ok(Participant::Requester { id: 7 })
        );
        assert_eq!(
            parse_identity("Provider:42"),
            Ok(Participant::Provider { id: 42 })
        );
    }

    #[test]
    fn malformed_users_rejected() {
        assert_eq!(parse_identity(""), Err(IdentityError::Missing));
        assert_eq!(
            parse_identity("postgres"),
            Err(IdentityError::UnknownRole("postgres".into()))
        );
        assert_eq!(
            parse_identity("admin:1"),
            Err(IdentityError::UnknownRole("admin".into()))
        );
        assert_eq!(
            parse_identity("requester:-1"),
            Err(IdentityError::BadId("-1".into()))
        );
        assert_eq!(
            parse_identity("provider:"),
            Err(IdentityError::BadId(String::new()))
        );
    }
}
