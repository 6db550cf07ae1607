//! Caller identity extraction.
//!
//! Identity arrives from the edge proxy as trusted `x-user-id` and
//! `x-user-role` headers; the proxy terminates the actual authentication.
//! Missing or malformed headers reject with 401 before any handler runs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, PermissionError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Provider => "PROVIDER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CUSTOMER" => Ok(Role::Customer),
            "PROVIDER" => Ok(Role::Provider),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Pure header parsing, kept separate from the extractor for testability.
pub fn actor_from_headers(
    user_id: Option<&str>,
    role: Option<&str>,
) -> Result<Actor, PermissionError> {
    let user_id = user_id
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(PermissionError::Unauthenticated)?;

    let role = match role.map(str::trim).filter(|v| !v.is_empty()) {
        None => Role::Customer,
        Some(raw) => raw.parse().map_err(|_| PermissionError::Unauthenticated)?,
    };

    Ok(Actor { user_id, role })
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());
        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok());

        actor_from_headers(user_id, role).map_err(AppError::permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_headers_produce_an_actor() {
        let id = Uuid::new_v4();
        let actor = actor_from_headers(Some(&id.to_string()), Some("ADMIN")).expect("actor");
        assert_eq!(actor.user_id, id);
        assert!(actor.is_admin());
    }

    #[test]
    fn role_defaults_to_customer() {
        let id = Uuid::new_v4();
        let actor = actor_from_headers(Some(&id.to_string()), None).expect("actor");
        assert_eq!(actor.role, Role::Customer);

        let actor = actor_from_headers(Some(&id.to_string()), Some("  ")).expect("actor");
        assert_eq!(actor.role, Role::Customer);
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        let id = Uuid::new_v4().to_string();
        let actor = actor_from_headers(Some(&id), Some("provider")).expect("actor");
        assert_eq!(actor.role, Role::Provider);
    }

    #[test]
    fn missing_or_malformed_identity_is_rejected() {
        assert!(actor_from_headers(None, Some("ADMIN")).is_err());
        assert!(actor_from_headers(Some("not-a-uuid"), None).is_err());
        assert!(actor_from_headers(Some(&Uuid::new_v4().to_string()), Some("ROOT")).is_err());
    }
}
