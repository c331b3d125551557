use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::{PostId, UserId};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Already following user {0:?}")]
    AlreadyFollowing(UserId),

    #[error("Users cannot follow themselves")]
    CannotFollowSelf,

    #[error("User not found {0:?}")]
    UserNotFound(UserId),

    #[error("Post not found {0:?}")]
    PostNotFound(PostId),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Email already used {0}")]
    EmailAlreadyUsed(String),

    #[error("Invalid Proof of Work")]
    InvalidPow,

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::AlreadyFollowing(_) => StatusCode::CONFLICT,
            Error::CannotFollowSelf => StatusCode::BAD_REQUEST,
            Error::UserNotFound(_) => StatusCode::NOT_FOUND,
            Error::PostNotFound(_) => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::EmailAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::InvalidPow => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON body sent to the client. Every failure carries
    /// `success: false` so the polling script can key off one field.
    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "success": false,
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "success": false,
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::AlreadyFollowing(u) => json!({
                "success": false,
                "message": "Already following this user.",
                "type": "already-following",
                "user": u.0,
            }),
            Error::CannotFollowSelf => json!({
                "success": false,
                "message": "users cannot follow themselves",
                "type": "cannot-follow-self",
            }),
            Error::UserNotFound(u) => json!({
                "success": false,
                "message": "User not found.",
                "type": "user-not-found",
                "user": u.0,
            }),
            Error::PostNotFound(p) => json!({
                "success": false,
                "message": "post not found",
                "type": "post-not-found",
                "post": p.0,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "success": false,
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "success": false,
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::EmailAlreadyUsed(e) => json!({
                "success": false,
                "message": "email already used",
                "type": "conflict-email",
                "email": e,
            }),
            Error::InvalidPow => json!({
                "success": false,
                "message": "invalid proof-of-work",
                "type": "invalid-pow",
            }),
            Error::NullByteInString(s) => json!({
                "success": false,
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "success": false,
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let get_uuid = |field: &str| -> anyhow::Result<Uuid> {
            data.get(field)
                .and_then(|u| u.as_str())
                .and_then(|u| Uuid::from_str(u).ok())
                .ok_or_else(|| anyhow!("error is missing a proper {field} uuid field"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "already-following" => Error::AlreadyFollowing(UserId(get_uuid("user")?)),
                "cannot-follow-self" => Error::CannotFollowSelf,
                "user-not-found" => Error::UserNotFound(UserId(get_uuid("user")?)),
                "post-not-found" => Error::PostNotFound(PostId(get_uuid("post")?)),
                "conflict-uuid" => Error::UuidAlreadyUsed(get_uuid("uuid")?),
                "conflict-name" => Error::NameAlreadyUsed(String::from(
                    data.get("name")
                        .and_then(|n| n.as_str())
                        .ok_or_else(|| anyhow!("error is a name conflict without a name"))?,
                )),
                "conflict-email" => Error::EmailAlreadyUsed(String::from(
                    data.get("email")
                        .and_then(|e| e.as_str())
                        .ok_or_else(|| anyhow!("error is an email conflict without an email"))?,
                )),
                "invalid-pow" => Error::InvalidPow,
                "null-byte" => Error::NullByteInString(String::from(
                    data.get("string").and_then(|s| s.as_str()).ok_or_else(|| {
                        anyhow!("error is a null-byte-in-string without a string")
                    })?,
                )),
                "invalid-name" => Error::InvalidName(String::from(
                    data.get("name").and_then(|s| s.as_str()).ok_or_else(|| {
                        anyhow!("error is about an invalid name but no name was provided")
                    })?,
                )),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inverts_contents() {
        for err in [
            Error::PermissionDenied,
            Error::AlreadyFollowing(UserId::stub()),
            Error::CannotFollowSelf,
            Error::UserNotFound(UserId::stub()),
            Error::PostNotFound(PostId::stub()),
            Error::NameAlreadyUsed(String::from("ferris")),
            Error::EmailAlreadyUsed(String::from("a@example.org")),
            Error::InvalidPow,
        ] {
            let reparsed = Error::parse(&err.contents()).expect("reparsing error contents");
            assert_eq!(reparsed, err);
        }
    }
}
