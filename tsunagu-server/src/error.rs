use tsunagu_api::{Error as ApiError, PostId, UserId, Uuid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn already_following(user: UserId) -> Error {
        Error::Api(ApiError::AlreadyFollowing(user))
    }

    pub fn cannot_follow_self() -> Error {
        Error::Api(ApiError::CannotFollowSelf)
    }

    pub fn user_not_found(user: UserId) -> Error {
        Error::Api(ApiError::UserNotFound(user))
    }

    pub fn post_not_found(post: PostId) -> Error {
        Error::Api(ApiError::PostNotFound(post))
    }

    pub fn uuid_already_used(uuid: Uuid) -> Error {
        Error::Api(ApiError::UuidAlreadyUsed(uuid))
    }

    pub fn name_already_used(name: String) -> Error {
        Error::Api(ApiError::NameAlreadyUsed(name))
    }

    pub fn email_already_used(email: String) -> Error {
        Error::Api(ApiError::EmailAlreadyUsed(email))
    }

    pub fn invalid_pow() -> Error {
        Error::Api(ApiError::InvalidPow)
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), err.contents()).into_response()
    }
}
