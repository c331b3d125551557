mod auth;
mod comment;
mod error;
mod follow;
mod like;
mod post;
mod user;

pub use auth::{AuthToken, NewSession, BCRYPT_POW_COST};
pub use comment::{Comment, CommentId, NewComment};
pub use error::Error;
pub use follow::Counts;
pub use like::LikeState;
pub use post::{FeedComment, FeedPost, NewPost, Post, PostId};
pub use user::{EditProfile, NewUser, Profile, User, UserId};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<chrono::Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_bytes() {
        assert_eq!(
            validate_string("foo\0bar"),
            Err(Error::NullByteInString(String::from("foo\0bar"))),
        );
        assert_eq!(validate_string("foo bar"), Ok(()));
        assert_eq!(validate_string(""), Ok(()));
    }
}
