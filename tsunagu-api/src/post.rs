use uuid::Uuid;

use crate::{Comment, Error, Time, User, UserId, STUB_UUID};

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct PostId(#[generator(bolero::generator::gen_arbitrary())] pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub owner_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
    pub date: Time,
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub id: PostId,
    pub content: String,
    pub image_url: Option<String>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.content)?;
        if let Some(url) = &self.image_url {
            crate::validate_string(url)?;
        }
        Ok(())
    }
}

/// One feed entry: the post itself with its author resolved, its
/// comments in chronological order, and the like count derived from
/// the likes ledger.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub post: Post,
    pub author: User,
    pub comments: Vec<FeedComment>,
    pub like_count: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FeedComment {
    pub comment: Comment,
    pub author: User,
}
