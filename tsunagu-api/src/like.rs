/// Result of a like toggle: the state the (user, post) pair ended up in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LikeState {
    pub liked: bool,
}
