/// Follower/following totals for a user, as read from the denormalized
/// lists on the user record (not recounted from the follows ledger).
/// Field names match the wire format the counts poller expects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub followers_count: i64,
    pub following_count: i64,
}
