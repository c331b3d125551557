//! The social-graph mutation service: follow/unfollow edges, like
//! toggles, and the denormalized follower counts.
//!
//! The follows table is the ledger of truth; the per-user `followers`
//! and `following` arrays are mirrors of it kept for the counts read
//! path. Every operation that touches both runs inside one
//! transaction, so a failure after the edge write cannot leave the
//! mirrors out of sync with the ledger. The acting user is always an
//! explicit parameter.

use anyhow::Context;
use sqlx::{Connection, Row};
use tsunagu_api::{Counts, LikeState, PostId, UserId};

use crate::Error;

#[derive(Clone, Copy, Debug)]
pub struct FollowPolicy {
    pub allow_self_follow: bool,
}

pub async fn follow(
    conn: &mut sqlx::PgConnection,
    policy: FollowPolicy,
    follower: UserId,
    followee: UserId,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting follow transaction")?;

    let followee_exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(followee.0)
        .fetch_optional(&mut *tx)
        .await
        .context("querying users table")?
        .is_some();
    if !followee_exists {
        return Err(Error::user_not_found(followee));
    }
    if follower == followee && !policy.allow_self_follow {
        return Err(Error::cannot_follow_self());
    }

    // The primary key makes the edge unique even under concurrent
    // attempts; losing the race surfaces as rows_affected == 0
    let inserted = sqlx::query(
        "INSERT INTO follows (follower_id, following_id, date) VALUES ($1, $2, $3)
         ON CONFLICT DO NOTHING",
    )
    .bind(follower.0)
    .bind(followee.0)
    .bind(chrono::Utc::now())
    .execute(&mut *tx)
    .await
    .context("inserting follow edge")?;
    if inserted.rows_affected() == 0 {
        return Err(Error::already_following(followee));
    }

    // Mirror the new edge into both denormalized lists, with set
    // semantics: never append an id that is already there
    sqlx::query(
        "UPDATE users SET following = array_append(following, $2)
         WHERE id = $1 AND array_position(following, $2) IS NULL",
    )
    .bind(follower.0)
    .bind(followee.0)
    .execute(&mut *tx)
    .await
    .context("appending to follower's following list")?;
    sqlx::query(
        "UPDATE users SET followers = array_append(followers, $2)
         WHERE id = $1 AND array_position(followers, $2) IS NULL",
    )
    .bind(followee.0)
    .bind(follower.0)
    .execute(&mut *tx)
    .await
    .context("appending to followee's followers list")?;

    tx.commit().await.context("committing follow transaction")?;
    Ok(())
}

/// Unconditional removal: unfollowing someone never followed (or a
/// user id that does not exist) is a successful no-op.
pub async fn unfollow(
    conn: &mut sqlx::PgConnection,
    follower: UserId,
    followee: UserId,
) -> Result<(), Error> {
    let mut tx = conn
        .begin()
        .await
        .context("starting unfollow transaction")?;

    sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
        .bind(follower.0)
        .bind(followee.0)
        .execute(&mut *tx)
        .await
        .context("deleting follow edge")?;
    sqlx::query("UPDATE users SET following = array_remove(following, $2) WHERE id = $1")
        .bind(follower.0)
        .bind(followee.0)
        .execute(&mut *tx)
        .await
        .context("removing from follower's following list")?;
    sqlx::query("UPDATE users SET followers = array_remove(followers, $2) WHERE id = $1")
        .bind(followee.0)
        .bind(follower.0)
        .execute(&mut *tx)
        .await
        .context("removing from followee's followers list")?;

    tx.commit()
        .await
        .context("committing unfollow transaction")?;
    Ok(())
}

pub async fn toggle_like(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    post: PostId,
) -> Result<LikeState, Error> {
    let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying posts table")?
        .is_some();
    if !post_exists {
        return Err(Error::post_not_found(post));
    }

    let deleted = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
        .bind(user.0)
        .bind(post.0)
        .execute(&mut *conn)
        .await
        .context("deleting like")?;
    if deleted.rows_affected() > 0 {
        return Ok(LikeState { liked: false });
    }

    // A concurrent toggle may have inserted between the delete and
    // here; the primary key keeps the pair unique either way
    sqlx::query("INSERT INTO likes (user_id, post_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(user.0)
        .bind(post.0)
        .execute(conn)
        .await
        .context("inserting like")?;
    Ok(LikeState { liked: true })
}

/// The read path the poller hits: lengths of the denormalized lists on
/// the user record, not a recount of the ledger.
pub async fn counts(conn: &mut sqlx::PgConnection, user: UserId) -> Result<Counts, Error> {
    let row = sqlx::query(
        "SELECT coalesce(array_length(followers, 1), 0) AS followers,
                coalesce(array_length(following, 1), 0) AS following
         FROM users WHERE id = $1",
    )
    .bind(user.0)
    .fetch_optional(&mut *conn)
    .await
    .context("querying users table")?
    .ok_or(Error::user_not_found(user))?;

    Ok(Counts {
        followers_count: row
            .try_get::<i32, _>("followers")
            .context("retrieving the followers field")? as i64,
        following_count: row
            .try_get::<i32, _>("following")
            .context("retrieving the following field")? as i64,
    })
}
