use anyhow::Context;
use axum::{
    extract::{Path, State},
    Json,
};
use tsunagu_api::{
    AuthToken, Counts, EditProfile, FeedPost, LikeState, NewComment, NewPost, NewSession, NewUser,
    PostId, Profile, User, UserId, Uuid,
};

use crate::{db, extractors::*, graph, graph::FollowPolicy, Error};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn register(mut conn: PgConn, Json(data): Json<NewUser>) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate_except_pow()?;
    // in test setup, also allow the "empty" pow to work
    #[cfg(test)]
    if !data.verify_pow() && !data.pow.is_empty() {
        return Err(Error::invalid_pow());
    }
    #[cfg(not(test))]
    if !data.verify_pow() {
        return Err(Error::invalid_pow());
    }
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::permission_denied())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

pub async fn fetch_users(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(db::fetch_users(&mut *conn).await.with_context(
        || format!("fetching user list for {:?}", user),
    )?))
}

pub async fn fetch_profile(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(target): Path<Uuid>,
) -> Result<Json<Profile>, Error> {
    Ok(Json(
        db::fetch_profile(&mut *conn, user, UserId(target)).await?,
    ))
}

pub async fn edit_profile(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<EditProfile>,
) -> Result<(), Error> {
    data.validate()?;
    db::update_profile(&mut *conn, user, &data)
        .await
        .with_context(|| format!("updating profile of {:?}", user))?;
    Ok(())
}

pub async fn counts(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Counts>, Error> {
    Ok(Json(graph::counts(&mut *conn, user).await?))
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_post(&mut *conn, user, data).await
}

pub async fn feed(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<FeedPost>>, Error> {
    Ok(Json(db::fetch_feed(&mut *conn).await.with_context(
        || format!("fetching feed for {:?}", user),
    )?))
}

pub async fn create_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_comment(&mut *conn, user, PostId(post), data).await
}

pub async fn toggle_like(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<Json<LikeState>, Error> {
    Ok(Json(
        graph::toggle_like(&mut *conn, user, PostId(post)).await?,
    ))
}

pub async fn follow(
    Auth(user): Auth,
    State(policy): State<FollowPolicy>,
    mut conn: PgConn,
    Path(target): Path<Uuid>,
) -> Result<(), Error> {
    graph::follow(&mut *conn, policy, user, UserId(target)).await
}

pub async fn unfollow(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(target): Path<Uuid>,
) -> Result<(), Error> {
    graph::unfollow(&mut *conn, user, UserId(target)).await
}
