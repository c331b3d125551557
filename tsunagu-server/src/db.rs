use std::collections::HashMap;

use anyhow::Context;
use sqlx::Row;
use tsunagu_api::{
    AuthToken, Comment, CommentId, EditProfile, FeedComment, FeedPost, NewComment, NewPost,
    NewSession, NewUser, Post, PostId, Profile, User, UserId, Uuid,
};

use crate::Error;

// Matches the cost the legacy deployment hashed its passwords with
const BCRYPT_COST: u32 = 10;

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    // Check the uniqueness constraints upfront so the caller gets a
    // specific error; the constraints themselves still hold under
    // concurrent registration
    let name_taken = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table for name conflict")?;
    if name_taken.is_some() {
        return Err(Error::name_already_used(u.name));
    }
    let email_taken = sqlx::query("SELECT 1 FROM users WHERE email = $1")
        .bind(&u.email)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table for email conflict")?;
    if email_taken.is_some() {
        return Err(Error::email_already_used(u.email));
    }
    let id_taken = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(u.id.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table for id conflict")?;
    if id_taken.is_some() {
        return Err(Error::uuid_already_used(u.id.0));
    }

    let hash =
        bcrypt::hash(&u.initial_password, BCRYPT_COST).context("hashing initial password")?;
    let res = sqlx::query(
        "INSERT INTO users (id, name, email, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .bind(&u.email)
    .bind(&hash)
    .execute(&mut *conn)
    .await;
    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(err)) => match err.constraint() {
            Some("users_pkey") => Err(Error::uuid_already_used(u.id.0)),
            Some("users_name_key") => Err(Error::name_already_used(u.name)),
            Some("users_email_key") => Err(Error::email_already_used(u.email)),
            _ => Err(Error::Anyhow(
                anyhow::Error::new(sqlx::Error::Database(err)).context("inserting user"),
            )),
        },
        Err(err) => Err(Error::Anyhow(anyhow::Error::new(err).context("inserting user"))),
    }
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let user = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&s.email)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table")?;
    let user = match user {
        Some(u) => u,
        None => return Ok(None),
    };
    let id: Uuid = user.try_get("id").context("retrieving the id field")?;
    let hash: String = user
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !bcrypt::verify(&s.password, &hash).context("verifying password")? {
        return Ok(None);
    }
    let token = Uuid::new_v4();
    sqlx::query("INSERT INTO sessions (id, user_id, device, login_time) VALUES ($1, $2, $3, $4)")
        .bind(token)
        .bind(id)
        .bind(&s.device)
        .bind(chrono::Utc::now())
        .execute(&mut *conn)
        .await
        .context("inserting session")?;
    Ok(Some(AuthToken(token)))
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE id = $1")
        .bind(token.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying sessions table")?;
    match row {
        Some(r) => Ok(UserId(
            r.try_get("user_id").context("retrieving the user_id field")?,
        )),
        None => Err(Error::permission_denied()),
    }
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() > 0)
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    let rows = sqlx::query("SELECT id, name FROM users")
        .fetch_all(conn)
        .await
        .context("querying users table")?;
    let mut users = rows
        .iter()
        .map(user_from_row)
        .collect::<anyhow::Result<Vec<User>>>()?;
    // sort here rather than in SQL, so the order does not depend on
    // the database's collation
    users.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(users)
}

pub async fn fetch_profile(
    conn: &mut sqlx::PgConnection,
    viewer: UserId,
    target: UserId,
) -> Result<Profile, Error> {
    let user = sqlx::query("SELECT name, bio, picture_url FROM users WHERE id = $1")
        .bind(target.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table")?
        .ok_or(Error::user_not_found(target))?;

    let posts = sqlx::query(
        "SELECT id, owner_id, content, image_url, date FROM posts
         WHERE owner_id = $1 ORDER BY date, id",
    )
    .bind(target.0)
    .fetch_all(&mut *conn)
    .await
    .context("querying posts table")?;
    let posts = posts
        .iter()
        .map(post_from_row)
        .collect::<anyhow::Result<Vec<Post>>>()?;

    // is_following comes from the ledger, not the denormalized lists
    let is_following = sqlx::query(
        "SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2",
    )
    .bind(viewer.0)
    .bind(target.0)
    .fetch_optional(&mut *conn)
    .await
    .context("querying follows table")?
    .is_some();

    Ok(Profile {
        user: User {
            id: target,
            name: user.try_get("name").context("retrieving the name field")?,
        },
        bio: user.try_get("bio").context("retrieving the bio field")?,
        picture_url: user
            .try_get("picture_url")
            .context("retrieving the picture_url field")?,
        posts,
        is_following,
    })
}

pub async fn update_profile(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    e: &EditProfile,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE users SET bio = $2, picture_url = coalesce($3, picture_url) WHERE id = $1",
    )
    .bind(user.0)
    .bind(&e.bio)
    .bind(&e.picture_url)
    .execute(conn)
    .await
    .context("updating user profile")?;
    Ok(())
}

pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    p: NewPost,
) -> Result<(), Error> {
    let id_taken = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(p.id.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying posts table for id conflict")?;
    if id_taken.is_some() {
        return Err(Error::uuid_already_used(p.id.0));
    }
    sqlx::query(
        "INSERT INTO posts (id, owner_id, content, image_url, date) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(p.id.0)
    .bind(owner.0)
    .bind(&p.content)
    .bind(&p.image_url)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await
    .context("inserting post")?;
    Ok(())
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    post: PostId,
    c: NewComment,
) -> Result<(), Error> {
    let id_taken = sqlx::query("SELECT 1 FROM comments WHERE id = $1")
        .bind(c.id.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying comments table for id conflict")?;
    if id_taken.is_some() {
        return Err(Error::uuid_already_used(c.id.0));
    }
    let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying posts table")?
        .is_some();
    if !post_exists {
        return Err(Error::post_not_found(post));
    }
    sqlx::query(
        "INSERT INTO comments (id, owner_id, post_id, text, date) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(c.id.0)
    .bind(owner.0)
    .bind(post.0)
    .bind(&c.text)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await
    .context("inserting comment")?;
    Ok(())
}

pub async fn fetch_feed(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<FeedPost>> {
    let rows = sqlx::query(
        "SELECT p.id, p.owner_id, p.content, p.image_url, p.date, u.name AS owner_name
         FROM posts p
         INNER JOIN users u ON u.id = p.owner_id
         ORDER BY p.date DESC, p.id",
    )
    .fetch_all(&mut *conn)
    .await
    .context("querying posts table")?;

    let mut feed = Vec::with_capacity(rows.len());
    let mut index = HashMap::with_capacity(rows.len());
    for r in &rows {
        let post = post_from_row(r)?;
        index.insert(post.id, feed.len());
        feed.push(FeedPost {
            author: User {
                id: post.owner_id,
                name: r
                    .try_get("owner_name")
                    .context("retrieving the owner_name field")?,
            },
            post,
            comments: Vec::new(),
            like_count: 0,
        });
    }
    let post_ids = feed.iter().map(|f| f.post.id.0).collect::<Vec<Uuid>>();

    let comments = sqlx::query(
        "SELECT c.id, c.owner_id, c.post_id, c.text, c.date, u.name AS owner_name
         FROM comments c
         INNER JOIN users u ON u.id = c.owner_id
         WHERE c.post_id = ANY($1)
         ORDER BY c.date, c.id",
    )
    .bind(&post_ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying comments table")?;
    for r in &comments {
        let comment = Comment {
            id: CommentId(r.try_get("id").context("retrieving the id field")?),
            owner_id: UserId(
                r.try_get("owner_id")
                    .context("retrieving the owner_id field")?,
            ),
            post_id: PostId(
                r.try_get("post_id")
                    .context("retrieving the post_id field")?,
            ),
            text: r.try_get("text").context("retrieving the text field")?,
            date: r.try_get("date").context("retrieving the date field")?,
        };
        let author = User {
            id: comment.owner_id,
            name: r
                .try_get("owner_name")
                .context("retrieving the owner_name field")?,
        };
        if let Some(i) = index.get(&comment.post_id) {
            feed[*i].comments.push(FeedComment { comment, author });
        }
    }

    let likes = sqlx::query(
        "SELECT post_id, COUNT(*) AS like_count FROM likes WHERE post_id = ANY($1) GROUP BY post_id",
    )
    .bind(&post_ids)
    .fetch_all(&mut *conn)
    .await
    .context("querying likes table")?;
    for r in &likes {
        let post_id = PostId(
            r.try_get("post_id")
                .context("retrieving the post_id field")?,
        );
        if let Some(i) = index.get(&post_id) {
            feed[*i].like_count = r
                .try_get("like_count")
                .context("retrieving the like_count field")?;
        }
    }

    Ok(feed)
}

fn user_from_row(r: &sqlx::postgres::PgRow) -> anyhow::Result<User> {
    Ok(User {
        id: UserId(r.try_get("id").context("retrieving the id field")?),
        name: r.try_get("name").context("retrieving the name field")?,
    })
}

fn post_from_row(r: &sqlx::postgres::PgRow) -> anyhow::Result<Post> {
    Ok(Post {
        id: PostId(r.try_get("id").context("retrieving the id field")?),
        owner_id: UserId(
            r.try_get("owner_id")
                .context("retrieving the owner_id field")?,
        ),
        content: r.try_get("content").context("retrieving the content field")?,
        image_url: r
            .try_get("image_url")
            .context("retrieving the image_url field")?,
        date: r.try_get("date").context("retrieving the date field")?,
    })
}
