use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tsunagu_api::{AuthToken, Uuid};

mod db;
mod error;
mod extractors;
mod fuzz;
mod graph;
mod handlers;

pub use error::Error;
use extractors::{AppState, PgPool};
use graph::FollowPolicy;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(short, long, default_value = "127.0.0.1:5214")]
    bind: SocketAddr,

    /// Let users follow themselves, like the legacy deployment did
    #[structopt(long)]
    allow_self_follow: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_sqlx_pool(&db_url).await?;
    let mut conn = pool.acquire().await?;
    MIGRATOR
        .run(&mut *conn)
        .await
        .context("running pending migrations")?;
    std::mem::drop(conn);

    let admin_token = match std::env::var("ADMIN_TOKEN") {
        Ok(tok) => Some(AuthToken(
            Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?,
        )),
        Err(_) => None,
    };

    let app = app(
        pool,
        admin_token,
        FollowPolicy {
            allow_self_follow: opt.allow_self_follow,
        },
    )
    .await;

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(db_url)
            .await
            .with_context(|| format!("opening database {db_url:?}"))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>, policy: FollowPolicy) -> Router {
    let state = AppState {
        db,
        admin_token,
        policy,
    };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/register", post(handlers::register))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route("/api/users/:user_id/profile", get(handlers::fetch_profile))
        .route("/api/users/:user_id/follow", post(handlers::follow))
        .route("/api/users/:user_id/unfollow", post(handlers::unfollow))
        .route("/api/profile/edit", post(handlers::edit_profile))
        .route("/api/profile/counts", get(handlers::counts))
        .route("/api/posts", post(handlers::create_post))
        .route("/api/posts/:post_id/comments", post(handlers::create_comment))
        .route("/api/posts/:post_id/like", post(handlers::toggle_like))
        .route("/api/feed", get(handlers::feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
