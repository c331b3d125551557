#![cfg(test)]

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};
use tsunagu_api::{
    AuthToken, Counts, EditProfile, Error as ApiError, FeedPost, LikeState, NewComment, NewPost,
    NewSession, NewUser, PostId, Profile, User, UserId, Uuid,
};
use tsunagu_mock_server::MockServer;

use crate::{extractors::*, graph::FollowPolicy, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    postgresfixture::cluster::Cluster::new(
        data,
        runtime.expect("postgresql seems to not be installed in path"),
    )
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = build_pg_cluster(datadir_path);
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser(NewUser),
    AdminCreateUser(NewUser),
    Auth {
        uid: usize,
        #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
        device: String,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    FetchUsers {
        sid: usize,
    },
    FetchProfile {
        sid: usize,
        uid: usize,
    },
    EditProfile {
        sid: usize,
        profile: EditProfile,
    },
    CreatePost {
        sid: usize,
        post: NewPost,
    },
    CreateComment {
        sid: usize,
        pid: usize,
        comment: NewComment,
    },
    Feed {
        sid: usize,
    },
    ToggleLike {
        sid: usize,
        pid: usize,
    },
    Follow {
        sid: usize,
        uid: usize,
    },
    Unfollow {
        sid: usize,
        uid: usize,
    },
    Counts {
        sid: usize,
    },
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

/// Dates are stamped independently by the app and the mock, so
/// anything carrying one is compared through a date-free projection.
fn profile_shape(p: Profile) -> (User, String, Option<String>, Vec<PostId>, bool) {
    let mut posts = p.posts.into_iter().map(|post| post.id).collect::<Vec<_>>();
    posts.sort();
    (p.user, p.bio, p.picture_url, posts, p.is_following)
}

fn feed_shape(feed: Vec<FeedPost>) -> Vec<(PostId, String, User, usize, i64)> {
    let mut shape = feed
        .into_iter()
        .map(|f| {
            (
                f.post.id,
                f.post.content,
                f.author,
                f.comments.len(),
                f.like_count,
            )
        })
        .collect::<Vec<_>>();
    shape.sort_by_key(|s| s.0);
    shape
}

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
}

impl ComparativeFuzzer {
    async fn new(pool: PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(
            pool,
            Some(AuthToken(admin_token)),
            FollowPolicy {
                allow_self_follow: false,
            },
        )
        .await;
        let mock = MockServer::new(false);
        let sessions = Vec::new();
        ComparativeFuzzer {
            admin_token,
            app,
            mock,
            sessions,
        }
    }

    /// Pick an existing session pair, or None if nobody logged in yet
    fn session(&self, sid: usize) -> Option<(AuthToken, AuthToken)> {
        resize_int(sid, ..self.sessions.len()).map(|i| (self.sessions[i].app, self.sessions[i].mock))
    }

    /// Make sure at least one session exists, creating a stub user and
    /// logging it in if need be
    #[async_recursion]
    async fn ensure_session(&mut self) {
        if self.sessions.is_empty() {
            if self.mock.test_num_users() == 0 {
                self.execute_fuzz_op(FuzzOp::CreateUser(NewUser::new(
                    UserId::stub(),
                    String::from("user"),
                    String::from("user@example.org"),
                    String::from("password"),
                )))
                .await;
            }
            self.execute_fuzz_op(FuzzOp::Auth {
                uid: 0,
                device: String::from("fuzzer"),
            })
            .await;
        }
    }

    #[async_recursion]
    async fn ensure_post(&mut self, sid: usize) {
        if self.mock.test_post_ids().is_empty() {
            self.execute_fuzz_op(FuzzOp::CreatePost {
                sid,
                post: NewPost {
                    id: PostId::stub(),
                    content: String::from("first post"),
                    image_url: None,
                },
            })
            .await;
        }
    }

    fn pick_user(&self, uid: usize) -> Option<UserId> {
        let users = self.mock.test_user_ids();
        resize_int(uid, ..users.len()).map(|i| users[i])
    }

    fn pick_post(&self, pid: usize) -> Option<PostId> {
        let posts = self.mock.test_post_ids();
        resize_int(pid, ..posts.len()).map(|i| posts[i])
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser(new_user) => compare(
                "CreateUser",
                run_on_app(&mut self.app, "POST", "/api/register", None, &new_user).await,
                self.mock.create_user(new_user),
            ),
            FuzzOp::AdminCreateUser(new_user) => compare(
                "AdminCreateUser",
                run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/admin/create-user",
                    Some(self.admin_token),
                    &new_user,
                )
                .await,
                self.mock.create_user(new_user),
            ),
            FuzzOp::Auth { uid, device } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let (email, password) = self.mock.test_get_user_info(uid);
                    let session = NewSession {
                        email: String::from(email),
                        password: String::from(password),
                        device,
                        pow: String::new(),
                    };
                    let app_tok =
                        run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                    let mock_tok = self.mock.auth(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser(NewUser::new(
                        UserId::stub(),
                        String::from("user"),
                        String::from("user@example.org"),
                        String::from("password"),
                    )))
                    .await;
                    self.execute_fuzz_op(FuzzOp::Auth { uid, device }).await;
                }
            }
            FuzzOp::Unauth { sid } => {
                let (app_tok, mock_tok) = self
                    .session(sid)
                    .unwrap_or((AuthToken::stub(), AuthToken::stub()));
                compare(
                    "Unauth",
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(app_tok.0), &()).await,
                    self.mock.unauth(mock_tok),
                )
            }
            FuzzOp::Whoami { sid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare::<UserId>(
                    "Whoami",
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(app_tok.0), &()).await,
                    self.mock.whoami(mock_tok),
                )
            }
            FuzzOp::FetchUsers { sid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare::<Vec<User>>(
                    "FetchUsers",
                    run_on_app(&mut self.app, "GET", "/api/users", Some(app_tok.0), &()).await,
                    self.mock.fetch_users(mock_tok),
                )
            }
            FuzzOp::FetchProfile { sid, uid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                let target = self.pick_user(uid).expect("sessions imply users");
                compare(
                    "FetchProfile",
                    run_on_app::<_, Profile>(
                        &mut self.app,
                        "GET",
                        &format!("/api/users/{}/profile", target.0),
                        Some(app_tok.0),
                        &(),
                    )
                    .await
                    .map(profile_shape),
                    self.mock.fetch_profile(mock_tok, target).map(profile_shape),
                )
            }
            FuzzOp::EditProfile { sid, profile } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare(
                    "EditProfile",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/profile/edit",
                        Some(app_tok.0),
                        &profile,
                    )
                    .await,
                    self.mock.edit_profile(mock_tok, profile.clone()),
                )
            }
            FuzzOp::CreatePost { sid, post } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare(
                    "CreatePost",
                    run_on_app(&mut self.app, "POST", "/api/posts", Some(app_tok.0), &post).await,
                    self.mock.create_post(mock_tok, post.clone()),
                )
            }
            FuzzOp::CreateComment { sid, pid, comment } => {
                self.ensure_session().await;
                self.ensure_post(sid).await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                let post = self.pick_post(pid).unwrap_or(PostId::stub());
                compare(
                    "CreateComment",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/posts/{}/comments", post.0),
                        Some(app_tok.0),
                        &comment,
                    )
                    .await,
                    self.mock.create_comment(mock_tok, post, comment.clone()),
                )
            }
            FuzzOp::Feed { sid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare(
                    "Feed",
                    run_on_app::<_, Vec<FeedPost>>(
                        &mut self.app,
                        "GET",
                        "/api/feed",
                        Some(app_tok.0),
                        &(),
                    )
                    .await
                    .map(feed_shape),
                    self.mock.feed(mock_tok).map(feed_shape),
                )
            }
            FuzzOp::ToggleLike { sid, pid } => {
                self.ensure_session().await;
                self.ensure_post(sid).await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                let post = self.pick_post(pid).unwrap_or(PostId::stub());
                compare::<LikeState>(
                    "ToggleLike",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/posts/{}/like", post.0),
                        Some(app_tok.0),
                        &(),
                    )
                    .await,
                    self.mock.toggle_like(mock_tok, post),
                )
            }
            FuzzOp::Follow { sid, uid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                let target = self.pick_user(uid).expect("sessions imply users");
                compare(
                    "Follow",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/users/{}/follow", target.0),
                        Some(app_tok.0),
                        &(),
                    )
                    .await,
                    self.mock.follow(mock_tok, target),
                )
            }
            FuzzOp::Unfollow { sid, uid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                let target = self.pick_user(uid).expect("sessions imply users");
                compare(
                    "Unfollow",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/users/{}/unfollow", target.0),
                        Some(app_tok.0),
                        &(),
                    )
                    .await,
                    self.mock.unfollow(mock_tok, target),
                )
            }
            FuzzOp::Counts { sid } => {
                self.ensure_session().await;
                let (app_tok, mock_tok) = self.session(sid).expect("ensure_session left no session");
                compare::<Counts>(
                    "Counts",
                    run_on_app(
                        &mut self.app,
                        "GET",
                        "/api/profile/counts",
                        Some(app_tok.0),
                        &(),
                    )
                    .await,
                    self.mock.counts(mock_tok),
                )
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

do_sqlx_test!(
    follow_unfollow_roundtrip,
    bolero::generator::gen::<(UserId, UserId)>(),
    |pool, (a, b): (UserId, UserId)| async move {
        if a == b {
            return;
        }
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for id in [a, b] {
            fuzzer
                .execute_fuzz_op(FuzzOp::CreateUser(NewUser::new(
                    id,
                    format!("user-{}", id.0.simple()),
                    format!("{}@example.org", id.0.simple()),
                    String::from("password"),
                )))
                .await;
        }
        for uid in [0, usize::MAX] {
            fuzzer
                .execute_fuzz_op(FuzzOp::Auth {
                    uid,
                    device: String::from("test"),
                })
                .await;
        }
        // follow twice: exactly one edge plus AlreadyFollowing, then
        // unfollow twice: back to the initial state both times
        for _ in 0..2 {
            fuzzer
                .execute_fuzz_op(FuzzOp::Follow {
                    sid: 0,
                    uid: usize::MAX,
                })
                .await;
            fuzzer.execute_fuzz_op(FuzzOp::Counts { sid: 0 }).await;
            fuzzer.execute_fuzz_op(FuzzOp::Counts { sid: usize::MAX }).await;
        }
        for _ in 0..2 {
            fuzzer
                .execute_fuzz_op(FuzzOp::Unfollow {
                    sid: 0,
                    uid: usize::MAX,
                })
                .await;
            fuzzer.execute_fuzz_op(FuzzOp::Counts { sid: 0 }).await;
            fuzzer.execute_fuzz_op(FuzzOp::Counts { sid: usize::MAX }).await;
        }
    }
);
