use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};

use tsunagu_api::{
    AuthToken, Comment, CommentId, Counts, EditProfile, Error, FeedComment, FeedPost, LikeState,
    NewComment, NewPost, NewSession, NewUser, Post, PostId, Profile, Time, User, UserId, Uuid,
};

/// In-memory model of the server, used as the oracle in comparative
/// tests. Same operations, same error taxonomy, same dual bookkeeping
/// of the follows ledger and the denormalized per-user lists.
pub struct MockServer {
    allow_self_follow: bool,
    users: BTreeMap<UserId, DbUser>,
    posts: BTreeMap<PostId, DbPost>,
    /// Ledger of truth for the social graph
    follows: BTreeSet<(UserId, UserId)>,
    likes: BTreeSet<(UserId, PostId)>,
}

#[derive(Debug)]
struct DbUser {
    name: String,
    email: String,
    // mock-server is only used from tests, which don't bcrypt
    pass: String,
    bio: String,
    picture_url: Option<String>,
    followers: Vec<UserId>,
    following: Vec<UserId>,
    sessions: HashMap<AuthToken, Device>,
}

#[derive(Debug)]
struct DbPost {
    owner_id: UserId,
    content: String,
    image_url: Option<String>,
    date: Time,
    comments: Vec<DbComment>,
}

#[derive(Debug)]
struct DbComment {
    id: CommentId,
    owner_id: UserId,
    text: String,
    date: Time,
}

#[derive(Debug)]
struct Device(String);

impl MockServer {
    pub fn new(allow_self_follow: bool) -> MockServer {
        MockServer {
            allow_self_follow,
            users: BTreeMap::new(),
            posts: BTreeMap::new(),
            follows: BTreeSet::new(),
            likes: BTreeSet::new(),
        }
    }

    /// Return email & password for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (&str, &str) {
        let u = self
            .users
            .values()
            .skip(id)
            .next()
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()));
        (&u.email, &u.pass)
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    pub fn test_user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    pub fn test_post_ids(&self) -> Vec<PostId> {
        self.posts.keys().copied().collect()
    }

    pub fn create_user(&mut self, u: NewUser) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }
        if self.users.values().any(|db| db.email == u.email) {
            return Err(Error::EmailAlreadyUsed(u.email));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    name: u.name,
                    email: u.email,
                    pass: u.initial_password,
                    bio: String::new(),
                    picture_url: None,
                    followers: Vec::new(),
                    following: Vec::new(),
                    sessions: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate_except_pow()?;
        for u in self.users.values_mut() {
            if u.email == s.email {
                if s.password != u.pass {
                    return Err(Error::PermissionDenied);
                }
                let tok = AuthToken(Uuid::new_v4());
                u.sessions.insert(tok, Device(s.device));
                return Ok(tok);
            }
        }
        Err(Error::PermissionDenied)
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        for (id, u) in self.users.iter() {
            if u.sessions.contains_key(&tok) {
                return Ok(*id);
            }
        }
        Err(Error::PermissionDenied)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        let uid = self.resolve(tok)?;
        self.users
            .get_mut(&uid)
            .expect("resolved user disappeared")
            .sessions
            .remove(&tok);
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.resolve(tok)
    }

    pub fn fetch_users(&self, tok: AuthToken) -> Result<Vec<User>, Error> {
        self.resolve(tok)?;
        let mut users = self
            .users
            .iter()
            .map(|(id, u)| User {
                id: *id,
                name: u.name.clone(),
            })
            .collect::<Vec<_>>();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    pub fn fetch_profile(&self, tok: AuthToken, target: UserId) -> Result<Profile, Error> {
        let viewer = self.resolve(tok)?;
        let u = self.users.get(&target).ok_or(Error::UserNotFound(target))?;
        let mut posts = self
            .posts
            .iter()
            .filter(|(_, p)| p.owner_id == target)
            .map(|(id, p)| Post {
                id: *id,
                owner_id: p.owner_id,
                content: p.content.clone(),
                image_url: p.image_url.clone(),
                date: p.date,
            })
            .collect::<Vec<_>>();
        posts.sort_by_key(|p| (p.date, p.id));
        Ok(Profile {
            user: User {
                id: target,
                name: u.name.clone(),
            },
            bio: u.bio.clone(),
            picture_url: u.picture_url.clone(),
            posts,
            is_following: self.follows.contains(&(viewer, target)),
        })
    }

    pub fn edit_profile(&mut self, tok: AuthToken, e: EditProfile) -> Result<(), Error> {
        let uid = self.resolve(tok)?;
        e.validate()?;
        let u = self.users.get_mut(&uid).expect("resolved user disappeared");
        u.bio = e.bio;
        if let Some(url) = e.picture_url {
            u.picture_url = Some(url);
        }
        Ok(())
    }

    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<(), Error> {
        let uid = self.resolve(tok)?;
        p.validate()?;
        match self.posts.entry(p.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(p.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbPost {
                    owner_id: uid,
                    content: p.content,
                    image_url: p.image_url,
                    date: chrono::Utc::now(),
                    comments: Vec::new(),
                });
                Ok(())
            }
        }
    }

    pub fn create_comment(
        &mut self,
        tok: AuthToken,
        post: PostId,
        c: NewComment,
    ) -> Result<(), Error> {
        let uid = self.resolve(tok)?;
        c.validate()?;
        if self
            .posts
            .values()
            .flat_map(|p| p.comments.iter())
            .any(|comm| comm.id == c.id)
        {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let p = self.posts.get_mut(&post).ok_or(Error::PostNotFound(post))?;
        p.comments.push(DbComment {
            id: c.id,
            owner_id: uid,
            text: c.text,
            date: chrono::Utc::now(),
        });
        Ok(())
    }

    pub fn feed(&self, tok: AuthToken) -> Result<Vec<FeedPost>, Error> {
        self.resolve(tok)?;
        let mut feed = self
            .posts
            .iter()
            .map(|(id, p)| FeedPost {
                post: Post {
                    id: *id,
                    owner_id: p.owner_id,
                    content: p.content.clone(),
                    image_url: p.image_url.clone(),
                    date: p.date,
                },
                author: self.user_ref(p.owner_id),
                comments: p
                    .comments
                    .iter()
                    .map(|c| FeedComment {
                        comment: Comment {
                            id: c.id,
                            owner_id: c.owner_id,
                            post_id: *id,
                            text: c.text.clone(),
                            date: c.date,
                        },
                        author: self.user_ref(c.owner_id),
                    })
                    .collect(),
                like_count: self.likes.iter().filter(|(_, pid)| pid == id).count() as i64,
            })
            .collect::<Vec<_>>();
        feed.sort_by_key(|f| (std::cmp::Reverse(f.post.date), f.post.id));
        Ok(feed)
    }

    fn user_ref(&self, id: UserId) -> User {
        let u = self.users.get(&id).expect("post owner disappeared");
        User {
            id,
            name: u.name.clone(),
        }
    }

    pub fn follow(&mut self, tok: AuthToken, target: UserId) -> Result<(), Error> {
        let follower = self.resolve(tok)?;
        if !self.users.contains_key(&target) {
            return Err(Error::UserNotFound(target));
        }
        if follower == target && !self.allow_self_follow {
            return Err(Error::CannotFollowSelf);
        }
        if !self.follows.insert((follower, target)) {
            return Err(Error::AlreadyFollowing(target));
        }
        let f = self
            .users
            .get_mut(&follower)
            .expect("resolved user disappeared");
        if !f.following.contains(&target) {
            f.following.push(target);
        }
        let t = self.users.get_mut(&target).expect("followee disappeared");
        if !t.followers.contains(&follower) {
            t.followers.push(follower);
        }
        Ok(())
    }

    pub fn unfollow(&mut self, tok: AuthToken, target: UserId) -> Result<(), Error> {
        let follower = self.resolve(tok)?;
        self.follows.remove(&(follower, target));
        let f = self
            .users
            .get_mut(&follower)
            .expect("resolved user disappeared");
        f.following.retain(|u| *u != target);
        if let Some(t) = self.users.get_mut(&target) {
            t.followers.retain(|u| *u != follower);
        }
        Ok(())
    }

    pub fn toggle_like(&mut self, tok: AuthToken, post: PostId) -> Result<LikeState, Error> {
        let uid = self.resolve(tok)?;
        if !self.posts.contains_key(&post) {
            return Err(Error::PostNotFound(post));
        }
        match self.likes.remove(&(uid, post)) {
            true => Ok(LikeState { liked: false }),
            false => {
                self.likes.insert((uid, post));
                Ok(LikeState { liked: true })
            }
        }
    }

    pub fn counts(&self, tok: AuthToken) -> Result<Counts, Error> {
        let uid = self.resolve(tok)?;
        let u = self.users.get(&uid).expect("resolved user disappeared");
        Ok(Counts {
            followers_count: u.followers.len() as i64,
            following_count: u.following.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser::new(
            UserId(Uuid::new_v4()),
            String::from(name),
            format!("{name}@example.org"),
            String::from("hunter2"),
        )
    }

    fn session_for(server: &mut MockServer, email: &str) -> AuthToken {
        server
            .auth(NewSession {
                email: String::from(email),
                password: String::from("hunter2"),
                device: String::from("test"),
                pow: String::new(),
            })
            .expect("logging in")
    }

    /// Two users, both logged in
    fn two_users() -> (MockServer, (UserId, AuthToken), (UserId, AuthToken)) {
        let mut server = MockServer::new(false);
        let alice = new_user("alice");
        let bob = new_user("bob");
        let (alice_id, bob_id) = (alice.id, bob.id);
        server.create_user(alice).expect("creating alice");
        server.create_user(bob).expect("creating bob");
        let alice_tok = session_for(&mut server, "alice@example.org");
        let bob_tok = session_for(&mut server, "bob@example.org");
        (server, (alice_id, alice_tok), (bob_id, bob_tok))
    }

    fn graph_state(server: &MockServer, user: UserId) -> (Vec<UserId>, Vec<UserId>, bool) {
        let u = &server.users[&user];
        (
            u.followers.clone(),
            u.following.clone(),
            server.follows.iter().any(|(f, _)| *f == user),
        )
    }

    #[test]
    fn follow_twice_yields_one_edge() {
        let (mut server, (_, alice_tok), (bob_id, _)) = two_users();
        assert_eq!(server.follow(alice_tok, bob_id), Ok(()));
        assert_eq!(
            server.follow(alice_tok, bob_id),
            Err(Error::AlreadyFollowing(bob_id)),
        );
        assert_eq!(server.follows.len(), 1);
        assert_eq!(server.users[&bob_id].followers.len(), 1);
    }

    #[test]
    fn follow_unfollow_roundtrips() {
        let (mut server, (alice_id, alice_tok), (bob_id, _)) = two_users();
        let before = graph_state(&server, alice_id);
        server.follow(alice_tok, bob_id).expect("following");
        server.unfollow(alice_tok, bob_id).expect("unfollowing");
        assert_eq!(graph_state(&server, alice_id), before);
        assert!(server.users[&bob_id].followers.is_empty());
        assert!(server.follows.is_empty());
    }

    #[test]
    fn unfollow_never_followed_is_noop() {
        let (mut server, (_, alice_tok), (bob_id, _)) = two_users();
        assert_eq!(server.unfollow(alice_tok, bob_id), Ok(()));
        assert_eq!(server.unfollow(alice_tok, bob_id), Ok(()));
        assert!(server.follows.is_empty());
    }

    #[test]
    fn self_follow_rejected_by_default() {
        let (mut server, (alice_id, alice_tok), _) = two_users();
        assert_eq!(
            server.follow(alice_tok, alice_id),
            Err(Error::CannotFollowSelf),
        );

        let mut permissive = MockServer::new(true);
        let alice = new_user("alice");
        let alice_id = alice.id;
        permissive.create_user(alice).expect("creating alice");
        let tok = session_for(&mut permissive, "alice@example.org");
        assert_eq!(permissive.follow(tok, alice_id), Ok(()));
        assert_eq!(
            permissive.counts(tok),
            Ok(Counts {
                followers_count: 1,
                following_count: 1,
            }),
        );
    }

    #[test]
    fn counts_track_follows() {
        let mut server = MockServer::new(false);
        let star = new_user("star");
        let star_id = star.id;
        server.create_user(star).expect("creating star");
        let star_tok = session_for(&mut server, "star@example.org");

        let mut fan_toks = Vec::new();
        for i in 0..5 {
            let fan = new_user(&format!("fan{i}"));
            server.create_user(fan).expect("creating fan");
            let tok = session_for(&mut server, &format!("fan{i}@example.org"));
            server.follow(tok, star_id).expect("following");
            fan_toks.push(tok);
            assert_eq!(
                server.counts(star_tok).expect("counting").followers_count,
                i as i64 + 1,
            );
        }
        for (i, tok) in fan_toks.into_iter().enumerate() {
            server.unfollow(tok, star_id).expect("unfollowing");
            assert_eq!(
                server.counts(star_tok).expect("counting").followers_count,
                4 - i as i64,
            );
        }
    }

    #[test]
    fn like_toggle_is_self_inverse() {
        let (mut server, (_, alice_tok), (_, bob_tok)) = two_users();
        let post = NewPost {
            id: PostId(Uuid::new_v4()),
            content: String::from("hello"),
            image_url: None,
        };
        let post_id = post.id;
        server.create_post(alice_tok, post).expect("posting");

        assert_eq!(
            server.toggle_like(bob_tok, post_id),
            Ok(LikeState { liked: true }),
        );
        assert_eq!(
            server.toggle_like(bob_tok, post_id),
            Ok(LikeState { liked: false }),
        );
        assert!(server.likes.is_empty());

        let feed = server.feed(bob_tok).expect("fetching feed");
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].like_count, 0);
    }

    #[test]
    fn comments_append_to_their_post() {
        let (mut server, (_, alice_tok), (bob_id, bob_tok)) = two_users();
        let post = NewPost {
            id: PostId(Uuid::new_v4()),
            content: String::from("hello"),
            image_url: None,
        };
        let post_id = post.id;
        server.create_post(alice_tok, post).expect("posting");
        server
            .create_comment(
                bob_tok,
                post_id,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    text: String::from("nice"),
                },
            )
            .expect("commenting");

        let feed = server.feed(alice_tok).expect("fetching feed");
        assert_eq!(feed[0].comments.len(), 1);
        assert_eq!(feed[0].comments[0].comment.text, "nice");
        assert_eq!(feed[0].comments[0].author.id, bob_id);
    }
}
