use std::collections::BTreeSet;

const NUM_USERS: usize = 10;
const NUM_FOLLOWS: usize = 40;

const NUM_POSTS: usize = 30;
const POST_SENTENCE_LEN: usize = 12;

const NUM_COMMENTS: usize = 80;
const NUM_LIKES: usize = 100;
const BIO_SENTENCE_LEN: usize = 8;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn gen_bool() -> bool {
    // mockd's bool generation is borken https://github.com/jerusdp/mockd/pull/178
    simplerand::randn(2) == 0
}

fn uuid_array(ids: impl Iterator<Item = String>) -> String {
    format!("'{{{}}}'", ids.collect::<Vec<_>>().join(","))
}

fn main() {
    // Generate users and the follow edges first, so each user row can
    // carry the matching denormalized follower lists
    let mut users = Vec::new();
    for _ in 0..NUM_USERS {
        users.push(mockd::unique::uuid_v4());
    }

    let mut edges = BTreeSet::new();
    for _ in 0..NUM_FOLLOWS {
        let follower = simplerand::randn(NUM_USERS);
        let followee = simplerand::randn(NUM_USERS);
        if follower != followee {
            edges.insert((follower, followee));
        }
    }

    gen_n_items("users", NUM_USERS, |i| {
        format!(
            "('{}', '{}-{}', '{}@example.org', '{}', '{}', NULL, {}, {})",
            users[i],
            mockd::internet::username(),
            i,
            users[i],
            mockd::password::generate(true, true, true, 12),
            mockd::words::sentence(BIO_SENTENCE_LEN),
            uuid_array(
                edges
                    .iter()
                    .filter(|(_, followee)| *followee == i)
                    .map(|(follower, _)| users[*follower].clone()),
            ),
            uuid_array(
                edges
                    .iter()
                    .filter(|(follower, _)| *follower == i)
                    .map(|(_, followee)| users[*followee].clone()),
            ),
        )
    });
    let gen_user = || -> String { users[simplerand::randn(users.len())].clone() };

    let edges = edges.into_iter().collect::<Vec<_>>();
    gen_n_items("follows", edges.len(), |i| {
        format!(
            "('{}', '{}', '{}')",
            users[edges[i].0],
            users[edges[i].1],
            mockd::datetime::date(),
        )
    });

    let mut posts = Vec::new();
    gen_n_items("posts", NUM_POSTS, |_| {
        let uuid = mockd::unique::uuid_v4();
        posts.push(uuid.clone());
        let image_url = match gen_bool() {
            true => format!("'/uploads/{}.jpg'", mockd::words::word()),
            false => String::from("NULL"),
        };
        format!(
            "('{}', '{}', '{}', {}, '{}')",
            uuid,
            gen_user(),
            mockd::words::sentence(POST_SENTENCE_LEN),
            image_url,
            mockd::datetime::date(),
        )
    });
    let gen_post = || -> String { posts[simplerand::randn(posts.len())].clone() };

    gen_n_items("comments", NUM_COMMENTS, |_| {
        format!(
            "('{}', '{}', '{}', '{}', '{}')",
            mockd::unique::uuid_v4(),
            gen_user(),
            gen_post(),
            mockd::words::sentence(POST_SENTENCE_LEN),
            mockd::datetime::date(),
        )
    });

    // duplicate (user, post) pairs get swallowed by ON CONFLICT
    gen_n_items("likes", NUM_LIKES, |_| {
        format!("('{}', '{}')", gen_user(), gen_post())
    });
}
