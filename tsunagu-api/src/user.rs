use uuid::Uuid;

use crate::{Error, Post, STUB_UUID};

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
pub struct UserId(#[generator(bolero::generator::gen_arbitrary())] pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub initial_password: String,
}

impl NewUser {
    pub fn new(id: UserId, name: String, email: String, initial_password: String) -> NewUser {
        NewUser {
            id,
            name,
            email,
            initial_password,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.email)?;
        crate::validate_string(&self.initial_password)?;
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct EditProfile {
    pub bio: String,
    pub picture_url: Option<String>,
}

impl EditProfile {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.bio)?;
        if let Some(url) = &self.picture_url {
            crate::validate_string(url)?;
        }
        Ok(())
    }
}

/// What a profile page shows: the user, their posts in chronological
/// order, and whether the viewer already follows them.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: User,
    pub bio: String,
    pub picture_url: Option<String>,
    pub posts: Vec<Post>,
    pub is_following: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_names() {
        let mut u = NewUser::new(
            UserId::stub(),
            String::from("ferris"),
            String::from("ferris@example.org"),
            String::from("hunter2"),
        );
        assert_eq!(u.validate(), Ok(()));

        u.name = String::from("");
        assert_eq!(u.validate(), Err(Error::InvalidName(String::from(""))));

        u.name = String::from("fer ris");
        assert!(matches!(u.validate(), Err(Error::InvalidName(_))));

        u.name = String::from("fer-ris_2");
        assert_eq!(u.validate(), Ok(()));
    }
}
