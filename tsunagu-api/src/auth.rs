use std::str::FromStr;

use uuid::Uuid;

use crate::{Error, STUB_UUID};

pub const BCRYPT_POW_COST: u32 = 10;

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub email: String,
    pub password: String,
    pub device: String,

    /// Proof of work, to avoid the user spamming password attempts
    pub pow: String,
}

impl NewSession {
    pub fn new(email: String, password: String, device: String) -> NewSession {
        NewSession {
            pow: bcrypt::hash_with_salt(&password, BCRYPT_POW_COST, [0; 16])
                .expect("failed hashing password")
                .to_string(),
            email,
            password,
            device,
        }
    }

    pub fn validate_except_pow(&self) -> Result<(), Error> {
        crate::validate_string(&self.email)?;
        crate::validate_string(&self.password)?;
        crate::validate_string(&self.device)?;
        crate::validate_string(&self.pow)?;
        Ok(())
    }

    pub fn verify_pow(&self) -> bool {
        let parts = match bcrypt::HashParts::from_str(&self.pow) {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        if parts.get_cost() != BCRYPT_POW_COST || parts.get_salt() != "......................" {
            // this string matches the all-0 salt
            return false;
        }
        bcrypt::verify(&self.password, &self.pow).unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_roundtrip() {
        let s = NewSession::new(
            String::from("a@example.org"),
            String::from("hunter2"),
            String::from("test"),
        );
        assert!(s.verify_pow());
    }

    #[test]
    fn pow_rejects_other_password() {
        let mut s = NewSession::new(
            String::from("a@example.org"),
            String::from("hunter2"),
            String::from("test"),
        );
        s.password = String::from("hunter3");
        assert!(!s.verify_pow());
    }

    #[test]
    fn pow_rejects_garbage() {
        let s = NewSession {
            email: String::from("a@example.org"),
            password: String::from("hunter2"),
            device: String::from("test"),
            pow: String::from("not a bcrypt hash"),
        };
        assert!(!s.verify_pow());
    }
}
