/*!
Password hashing and login keys.

Passwords are stored as the hex SHA-256 digest of the user's salt followed
by the password. A successful login issues a random key, which the client
presents with every subsequent request; keys expire `timeout` after issue
and are forgotten on logout. Keys live only in this process.
*/
use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::{distributions, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::{error::ActionError, perm::Caller, store::Store, user::User};

const LOG_IN: &str = "Please log in to access this page.";
const EXPIRED: &str = "Your session has expired; please log in again.";

const DEFAULT_SALT_LENGTH: usize = 4;
const DEFAULT_KEY_LENGTH: usize = 32;
const DEFAULT_SALT_CHARS: &str =
"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Clone, Debug, PartialEq)]
pub enum AuthResult {
    /// The key is good and belongs to the user with this id.
    Ok(i64),
    InvalidKey,
    ExpiredKey,
}

#[derive(Debug)]
struct Session {
    user_id: i64,
    issued: Instant,
}

#[derive(Debug)]
pub struct Auth {
    salt_chars: Vec<char>,
    salt_length: usize,
    key_length: usize,
    timeout: Duration,
    keys: RwLock<HashMap<String, Session>>,
}

impl Auth {
    pub fn new(timeout: Duration) -> Self {
        log::trace!("Auth::new( {:?} ) called.", &timeout);

        Self {
            salt_chars: DEFAULT_SALT_CHARS.chars().collect(),
            salt_length: DEFAULT_SALT_LENGTH,
            key_length: DEFAULT_KEY_LENGTH,
            timeout,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Set the length of salt strings to generate.
    ///
    /// Will quietly do nothing if set to zero.
    pub fn set_salt_length(&mut self, new_length: usize) {
        if new_length > 0 {
            self.salt_length = new_length;
        }
    }

    fn random_string(&self, length: usize) -> String {
        let rng = rand::thread_rng();
        // `salt_chars` is never empty, so `Slice::new()` can't fail; fall back
        // to plain alphanumerics anyway rather than panic.
        match distributions::Slice::new(&self.salt_chars) {
            Ok(dist) => rng.sample_iter(&dist).take(length).collect(),
            Err(_) => rng.sample_iter(&distributions::Alphanumeric)
                .take(length)
                .map(char::from)
                .collect(),
        }
    }

    /// Generate a new user salt.
    pub fn generate_salt(&self) -> String {
        self.random_string(self.salt_length)
    }

    pub fn hash_password(salt: &str, password: &str) -> String {
        let mut h = Sha256::new();
        h.update(salt.as_bytes());
        h.update(password.as_bytes());
        hex::encode(h.finalize())
    }

    /// Compares in constant time.
    pub fn check_password(u: &User, password: &str) -> bool {
        let hash = Auth::hash_password(&u.salt, password);
        bool::from(hash.as_bytes().ct_eq(u.password_hash.as_bytes()))
    }

    pub async fn issue_key(&self, user_id: i64) -> String {
        log::trace!("Auth::issue_key( {} ) called.", &user_id);

        let key = self.random_string(self.key_length);
        let mut keys = self.keys.write().await;
        keys.retain(|_, s| s.issued.elapsed() < self.timeout);
        keys.insert(key.clone(), Session { user_id, issued: Instant::now() });
        key
    }

    pub async fn check_key(&self, key: &str) -> AuthResult {
        log::trace!("Auth::check_key( [ key ] ) called.");

        let mut keys = self.keys.write().await;
        let res = match keys.get(key) {
            None => AuthResult::InvalidKey,
            Some(s) if s.issued.elapsed() >= self.timeout => AuthResult::ExpiredKey,
            Some(s) => AuthResult::Ok(s.user_id),
        };

        if res == AuthResult::ExpiredKey {
            keys.remove(key);
        }
        res
    }

    /**
    Resolve a key into the `Caller` it identifies.

    The role is read fresh from the store, so a role switch takes effect on
    the very next request.
    */
    pub async fn identify(&self, store: &dyn Store, key: &str) -> Result<Caller, ActionError> {
        log::trace!("Auth::identify( Store, [ key ] ) called.");

        let user_id = match self.check_key(key).await {
            AuthResult::Ok(id) => id,
            AuthResult::InvalidKey => { return Err(ActionError::Unauthenticated(LOG_IN)); },
            AuthResult::ExpiredKey => { return Err(ActionError::Unauthenticated(EXPIRED)); },
        };

        match store.get_user(user_id).await? {
            Some(u) => Ok(Caller { id: u.id, role: u.role }),
            None => {
                log::warn!("Key issued for nonexistent user {}; revoking.", &user_id);
                self.revoke_key(key).await;
                Err(ActionError::Unauthenticated(LOG_IN))
            },
        }
    }

    /// Forget `key`; returns whether it was known.
    pub async fn revoke_key(&self, key: &str) -> bool {
        log::trace!("Auth::revoke_key( [ key ] ) called.");
        self.keys.write().await.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::mem::MemStore,
        tests::ensure_logging,
        user::{NewUser, Role},
    };

    #[test]
    fn hashing() {
        ensure_logging();

        let a = Auth::new(DEFAULT_TIMEOUT);
        let salt = a.generate_salt();
        assert_eq!(salt.chars().count(), DEFAULT_SALT_LENGTH);

        let u = User {
            id: 1,
            email: "ann@school.edu".to_owned(),
            first_name: "Ann".to_owned(),
            role: Role::Student,
            password_hash: Auth::hash_password(&salt, "correct horse"),
            salt,
        };
        assert_eq!(u.password_hash.len(), 64);
        assert!(Auth::check_password(&u, "correct horse"));
        assert!(!Auth::check_password(&u, "correct horsf"));
        assert!(!Auth::check_password(&u, ""));
        let truncated = User { password_hash: u.password_hash[..32].to_owned(), ..u.clone() };
        assert!(!Auth::check_password(&truncated, "correct horse"));
        assert_ne!(
            Auth::hash_password("aaaa", "pw"),
            Auth::hash_password("aaab", "pw")
        );
    }

    #[tokio::test]
    async fn keys() {
        ensure_logging();

        let a = Auth::new(DEFAULT_TIMEOUT);
        let k = a.issue_key(7).await;
        assert_eq!(k.len(), DEFAULT_KEY_LENGTH);
        assert_eq!(a.check_key(&k).await, AuthResult::Ok(7));
        assert_eq!(a.check_key("nope").await, AuthResult::InvalidKey);

        assert!(a.revoke_key(&k).await);
        assert!(!a.revoke_key(&k).await);
        assert_eq!(a.check_key(&k).await, AuthResult::InvalidKey);
    }

    #[tokio::test]
    async fn keys_expire() {
        ensure_logging();

        let a = Auth::new(Duration::ZERO);
        let k = a.issue_key(7).await;
        assert_eq!(a.check_key(&k).await, AuthResult::ExpiredKey);
        assert_eq!(a.check_key(&k).await, AuthResult::InvalidKey);
    }

    #[tokio::test]
    async fn identify_reads_current_role() {
        ensure_logging();

        let store = MemStore::new();
        let a = Auth::new(DEFAULT_TIMEOUT);
        let u = store.insert_user(&NewUser {
            email: "ann@school.edu".to_owned(),
            first_name: "Ann".to_owned(),
            role: Role::Student,
            salt: "abcd".to_owned(),
            password_hash: Auth::hash_password("abcd", "password123"),
        }).await.unwrap();

        let k = a.issue_key(u.id).await;
        assert_eq!(
            a.identify(&store, &k).await.unwrap(),
            Caller { id: u.id, role: Role::Student }
        );

        store.set_user_role(u.id, Role::Teacher).await.unwrap();
        assert_eq!(a.identify(&store, &k).await.unwrap().role, Role::Teacher);

        assert!(matches!(
            a.identify(&store, "bogus").await,
            Err(ActionError::Unauthenticated(_))
        ));

        let orphan = a.issue_key(u.id + 1).await;
        assert!(a.identify(&store, &orphan).await.is_err());
        assert_eq!(a.check_key(&orphan).await, AuthResult::InvalidKey);
    }
}
