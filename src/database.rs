use crate::model::*;
use sled::transaction::{abort, ConflictableTransactionError, TransactionError, Transactional};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("bad user record: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("email index points at missing user {0}")]
    DanglingIndex(String),
}

/// Ids are opaque to everything but the store: registration time in
/// milliseconds, disambiguated by the store's monotonic counter.
fn new_user_id(counter: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}", millis, counter)
}

pub trait UserDb {
    type Error;
    /// Returns `None` if a user with this email already exists.
    fn add_user(&self, email: &str, name: &str) -> Result<Option<User>, Self::Error>;
    fn get_user(&self, id: &str) -> Result<Option<User>, Self::Error>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Self::Error>;
    /// Applies `f` to the stored record and writes it back atomically.
    /// Returns `None` if there is no user with this id.
    fn update_user<F: Fn(&mut User)>(&self, id: &str, f: F) -> Result<Option<User>, Self::Error>;
    fn user_count(&self) -> Result<usize, Self::Error>;
}

const USERS: &[u8] = b"users";
const USERS_EMAIL: &[u8] = b"USERS_EMAIL";

impl UserDb for sled::Db {
    type Error = DbError;

    fn add_user(&self, email: &str, name: &str) -> Result<Option<User>, DbError> {
        let users = self.open_tree(USERS)?;
        let users_email = self.open_tree(USERS_EMAIL)?;
        let user = User {
            id: new_user_id(self.generate_id()?),
            email: email.to_owned(),
            name: name.to_owned(),
            favorite_movies: Vec::new(),
        };
        let data = bincode::serialize(&user)?;
        let result: Result<(), TransactionError<()>> =
            (&users, &users_email).transaction(|(users, users_email)| {
                if users_email
                    .insert(user.email.as_bytes(), user.id.as_bytes())?
                    .is_some()
                {
                    return abort(());
                }
                users.insert(user.id.as_bytes(), data.as_slice())?;
                Ok(())
            });
        match result {
            Ok(()) => Ok(Some(user)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, DbError> {
        let users = self.open_tree(USERS)?;
        match users.get(id.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let users_email = self.open_tree(USERS_EMAIL)?;
        if let Some(id) = users_email.get(email.as_bytes())? {
            let id = String::from_utf8_lossy(&id).into_owned();
            let user = self.get_user(&id)?.ok_or(DbError::DanglingIndex(id))?;
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    fn update_user<F: Fn(&mut User)>(&self, id: &str, f: F) -> Result<Option<User>, DbError> {
        let users = self.open_tree(USERS)?;
        let result = users.transaction(|users| {
            let data = match users.get(id.as_bytes())? {
                Some(data) => data,
                None => return Ok(None),
            };
            let mut user: User =
                bincode::deserialize(&data).map_err(ConflictableTransactionError::Abort)?;
            f(&mut user);
            let data = bincode::serialize(&user).map_err(ConflictableTransactionError::Abort)?;
            users.insert(id.as_bytes(), data)?;
            Ok(Some(user))
        });
        match result {
            Ok(user) => Ok(user),
            Err(TransactionError::Abort(e)) => Err(e.into()),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn user_count(&self) -> Result<usize, DbError> {
        Ok(self.open_tree(USERS)?.len())
    }
}
