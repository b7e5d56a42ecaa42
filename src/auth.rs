use crate::database::{DbError, UserDb};
use crate::model::User;
use actix_identity::Identity;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user already exists with this email")]
    DuplicateUser,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Where the id of the currently authenticated user lives between requests.
pub trait SessionSlot {
    fn current(&self) -> Option<String>;
    fn remember(&self, user_id: String);
    fn forget(&self);
}

impl SessionSlot for Identity {
    fn current(&self) -> Option<String> {
        self.identity()
    }

    fn remember(&self, user_id: String) {
        Identity::remember(self, user_id)
    }

    fn forget(&self) {
        Identity::forget(self)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

impl SessionState {
    fn anonymous() -> Self {
        SessionState {
            user: None,
            is_authenticated: false,
        }
    }
}

// Passwords are accepted but never checked or stored.
pub fn register<D, S>(
    db: &D,
    session: &S,
    email: &str,
    _password: &str,
    name: &str,
) -> Result<User, AuthError>
where
    D: UserDb<Error = DbError>,
    S: SessionSlot,
{
    let user = db.add_user(email, name)?.ok_or(AuthError::DuplicateUser)?;
    info!("registered user {}", user.id);
    session.remember(user.id.clone());
    Ok(user)
}

pub fn login<D, S>(db: &D, session: &S, email: &str, _password: &str) -> Result<User, AuthError>
where
    D: UserDb<Error = DbError>,
    S: SessionSlot,
{
    let user = db
        .get_user_by_email(email)?
        .ok_or(AuthError::InvalidCredentials)?;
    session.remember(user.id.clone());
    Ok(user)
}

pub fn logout<S: SessionSlot>(session: &S) {
    session.forget();
}

pub fn session_state<D, S>(db: &D, session: &S) -> Result<SessionState, AuthError>
where
    D: UserDb<Error = DbError>,
    S: SessionSlot,
{
    let user_id = match session.current() {
        Some(user_id) => user_id,
        None => return Ok(SessionState::anonymous()),
    };
    match db.get_user(&user_id)? {
        Some(user) => Ok(SessionState {
            user: Some(user),
            is_authenticated: true,
        }),
        None => {
            debug!("session refers to unknown user {}", user_id);
            Ok(SessionState::anonymous())
        }
    }
}

/// Adds `movie_id` to the session user's favorites, or removes it if it is
/// already there. Returns the stored user and whether the movie is now a
/// favorite.
pub fn toggle_favorite<D, S>(db: &D, session: &S, movie_id: u64) -> Result<(User, bool), AuthError>
where
    D: UserDb<Error = DbError>,
    S: SessionSlot,
{
    let user_id = session.current().ok_or(AuthError::NotAuthenticated)?;
    let user = db
        .update_user(&user_id, |user| {
            if let Some(index) = user.favorite_movies.iter().position(|id| *id == movie_id) {
                user.favorite_movies.remove(index);
            } else {
                user.favorite_movies.push(movie_id);
            }
        })?
        .ok_or(AuthError::NotAuthenticated)?;
    let is_favorite = user.is_favorite(movie_id);
    debug!(
        "user {} toggled movie {} (favorite: {})",
        user.id, movie_id, is_favorite
    );
    Ok((user, is_favorite))
}
