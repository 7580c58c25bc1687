//! Signed-in user context.
//!
//! A [`Session`] is produced by [`login`] or [`register`] and handed to every
//! operation that reads or writes user data. Account settings (rename,
//! deactivation) re-check the password before touching the profile row.

use crate::api::{Authenticator, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{AuthIdentity, NewUser, User, UserPatch};
use tracing::{info, warn};

const ACTIVE: i32 = 1;
const INACTIVE: i32 = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub identity: AuthIdentity,
    pub user: User,
}

impl Session {
    pub fn token(&self) -> Option<&str> {
        self.identity.access_token.as_deref()
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} is required.", field)))
    } else {
        Ok(())
    }
}

pub async fn login(
    auth: &dyn Authenticator,
    store: &dyn RemoteStore,
    email: &str,
    password: &str,
) -> Result<Session> {
    require(email, "E-mail")?;
    require(password, "Password")?;

    let identity = auth.sign_in(email.trim(), password).await?;
    let user = store
        .fetch_profile(&identity)
        .await?
        .ok_or_else(|| Error::NotFound("user profile".into()))?;
    if !user.is_active() {
        warn!(user_id = user.id, "sign-in refused for deactivated account");
        return Err(Error::InactiveAccount);
    }

    info!(user_id = user.id, "signed in");
    Ok(Session { identity, user })
}

/// Creates the auth identity and its profile row. Registering an e-mail whose
/// profile was deactivated reactivates it.
pub async fn register(
    auth: &dyn Authenticator,
    store: &dyn RemoteStore,
    name: &str,
    email: &str,
    password: &str,
) -> Result<Session> {
    require(name, "Name")?;
    require(email, "E-mail")?;
    require(password, "Password")?;

    let identity = auth.sign_up(email.trim(), password).await?;

    let user = match store.fetch_profile(&identity).await? {
        Some(existing) => {
            info!(user_id = existing.id, "reactivating existing profile");
            let patch = UserPatch {
                status: Some(ACTIVE),
                ..Default::default()
            };
            store.update_profile(&identity, &patch).await?
        }
        None => {
            let profile = NewUser {
                user_id: identity.id.clone(),
                name: name.trim().to_string(),
                email: email.trim().to_string(),
                status: ACTIVE,
            };
            store.insert_profile(&identity, &profile).await?
        }
    };

    info!(user_id = user.id, "registered");
    Ok(Session { identity, user })
}

// Settings actions confirm the password by signing in again.
async fn confirm_password(
    auth: &dyn Authenticator,
    session: &Session,
    password: &str,
) -> Result<AuthIdentity> {
    require(password, "Password")?;
    let email = session
        .identity
        .email
        .clone()
        .unwrap_or_else(|| session.user.email.clone());
    auth.sign_in(&email, password)
        .await
        .map_err(|err| match err {
            Error::Auth(_) => Error::Auth("Incorrect password".into()),
            other => other,
        })
}

pub async fn rename(
    auth: &dyn Authenticator,
    store: &dyn RemoteStore,
    session: &Session,
    password: &str,
    name: &str,
) -> Result<User> {
    require(name, "Name")?;
    let identity = confirm_password(auth, session, password).await?;
    let patch = UserPatch {
        name: Some(name.trim().to_string()),
        ..Default::default()
    };
    let user = store.update_profile(&identity, &patch).await?;
    info!(user_id = user.id, "profile renamed");
    Ok(user)
}

/// Marks the profile inactive and deletes all of the user's tasks.
/// Notations are left in place.
pub async fn deactivate(
    auth: &dyn Authenticator,
    store: &dyn RemoteStore,
    session: &Session,
    password: &str,
) -> Result<()> {
    let identity = confirm_password(auth, session, password).await?;
    let patch = UserPatch {
        status: Some(INACTIVE),
        ..Default::default()
    };
    store.update_profile(&identity, &patch).await?;
    store.delete_user_tasks(session).await?;
    info!(user_id = session.user.id, "account deactivated");
    Ok(())
}
