use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::models::{
    AuthIdentity, NewNotation, NewTask, NewUser, Notation, NotationPatch, NotationSummary, Task,
    TaskPatch, User, UserPatch,
};
use crate::session::Session;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const TASKS: &str = "tasks";
const USERS: &str = "users";
const NOTATIONS: &str = "notations";

const TASK_COLUMNS: &str = "id,title,message,status,do_at,created_at,position,user_id";
const USER_COLUMNS: &str = "id,name,email,status";

/// E-mail + password authentication against the backend's auth API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthIdentity>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthIdentity>;
}

/// Row-level access to the tables the application reads and writes.
///
/// Every call that touches user data takes the session explicitly; profile
/// calls run before a session exists and take the bare auth identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Tasks of the session user ordered by `position` ascending.
    async fn fetch_tasks(&self, session: &Session) -> Result<Vec<Task>>;
    async fn insert_task(&self, session: &Session, task: &NewTask) -> Result<Task>;
    async fn update_task(&self, session: &Session, id: i64, patch: &TaskPatch) -> Result<Task>;
    async fn delete_task(&self, session: &Session, id: i64) -> Result<()>;
    async fn delete_user_tasks(&self, session: &Session) -> Result<()>;

    async fn fetch_notations(&self, session: &Session) -> Result<Vec<NotationSummary>>;
    async fn fetch_notation(&self, session: &Session, id: i64) -> Result<Notation>;
    async fn insert_notation(&self, session: &Session) -> Result<Notation>;
    async fn update_notation(
        &self,
        session: &Session,
        id: i64,
        patch: &NotationPatch,
    ) -> Result<Notation>;
    async fn delete_notation(&self, session: &Session, id: i64) -> Result<()>;

    async fn fetch_profile(&self, identity: &AuthIdentity) -> Result<Option<User>>;
    async fn insert_profile(&self, identity: &AuthIdentity, profile: &NewUser) -> Result<User>;
    async fn update_profile(&self, identity: &AuthIdentity, patch: &UserPatch) -> Result<User>;
}

/// Client for a Supabase project: PostgREST under `/rest/v1` and GoTrue
/// under `/auth/v1`.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

fn eq(value: impl ToString) -> String {
    format!("eq.{}", value.to_string())
}

impl SupabaseClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(SupabaseClient {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        token: Option<&str>,
        table: &str,
        columns: &str,
        filters: &[(&str, String)],
        order_by: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![("select", columns.to_string())];
        query.extend(filters.iter().cloned());
        if let Some(column) = order_by {
            query.push(("order", format!("{}.asc", column)));
        }
        debug!(table, ?filters, "select");

        let res = self
            .authorized(self.client.get(self.rest_url(table)), token)
            .query(&query)
            .send()
            .await?;
        read_json(res).await
    }

    async fn insert<B, T>(&self, token: Option<&str>, table: &str, row: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!(table, "insert");
        let res = self
            .authorized(self.client.post(self.rest_url(table)), token)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let rows: Vec<T> = read_json(res).await?;
        rows.into_iter().next().ok_or_else(|| Error::Backend {
            status: 200,
            message: format!("insert into {} returned no row", table),
        })
    }

    async fn update<B, T>(
        &self,
        token: Option<&str>,
        table: &str,
        filters: &[(&str, String)],
        patch: &B,
    ) -> Result<Vec<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!(table, ?filters, "update");
        let res = self
            .authorized(self.client.patch(self.rest_url(table)), token)
            .header("Prefer", "return=representation")
            .query(filters)
            .json(patch)
            .send()
            .await?;
        read_json(res).await
    }

    async fn delete(&self, token: Option<&str>, table: &str, filters: &[(&str, String)]) -> Result<()> {
        debug!(table, ?filters, "delete");
        let res = self
            .authorized(self.client.delete(self.rest_url(table)), token)
            .query(filters)
            .send()
            .await?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(backend_error(res).await)
        }
    }

    async fn authenticate(&self, endpoint: &str, email: &str, password: &str) -> Result<AuthIdentity> {
        let url = format!("{}/auth/v1/{}", self.base_url, endpoint);
        debug!(endpoint, email, "auth request");

        let res = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if status.is_success() {
            let parsed: AuthResponse = serde_json::from_str(&body)?;
            parsed.into_identity()
        } else if status.is_client_error() {
            Err(Error::Auth(error_message(&body)))
        } else {
            Err(Error::Backend {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}

async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T> {
    if res.status().is_success() {
        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Err(backend_error(res).await)
    }
}

async fn backend_error(res: Response) -> Error {
    let status = res.status().as_u16();
    match res.text().await {
        Ok(body) => Error::Backend {
            status,
            message: error_message(&body),
        },
        Err(err) => Error::Network(err),
    }
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Pulls the human readable part out of a PostgREST or GoTrue error body.
fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

// Sign-in wraps the user in a session object; sign-up with pending e-mail
// confirmation returns the bare user.
#[derive(Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    user: Option<AuthUser>,
    id: Option<String>,
    email: Option<String>,
}

impl AuthResponse {
    fn into_identity(self) -> Result<AuthIdentity> {
        let user = match (self.user, self.id) {
            (Some(user), _) => user,
            (None, Some(id)) => AuthUser {
                id,
                email: self.email,
            },
            (None, None) => return Err(Error::Auth("Auth response carried no user".into())),
        };
        Ok(AuthIdentity {
            id: user.id,
            email: user.email,
            access_token: self.access_token,
        })
    }
}

#[async_trait]
impl Authenticator for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthIdentity> {
        self.authenticate("signup", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthIdentity> {
        self.authenticate("token?grant_type=password", email, password)
            .await
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    async fn fetch_tasks(&self, session: &Session) -> Result<Vec<Task>> {
        self.select(
            session.token(),
            TASKS,
            TASK_COLUMNS,
            &[("user_id", eq(session.user.id))],
            Some("position"),
        )
        .await
    }

    async fn insert_task(&self, session: &Session, task: &NewTask) -> Result<Task> {
        self.insert(session.token(), TASKS, task).await
    }

    async fn update_task(&self, session: &Session, id: i64, patch: &TaskPatch) -> Result<Task> {
        let rows: Vec<Task> = self
            .update(session.token(), TASKS, &[("id", eq(id))], patch)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))
    }

    async fn delete_task(&self, session: &Session, id: i64) -> Result<()> {
        self.delete(session.token(), TASKS, &[("id", eq(id))]).await
    }

    async fn delete_user_tasks(&self, session: &Session) -> Result<()> {
        self.delete(session.token(), TASKS, &[("user_id", eq(session.user.id))])
            .await
    }

    async fn fetch_notations(&self, session: &Session) -> Result<Vec<NotationSummary>> {
        self.select(
            session.token(),
            NOTATIONS,
            "id,title",
            &[("user_id", eq(session.user.id))],
            None,
        )
        .await
    }

    async fn fetch_notation(&self, session: &Session, id: i64) -> Result<Notation> {
        let rows: Vec<Notation> = self
            .select(
                session.token(),
                NOTATIONS,
                "id,title,message,updated_at",
                &[("id", eq(id))],
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("notation {}", id)))
    }

    async fn insert_notation(&self, session: &Session) -> Result<Notation> {
        let row = NewNotation {
            user_id: session.user.id,
        };
        self.insert(session.token(), NOTATIONS, &row).await
    }

    async fn update_notation(
        &self,
        session: &Session,
        id: i64,
        patch: &NotationPatch,
    ) -> Result<Notation> {
        let rows: Vec<Notation> = self
            .update(session.token(), NOTATIONS, &[("id", eq(id))], patch)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("notation {}", id)))
    }

    async fn delete_notation(&self, session: &Session, id: i64) -> Result<()> {
        self.delete(session.token(), NOTATIONS, &[("id", eq(id))])
            .await
    }

    async fn fetch_profile(&self, identity: &AuthIdentity) -> Result<Option<User>> {
        let rows: Vec<User> = self
            .select(
                identity.access_token.as_deref(),
                USERS,
                USER_COLUMNS,
                &[("user_id", eq(&identity.id))],
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, identity: &AuthIdentity, profile: &NewUser) -> Result<User> {
        self.insert(identity.access_token.as_deref(), USERS, profile)
            .await
    }

    async fn update_profile(&self, identity: &AuthIdentity, patch: &UserPatch) -> Result<User> {
        let rows: Vec<User> = self
            .update(
                identity.access_token.as_deref(),
                USERS,
                &[("user_id", eq(&identity.id))],
                patch,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("user profile".into()))
    }
}
