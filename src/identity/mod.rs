//! User identity and bearer-token auth.
//!
//! Users live in the `users` table with a salted SHA-256 password digest.
//! `POST /api/v1/auth/token` exchanges email + password for an opaque bearer
//! token (UUID v4 hex, stored in `api_tokens`); every authenticated request
//! resolves the token back to its user.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

const MIN_PASSWORD_LEN: usize = 8;

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_salt: String,
    pub password_digest: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub department: String,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: String,
}

impl UserRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Public profile shape returned by the API — never carries password material.
#[derive(Debug, Clone, Serialize)]
pub struct UserPublic {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub position: String,
    pub department: String,
    pub is_staff: bool,
}

impl From<&UserRow> for UserPublic {
    fn from(u: &UserRow) -> Self {
        Self {
            id: u.id.clone(),
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            full_name: u.full_name(),
            position: u.position.clone(),
            department: u.department.clone(),
            is_staff: u.is_staff,
        }
    }
}

// ─── Request shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub department: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
}

// ─── Password hashing ─────────────────────────────────────────────────────────

/// Hex SHA-256 digest of `salt:password`.
fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

// ─── UserStore ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active non-staff user. Duplicate email is a validation failure.
    pub async fn register(&self, req: &RegisterRequest) -> ApiResult<UserRow> {
        let email = req.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::validation("a valid email address is required"));
        }
        if req.password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
            return Err(ApiError::validation("first_name and last_name are required"));
        }

        let id = Uuid::new_v4().to_string();
        let salt = new_salt();
        let digest = password_digest(&salt, &req.password);
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO users
             (id, email, password_salt, password_digest, first_name, last_name,
              position, department, is_staff, is_active, date_joined)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&salt)
        .bind(&digest)
        .bind(req.first_name.trim())
        .bind(req.last_name.trim())
        .bind(req.position.trim())
        .bind(req.department.trim())
        .bind(&now)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(ApiError::validation("a user with this email already exists"));
            }
            return Err(e.into());
        }

        self.get(&id)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user not found after insert")))
    }

    /// Verify email + password against the stored digest.
    pub async fn authenticate(&self, email: &str, password: &str) -> ApiResult<UserRow> {
        let email = email.trim().to_lowercase();
        let user: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE email = ? AND is_active = 1")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;
        match user {
            Some(u) if password_digest(&u.password_salt, password) == u.password_digest => Ok(u),
            _ => Err(ApiError::unauthorized("invalid email or password")),
        }
    }

    pub async fn issue_token(&self, user_id: &str) -> ApiResult<String> {
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO api_tokens (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    /// Resolve a bearer token to its user. Unknown tokens and inactive users
    /// resolve to `None`.
    pub async fn resolve_token(&self, token: &str) -> ApiResult<Option<UserRow>> {
        Ok(sqlx::query_as(
            "SELECT u.* FROM users u
             JOIN api_tokens t ON t.user_id = u.id
             WHERE t.token = ? AND u.is_active = 1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get(&self, id: &str) -> ApiResult<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_active(&self) -> ApiResult<Vec<UserRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM users WHERE is_active = 1 ORDER BY date_joined DESC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Partial profile update. Names may not be blanked out.
    pub async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> ApiResult<UserRow> {
        for (field, value) in [
            ("first_name", &update.first_name),
            ("last_name", &update.last_name),
        ] {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(ApiError::validation(format!("{field} cannot be empty")));
                }
            }
        }

        sqlx::query(
            "UPDATE users SET
                 first_name = COALESCE(?, first_name),
                 last_name = COALESCE(?, last_name),
                 position = COALESCE(?, position),
                 department = COALESCE(?, department)
             WHERE id = ?",
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.position)
        .bind(&update.department)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get(id).await?.ok_or(ApiError::NotFound)
    }
}
