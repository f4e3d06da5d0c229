//! SQLite-backed principal store.

use sqlx::{Row, SqlitePool};

use relier_oidc::error::AuthError;
use relier_oidc::mapper::{GroupRef, LocalPrincipal, PrincipalStore};

/// Create tables and seed the groups that provider roles map onto.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            is_elevated INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS app_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_groups (
            user_id INTEGER NOT NULL REFERENCES users(id),
            group_id INTEGER NOT NULL REFERENCES app_groups(id),
            PRIMARY KEY (user_id, group_id)
        )",
    )
    .execute(pool)
    .await?;

    for name in ["viewer", "editor", "notes-admin"] {
        sqlx::query("INSERT OR IGNORE INTO app_groups (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[derive(Clone)]
pub struct SqlPrincipalStore {
    pool: SqlitePool,
}

impl SqlPrincipalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn groups_of(&self, user_id: i64) -> Result<Vec<GroupRef>, AuthError> {
        let rows = sqlx::query(
            "SELECT g.id, g.name FROM app_groups g
             JOIN user_groups ug ON ug.group_id = g.id
             WHERE ug.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| GroupRef {
                id: row.get::<i64, _>("id").to_string(),
                name: row.get("name"),
            })
            .collect())
    }
}

impl PrincipalStore for SqlPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalPrincipal>, AuthError> {
        let row = sqlx::query("SELECT id, username, email, is_elevated FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.get("id");

        Ok(Some(LocalPrincipal {
            id: id.to_string(),
            username: row.get("username"),
            email: row.get("email"),
            groups: self.groups_of(id).await?,
            is_elevated: row.get::<i64, _>("is_elevated") != 0,
        }))
    }

    async fn create(&self, mut principal: LocalPrincipal) -> Result<LocalPrincipal, AuthError> {
        let result = sqlx::query("INSERT INTO users (username, email, is_elevated) VALUES (?, ?, ?)")
            .bind(&principal.username)
            .bind(&principal.email)
            .bind(principal.is_elevated as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        principal.id = result.last_insert_rowid().to_string();
        Ok(principal)
    }

    async fn save(&self, principal: &LocalPrincipal) -> Result<(), AuthError> {
        let user_id: i64 = principal
            .id
            .parse()
            .map_err(|_| AuthError::Persistence(format!("invalid principal id: {}", principal.id)))?;

        sqlx::query("UPDATE users SET username = ?, is_elevated = ? WHERE id = ?")
            .bind(&principal.username)
            .bind(principal.is_elevated as i64)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        // Membership mirrors the reconciled set exactly.
        sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        for group in &principal.groups {
            let group_id: i64 = group.id.parse().map_err(|_| {
                AuthError::Persistence(format!("invalid group id: {}", group.id))
            })?;
            sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES (?, ?)")
                .bind(user_id)
                .bind(group_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupRef>, AuthError> {
        let row = sqlx::query("SELECT id, name FROM app_groups WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|row| GroupRef {
            id: row.get::<i64, _>("id").to_string(),
            name: row.get("name"),
        }))
    }
}

fn db_err(err: sqlx::Error) -> AuthError {
    AuthError::Persistence(format!("database error: {err}"))
}
