use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub balance: f64,
    /// Telegram id of the inviting user.
    pub referrer_id: Option<i64>,
    pub total_ref_earnings: f64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// `@username` when known, the numeric id otherwise.
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => format!("@{}", name),
            _ => self.telegram_id.to_string(),
        }
    }
}
