use serde::{Deserialize, Serialize};

/// A resolved login session. Issued by the platform's auth layer; this
/// service only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub guest_name: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
}
