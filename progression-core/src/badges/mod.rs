//! Badges: instructor-granted decorations with no unlock criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeUnlock {
    pub student_id: String,
    pub badge_id: String,
    pub granted_by: String,
    pub note: Option<String>,
    pub granted_at: DateTime<Utc>,
}
