use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Account {
    pub fn new(email: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            role,
            created_at: Utc::now(),
        }
    }
}

/// Identity of whoever is asking the ledger to do something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Account(Uuid),
    Admin,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }

    /// Owners may act on their own subscription, admins on anyone's.
    pub fn can_act_for(&self, account_id: Uuid) -> bool {
        match self {
            Caller::Admin => true,
            Caller::Account(id) => *id == account_id,
        }
    }
}
