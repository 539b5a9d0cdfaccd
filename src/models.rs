use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChoreError;
use crate::pattern::RecurringPattern;

/// Implements `as_str`, `Display` and `FromStr` for a text-encoded enum.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ChoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ChoreError::invalid(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Parent,
    Child,
}

text_enum!(Role {
    Parent => "parent",
    Child => "child",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoreStatus {
    Pending,
    Completed,
    PendingVerification,
    Verified,
    Rejected,
    Missed,
}

text_enum!(ChoreStatus {
    Pending => "pending",
    Completed => "completed",
    PendingVerification => "pending_verification",
    Verified => "verified",
    Rejected => "rejected",
    Missed => "missed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Completion,
    Missed,
    Manual,
    Reward,
    Penalty,
    Bonus,
    Correction,
}

text_enum!(TransactionKind {
    Completion => "completion",
    Missed => "missed",
    Manual => "manual",
    Reward => "reward",
    Penalty => "penalty",
    Bonus => "bonus",
    Correction => "correction",
});

impl TransactionKind {
    pub fn all() -> [TransactionKind; 7] {
        [
            TransactionKind::Completion,
            TransactionKind::Missed,
            TransactionKind::Manual,
            TransactionKind::Reward,
            TransactionKind::Penalty,
            TransactionKind::Bonus,
            TransactionKind::Correction,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

text_enum!(Period {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub family_id: Uuid,
}

/// The acting user, passed explicitly to every role-gated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
    pub family_id: Uuid,
}

impl Session {
    pub fn is_parent(&self) -> bool {
        self.role == Role::Parent
    }
}

impl From<&User> for Session {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            family_id: user.family_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chore {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub points: i64,
    pub due_at: NaiveDateTime,
    pub is_recurring: bool,
    pub pattern: Option<RecurringPattern>,
    pub status: ChoreStatus,
    pub parent_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub family_id: Uuid,
    pub icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Caller-supplied fields for a new chore.
#[derive(Debug, Clone)]
pub struct NewChore {
    pub title: String,
    pub description: String,
    pub points: i64,
    pub due_at: NaiveDateTime,
    pub pattern: Option<RecurringPattern>,
    pub assignee_id: Option<Uuid>,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub title: String,
    pub cost: i64,
    pub family_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LinkedEntity {
    Chore(Uuid),
    Reward(Uuid),
    Penalty(Uuid),
}

impl LinkedEntity {
    pub fn chore_id(&self) -> Option<Uuid> {
        match self {
            LinkedEntity::Chore(id) => Some(*id),
            _ => None,
        }
    }

    pub fn reward_id(&self) -> Option<Uuid> {
        match self {
            LinkedEntity::Reward(id) => Some(*id),
            _ => None,
        }
    }

    pub fn penalty_id(&self) -> Option<Uuid> {
        match self {
            LinkedEntity::Penalty(id) => Some(*id),
            _ => None,
        }
    }
}

/// Append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub kind: TransactionKind,
    pub link: Option<LinkedEntity>,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointBalance {
    pub user_id: Uuid,
    pub current: i64,
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
    pub period_anchor: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl PointBalance {
    pub fn empty(user_id: Uuid, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current: 0,
            daily: 0,
            weekly: 0,
            monthly: 0,
            period_anchor: today,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KindSummary {
    pub kind: TransactionKind,
    pub count: usize,
    pub net_amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            ChoreStatus::Pending,
            ChoreStatus::Completed,
            ChoreStatus::PendingVerification,
            ChoreStatus::Verified,
            ChoreStatus::Rejected,
            ChoreStatus::Missed,
        ] {
            assert_eq!(status.as_str().parse::<ChoreStatus>().unwrap(), status);
        }
        assert!("done".parse::<ChoreStatus>().is_err());
    }

    #[test]
    fn linked_entity_accessors() {
        let id = Uuid::new_v4();
        let link = LinkedEntity::Reward(id);
        assert_eq!(link.reward_id(), Some(id));
        assert_eq!(link.chore_id(), None);
        assert_eq!(link.penalty_id(), None);
    }
}
