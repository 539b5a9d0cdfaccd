use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::chores;
use crate::error::{ChoreError, Result};
use crate::ledger::{Ledger, LedgerEntry, LedgerPolicy};
use crate::models::{
    Chore, ChoreStatus, LinkedEntity, NewChore, PointBalance, PointTransaction, Reward, Role,
    Session, TransactionKind, User,
};
use crate::pattern::RecurringPattern;

pub const SEED_FAMILY: &str = "6f1c2f8e-6a55-4a3e-9d7e-2f4b8c1d0a11";

const CHORE_COLUMNS: &str = "id, title, description, points, due_at, is_recurring, pattern, \
     status, parent_id, assignee_id, created_by, family_id, icon, created_at, updated_at, \
     completed_at, verified_at";

/// Narrows `fetch_chores`; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ChoreFilter {
    pub status: Option<ChoreStatus>,
    pub assignee_id: Option<Uuid>,
    pub recurring: Option<bool>,
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &SqlitePool) -> Result<()> {
    let family_id = Uuid::parse_str(SEED_FAMILY).map_err(|e| ChoreError::invalid(e.to_string()))?;
    let users = vec![
        ("0b7e3c52-1d4a-4f0e-8a6b-5c2d9e3f7a01", "Sam", Role::Parent),
        ("9a4d2e61-7b3c-4e8f-a1d5-6c0b8f2e4d02", "Avery", Role::Child),
        ("3c8f5a17-2e6d-4b9a-8c1f-7d3e0a5b9c03", "Jules", Role::Child),
    ];

    let mut seeded = Vec::new();
    for (id, name, role) in users {
        let user = User {
            id: Uuid::parse_str(id).map_err(|e| ChoreError::invalid(e.to_string()))?,
            name: name.to_string(),
            role,
            family_id,
        };
        insert_user(pool, &user).await?;
        seeded.push(user);
    }

    let parent = Session::from(&seeded[0]);
    let now = Utc::now();
    let today = chrono::Local::now().date_naive();
    let at = |hour: u32| today.and_hms_opt(hour, 0, 0).unwrap_or_default();

    let rewards = vec![("Movie night", 50), ("Extra screen time", 20), ("Pick dinner", 30)];
    for (title, cost) in rewards {
        sqlx::query(
            r#"
            INSERT INTO rewards (id, title, cost, family_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (family_id, title) DO UPDATE SET cost = excluded.cost
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(cost)
        .bind(family_id)
        .execute(pool)
        .await?;
    }

    let existing: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chores WHERE family_id = $1")
        .bind(family_id)
        .fetch_one(pool)
        .await?
        .get("n");
    if existing > 0 {
        return Ok(());
    }

    let chores = vec![
        ("Make bed", 5, Some("daily:08:00"), Some(seeded[1].id), "bed"),
        ("Feed the cat", 5, Some("daily:07:30"), Some(seeded[2].id), "pawprint"),
        ("Take out the bins", 10, Some("weekly:3:19:00"), Some(seeded[1].id), "trash"),
        ("Clean room", 20, Some("monthly:last:17:00"), Some(seeded[2].id), "sparkles"),
        ("Wash the car", 30, None, None, "car"),
    ];
    for (title, points, pattern, assignee_id, icon) in chores {
        let new = NewChore {
            title: title.to_string(),
            description: String::new(),
            points,
            due_at: at(18),
            pattern: pattern.map(RecurringPattern::parse).transpose()?,
            assignee_id,
            icon: icon.to_string(),
        };
        let chore = chores::create_chore(&parent, new, now)?;
        insert_chore(pool, &chore).await?;
    }

    Ok(())
}

pub async fn insert_user(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, name, role, family_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET name = excluded.name, role = excluded.role
        "#,
    )
    .bind(user.id)
    .bind(&user.name)
    .bind(user.role.as_str())
    .bind(user.family_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_user(pool: &SqlitePool, id: Uuid) -> Result<User> {
    let row = sqlx::query("SELECT id, name, role, family_id FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ChoreError::NotFound(format!("user {id}")))?;
    user_from_row(&row)
}

pub async fn fetch_user_by_name(pool: &SqlitePool, family_id: Uuid, name: &str) -> Result<User> {
    let row = sqlx::query(
        "SELECT id, name, role, family_id FROM users WHERE family_id = $1 AND name = $2",
    )
    .bind(family_id)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ChoreError::NotFound(format!("user '{name}'")))?;
    user_from_row(&row)
}

pub async fn fetch_users(pool: &SqlitePool, family_id: Uuid) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT id, name, role, family_id FROM users WHERE family_id = $1 ORDER BY name",
    )
    .bind(family_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(user_from_row).collect()
}

pub async fn insert_chore(pool: &SqlitePool, chore: &Chore) -> Result<()> {
    let mut conn = pool.acquire().await?;
    write_chore(&mut conn, chore).await
}

/// Inserts a batch in one transaction; returns how many rows were new.
pub async fn insert_chores(pool: &SqlitePool, chores: &[Chore]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;
    for chore in chores {
        if write_chore(&mut tx, chore).await.map(|_| true).or_else(ignore_duplicate)? {
            inserted += 1;
        }
    }
    tx.commit().await?;
    Ok(inserted)
}

pub async fn fetch_chore(pool: &SqlitePool, id: Uuid) -> Result<Chore> {
    let row = sqlx::query(&format!("SELECT {CHORE_COLUMNS} FROM chores WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ChoreError::NotFound(format!("chore {id}")))?;
    chore_from_row(&row)
}

pub async fn fetch_chores(
    pool: &SqlitePool,
    family_id: Uuid,
    filter: &ChoreFilter,
) -> Result<Vec<Chore>> {
    let mut query = format!("SELECT {CHORE_COLUMNS} FROM chores WHERE family_id = $1");
    let mut next = 2;
    if filter.status.is_some() {
        query.push_str(&format!(" AND status = ${next}"));
        next += 1;
    }
    if filter.assignee_id.is_some() {
        query.push_str(&format!(" AND assignee_id = ${next}"));
        next += 1;
    }
    if filter.recurring.is_some() {
        query.push_str(&format!(" AND is_recurring = ${next}"));
    }
    query.push_str(" ORDER BY due_at, title");

    let mut rows = sqlx::query(&query).bind(family_id);
    if let Some(status) = filter.status {
        rows = rows.bind(status.as_str());
    }
    if let Some(assignee) = filter.assignee_id {
        rows = rows.bind(assignee);
    }
    if let Some(recurring) = filter.recurring {
        rows = rows.bind(recurring);
    }

    let records = rows.fetch_all(pool).await?;
    records.iter().map(chore_from_row).collect()
}

pub async fn fetch_instance_due_dates(
    pool: &SqlitePool,
    parent_id: Uuid,
) -> Result<HashSet<NaiveDateTime>> {
    let rows = sqlx::query("SELECT due_at FROM chores WHERE parent_id = $1")
        .bind(parent_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| row.get::<NaiveDateTime, _>("due_at"))
        .collect())
}

pub async fn insert_reward(pool: &SqlitePool, reward: &Reward) -> Result<()> {
    sqlx::query("INSERT INTO rewards (id, title, cost, family_id) VALUES ($1, $2, $3, $4)")
        .bind(reward.id)
        .bind(&reward.title)
        .bind(reward.cost)
        .bind(reward.family_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn fetch_reward(pool: &SqlitePool, id: Uuid) -> Result<Reward> {
    let row = sqlx::query("SELECT id, title, cost, family_id FROM rewards WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ChoreError::NotFound(format!("reward {id}")))?;
    Ok(reward_from_row(&row))
}

pub async fn fetch_rewards(pool: &SqlitePool, family_id: Uuid) -> Result<Vec<Reward>> {
    let rows = sqlx::query(
        "SELECT id, title, cost, family_id FROM rewards WHERE family_id = $1 ORDER BY cost",
    )
    .bind(family_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(reward_from_row).collect())
}

/// Loads balances and history for every member of a family.
pub async fn load_ledger(
    pool: &SqlitePool,
    family_id: Uuid,
    policy: LedgerPolicy,
) -> Result<Ledger> {
    let balance_rows = sqlx::query(
        r#"
        SELECT b.user_id, b.current, b.daily, b.weekly, b.monthly, b.period_anchor, b.updated_at
        FROM point_balances b
        JOIN users u ON u.id = b.user_id
        WHERE u.family_id = $1
        "#,
    )
    .bind(family_id)
    .fetch_all(pool)
    .await?;

    let balances = balance_rows
        .iter()
        .map(|row| PointBalance {
            user_id: row.get("user_id"),
            current: row.get("current"),
            daily: row.get("daily"),
            weekly: row.get("weekly"),
            monthly: row.get("monthly"),
            period_anchor: row.get("period_anchor"),
            updated_at: row.get("updated_at"),
        })
        .collect();

    let transaction_rows = sqlx::query(
        r#"
        SELECT t.id, t.user_id, t.amount, t.reason, t.kind, t.chore_id, t.reward_id,
               t.penalty_id, t.balance_after, t.created_at
        FROM point_transactions t
        JOIN users u ON u.id = t.user_id
        WHERE u.family_id = $1
        ORDER BY t.created_at
        "#,
    )
    .bind(family_id)
    .fetch_all(pool)
    .await?;

    let transactions = transaction_rows
        .iter()
        .map(transaction_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Ledger::from_parts(policy, balances, transactions))
}

/// Persists chore updates and ledger entries in a single transaction.
pub async fn commit(pool: &SqlitePool, chores: &[Chore], entries: &[LedgerEntry]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for chore in chores {
        update_chore_in(&mut tx, chore).await?;
    }

    for entry in entries {
        write_balance(&mut tx, &entry.balance).await?;

        let transaction = &entry.transaction;
        let link = transaction.link.as_ref();
        sqlx::query(
            r#"
            INSERT INTO point_transactions
            (id, user_id, amount, reason, kind, chore_id, reward_id, penalty_id, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.amount)
        .bind(&transaction.reason)
        .bind(transaction.kind.as_str())
        .bind(link.and_then(LinkedEntity::chore_id))
        .bind(link.and_then(LinkedEntity::reward_id))
        .bind(link.and_then(LinkedEntity::penalty_id))
        .bind(transaction.balance_after)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(chores = chores.len(), entries = entries.len(), "Committed changes");
    Ok(())
}

pub async fn update_chore(pool: &SqlitePool, chore: &Chore) -> Result<()> {
    let mut conn = pool.acquire().await?;
    update_chore_in(&mut conn, chore).await
}

pub async fn save_balances(pool: &SqlitePool, balances: &[PointBalance]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for balance in balances {
        write_balance(&mut tx, balance).await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn import_chores_csv(
    pool: &SqlitePool,
    session: &Session,
    csv_path: &Path,
    now: DateTime<Utc>,
) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        title: String,
        #[serde(default)]
        description: String,
        points: i64,
        due_at: String,
        #[serde(default)]
        pattern: String,
        #[serde(default)]
        assignee: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut parsed = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let assignee_id = match row.assignee.trim() {
            "" => None,
            name => Some(fetch_user_by_name(pool, session.family_id, name).await?.id),
        };
        let pattern = match row.pattern.trim() {
            "" => None,
            raw => Some(RecurringPattern::parse(raw)?),
        };
        let new = NewChore {
            title: row.title,
            description: row.description,
            points: row.points,
            due_at: chores::parse_due_at(&row.due_at)?,
            pattern,
            assignee_id,
            icon: String::new(),
        };
        parsed.push(chores::create_chore(session, new, now)?);
    }

    insert_chores(pool, &parsed).await
}

pub fn export_ledger_csv(transactions: &[PointTransaction], out: &Path) -> Result<usize> {
    #[derive(serde::Serialize)]
    struct CsvRow<'a> {
        id: Uuid,
        user_id: Uuid,
        kind: &'a str,
        amount: i64,
        balance_after: i64,
        reason: &'a str,
        created_at: String,
    }

    let mut writer = csv::Writer::from_path(out)?;
    for transaction in transactions {
        writer.serialize(CsvRow {
            id: transaction.id,
            user_id: transaction.user_id,
            kind: transaction.kind.as_str(),
            amount: transaction.amount,
            balance_after: transaction.balance_after,
            reason: &transaction.reason,
            created_at: transaction.created_at.to_rfc3339(),
        })?;
    }
    writer.flush()?;
    Ok(transactions.len())
}

async fn write_chore(conn: &mut SqliteConnection, chore: &Chore) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO chores ({CHORE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
    ))
    .bind(chore.id)
    .bind(&chore.title)
    .bind(&chore.description)
    .bind(chore.points)
    .bind(chore.due_at)
    .bind(chore.is_recurring)
    .bind(chore.pattern.as_ref().map(|pattern| pattern.to_string()))
    .bind(chore.status.as_str())
    .bind(chore.parent_id)
    .bind(chore.assignee_id)
    .bind(chore.created_by)
    .bind(chore.family_id)
    .bind(&chore.icon)
    .bind(chore.created_at)
    .bind(chore.updated_at)
    .bind(chore.completed_at)
    .bind(chore.verified_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_chore_in(conn: &mut SqliteConnection, chore: &Chore) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE chores
        SET status = $2, assignee_id = $3, completed_at = $4, verified_at = $5, updated_at = $6
        WHERE id = $1
        "#,
    )
    .bind(chore.id)
    .bind(chore.status.as_str())
    .bind(chore.assignee_id)
    .bind(chore.completed_at)
    .bind(chore.verified_at)
    .bind(chore.updated_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ChoreError::NotFound(format!("chore {}", chore.id)));
    }
    Ok(())
}

async fn write_balance(conn: &mut SqliteConnection, balance: &PointBalance) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO point_balances (user_id, current, daily, weekly, monthly, period_anchor, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id) DO UPDATE
        SET current = excluded.current, daily = excluded.daily, weekly = excluded.weekly,
            monthly = excluded.monthly, period_anchor = excluded.period_anchor,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(balance.user_id)
    .bind(balance.current)
    .bind(balance.daily)
    .bind(balance.weekly)
    .bind(balance.monthly)
    .bind(balance.period_anchor)
    .bind(balance.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

fn ignore_duplicate(err: ChoreError) -> Result<bool> {
    match &err {
        ChoreError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
        _ => Err(err),
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        role: row.get::<String, _>("role").parse()?,
        family_id: row.get("family_id"),
    })
}

fn reward_from_row(row: &SqliteRow) -> Reward {
    Reward {
        id: row.get("id"),
        title: row.get("title"),
        cost: row.get("cost"),
        family_id: row.get("family_id"),
    }
}

fn chore_from_row(row: &SqliteRow) -> Result<Chore> {
    let pattern: Option<String> = row.get("pattern");
    Ok(Chore {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        points: row.get("points"),
        due_at: row.get("due_at"),
        is_recurring: row.get("is_recurring"),
        pattern: pattern.as_deref().map(RecurringPattern::parse).transpose()?,
        status: row.get::<String, _>("status").parse()?,
        parent_id: row.get("parent_id"),
        assignee_id: row.get("assignee_id"),
        created_by: row.get("created_by"),
        family_id: row.get("family_id"),
        icon: row.get("icon"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        verified_at: row.get("verified_at"),
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<PointTransaction> {
    let chore_id: Option<Uuid> = row.get("chore_id");
    let reward_id: Option<Uuid> = row.get("reward_id");
    let penalty_id: Option<Uuid> = row.get("penalty_id");
    let link = chore_id
        .map(LinkedEntity::Chore)
        .or(reward_id.map(LinkedEntity::Reward))
        .or(penalty_id.map(LinkedEntity::Penalty));

    Ok(PointTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        reason: row.get("reason"),
        kind: row.get::<String, _>("kind").parse::<TransactionKind>()?,
        link,
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
    })
}
