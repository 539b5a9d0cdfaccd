use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChoreError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::models::{Chore, ChoreStatus, LinkedEntity, NewChore, Session, TransactionKind};
use crate::scheduler;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_POINTS: i64 = 1000;

pub fn create_chore(session: &Session, new: NewChore, now: DateTime<Utc>) -> Result<Chore> {
    require_parent(session, "create chores")?;

    let title = new.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ChoreError::invalid(format!(
            "title must be 1-{MAX_TITLE_LEN} characters"
        )));
    }
    if !(1..=MAX_POINTS).contains(&new.points) {
        return Err(ChoreError::invalid(format!(
            "points must be 1-{MAX_POINTS}, got {}",
            new.points
        )));
    }

    let pattern = new.pattern.filter(|pattern| !pattern.is_one_time());
    let chore = Chore {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: new.description.trim().to_string(),
        points: new.points,
        due_at: new.due_at,
        is_recurring: pattern.is_some(),
        pattern,
        status: ChoreStatus::Pending,
        parent_id: None,
        assignee_id: new.assignee_id,
        created_by: session.user_id,
        family_id: session.family_id,
        icon: if new.icon.trim().is_empty() {
            "checklist".to_string()
        } else {
            new.icon.trim().to_string()
        },
        created_at: now,
        updated_at: now,
        completed_at: None,
        verified_at: None,
    };

    info!(chore = %chore.id, title = %chore.title, recurring = chore.is_recurring, "Created chore");
    Ok(chore)
}

/// Marks a chore done. Returns `true` when points are due immediately
/// (verification disabled), `false` when it now waits for a parent.
pub fn complete(
    chore: &mut Chore,
    session: &Session,
    require_verification: bool,
    now: DateTime<Utc>,
) -> Result<bool> {
    require_same_family(chore, session)?;
    if chore.is_recurring {
        return Err(ChoreError::conflict(
            "recurring chores are completed through their generated instances",
        ));
    }
    if !matches!(chore.status, ChoreStatus::Pending | ChoreStatus::Rejected) {
        return Err(ChoreError::conflict(format!(
            "cannot complete a chore that is {}",
            chore.status
        )));
    }

    match (chore.assignee_id, session.is_parent()) {
        (Some(assignee), false) if assignee != session.user_id => {
            return Err(ChoreError::denied("chore is assigned to someone else"));
        }
        (None, true) => {
            return Err(ChoreError::conflict("assign the chore before completing it"));
        }
        (None, false) => chore.assignee_id = Some(session.user_id),
        _ => {}
    }

    chore.status = if require_verification {
        ChoreStatus::PendingVerification
    } else {
        ChoreStatus::Completed
    };
    chore.completed_at = Some(now);
    chore.updated_at = now;

    info!(chore = %chore.id, status = %chore.status, "Completed chore");
    Ok(!require_verification)
}

pub fn verify(chore: &mut Chore, session: &Session, now: DateTime<Utc>) -> Result<()> {
    require_parent(session, "verify chores")?;
    require_same_family(chore, session)?;
    require_status(chore, ChoreStatus::PendingVerification, "verify")?;

    chore.status = ChoreStatus::Verified;
    chore.verified_at = Some(now);
    chore.updated_at = now;
    info!(chore = %chore.id, "Verified chore");
    Ok(())
}

pub fn reject(chore: &mut Chore, session: &Session, now: DateTime<Utc>) -> Result<()> {
    require_parent(session, "reject chores")?;
    require_same_family(chore, session)?;
    require_status(chore, ChoreStatus::PendingVerification, "reject")?;

    chore.status = ChoreStatus::Rejected;
    chore.completed_at = None;
    chore.updated_at = now;
    info!(chore = %chore.id, "Rejected chore");
    Ok(())
}

/// Flags every overdue pending chore as missed and returns their ids.
pub fn mark_missed(chores: &mut [Chore], local_now: NaiveDateTime, now: DateTime<Utc>) -> Vec<Uuid> {
    let mut missed = Vec::new();
    for chore in chores.iter_mut().filter(|c| !c.is_recurring) {
        if scheduler::is_overdue(chore, local_now) {
            chore.status = ChoreStatus::Missed;
            chore.updated_at = now;
            missed.push(chore.id);
        }
    }
    if !missed.is_empty() {
        info!(count = missed.len(), "Marked overdue chores as missed");
    }
    missed
}

/// Pays the assignee for a verified (or, without verification, completed) chore.
pub fn award_completion(ledger: &mut Ledger, chore: &Chore, now: DateTime<Utc>) -> Result<LedgerEntry> {
    if !matches!(chore.status, ChoreStatus::Verified | ChoreStatus::Completed) {
        return Err(ChoreError::conflict(format!(
            "chore {} is {} and earns no points yet",
            chore.id, chore.status
        )));
    }
    let assignee = chore
        .assignee_id
        .ok_or_else(|| ChoreError::conflict("chore has no assignee"))?;

    ledger.allocate(
        assignee,
        chore.points,
        &chore.title,
        TransactionKind::Completion,
        Some(LinkedEntity::Chore(chore.id)),
        now,
    )
}

/// Deducts the missed-chore penalty. A penalty the balance cannot cover is
/// skipped rather than failing the sweep.
pub fn apply_missed_penalty(
    ledger: &mut Ledger,
    chore: &Chore,
    penalty: i64,
    now: DateTime<Utc>,
) -> Result<Option<LedgerEntry>> {
    let assignee = match chore.assignee_id {
        Some(id) if penalty > 0 && chore.status == ChoreStatus::Missed => id,
        _ => return Ok(None),
    };

    match ledger.deduct(
        assignee,
        penalty,
        &format!("Missed: {}", chore.title),
        TransactionKind::Missed,
        Some(LinkedEntity::Chore(chore.id)),
        now,
    ) {
        Ok(entry) => Ok(Some(entry)),
        Err(ChoreError::InsufficientBalance { required, available }) => {
            warn!(
                chore = %chore.id,
                user = %assignee,
                required,
                available,
                "Skipping missed-chore penalty"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Accepts `YYYY-MM-DD HH:MM` (seconds and a `T` separator optional) or a
/// bare date, which means the end of that day.
pub fn parse_due_at(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in [
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 0))
        .ok_or_else(|| ChoreError::invalid(format!("invalid due date '{raw}'")))
}

fn require_parent(session: &Session, action: &str) -> Result<()> {
    if session.is_parent() {
        Ok(())
    } else {
        Err(ChoreError::denied(format!("only parents can {action}")))
    }
}

fn require_same_family(chore: &Chore, session: &Session) -> Result<()> {
    if chore.family_id == session.family_id {
        Ok(())
    } else {
        Err(ChoreError::denied("chore belongs to another family"))
    }
}

fn require_status(chore: &Chore, expected: ChoreStatus, action: &str) -> Result<()> {
    if chore.status == expected {
        Ok(())
    } else {
        Err(ChoreError::conflict(format!(
            "cannot {action} a chore that is {}, expected {expected}",
            chore.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::ledger::LedgerPolicy;
    use crate::models::Role;
    use crate::pattern::RecurringPattern;

    struct Family {
        parent: Session,
        kid: Session,
        sibling: Session,
    }

    fn family() -> Family {
        let family_id = Uuid::new_v4();
        let member = |role| Session {
            user_id: Uuid::new_v4(),
            role,
            family_id,
        };
        Family {
            parent: member(Role::Parent),
            kid: member(Role::Child),
            sibling: member(Role::Child),
        }
    }

    fn due() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap()
    }

    fn new_chore(assignee: Option<Uuid>) -> NewChore {
        NewChore {
            title: "  Take out the bins ".to_string(),
            description: "Blue bin on Wednesdays".to_string(),
            points: 10,
            due_at: due(),
            pattern: None,
            assignee_id: assignee,
            icon: String::new(),
        }
    }

    #[test]
    fn parses_due_dates() {
        assert_eq!(parse_due_at("2026-03-04 18:00").unwrap(), due());
        assert_eq!(parse_due_at("2026-03-04T18:00:00").unwrap(), due());
        assert_eq!(
            parse_due_at("2026-03-04").unwrap(),
            due() + Duration::minutes(5 * 60 + 59)
        );
        assert!(parse_due_at("04/03/2026").is_err());
    }

    #[test]
    fn only_parents_create_chores() {
        let f = family();
        let err = create_chore(&f.kid, new_chore(None), Utc::now()).unwrap_err();
        assert!(matches!(err, ChoreError::PermissionDenied(_)));

        let chore = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), Utc::now()).unwrap();
        assert_eq!(chore.title, "Take out the bins");
        assert_eq!(chore.status, ChoreStatus::Pending);
        assert_eq!(chore.created_by, f.parent.user_id);
        assert_eq!(chore.icon, "checklist");
        assert!(!chore.is_recurring);
    }

    #[test]
    fn validates_title_and_points() {
        let f = family();
        let mut blank = new_chore(None);
        blank.title = "   ".to_string();
        assert!(matches!(
            create_chore(&f.parent, blank, Utc::now()),
            Err(ChoreError::InvalidInput(_))
        ));

        let mut long = new_chore(None);
        long.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(create_chore(&f.parent, long, Utc::now()).is_err());

        for points in [0, -1, MAX_POINTS + 1] {
            let mut chore = new_chore(None);
            chore.points = points;
            assert!(create_chore(&f.parent, chore, Utc::now()).is_err());
        }
    }

    #[test]
    fn recurring_flag_follows_pattern() {
        let f = family();
        let mut weekly = new_chore(None);
        weekly.pattern = Some(RecurringPattern::parse("weekly:4:18:00").unwrap());
        let chore = create_chore(&f.parent, weekly, Utc::now()).unwrap();
        assert!(chore.is_recurring);
        assert!(chore.pattern.is_some());

        let mut once = new_chore(None);
        once.pattern = Some(RecurringPattern::one_time());
        let chore = create_chore(&f.parent, once, Utc::now()).unwrap();
        assert!(!chore.is_recurring);
        assert!(chore.pattern.is_none());
    }

    #[test]
    fn verification_flow_awards_points_once_verified() {
        let f = family();
        let mut ledger = Ledger::new(LedgerPolicy::default());
        let now = Utc::now();
        let mut chore = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();

        let pays_now = complete(&mut chore, &f.kid, true, now).unwrap();
        assert!(!pays_now);
        assert_eq!(chore.status, ChoreStatus::PendingVerification);
        assert!(award_completion(&mut ledger, &chore, now).is_err());

        assert!(matches!(
            verify(&mut chore, &f.kid, now),
            Err(ChoreError::PermissionDenied(_))
        ));
        verify(&mut chore, &f.parent, now).unwrap();
        assert_eq!(chore.status, ChoreStatus::Verified);

        let entry = award_completion(&mut ledger, &chore, now).unwrap();
        assert_eq!(entry.balance.current, 10);
        assert_eq!(entry.transaction.link, Some(LinkedEntity::Chore(chore.id)));
    }

    #[test]
    fn completion_without_verification_pays_immediately() {
        let f = family();
        let mut chore = create_chore(&f.parent, new_chore(None), Utc::now()).unwrap();
        let pays_now = complete(&mut chore, &f.kid, false, Utc::now()).unwrap();
        assert!(pays_now);
        assert_eq!(chore.status, ChoreStatus::Completed);
        assert_eq!(chore.assignee_id, Some(f.kid.user_id));
    }

    #[test]
    fn rejected_chore_can_be_redone() {
        let f = family();
        let now = Utc::now();
        let mut chore = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();
        complete(&mut chore, &f.kid, true, now).unwrap();
        reject(&mut chore, &f.parent, now).unwrap();
        assert_eq!(chore.status, ChoreStatus::Rejected);
        assert!(chore.completed_at.is_none());

        assert!(matches!(
            reject(&mut chore, &f.parent, now),
            Err(ChoreError::StateConflict(_))
        ));
        complete(&mut chore, &f.kid, true, now).unwrap();
        assert_eq!(chore.status, ChoreStatus::PendingVerification);
    }

    #[test]
    fn completion_is_gated_by_assignee_and_status() {
        let f = family();
        let now = Utc::now();
        let mut chore = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();
        assert!(matches!(
            complete(&mut chore, &f.sibling, true, now),
            Err(ChoreError::PermissionDenied(_))
        ));

        complete(&mut chore, &f.parent, false, now).unwrap();
        assert!(matches!(
            complete(&mut chore, &f.kid, false, now),
            Err(ChoreError::StateConflict(_))
        ));

        let mut unassigned = create_chore(&f.parent, new_chore(None), now).unwrap();
        assert!(matches!(
            complete(&mut unassigned, &f.parent, false, now),
            Err(ChoreError::StateConflict(_))
        ));

        let outsider = Session {
            family_id: Uuid::new_v4(),
            ..f.parent
        };
        assert!(matches!(
            verify(&mut chore, &outsider, now),
            Err(ChoreError::PermissionDenied(_))
        ));
    }

    #[test]
    fn sweep_marks_only_overdue_pending_chores() {
        let f = family();
        let now = Utc::now();
        let overdue = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();
        let mut later = new_chore(Some(f.kid.user_id));
        later.due_at = due() + Duration::days(2);
        let later = create_chore(&f.parent, later, now).unwrap();
        let mut done = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();
        complete(&mut done, &f.kid, true, now).unwrap();

        let mut chores = vec![overdue, later, done];
        let missed = mark_missed(&mut chores, due() + Duration::hours(1), now);

        assert_eq!(missed, vec![chores[0].id]);
        assert_eq!(chores[0].status, ChoreStatus::Missed);
        assert_eq!(chores[1].status, ChoreStatus::Pending);
        assert_eq!(chores[2].status, ChoreStatus::PendingVerification);
    }

    #[test]
    fn missed_penalty_is_skipped_when_unaffordable() {
        let f = family();
        let now = Utc::now();
        let mut ledger = Ledger::new(LedgerPolicy::default());
        let mut chore = create_chore(&f.parent, new_chore(Some(f.kid.user_id)), now).unwrap();
        chore.status = ChoreStatus::Missed;

        assert_eq!(apply_missed_penalty(&mut ledger, &chore, 3, now).unwrap(), None);
        assert!(ledger.transactions().is_empty());

        ledger
            .allocate(f.kid.user_id, 5, "Bonus", TransactionKind::Bonus, None, now)
            .unwrap();
        let entry = apply_missed_penalty(&mut ledger, &chore, 3, now)
            .unwrap()
            .unwrap();
        assert_eq!(entry.balance.current, 2);
        assert_eq!(entry.transaction.kind, TransactionKind::Missed);
    }
}
