use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Chore, ChoreStatus, KindSummary, PointBalance, PointTransaction, User};

pub fn summarize_by_kind(transactions: &[&PointTransaction]) -> Vec<KindSummary> {
    let mut map: HashMap<_, (usize, i64)> = HashMap::new();

    for transaction in transactions {
        let entry = map.entry(transaction.kind).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += transaction.amount;
    }

    let mut summaries: Vec<KindSummary> = map
        .into_iter()
        .map(|(kind, (count, net_amount))| KindSummary {
            kind,
            count,
            net_amount,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.kind.as_str().cmp(b.kind.as_str())));
    summaries
}

pub fn build_report(
    label: Option<&str>,
    since: DateTime<Utc>,
    users: &[User],
    balances: &[&PointBalance],
    transactions: &[PointTransaction],
    chores: &[Chore],
) -> String {
    let names: HashMap<Uuid, &str> = users.iter().map(|u| (u.id, u.name.as_str())).collect();
    let name_of = |id: Uuid| names.get(&id).copied().unwrap_or("unknown");

    let recent: Vec<&PointTransaction> = transactions
        .iter()
        .filter(|tx| tx.created_at >= since)
        .collect();
    let summaries = summarize_by_kind(&recent);

    let mut output = String::new();
    let family_label = label.unwrap_or("the whole family");

    let _ = writeln!(output, "# ChoreKeeper Points Report");
    let _ = writeln!(
        output,
        "Generated for {} (activity since {})",
        family_label,
        since.format("%Y-%m-%d")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Balances");

    if balances.is_empty() {
        let _ = writeln!(output, "No points recorded yet.");
    } else {
        for balance in balances {
            let _ = writeln!(
                output,
                "- {}: {} points (today {}, this week {}, this month {})",
                name_of(balance.user_id),
                balance.current,
                balance.daily,
                balance.weekly,
                balance.monthly
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Points by Type");

    if summaries.is_empty() {
        let _ = writeln!(output, "No transactions recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} transactions (net {:+})",
                summary.kind, summary.count, summary.net_amount
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Chore Status");

    let instances: Vec<&Chore> = chores.iter().filter(|c| !c.is_recurring).collect();
    if instances.is_empty() {
        let _ = writeln!(output, "No chores scheduled.");
    } else {
        for status in [
            ChoreStatus::Pending,
            ChoreStatus::PendingVerification,
            ChoreStatus::Completed,
            ChoreStatus::Verified,
            ChoreStatus::Rejected,
            ChoreStatus::Missed,
        ] {
            let count = instances.iter().filter(|c| c.status == status).count();
            if count > 0 {
                let _ = writeln!(output, "- {status}: {count}");
            }
        }
    }

    let mut latest = recent;
    latest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");

    if latest.is_empty() {
        let _ = writeln!(output, "No transactions recorded for this window.");
    } else {
        for transaction in latest.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} {:+} ({}) on {}: {}",
                name_of(transaction.user_id),
                transaction.amount,
                transaction.kind,
                transaction.created_at.format("%Y-%m-%d"),
                transaction.reason
            );
        }
    }

    output
}
