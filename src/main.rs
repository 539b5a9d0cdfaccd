use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{Duration, Local, Utc};
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod chores;
mod config;
mod db;
mod error;
mod generator;
mod ledger;
mod models;
mod pattern;
mod report;
mod scheduler;

use crate::config::Config;
use crate::db::ChoreFilter;
use crate::models::{ChoreStatus, NewChore, Period, Reward, Session, User};
use crate::pattern::RecurringPattern;

#[derive(Parser)]
#[command(name = "chorekeeper")]
#[command(about = "Household chore and points tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample family with chores and rewards
    Seed,
    /// List members of the acting user's family
    Users {
        #[arg(long = "as")]
        actor: Uuid,
    },
    /// Create a chore (parents only)
    AddChore {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        points: i64,
        /// Due date, `YYYY-MM-DD HH:MM` or `YYYY-MM-DD`
        #[arg(long)]
        due: String,
        /// Recurrence, e.g. `daily:08:00`, `weekly:2,5:18:00`, `monthly:last:17:00`
        #[arg(long)]
        pattern: Option<String>,
        /// Name of the family member doing the chore
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long, default_value = "")]
        icon: String,
    },
    /// List chores
    Chores {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        status: Option<String>,
    },
    /// Materialize recurring chores for the upcoming window
    Generate {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=config::MAX_WINDOW_DAYS))]
        days: Option<i64>,
    },
    /// Mark a chore as done
    Complete {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        chore: Uuid,
    },
    /// Approve a completed chore and award its points (parents only)
    Verify {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        chore: Uuid,
    },
    /// Send a completed chore back (parents only)
    Reject {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        chore: Uuid,
    },
    /// Mark overdue chores as missed and apply penalties
    Sweep {
        #[arg(long = "as")]
        actor: Uuid,
    },
    /// Show point balances
    Balance {
        #[arg(long = "as")]
        actor: Uuid,
    },
    /// Manually add or remove points (parents only)
    Adjust {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        user: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,
        #[arg(long)]
        reason: String,
    },
    /// Add a reward children can spend points on (parents only)
    AddReward {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long)]
        cost: i64,
    },
    /// List rewards available to the family
    Rewards {
        #[arg(long = "as")]
        actor: Uuid,
    },
    /// Spend points on a reward
    Redeem {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        reward: Uuid,
    },
    /// Reset daily/weekly/monthly totals whose period has ended
    Rollover {
        #[arg(long = "as")]
        actor: Uuid,
    },
    /// Zero one period total (parents only)
    Reset {
        #[arg(long = "as")]
        actor: Uuid,
        /// `daily`, `weekly` or `monthly`
        #[arg(long)]
        period: String,
        /// Limit the reset to one family member
        #[arg(long)]
        user: Option<String>,
    },
    /// Print the point history of a family member
    History {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Import chores from a CSV file (parents only)
    Import {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Export the family ledger to CSV
    Export {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(long, default_value = "ledger.csv")]
        out: PathBuf,
    },
    /// Generate a markdown points report
    Report {
        #[arg(long = "as")]
        actor: Uuid,
        #[arg(
            long,
            default_value_t = 7,
            value_parser = clap::value_parser!(i64).range(1..=config::MAX_WINDOW_DAYS)
        )]
        since_days: i64,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chorekeeper=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    info!(?config, "Loaded configuration");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to open the ChoreKeeper database")?;

    let now = Utc::now();
    let local_now = Local::now().naive_local();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            let family_id = Uuid::parse_str(db::SEED_FAMILY)?;
            println!("Seed data inserted. Family members:");
            for user in db::fetch_users(&pool, family_id).await? {
                println!("- {} ({}) {}", user.name, user.role, user.id);
            }
        }
        Commands::Users { actor } => {
            let (_, session) = resolve(&pool, actor).await?;
            for user in db::fetch_users(&pool, session.family_id).await? {
                println!("- {} ({}) {}", user.name, user.role, user.id);
            }
        }
        Commands::AddChore {
            actor,
            title,
            description,
            points,
            due,
            pattern,
            assignee,
            icon,
        } => {
            let (_, session) = resolve(&pool, actor).await?;
            let assignee_id = match assignee {
                Some(name) => Some(db::fetch_user_by_name(&pool, session.family_id, &name).await?.id),
                None => None,
            };
            let new = NewChore {
                title,
                description,
                points,
                due_at: chores::parse_due_at(&due)?,
                pattern: pattern.as_deref().map(RecurringPattern::parse).transpose()?,
                assignee_id,
                icon,
            };
            let chore = chores::create_chore(&session, new, now)?;
            db::insert_chore(&pool, &chore).await?;
            println!("Created chore {} ({}).", chore.title, chore.id);
        }
        Commands::Chores { actor, status } => {
            let (_, session) = resolve(&pool, actor).await?;
            let filter = ChoreFilter {
                status: status.as_deref().map(str::parse::<ChoreStatus>).transpose()?,
                assignee_id: (!session.is_parent()).then_some(session.user_id),
                recurring: None,
            };
            let chores = db::fetch_chores(&pool, session.family_id, &filter).await?;
            if chores.is_empty() {
                println!("No chores found.");
            }
            for chore in chores {
                let repeat = chore
                    .pattern
                    .as_ref()
                    .map(|p| format!(" [{}]", p.serialize()))
                    .unwrap_or_default();
                println!(
                    "- {} {} due {} ({} pts, {}){} {}",
                    chore.icon,
                    chore.title,
                    chore.due_at.format("%Y-%m-%d %H:%M"),
                    chore.points,
                    chore.status,
                    repeat,
                    chore.id
                );
            }
        }
        Commands::Generate { actor, days } => {
            let (_, session) = resolve(&pool, actor).await?;
            let days = days.unwrap_or(config.generation_window_days);
            let filter = ChoreFilter {
                recurring: Some(true),
                ..ChoreFilter::default()
            };
            let mut created = Vec::new();
            for template in db::fetch_chores(&pool, session.family_id, &filter).await? {
                let Some((start, end)) = generator::generation_window(&template, local_now, days)?
                else {
                    continue;
                };
                let existing = db::fetch_instance_due_dates(&pool, template.id).await?;
                created.extend(generator::generate_instances(
                    &template, start, end, &existing, now,
                )?);
            }
            let inserted = db::insert_chores(&pool, &created).await?;
            println!("Generated {inserted} chore instances for the next {days} days.");
        }
        Commands::Complete { actor, chore } => {
            let (_, session) = resolve(&pool, actor).await?;
            let mut chore = db::fetch_chore(&pool, chore).await?;
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let pays_now = chores::complete(&mut chore, &session, config.require_verification, now)?;
            let mut entries = Vec::new();
            if pays_now {
                entries.push(chores::award_completion(&mut ledger, &chore, now)?);
            }
            db::commit(&pool, &[chore.clone()], &entries).await?;
            if pays_now {
                println!("{} done, {} points awarded.", chore.title, chore.points);
            } else {
                println!("{} done, waiting for a parent to verify.", chore.title);
            }
        }
        Commands::Verify { actor, chore } => {
            let (_, session) = resolve(&pool, actor).await?;
            let mut chore = db::fetch_chore(&pool, chore).await?;
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            chores::verify(&mut chore, &session, now)?;
            let entry = chores::award_completion(&mut ledger, &chore, now)?;
            db::commit(&pool, &[chore.clone()], &[entry.clone()]).await?;
            println!(
                "Verified {}; balance is now {}.",
                chore.title, entry.balance.current
            );
        }
        Commands::Reject { actor, chore } => {
            let (_, session) = resolve(&pool, actor).await?;
            let mut chore = db::fetch_chore(&pool, chore).await?;
            chores::reject(&mut chore, &session, now)?;
            db::update_chore(&pool, &chore).await?;
            println!("Rejected {}.", chore.title);
        }
        Commands::Sweep { actor } => {
            let (_, session) = resolve(&pool, actor).await?;
            let filter = ChoreFilter {
                status: Some(ChoreStatus::Pending),
                recurring: Some(false),
                ..ChoreFilter::default()
            };
            let mut pending = db::fetch_chores(&pool, session.family_id, &filter).await?;
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let missed = chores::mark_missed(&mut pending, local_now, now);
            let changed: Vec<_> = pending
                .into_iter()
                .filter(|chore| missed.contains(&chore.id))
                .collect();
            let mut entries = Vec::new();
            for chore in &changed {
                if let Some(entry) =
                    chores::apply_missed_penalty(&mut ledger, chore, config.missed_penalty, now)?
                {
                    entries.push(entry);
                }
            }
            db::commit(&pool, &changed, &entries).await?;
            println!(
                "Marked {} chores as missed ({} penalties applied).",
                changed.len(),
                entries.len()
            );
        }
        Commands::Balance { actor } => {
            let (user, session) = resolve(&pool, actor).await?;
            let ledger = db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let members = db::fetch_users(&pool, session.family_id).await?;
            let visible: Vec<&User> = if session.is_parent() {
                members.iter().collect()
            } else {
                vec![&user]
            };
            for member in visible {
                match ledger.balance(member.id) {
                    Some(balance) => println!(
                        "- {}: {} points (today {}, this week {}, this month {})",
                        member.name, balance.current, balance.daily, balance.weekly, balance.monthly
                    ),
                    None => println!("- {}: {} points", member.name, ledger.current(member.id)),
                }
            }
        }
        Commands::Adjust {
            actor,
            user,
            amount,
            reason,
        } => {
            let (_, session) = resolve(&pool, actor).await?;
            if !session.is_parent() {
                bail!(error::ChoreError::denied("only parents can adjust points"));
            }
            let target = db::fetch_user_by_name(&pool, session.family_id, &user).await?;
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let entry = ledger.adjust(target.id, amount, &reason, now)?;
            db::commit(&pool, &[], &[entry.clone()]).await?;
            println!("{} now has {} points.", target.name, entry.balance.current);
        }
        Commands::AddReward { actor, title, cost } => {
            let (_, session) = resolve(&pool, actor).await?;
            if !session.is_parent() {
                bail!(error::ChoreError::denied("only parents can add rewards"));
            }
            if cost <= 0 || title.trim().is_empty() {
                bail!(error::ChoreError::invalid("rewards need a title and a positive cost"));
            }
            let reward = Reward {
                id: Uuid::new_v4(),
                title: title.trim().to_string(),
                cost,
                family_id: session.family_id,
            };
            db::insert_reward(&pool, &reward).await?;
            println!("Added reward {} ({}).", reward.title, reward.id);
        }
        Commands::Rewards { actor } => {
            let (_, session) = resolve(&pool, actor).await?;
            for reward in db::fetch_rewards(&pool, session.family_id).await? {
                println!("- {} ({} pts) {}", reward.title, reward.cost, reward.id);
            }
        }
        Commands::Redeem { actor, reward } => {
            let (user, session) = resolve(&pool, actor).await?;
            let reward = db::fetch_reward(&pool, reward).await?;
            if reward.family_id != session.family_id {
                bail!(error::ChoreError::NotFound(format!("reward {}", reward.id)));
            }
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let entry = ledger.redeem(user.id, &reward, now)?;
            db::commit(&pool, &[], &[entry.clone()]).await?;
            println!(
                "{} redeemed {}; {} points left.",
                user.name, reward.title, entry.balance.current
            );
        }
        Commands::Rollover { actor } => {
            let (_, session) = resolve(&pool, actor).await?;
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let changed = ledger.roll_over(local_now.date(), now);
            db::save_balances(&pool, &changed).await?;
            println!("Rolled over {} balances.", changed.len());
        }
        Commands::Reset { actor, period, user } => {
            let (_, session) = resolve(&pool, actor).await?;
            if !session.is_parent() {
                bail!(error::ChoreError::denied("only parents can reset totals"));
            }
            let period: Period = period.parse()?;
            let target = match user {
                Some(name) => Some(db::fetch_user_by_name(&pool, session.family_id, &name).await?.id),
                None => None,
            };
            let mut ledger =
                db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let changed = ledger.reset_period(target, period, now);
            db::save_balances(&pool, &changed).await?;
            println!("Reset {period} totals for {} members.", changed.len());
        }
        Commands::History { actor, user, json } => {
            let (me, session) = resolve(&pool, actor).await?;
            let target = match user {
                Some(name) if session.is_parent() => {
                    db::fetch_user_by_name(&pool, session.family_id, &name).await?
                }
                Some(_) => bail!(error::ChoreError::denied(
                    "children can only view their own history"
                )),
                None => me,
            };
            let ledger = db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let history = ledger.history(target.id);
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("No transactions for {}.", target.name);
            } else {
                for tx in history {
                    println!(
                        "{} {:+} {} -> {} ({})",
                        tx.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        tx.amount,
                        tx.kind,
                        tx.balance_after,
                        tx.reason
                    );
                }
            }
        }
        Commands::Import { actor, csv } => {
            let (_, session) = resolve(&pool, actor).await?;
            let inserted = db::import_chores_csv(&pool, &session, &csv, now).await?;
            println!("Imported {inserted} chores from {}.", csv.display());
        }
        Commands::Export { actor, out } => {
            let (_, session) = resolve(&pool, actor).await?;
            let ledger = db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let written = db::export_ledger_csv(&ledger.visible_to(&session), &out)?;
            println!("Wrote {written} transactions to {}.", out.display());
        }
        Commands::Report {
            actor,
            since_days,
            label,
            out,
        } => {
            let (me, session) = resolve(&pool, actor).await?;
            let since = now - Duration::days(since_days);
            let ledger = db::load_ledger(&pool, session.family_id, config.ledger_policy()).await?;
            let mut filter = ChoreFilter::default();
            let mut users = db::fetch_users(&pool, session.family_id).await?;
            let mut balances = ledger.balances();
            if !session.is_parent() {
                filter.assignee_id = Some(me.id);
                users.retain(|u| u.id == me.id);
                balances.retain(|b| b.user_id == me.id);
            }
            let chores = db::fetch_chores(&pool, session.family_id, &filter).await?;
            let report = report::build_report(
                label.as_deref(),
                since,
                &users,
                &balances,
                &ledger.visible_to(&session),
                &chores,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn resolve(pool: &SqlitePool, actor: Uuid) -> anyhow::Result<(User, Session)> {
    let user = db::fetch_user(pool, actor)
        .await
        .with_context(|| format!("unknown acting user {actor}"))?;
    let session = Session::from(&user);
    Ok((user, session))
}
