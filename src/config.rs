use crate::ledger::{LedgerPolicy, RollupRule, RollupTable};
use crate::models::TransactionKind;

/// Longest look-ahead or look-back window, in days, any command accepts.
pub const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `DATABASE_URL`
    /// Default: `sqlite://chorekeeper.db?mode=rwc`
    pub database_url: String,

    /// Whether deductions may take a balance below zero.
    /// Env: `CHOREKEEPER_ALLOW_NEGATIVE` (true/false)
    /// Default: `false`
    pub allow_negative: bool,

    /// Whether a completed chore waits for a parent before paying out.
    /// Env: `CHOREKEEPER_REQUIRE_VERIFICATION` (true/false)
    /// Default: `true`
    pub require_verification: bool,

    /// How far ahead recurring chores are materialized.
    /// Env: `CHOREKEEPER_WINDOW_DAYS`
    /// Default: `14`
    pub generation_window_days: i64,

    /// Points deducted when a chore is swept as missed (0 disables).
    /// Env: `CHOREKEEPER_MISSED_PENALTY`
    /// Default: `0`
    pub missed_penalty: i64,

    /// Overrides for which period totals each transaction kind counts toward.
    /// Env: `CHOREKEEPER_ROLLUPS`, e.g. `manual=all;bonus=weekly,monthly;penalty=none`
    /// Default: earnings and penalties count everywhere, manual/reward/correction nowhere.
    pub rollups: RollupTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://chorekeeper.db?mode=rwc".to_string(),
            allow_negative: false,
            require_verification: true,
            generation_window_days: 14,
            missed_penalty: 0,
            rollups: RollupTable::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        if let Some(val) = lookup("CHOREKEEPER_ALLOW_NEGATIVE") {
            config.allow_negative = parse_flag(&val);
        }

        if let Some(val) = lookup("CHOREKEEPER_REQUIRE_VERIFICATION") {
            config.require_verification = parse_flag(&val);
        }

        if let Some(val) = lookup("CHOREKEEPER_WINDOW_DAYS") {
            match val.parse::<i64>() {
                Ok(days) if (1..=MAX_WINDOW_DAYS).contains(&days) => {
                    config.generation_window_days = days
                }
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CHOREKEEPER_WINDOW_DAYS, using default"
                ),
            }
        }

        if let Some(val) = lookup("CHOREKEEPER_MISSED_PENALTY") {
            match val.parse::<i64>() {
                Ok(points) if points >= 0 => config.missed_penalty = points,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CHOREKEEPER_MISSED_PENALTY, using default"
                ),
            }
        }

        if let Some(val) = lookup("CHOREKEEPER_ROLLUPS") {
            match parse_rollups(&val, &config.rollups) {
                Ok(table) => config.rollups = table,
                Err(e) => tracing::warn!(
                    value = %val,
                    error = %e,
                    "Invalid CHOREKEEPER_ROLLUPS, using default"
                ),
            }
        }

        config
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            allow_negative: self.allow_negative,
            rollups: self.rollups.clone(),
            ..LedgerPolicy::default()
        }
    }
}

/// Applies `kind=periods` overrides separated by `;` on top of `base`.
fn parse_rollups(raw: &str, base: &RollupTable) -> Result<RollupTable, String> {
    let mut table = base.clone();
    for clause in raw.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let (kind, periods) = clause
            .split_once('=')
            .ok_or_else(|| format!("expected kind=periods, got '{clause}'"))?;
        let kind: TransactionKind = kind.trim().parse().map_err(|e| format!("{e}"))?;

        let rule = match periods.trim() {
            "all" => RollupRule::ALL,
            "none" => RollupRule::NONE,
            list => {
                let mut rule = RollupRule::NONE;
                for period in list.split(',').map(str::trim) {
                    match period {
                        "daily" => rule.daily = true,
                        "weekly" => rule.weekly = true,
                        "monthly" => rule.monthly = true,
                        other => return Err(format!("unknown period '{other}'")),
                    }
                }
                rule
            }
        };
        table.set(kind, rule);
    }
    Ok(table)
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_with(&[]);
        assert!(!config.allow_negative);
        assert!(config.require_verification);
        assert_eq!(config.generation_window_days, 14);
        assert_eq!(config.missed_penalty, 0);
    }

    #[test]
    fn reads_overrides() {
        let config = config_with(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("CHOREKEEPER_ALLOW_NEGATIVE", "true"),
            ("CHOREKEEPER_REQUIRE_VERIFICATION", "0"),
            ("CHOREKEEPER_WINDOW_DAYS", "30"),
            ("CHOREKEEPER_MISSED_PENALTY", "2"),
        ]);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.allow_negative);
        assert!(!config.require_verification);
        assert_eq!(config.generation_window_days, 30);
        assert_eq!(config.missed_penalty, 2);
        assert!(config.ledger_policy().allow_negative);
    }

    #[test]
    fn rollup_overrides_apply_per_kind() {
        let config = config_with(&[("CHOREKEEPER_ROLLUPS", "manual=all; bonus=weekly,monthly")]);
        assert_eq!(config.rollups.rule(TransactionKind::Manual), RollupRule::ALL);
        let bonus = config.rollups.rule(TransactionKind::Bonus);
        assert!(!bonus.daily && bonus.weekly && bonus.monthly);
        assert_eq!(config.rollups.rule(TransactionKind::Reward), RollupRule::NONE);
    }

    #[test]
    fn malformed_rollups_keep_defaults() {
        let config = config_with(&[("CHOREKEEPER_ROLLUPS", "manual=all;bonus=hourly")]);
        assert_eq!(config.rollups, RollupTable::default());
        assert!(parse_rollups("tip=all", &RollupTable::default()).is_err());
        assert!(parse_rollups("manual", &RollupTable::default()).is_err());
    }

    #[test]
    fn ignores_invalid_numbers() {
        let config = config_with(&[
            ("CHOREKEEPER_WINDOW_DAYS", "0"),
            ("CHOREKEEPER_MISSED_PENALTY", "-4"),
        ]);
        assert_eq!(config.generation_window_days, 14);
        assert_eq!(config.missed_penalty, 0);
    }
}
