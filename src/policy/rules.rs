//! Approval rules
//!
//! A rule describes one kind of transaction the device will sign unattended:
//! - per_period: velocity limit, in satoshis per policy period
//! - max_amount: cap on a single transaction
//! - users / min_users: remote users who must authorize, and how many
//! - whitelist: allowed destinations (any, if empty)
//! - local_conf: local operator must also enter the rotating code
//! - wallet: restrict to one multisig wallet, or `"1"` for single-signer only

use crate::auth::MAX_NUMBER_USERS;
use crate::device::{UserRegistry, WalletRegistry};
use crate::errors::{HsmError, Result};
use crate::policy::document::FieldReader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Total satoshis that can ever exist: 21e6 * 1e8
pub const MAX_SATS: u64 = 2_100_000_000_000_000;

/// Wallet value meaning "only non-multisig transactions"
pub const SINGLE_SIGNER: &str = "1";

const MAX_WHITELIST_LEN: usize = 100;
const MAX_WALLET_NAME_LEN: usize = 20;
const MAX_ADDRESS_LEN: usize = 128;

const SATS_PER_COIN: u64 = 100_000_000;

/// Which wallets a rule may sign for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletScope {
    SingleSigner,
    Multisig(String),
}

impl WalletScope {
    pub fn as_str(&self) -> &str {
        match self {
            WalletScope::SingleSigner => SINGLE_SIGNER,
            WalletScope::Multisig(name) => name,
        }
    }
}

/// One validated approval rule
#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// 1-based position in the policy's rule list
    pub index: usize,
    pub per_period: Option<u64>,
    pub max_amount: Option<u64>,
    /// Declared order is kept for display; membership is what matters
    pub users: Vec<String>,
    /// Present exactly when `users` is non-empty
    pub min_users: Option<usize>,
    pub whitelist: Vec<String>,
    pub local_conf: bool,
    pub wallet: Option<WalletScope>,
    /// Spent under this rule in the current velocity window
    pub spent_this_period: u64,
}

/// Secret-free projection of a rule, as saved and as shown to remote users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub per_period: Option<u64>,
    pub max_amount: Option<u64>,
    pub users: Vec<String>,
    pub min_users: Option<usize>,
    pub local_conf: bool,
    pub whitelist: Vec<String>,
    pub wallet: Option<String>,
}

impl RuleSpec {
    /// Parse the rule at `position` (0-based) from its JSON object.
    pub fn parse(
        value: Value,
        position: usize,
        users: &dyn UserRegistry,
        wallets: &dyn WalletRegistry,
    ) -> Result<Self> {
        let mut j = FieldReader::new(value)?;

        let per_period = j.pop_int("per_period", 0, MAX_SATS)?;
        let max_amount = j.pop_int("max_amount", 0, MAX_SATS)?;

        let rule_users = j.pop_string_list("users", MAX_NUMBER_USERS, |u| {
            if users.is_known(u) {
                Ok(u.to_string())
            } else {
                Err(HsmError::validation(format!("Unknown user: {}", u)))
            }
        })?;

        let whitelist = j.pop_string_list("whitelist", MAX_WHITELIST_LEN, cleanup_whitelist_value)?;

        let min_users = j
            .pop_int("min_users", 1, rule_users.len() as u64)?
            .map(|n| n as usize);
        let local_conf = j.pop_bool("local_conf")?;
        let wallet = j.pop_string("wallet", 1, MAX_WALLET_NAME_LEN)?;

        let distinct: HashSet<&String> = rule_users.iter().collect();
        if distinct.len() != rule_users.len() {
            return Err(HsmError::validation("dup users"));
        }

        let min_users = match min_users {
            Some(n) => Some(n),
            None if rule_users.is_empty() => None,
            None => Some(rule_users.len()),
        };

        let wallet = match wallet {
            None => None,
            Some(w) if w == SINGLE_SIGNER => Some(WalletScope::SingleSigner),
            Some(w) => {
                if !wallets.names().iter().any(|n| *n == w) {
                    return Err(HsmError::validation(format!("unknown MS wallet: {}", w)));
                }
                Some(WalletScope::Multisig(w))
            }
        };

        j.finish()?;

        Ok(Self {
            index: position + 1,
            per_period,
            max_amount,
            users: rule_users,
            min_users,
            whitelist,
            local_conf,
            wallet,
            spent_this_period: 0,
        })
    }

    pub fn has_velocity(&self) -> bool {
        self.per_period.is_some()
    }

    pub fn to_summary(&self) -> RuleSummary {
        RuleSummary {
            per_period: self.per_period,
            max_amount: self.max_amount,
            users: self.users.clone(),
            min_users: self.min_users,
            local_conf: self.local_conf,
            whitelist: self.whitelist.clone(),
            wallet: self.wallet.as_ref().map(|w| w.as_str().to_string()),
        }
    }

    /// One-sentence description for operators and audit logs.
    ///
    /// Remote tooling matches on this wording; keep it stable.
    pub fn describe(&self) -> String {
        // a zero cap is still a cap
        let mut rv = match (self.per_period, self.max_amount) {
            (Some(pp), Some(mx)) => format!(
                "Up to {} per period, and up to {} per txn",
                render_amount(pp),
                render_amount(mx)
            ),
            (Some(pp), None) => format!("Up to {} per period", render_amount(pp)),
            (None, Some(mx)) => format!("Up to {} per txn", render_amount(mx)),
            (None, None) => "Any amount".to_string(),
        };

        match &self.wallet {
            Some(WalletScope::SingleSigner) => rv.push_str(" (non multisig)"),
            Some(WalletScope::Multisig(name)) => {
                rv.push_str(&format!(" from multisig wallet \"{}\"", name))
            }
            None => {}
        }

        if self.users.is_empty() {
            rv.push_str(" will be approved");
        } else {
            rv.push_str(" may be authorized by ");
            let need = self.min_users.unwrap_or(self.users.len());
            let total = self.users.len();
            if need == total && total == 1 {
                rv.push_str(&format!("user: {}", self.users[0]));
            } else if need == total {
                rv.push_str(&format!("all users: {}", self.users.join(", ")));
            } else if need == 1 {
                rv.push_str(&format!("any one user: {}", self.users.join(" OR ")));
            } else {
                rv.push_str(&format!("at least {} users: {}", need, self.users.join(", ")));
            }
        }

        if !self.whitelist.is_empty() {
            rv.push_str(&format!(" provided it goes to: {}", self.whitelist.join(", ")));
        }

        if self.local_conf {
            rv.push_str(" if local user confirms");
        }

        rv
    }
}

/// Basic syntax check on a whitelisted destination; matching is string-based.
fn cleanup_whitelist_value(s: &str) -> Result<String> {
    let ok = !s.is_empty() && s.len() <= MAX_ADDRESS_LEN && s.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(s.to_string())
    } else {
        Err(HsmError::validation(format!("bad whitelist value: {}", s)))
    }
}

/// `150000000` -> `1.5 BTC`
pub fn render_amount(sats: u64) -> String {
    let whole = sats / SATS_PER_COIN;
    let frac = sats % SATS_PER_COIN;
    let mut txt = format!("{}.{:08}", whole, frac);
    while txt.ends_with('0') {
        txt.pop();
    }
    if txt.ends_with('.') {
        txt.push('0');
    }
    format!("{} BTC", txt)
}
