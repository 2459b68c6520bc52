//! Rule engine
//!
//! Picks the rule that authorizes a transaction. Rules are tried in the
//! order they were declared and the first one whose checks all pass wins;
//! declaration order is the priority order.

use crate::policy::rules::{RuleSpec, WalletScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What the transaction parser tells us about a proposed transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxSummary {
    /// Sum of all non-change outputs, in satoshis
    pub total_out: u64,
    /// Rendered addresses of the non-change outputs
    #[serde(default)]
    pub destinations: Vec<String>,
    /// Name of the multisig wallet being signed for, if any
    #[serde(default)]
    pub multisig_wallet: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
impl TxSummary {
    pub fn new(total_out: u64) -> Self {
        Self {
            total_out,
            ..Default::default()
        }
    }

    pub fn with_destination(mut self, addr: &str) -> Self {
        self.destinations.push(addr.to_string());
        self
    }

    pub fn with_multisig(mut self, wallet: &str) -> Self {
        self.multisig_wallet = Some(wallet.to_string());
        self
    }

    pub fn with_warning(mut self, warning: &str) -> Self {
        self.warnings.push(warning.to_string());
        self
    }
}

/// Why a single rule did not apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMismatch {
    WrongWallet,
    NotMultisig,
    TooMuchOut,
    NonWhitelisted(Vec<String>),
    LocalNotConfirmed,
    NeedUsers,
    NeedMoreUsers { got: usize, need: usize },
    ExceedsPeriod,
}

impl fmt::Display for RuleMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleMismatch::WrongWallet => write!(f, "wrong wallet"),
            RuleMismatch::NotMultisig => write!(f, "not multisig"),
            RuleMismatch::TooMuchOut => write!(f, "too much out"),
            RuleMismatch::NonWhitelisted(dests) => {
                write!(f, "non-whitelisted dest: {}", dests.join(", "))
            }
            RuleMismatch::LocalNotConfirmed => write!(f, "local operator didn't confirm"),
            RuleMismatch::NeedUsers => write!(f, "need user(s) confirmation"),
            RuleMismatch::NeedMoreUsers { got, need } => {
                write!(f, "need more users to confirm (got {} of {})", got, need)
            }
            RuleMismatch::ExceedsPeriod => write!(f, "would exceed period spending"),
        }
    }
}

pub struct RuleEngine;

impl RuleEngine {
    /// Position (in `rules`) of the first rule that accepts the transaction,
    /// or one `rule #N: reason` string per rule tried.
    pub fn evaluate(
        rules: &[RuleSpec],
        tx: &TxSummary,
        users: &BTreeSet<String>,
        local_confirmed: bool,
    ) -> Result<usize, Vec<String>> {
        let mut reasons = Vec::with_capacity(rules.len());

        for (pos, rule) in rules.iter().enumerate() {
            match Self::check_rule(rule, tx, users, local_confirmed) {
                Ok(()) => return Ok(pos),
                Err(why) => reasons.push(format!("rule #{}: {}", rule.index, why)),
            }
        }

        Err(reasons)
    }

    /// Run one rule's checks, stopping at the first that fails.
    pub fn check_rule(
        rule: &RuleSpec,
        tx: &TxSummary,
        users: &BTreeSet<String>,
        local_confirmed: bool,
    ) -> Result<(), RuleMismatch> {
        if let Some(scope) = &rule.wallet {
            match (&tx.multisig_wallet, scope) {
                (Some(name), WalletScope::Multisig(want)) if name == want => {}
                (Some(_), _) => return Err(RuleMismatch::WrongWallet),
                (None, WalletScope::SingleSigner) => {}
                (None, WalletScope::Multisig(_)) => return Err(RuleMismatch::NotMultisig),
            }
        }

        if let Some(max) = rule.max_amount {
            if tx.total_out > max {
                return Err(RuleMismatch::TooMuchOut);
            }
        }

        if !rule.whitelist.is_empty() {
            let mut outside: Vec<String> = Vec::new();
            for dest in &tx.destinations {
                if !rule.whitelist.contains(dest) && !outside.contains(dest) {
                    outside.push(dest.clone());
                }
            }
            if !outside.is_empty() {
                return Err(RuleMismatch::NonWhitelisted(outside));
            }
        }

        if rule.local_conf && !local_confirmed {
            return Err(RuleMismatch::LocalNotConfirmed);
        }

        if !rule.users.is_empty() {
            let given = rule.users.iter().filter(|u| users.contains(*u)).count();
            if given == 0 {
                return Err(RuleMismatch::NeedUsers);
            }
            let need = rule.min_users.unwrap_or(rule.users.len());
            if given < need {
                return Err(RuleMismatch::NeedMoreUsers { got: given, need });
            }
        }

        if let Some(cap) = rule.per_period {
            if rule.spent_this_period.saturating_add(tx.total_out) > cap {
                return Err(RuleMismatch::ExceedsPeriod);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedUsers, FixedWallets};
    use serde_json::{json, Value};

    fn rules(docs: Value) -> Vec<RuleSpec> {
        let users = FixedUsers::new(&["alice", "bob", "carol"]);
        let wallets = FixedWallets::new(&["vault", "cold"]);
        docs.as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, d)| RuleSpec::parse(d.clone(), i, &users, &wallets).unwrap())
            .collect()
    }

    fn who(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_match_wins() {
        let rs = rules(json!([
            {"max_amount": 100000},
            {"max_amount": 100000, "whitelist": ["addr1"]},
        ]));
        let tx = TxSummary::new(5000).with_destination("addr1");
        // the later, more specific rule never takes over
        assert_eq!(RuleEngine::evaluate(&rs, &tx, &who(&[]), false), Ok(0));
    }

    #[test]
    fn test_falls_through_to_later_rule() {
        let rs = rules(json!([
            {"max_amount": 1000},
            {"users": ["alice"]},
        ]));
        let tx = TxSummary::new(5000).with_destination("addrX");
        assert_eq!(RuleEngine::evaluate(&rs, &tx, &who(&["alice"]), false), Ok(1));
    }

    #[test]
    fn test_allow_all_matches_anything() {
        let rs = rules(json!([{}]));
        let txs = [
            TxSummary::new(0),
            TxSummary::new(2_000_000_000_000_000).with_destination("anything"),
            TxSummary::new(1).with_multisig("vault"),
        ];
        for tx in &txs {
            assert_eq!(RuleEngine::evaluate(&rs, tx, &who(&[]), false), Ok(0));
        }
    }

    #[test]
    fn test_reasons_are_aggregated() {
        let rs = rules(json!([
            {"max_amount": 50000, "whitelist": ["addr1"]},
            {"users": ["bob"], "min_users": 1},
        ]));
        let tx = TxSummary::new(60000).with_destination("addr1");
        let reasons = RuleEngine::evaluate(&rs, &tx, &who(&[]), false).unwrap_err();
        assert_eq!(
            reasons,
            vec![
                "rule #1: too much out".to_string(),
                "rule #2: need user(s) confirmation".to_string(),
            ]
        );
    }

    #[test]
    fn test_cap_and_whitelist() {
        let rs = rules(json!([{"max_amount": 50000, "whitelist": ["addr1"]}]));

        let ok = TxSummary::new(40000).with_destination("addr1");
        assert_eq!(RuleEngine::evaluate(&rs, &ok, &who(&[]), false), Ok(0));

        let over = TxSummary::new(60000).with_destination("addr1");
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &over, &who(&[]), false),
            Err(RuleMismatch::TooMuchOut)
        );

        let elsewhere = TxSummary::new(100)
            .with_destination("addr1")
            .with_destination("addr9")
            .with_destination("addr9");
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &elsewhere, &who(&[]), false)
                .unwrap_err()
                .to_string(),
            "non-whitelisted dest: addr9"
        );
    }

    #[test]
    fn test_quorum_two_of_three() {
        let rs = rules(json!([{"users": ["alice", "bob", "carol"], "min_users": 2}]));
        let tx = TxSummary::new(1);

        let check = |names: &[&str]| RuleEngine::check_rule(&rs[0], &tx, &who(names), false);

        assert_eq!(check(&[]), Err(RuleMismatch::NeedUsers));
        assert_eq!(check(&["mallory"]), Err(RuleMismatch::NeedUsers));
        assert_eq!(
            check(&["alice"]),
            Err(RuleMismatch::NeedMoreUsers { got: 1, need: 2 })
        );
        assert_eq!(check(&["alice", "carol"]), Ok(()));
        assert_eq!(check(&["alice", "bob", "carol", "mallory"]), Ok(()));
    }

    #[test]
    fn test_wallet_scope() {
        let rs = rules(json!([{"wallet": "vault"}, {"wallet": "1"}]));
        let ms = TxSummary::new(1).with_multisig("vault");
        let other = TxSummary::new(1).with_multisig("cold");
        let single = TxSummary::new(1);

        assert_eq!(RuleEngine::check_rule(&rs[0], &ms, &who(&[]), false), Ok(()));
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &other, &who(&[]), false),
            Err(RuleMismatch::WrongWallet)
        );
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &single, &who(&[]), false),
            Err(RuleMismatch::NotMultisig)
        );
        assert_eq!(RuleEngine::check_rule(&rs[1], &single, &who(&[]), false), Ok(()));
        assert_eq!(
            RuleEngine::check_rule(&rs[1], &ms, &who(&[]), false),
            Err(RuleMismatch::WrongWallet)
        );
    }

    #[test]
    fn test_local_confirmation_and_velocity() {
        let mut rs = rules(json!([{"local_conf": true, "per_period": 1000}]));
        let tx = TxSummary::new(600);

        assert_eq!(
            RuleEngine::check_rule(&rs[0], &tx, &who(&[]), false),
            Err(RuleMismatch::LocalNotConfirmed)
        );
        assert_eq!(RuleEngine::check_rule(&rs[0], &tx, &who(&[]), true), Ok(()));

        rs[0].spent_this_period = 500;
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &tx, &who(&[]), true),
            Err(RuleMismatch::ExceedsPeriod)
        );
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        // fails both the cap and the whitelist; only the cap is reported
        let rs = rules(json!([{"max_amount": 10, "whitelist": ["addr1"]}]));
        let tx = TxSummary::new(20).with_destination("addr2");
        assert_eq!(
            RuleEngine::check_rule(&rs[0], &tx, &who(&[]), false),
            Err(RuleMismatch::TooMuchOut)
        );
    }
}
