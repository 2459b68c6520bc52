//! Policy store
//!
//! Owns the loaded policy document, the rule counters and the per-decision
//! state, and exposes the decision entry points. A store is created by
//! `load` (Loaded) and becomes usable for decisions after `activate`.

use crate::audit::{AuditSession, AuditTopic, DecisionStats, Verdict};
use crate::auth::AuthQuorum;
use crate::device::{DeviceEnv, UserRegistry, WalletRegistry};
use crate::errors::{HsmError, Result};
use crate::policy::document::FieldReader;
use crate::policy::engine::{RuleEngine, TxSummary};
use crate::policy::paths::{path_allowed, PathPattern};
use crate::policy::rules::{RuleSpec, RuleSummary};
use crate::policy::velocity::{VelocityTracker, WindowState};
use crate::secrets::{pack_locker, unpack_locker, MAX_SECRET_PAYLOAD};
use crate::security::{CredentialProof, SecureBytes};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

/// Longest velocity period: three days, in minutes
pub const MAX_PERIOD_MINUTES: u64 = 3 * 24 * 60;

/// Most storage locker reads a policy may allow
pub const MAX_SECRET_READS: u64 = 10;

const MIN_SECRET_LEN: usize = 16;

const MUST_LOG_REFUSAL: &str = "Could not log details, and must_log is set";

/// The whole policy document, validated
pub struct PolicyConfig {
    pub must_log: bool,
    pub warnings_ok: bool,
    pub msg_paths: Vec<PathPattern>,
    pub share_xpubs: Vec<PathPattern>,
    pub share_addrs: Vec<PathPattern>,
    pub notes: Option<String>,
    pub period: Option<u32>,
    pub allow_sl: Option<u32>,
    /// One-time secret for the storage locker; never saved
    pub set_sl: Option<SecureBytes>,
    pub rules: Vec<RuleSpec>,
}

/// Document form written back to storage
#[derive(Serialize)]
struct SavedPolicy<'a> {
    must_log: bool,
    msg_paths: &'a [PathPattern],
    share_xpubs: &'a [PathPattern],
    share_addrs: &'a [PathPattern],
    notes: &'a Option<String>,
    period: Option<u32>,
    allow_sl: Option<u32>,
    warnings_ok: bool,
    rules: Vec<RuleSummary>,
}

impl PolicyConfig {
    /// Parse and validate a policy document, consuming it.
    pub fn parse(doc: Value, users: &dyn UserRegistry, wallets: &dyn WalletRegistry) -> Result<Self> {
        let mut j = FieldReader::new(doc)?;

        let must_log = j.pop_bool("must_log")?;
        let warnings_ok = j.pop_bool("warnings_ok")?;

        let msg_paths = pop_paths(&mut j, "msg_paths", false)?;
        let share_xpubs = pop_paths(&mut j, "share_xpubs", false)?;
        let share_addrs = pop_paths(&mut j, "share_addrs", true)?;

        let notes = j.pop_string("notes", 0, 4096)?;
        let period = j.pop_int("period", 1, MAX_PERIOD_MINUTES)?.map(|p| p as u32);
        let allow_sl = j.pop_int("allow_sl", 1, MAX_SECRET_READS)?.map(|n| n as u32);

        let set_sl = match j.pop_string("set_sl", MIN_SECRET_LEN, MAX_SECRET_PAYLOAD)? {
            None => None,
            Some(mut s) => {
                let too_long = s.len() > MAX_SECRET_PAYLOAD;
                let secret = SecureBytes::from(s.as_bytes());
                s.zeroize();
                if too_long {
                    return Err(HsmError::validation(format!(
                        "set_sl: length must be {}..{}",
                        MIN_SECRET_LEN, MAX_SECRET_PAYLOAD
                    )));
                }
                if allow_sl.is_none() {
                    return Err(HsmError::validation("need allow_sl>=1"));
                }
                Some(secret)
            }
        };

        let rules = j
            .pop_list("rules")?
            .into_iter()
            .enumerate()
            .map(|(idx, r)| {
                RuleSpec::parse(r, idx, users, wallets).map_err(|e| match e {
                    HsmError::Validation(msg) => {
                        HsmError::Validation(format!("rule #{}: {}", idx + 1, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if period.is_none() && rules.iter().any(RuleSpec::has_velocity) {
            return Err(HsmError::validation("Needs period to be specified"));
        }

        // must be last
        j.finish()?;

        Ok(Self {
            must_log,
            warnings_ok,
            msg_paths,
            share_xpubs,
            share_addrs,
            notes,
            period,
            allow_sl,
            set_sl,
            rules,
        })
    }

    /// Document to persist for the next boot. The staged secret is never included.
    pub fn save(&self) -> Value {
        let saved = SavedPolicy {
            must_log: self.must_log,
            msg_paths: &self.msg_paths,
            share_xpubs: &self.share_xpubs,
            share_addrs: &self.share_addrs,
            notes: &self.notes,
            period: self.period,
            allow_sl: self.allow_sl,
            warnings_ok: self.warnings_ok,
            rules: self.rules.iter().map(RuleSpec::to_summary).collect(),
        };
        serde_json::to_value(saved).unwrap_or(Value::Null)
    }

    pub fn uses_local_conf(&self) -> bool {
        self.rules.iter().any(|r| r.local_conf)
    }

    /// Text shown to the operator before activation, and in status reports.
    pub fn explain(&self) -> String {
        let mut out = String::new();

        if let Some(notes) = &self.notes {
            out.push_str(&format!("=-=\n{}\n=-=\n", notes));
        }

        out.push_str("\nTransactions:\n");
        if self.rules.is_empty() {
            out.push_str("- No transaction will be signed.\n");
        } else {
            for r in &self.rules {
                out.push_str(&format!("- Rule #{}: {}\n", r.index, r.describe()));
            }
        }

        if let Some(period) = self.period {
            out.push_str(&format!("\nVelocity Period:\n {} minutes", period));
            if period >= 60 {
                out.push_str(&format!("\n = {} hrs", format_hours(period)));
            }
            out.push('\n');
        }

        out.push_str("\nMessage signing:\n");
        if self.msg_paths.is_empty() {
            out.push_str("- Not allowed.\n");
        } else {
            out.push_str(&format!("- Allowed if path is: {}\n", plist(&self.msg_paths)));
        }

        out.push_str("\nOther policy:\n");
        out.push_str(&format!(
            "- MicroSD card {} receive log entries.\n",
            if self.must_log { "MUST" } else { "will" }
        ));
        if self.set_sl.is_some() {
            out.push_str("- Storage Locker will be updated (once).\n");
        }
        if let Some(n) = self.allow_sl {
            let times = if n == 1 { "once".to_string() } else { format!("{} times", n) };
            out.push_str(&format!("- Storage Locker can be read only {}.\n", times));
        }
        if self.warnings_ok {
            out.push_str("- PSBT warnings will be ignored.\n");
        }
        if !self.share_xpubs.is_empty() {
            out.push_str(&format!(
                "- XPUB values will be shared, if path is: {}.\n",
                plist(&self.share_xpubs)
            ));
        }
        if !self.share_addrs.is_empty() {
            out.push_str(&format!(
                "- Address values will be shared, if path is: {}.\n",
                plist(&self.share_addrs)
            ));
        }

        out
    }
}

fn pop_paths(j: &mut FieldReader, field: &str, allow_p2sh: bool) -> Result<Vec<PathPattern>> {
    let raw = j.pop_string_list(field, 64, |s| Ok(s.to_string()))?;
    raw.iter()
        .map(|s| PathPattern::parse(field, s, allow_p2sh))
        .collect()
}

fn plist(paths: &[PathPattern]) -> String {
    paths
        .iter()
        .map(PathPattern::display_name)
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Minutes as hours, to at most two decimals: 90 -> "1.5"
fn format_hours(minutes: u32) -> String {
    let txt = format!("{:.2}", f64::from(minutes) / 60.0);
    txt.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Loaded,
    Active,
}

/// Redacted snapshot for remote display
#[derive(Debug, Clone, Serialize)]
pub struct PolicyStatus {
    pub summary: String,
    pub last_refusal: Option<String>,
    pub approvals: u64,
    pub refusals: u64,
    pub sl_reads: u32,
    pub period: Option<u32>,
    pub next_local_code: String,
    pub uses_local_conf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_ends: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_spent: Option<Vec<u64>>,
    /// Count only; captured credentials are never reported
    pub pending_auth: usize,
}

pub struct PolicyStore {
    config: PolicyConfig,
    summary: String,
    state: PolicyState,
    stats: DecisionStats,
    velocity: VelocityTracker,
    quorum: AuthQuorum,
    secret_reads: u32,
    env: DeviceEnv,
}

impl PolicyStore {
    /// Validate a policy document. The result is Loaded, never Active.
    pub fn load(doc: Value, env: DeviceEnv) -> Result<Self> {
        let config = PolicyConfig::parse(doc, env.users.as_ref(), env.wallets.as_ref())?;
        let summary = config.explain();
        let velocity = VelocityTracker::new(config.period);

        info!("Loaded policy with {} rule(s)", config.rules.len());
        Ok(Self {
            config,
            summary,
            state: PolicyState::Loaded,
            stats: DecisionStats::default(),
            velocity,
            quorum: AuthQuorum::new(),
            secret_reads: 0,
            env,
        })
    }

    #[cfg(test)]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    #[cfg(test)]
    pub fn stats(&self) -> &DecisionStats {
        &self.stats
    }

    pub fn is_active(&self) -> bool {
        self.state == PolicyState::Active
    }

    pub fn save(&self) -> Value {
        self.config.save()
    }

    /// Write the saved form to the device's policy file.
    pub fn persist(&self) -> Result<()> {
        let path = &self.env.policy_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.save())
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        fs::write(path, text)?;
        info!("Saved policy to {:?}", path);
        Ok(())
    }

    /// Start enforcing this policy.
    ///
    /// A staged storage-locker secret is written once and wiped from memory,
    /// whether or not the write succeeds.
    pub fn activate(&mut self, persist: bool) -> Result<()> {
        if self.is_active() {
            return Err(HsmError::AlreadyActive);
        }

        if persist {
            self.persist()?;
        }

        if let Some(mut secret) = self.config.set_sl.take() {
            let written = pack_locker(secret.expose()).and_then(|mut slot| {
                let r = self.env.secrets.write_locker(slot.expose());
                slot.wipe();
                r
            });
            secret.wipe();
            written?;
            info!("Storage locker updated");
        }

        self.reset_period();
        self.state = PolicyState::Active;
        info!("Policy active");
        Ok(())
    }

    /// A new velocity period begins now.
    pub fn reset_period(&mut self) {
        self.velocity.reset(&mut self.config.rules);
    }

    /// Window state for the decision path; may reset counters.
    pub fn time_left(&mut self) -> WindowState {
        let now = self.env.now();
        self.velocity.time_left(&mut self.config.rules, now)
    }

    pub fn submit_credential(&mut self, username: &str, proof: CredentialProof, counter: u64) -> Result<()> {
        if !self.is_active() {
            return Err(HsmError::NotActive);
        }
        self.quorum.submit(username, proof, counter)
    }

    pub fn enter_local_code(&mut self, code: &str) {
        self.quorum.enter_local_code(code);
    }

    /// Decide whether a message may be signed with the key at `subpath`.
    pub fn approve_message(&mut self, text: &[u8], address: &str, subpath: &str) -> Verdict {
        if !self.is_active() {
            return Verdict::Refused(HsmError::NotActive.to_string());
        }

        let digest: [u8; 32] = Sha256::digest(text).into();
        let mut log = AuditSession::open(
            self.env.audit.as_ref(),
            AuditTopic::Message,
            &digest,
            &mut self.stats,
        );

        if self.config.must_log && log.is_unsaved() {
            return log.refuse(MUST_LOG_REFUSAL);
        }

        log.info("Message signing requested:");
        log.info(&format!("SHA256(msg) = {}", hex::encode(digest)));
        log.info(&format!(
            "\n{} bytes to be signed by {} => {}",
            text.len(),
            subpath,
            address
        ));

        if self.config.msg_paths.is_empty() {
            return log.refuse("Message signing not permitted");
        }

        if !path_allowed(&self.config.msg_paths, subpath) {
            return log.refuse("Message signing not enabled for that path");
        }

        approve_logged(&mut log, self.config.must_log, "Message signing allowed")
    }

    /// Decide whether a transaction may be signed.
    ///
    /// Never fails: every fault, including a panic in a collaborator, ends
    /// up as a logged refusal.
    pub fn approve_transaction(&mut self, tx: &TxSummary, tx_digest: &[u8; 32], narrative: &str) -> Verdict {
        if !self.is_active() {
            return Verdict::Refused(HsmError::NotActive.to_string());
        }

        // counters must be current before any rule is checked
        let window = self.time_left();
        debug!("Velocity window: {:?}", window);

        let Self {
            config,
            stats,
            velocity,
            quorum,
            env,
            ..
        } = self;
        let now = env.now();

        let mut log = AuditSession::open(env.audit.as_ref(), AuditTopic::Transaction, tx_digest, stats);

        if config.must_log && log.is_unsaved() {
            return log.refuse(MUST_LOG_REFUSAL);
        }

        log.info("Transaction signing requested:");
        log.info(&format!("SHA256(PSBT) = {}", hex::encode(tx_digest)));
        log.info(&format!("-vvv-\n{}\n-^^^-", narrative));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            decide_transaction(config, velocity, quorum, env, &mut log, tx, tx_digest, now)
        }));

        match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) if e.is_refusal() => log.refuse(&e.to_string()),
            Ok(Err(e)) => {
                error!("Transaction decision failed: {}", e);
                log.record_fault(&e);
                log.refuse(&format!("Rejected: {}", e))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("Transaction decision panicked: {}", msg);
                log.record_fault(&msg);
                log.refuse(&format!("Rejected: internal fault: {}", msg))
            }
        }
    }

    /// May the XPUB at `subpath` be shared with the host?
    pub fn approve_xpub_share(&self, subpath: &str) -> bool {
        if !self.is_active() || self.config.share_xpubs.is_empty() {
            return false;
        }
        path_allowed(&self.config.share_xpubs, subpath)
    }

    /// May the address at `subpath` (or any P2SH address) be shown to the host?
    pub fn approve_address_share(&self, subpath: &str, is_p2sh: bool) -> bool {
        if !self.is_active() || self.config.share_addrs.is_empty() {
            return false;
        }
        if is_p2sh {
            return self.config.share_addrs.contains(&PathPattern::P2sh);
        }
        path_allowed(&self.config.share_addrs, subpath)
    }

    /// Read the storage locker secret, within the policy's read allowance.
    pub fn fetch_secret(&mut self) -> Result<SecureBytes> {
        if !self.is_active() {
            return Err(HsmError::NotActive);
        }
        let Some(allow) = self.config.allow_sl else {
            return Err(HsmError::refused("not allowed"));
        };
        if self.secret_reads >= allow {
            return Err(HsmError::refused("consumed"));
        }
        self.secret_reads += 1;

        let slot = self.env.secrets.read_locker()?;
        let secret = unpack_locker(&slot)?;
        warn!("Storage locker read ({} of {})", self.secret_reads, allow);
        Ok(secret)
    }

    /// Snapshot for remote display. Does not move the velocity window.
    pub fn status_report(&self) -> PolicyStatus {
        let (period_ends, has_spent) = match self.velocity.peek(self.env.now()) {
            WindowState::Remaining(left) => (
                Some(left),
                Some(self.config.rules.iter().map(|r| r.spent_this_period).collect()),
            ),
            _ => (None, None),
        };

        PolicyStatus {
            summary: self.summary.clone(),
            last_refusal: self.stats.last_refusal.clone(),
            approvals: self.stats.approvals,
            refusals: self.stats.refusals,
            sl_reads: self.secret_reads,
            period: self.config.period,
            next_local_code: self.quorum.next_local_code().to_string(),
            uses_local_conf: self.config.uses_local_conf(),
            period_ends,
            has_spent,
            pending_auth: self.quorum.pending_count(),
        }
    }
}

/// Everything after the audit entry is open and the must-log rule passed.
#[allow(clippy::too_many_arguments)]
fn decide_transaction(
    config: &mut PolicyConfig,
    velocity: &mut VelocityTracker,
    quorum: &mut AuthQuorum,
    env: &DeviceEnv,
    log: &mut AuditSession<'_>,
    tx: &TxSummary,
    tx_digest: &[u8; 32],
    now: i64,
) -> Result<Verdict> {
    // spends the local code and every captured credential, even on refusal
    let evidence = quorum.collect(env.users.as_ref(), tx_digest)?;

    if !tx.warnings.is_empty() {
        if config.warnings_ok {
            log.info("Txn has warnings, but policy is to accept anyway.");
        } else {
            return Err(HsmError::refused(format!(
                "Rejected: has {} warning(s)",
                tx.warnings.len()
            )));
        }
    }

    if config.rules.is_empty() {
        return Err(HsmError::refused("Rejected: no txn signing allowed"));
    }

    if evidence.local_confirmed {
        log.info("Local operator gave correct code.");
    }
    if !evidence.users.is_empty() {
        let names: Vec<&str> = evidence.users.iter().map(String::as_str).collect();
        log.info(&format!("These users gave correct auth codes: {}", names.join(", ")));
    }

    let pos = RuleEngine::evaluate(&config.rules, tx, &evidence.users, evidence.local_confirmed)
        .map_err(|reasons| {
            for r in &reasons {
                info!("{}", r);
            }
            HsmError::refused(format!("Rejected: {}", reasons.join(", ")))
        })?;

    let must_log = config.must_log;
    let rule = &mut config.rules[pos];
    let verdict = approve_logged(log, must_log, &format!("Acceptable by rule #{}", rule.index));
    if verdict.is_approved() && rule.has_velocity() {
        velocity.record_spend(rule, tx.total_out, now);
    }

    Ok(verdict)
}

/// Approve, unless the entry was lost on the way and the policy needs it kept.
fn approve_logged(log: &mut AuditSession<'_>, must_log: bool, msg: &str) -> Verdict {
    if !log.flush() && must_log {
        return log.refuse(MUST_LOG_REFUSAL);
    }
    log.approve(msg)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
