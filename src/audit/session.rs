//! Scoped audit session for one decision

use crate::audit::{entry_name, AuditMedium, AuditTopic, DecisionStats, Verdict};
use std::fmt::Display;
use std::io::Write;
use tracing::{debug, info, warn};

enum Sink {
    Durable(Box<dyn Write + Send>),
    Console,
}

/// Logging scope for a single decision.
///
/// Holds the owning policy's counters for its whole lifetime, so no other
/// decision can update them while this one is open.
pub struct AuditSession<'a> {
    sink: Sink,
    name: String,
    /// Latched on the first failed write or flush
    failed: bool,
    stats: &'a mut DecisionStats,
}

impl<'a> AuditSession<'a> {
    /// Open a log entry named from `digest`, or fall back to the console.
    pub fn open(
        medium: &dyn AuditMedium,
        topic: AuditTopic,
        digest: &[u8],
        stats: &'a mut DecisionStats,
    ) -> Self {
        let name = entry_name(digest);
        let sink = match medium.open_entry(topic, &name) {
            Ok(w) => Sink::Durable(w),
            Err(e) => {
                warn!("Audit log unavailable ({}), using console", e);
                Sink::Console
            }
        };

        Self {
            sink,
            name,
            failed: false,
            stats,
        }
    }

    /// True when what was written here may not survive a reboot
    pub fn is_unsaved(&self) -> bool {
        self.failed || matches!(self.sink, Sink::Console)
    }

    /// Push buffered lines to the medium. Returns false if the entry is unsaved.
    pub fn flush(&mut self) -> bool {
        if let Sink::Durable(w) = &mut self.sink {
            if let Err(e) = w.flush() {
                warn!("Audit flush for {} failed: {}", self.name, e);
                self.failed = true;
            }
        }
        !self.is_unsaved()
    }

    pub fn info(&mut self, msg: &str) {
        match &mut self.sink {
            Sink::Durable(w) => {
                if let Err(e) = writeln!(w, "{}", msg) {
                    warn!("Audit write to {} failed: {}", self.name, e);
                    self.failed = true;
                }
                debug!(target: "autosign::audit", "{}", msg);
            }
            Sink::Console => {
                info!(target: "autosign::audit", "{}", msg);
            }
        }
    }

    pub fn approve(&mut self, msg: &str) -> Verdict {
        self.info(&format!("\nAPPROVED: {}", msg));
        self.stats.approvals += 1;
        self.stats.last_refusal = None;
        Verdict::Approved(msg.to_string())
    }

    pub fn refuse(&mut self, msg: &str) -> Verdict {
        self.info(&format!("\nREFUSED: {}", msg));
        self.stats.refusals += 1;
        self.stats.last_refusal = Some(msg.to_string());
        Verdict::Refused(msg.to_string())
    }

    /// Diagnostic block for a fault that was not an ordinary refusal
    pub fn record_fault(&mut self, fault: &dyn Display) {
        self.info(&format!("\n\n---- Fault ----\n{}", fault));
    }
}

impl Drop for AuditSession<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.record_fault(&"panic while this entry was open");
        }

        self.flush();
    }
}
