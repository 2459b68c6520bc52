//! Local confirmation code
//!
//! The expected code is shown in the remote status report. Whoever reads it
//! there passes it to the operator at the device, who types it in. Each code
//! is good for one decision at most.

use rand::Rng;

/// Number of digits in the local confirmation code
pub const LOCAL_PIN_LENGTH: usize = 6;

pub struct LocalConfirmation {
    expected: String,
    pending: String,
}

impl LocalConfirmation {
    pub fn new() -> Self {
        Self {
            expected: fresh_code(None),
            pending: String::new(),
        }
    }

    /// Code the local operator must enter for the next decision
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Store what the operator typed; nothing is checked yet.
    pub fn enter(&mut self, code: &str) {
        self.pending = code.trim().to_string();
    }

    /// Compare and rotate. A new code is issued whatever the result.
    pub fn consume(&mut self) -> bool {
        let got = std::mem::take(&mut self.pending);
        let ok = !got.is_empty() && got == self.expected;
        self.expected = fresh_code(Some(&self.expected));
        ok
    }
}

impl Default for LocalConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

fn fresh_code(previous: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code = format!("{:0width$}", rng.gen_range(0..1_000_000u32), width = LOCAL_PIN_LENGTH);
        if previous != Some(code.as_str()) {
            return code;
        }
    }
}
