//! Derivation path patterns used by message signing and sharing rules

use crate::errors::{HsmError, Result};
use serde::{Serialize, Serializer};
use std::fmt;

const HARDENED: u32 = 0x8000_0000;
const MAX_PATH_DEPTH: usize = 12;

/// One entry of `msg_paths`, `share_xpubs` or `share_addrs`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// Any path at all
    Any,
    /// Any P2SH address (address sharing only)
    P2sh,
    /// Exactly this canonical path
    Path(String),
}

impl PathPattern {
    /// Parse one document value for `field`; `allow_p2sh` enables the `p2sh` keyword.
    pub fn parse(field: &str, raw: &str, allow_p2sh: bool) -> Result<Self> {
        let lowered = raw.trim().to_lowercase();
        if lowered == "any" {
            return Ok(PathPattern::Any);
        }
        if allow_p2sh && lowered == "p2sh" {
            return Ok(PathPattern::P2sh);
        }

        cleanup_deriv_path(raw)
            .map(PathPattern::Path)
            .map_err(|_| HsmError::validation(format!("{}: invalid path ({})", field, raw)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::Any => "any",
            PathPattern::P2sh => "p2sh",
            PathPattern::Path(p) => p,
        }
    }

    /// Operator-facing wording used by the policy explanation
    pub fn display_name(&self) -> &str {
        match self {
            PathPattern::Any => "(any path)",
            PathPattern::P2sh => "(any P2SH)",
            PathPattern::Path(p) => p,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Canonical form of a derivation path: `m/44'/0'/0'`
pub fn cleanup_deriv_path(raw: &str) -> Result<String> {
    let s = raw.trim().replace(['h', 'H', 'p', 'P'], "'");
    let s = s.trim_end_matches('/');

    let rest = s
        .strip_prefix("m/")
        .or_else(|| s.strip_prefix("M/"))
        .or_else(|| if s == "m" || s == "M" { Some("") } else { None })
        .unwrap_or(s);

    let mut parts = vec!["m".to_string()];
    if !rest.is_empty() {
        for component in rest.split('/') {
            let (digits, hardened) = match component.strip_suffix('\'') {
                Some(d) => (d, true),
                None => (component, false),
            };
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(HsmError::validation(format!("bad path component: {}", component)));
            }
            let index: u64 = digits
                .parse()
                .map_err(|_| HsmError::validation(format!("bad path component: {}", component)))?;
            if index >= HARDENED as u64 {
                return Err(HsmError::validation(format!("path index too big: {}", component)));
            }
            parts.push(format!("{}{}", index, if hardened { "'" } else { "" }));
        }
    }

    if parts.len() - 1 > MAX_PATH_DEPTH {
        return Err(HsmError::validation("path too deep"));
    }
    Ok(parts.join("/"))
}

/// Does a request path fall under any of the configured patterns?
pub fn path_allowed(patterns: &[PathPattern], subpath: &str) -> bool {
    if patterns.contains(&PathPattern::Any) {
        return true;
    }
    match cleanup_deriv_path(subpath) {
        Ok(clean) => patterns.iter().any(|p| matches!(p, PathPattern::Path(x) if *x == clean)),
        Err(_) => false,
    }
}
