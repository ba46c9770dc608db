use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity provider a handshake talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Facebook,
}

impl ProviderKind {
    /// Stable identifier used in telemetry, config and credential files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Facebook => "facebook",
        }
    }

    /// Human-readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Facebook => "Facebook",
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[ProviderKind::Facebook]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}
