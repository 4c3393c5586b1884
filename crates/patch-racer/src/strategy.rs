//! Worker strategies raced against each other.
//!
//! A strategy is what differentiates two attempts on the same plan: a name,
//! a sampling temperature and a guidance line appended to every file prompt.
//! - **Conservative** (0.2): smallest change that satisfies the task
//! - **Balanced** (0.5): idiomatic implementation, moderate freedom
//! - **Creative** (0.8): free to restructure the touched files

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub temperature: f64,
    #[serde(default)]
    pub guidance: String,
}

impl Strategy {
    pub fn new(name: impl Into<String>, temperature: f64, guidance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temperature,
            guidance: guidance.into(),
        }
    }

    pub fn conservative() -> Self {
        Self::new(
            "conservative",
            0.2,
            "Make the smallest change that accomplishes the task. Preserve existing structure, \
             names and formatting wherever possible.",
        )
    }

    pub fn balanced() -> Self {
        Self::new(
            "balanced",
            0.5,
            "Balanced implementation. Accomplish the task with clean, idiomatic code.",
        )
    }

    pub fn creative() -> Self {
        Self::new(
            "creative",
            0.8,
            "You may restructure the file freely if it produces a clearer result, as long as \
             the task is fully accomplished.",
        )
    }

    /// Default race line-up, lowest temperature first.
    pub fn presets() -> Vec<Self> {
        vec![Self::conservative(), Self::balanced(), Self::creative()]
    }

    /// Look up a preset by name (case-insensitive).
    pub fn preset(name: &str) -> Option<Self> {
        Self::presets()
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (t={:.1})", self.name, self.temperature)
    }
}
