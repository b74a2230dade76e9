use serde::Deserialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_name() -> String {
    "reconciliation".into()
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tolerance: ToleranceConfig::default(),
            search: SearchConfig::default(),
            ledger: LedgerConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The shared epsilon for every amount comparison in the run. Amounts
/// are fixed-point minor units, so 0 means exact equality.
#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    #[serde(default)]
    pub amount_minor: i64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self { amount_minor: 0 }
    }
}

/// Caps on the combinatorial subset-sum fallback. The search is
/// worst-case exponential on large same-scope candidate sets; hitting
/// the cap abandons the fallback for that target with a warning.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u64,
}

fn default_max_nodes() -> u64 {
    200_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { max_nodes: default_max_nodes() }
    }
}

/// Ledger candidate window: accounting dates from the first day of the
/// evidence scope month through the last day of scope month + `window_months`.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_window_months")]
    pub window_months: u32,
}

fn default_window_months() -> u32 {
    2
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { window_months: default_window_months() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Evidence written more than this many months away from the
    /// obligation period draws a warning.
    #[serde(default = "default_period_drift_months")]
    pub period_drift_months: u32,
}

fn default_period_drift_months() -> u32 {
    2
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { period_drift_months: default_period_drift_months() }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.tolerance.amount_minor < 0 {
            return Err(ReconError::ConfigValidation(format!(
                "tolerance.amount_minor must be >= 0, got {}",
                self.tolerance.amount_minor
            )));
        }
        if self.search.max_nodes == 0 {
            return Err(ReconError::ConfigValidation(
                "search.max_nodes must be positive".into(),
            ));
        }
        if self.ledger.window_months > 11 {
            return Err(ReconError::ConfigValidation(format!(
                "ledger.window_months must be at most 11, got {}",
                self.ledger.window_months
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
