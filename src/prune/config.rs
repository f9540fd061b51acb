//! Pruning configuration
//!
//! Selects the N:M pattern, which parameters fall in scope, and where a
//! precomputed mask may be loaded from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{PruneError, Result};

/// Which parameters receive a sparsity mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PruneScope {
    /// All conv/linear weights except the stem conv and the classifier head.
    /// The usual choice: first and last layers are the most
    /// accuracy-sensitive.
    #[default]
    Hidden,

    /// Every conv/linear weight wide enough to tile.
    Full,
}

impl PruneScope {
    /// Stem and classifier parameters, identified by their canonical names.
    fn is_boundary(name: &str) -> bool {
        name == "conv1.weight" || name.starts_with("fc.") || name.starts_with("classifier.")
    }

    /// Whether the parameter named `name` with `shape` should be masked.
    ///
    /// Only weights with a 2-D view of at least 2x2 qualify; biases and
    /// norm scales never do.
    pub fn includes(&self, name: &str, shape: &[usize]) -> bool {
        if !name.ends_with(".weight") || shape.len() < 2 {
            return false;
        }
        let cols: usize = shape[1..].iter().product();
        if shape[0] < 2 || cols < 2 {
            return false;
        }
        match self {
            PruneScope::Hidden => !Self::is_boundary(name),
            PruneScope::Full => true,
        }
    }
}

/// Configuration for transposable N:M mask computation.
///
/// # Example
///
/// ```
/// use podar::prune::PruningConfig;
///
/// let config = PruningConfig::nm_2_4().with_mask_file("masks/resnet18.json");
/// assert_eq!(config.theoretical_sparsity(), 0.5);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Non-zeros kept per M-group.
    n: usize,

    /// Group size.
    m: usize,

    /// Which parameters are masked.
    #[serde(default)]
    scope: PruneScope,

    /// Load a precomputed mask instead of computing one.
    #[serde(default)]
    mask_file: Option<PathBuf>,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self::nm_4_8()
    }
}

impl PruningConfig {
    pub fn new(n: usize, m: usize) -> Self {
        Self { n, m, scope: PruneScope::default(), mask_file: None }
    }

    /// 2:4 pattern as used by sparse tensor cores.
    pub fn nm_2_4() -> Self {
        Self::new(2, 4)
    }

    /// 4:8 pattern, the default for transposable training.
    pub fn nm_4_8() -> Self {
        Self::new(4, 8)
    }

    /// Set the mask scope.
    pub fn with_scope(mut self, scope: PruneScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the path a precomputed mask is loaded from.
    pub fn with_mask_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask_file = Some(path.into());
        self
    }

    /// Get the number of kept weights per group.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Get the group size.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Get the mask scope.
    pub fn scope(&self) -> PruneScope {
        self.scope
    }

    /// Get the mask file path, if any.
    pub fn mask_file(&self) -> Option<&PathBuf> {
        self.mask_file.as_ref()
    }

    /// Sparsity a full tile achieves: `1 - n/m`.
    pub fn theoretical_sparsity(&self) -> f32 {
        1.0 - self.n as f32 / self.m as f32
    }

    /// Check pattern sanity: `0 < n < m`.
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.m == 0 || self.n >= self.m {
            return Err(PruneError::InvalidPattern { n: self.n, m: self.m });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_4_8() {
        // TEST_ID: PCFG-001
        let config = PruningConfig::default();
        assert_eq!(config.n(), 4);
        assert_eq!(config.m(), 8);
        assert_eq!(
            config.theoretical_sparsity(),
            0.5,
            "PCFG-001 FALSIFIED: 4:8 must give 50% sparsity"
        );
    }

    #[test]
    fn test_validate_rejects_degenerate_patterns() {
        // TEST_ID: PCFG-002
        assert!(PruningConfig::new(0, 8).validate().is_err());
        assert!(PruningConfig::new(8, 8).validate().is_err());
        assert!(PruningConfig::new(9, 8).validate().is_err());
        assert!(PruningConfig::new(4, 0).validate().is_err());
        assert!(
            PruningConfig::new(1, 2).validate().is_ok(),
            "PCFG-002 FALSIFIED: 1:2 is a legal pattern"
        );
    }

    #[test]
    fn test_scope_hidden_excludes_boundary_layers() {
        let scope = PruneScope::Hidden;
        assert!(!scope.includes("conv1.weight", &[64, 3, 7, 7]));
        assert!(!scope.includes("fc.weight", &[1000, 512]));
        assert!(scope.includes("layer1.0.conv1.weight", &[64, 64, 3, 3]));
    }

    #[test]
    fn test_scope_never_masks_vectors() {
        let scope = PruneScope::Full;
        assert!(!scope.includes("layer1.0.bn1.weight", &[64]));
        assert!(!scope.includes("layer1.0.conv1.bias", &[64]));
    }

    #[test]
    fn test_scope_full_includes_boundary_layers() {
        let scope = PruneScope::Full;
        assert!(scope.includes("conv1.weight", &[64, 3, 7, 7]));
        assert!(scope.includes("fc.weight", &[1000, 512]));
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = PruningConfig::nm_2_4().with_scope(PruneScope::Full);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: PruningConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, back);
    }
}
