//! Table version gate and layout selection.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};

/// Table versions this reader understands.
pub const SUPPORTED_VERSIONS: [i32; 8] = [20000, 21000, 22000, 23000, 23500, 23600, 24000, 25000];

/// First version using the v2.4 coefficient layout.
pub const V24_THRESHOLD: i32 = 24000;

/// Check `version` against the statically known set.
pub fn check_version(version: i32) -> Result<bool> {
    check_version_in(version, &SUPPORTED_VERSIONS)
}

/// Check `version` against `allowed`, which must itself be drawn from
/// [`SUPPORTED_VERSIONS`]; versions outside the known set never pass.
pub fn check_version_in(version: i32, allowed: &[i32]) -> Result<bool> {
    if SUPPORTED_VERSIONS.contains(&version) && allowed.contains(&version) {
        return Ok(true);
    }
    let supported: Vec<i32> =
        SUPPORTED_VERSIONS.iter().copied().filter(|v| allowed.contains(v)).collect();
    log::error!("table version {} is incompatible; supported: {:?}", version, supported);
    Err(TableError::UnsupportedVersion { version, supported })
}

/// On-disk layout family of the coefficient blocks.
///
/// Chosen once, right after the version gate; readers dispatch on it instead
/// of re-testing version thresholds at every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableLayout {
    /// v2.0 – v2.3: inline `Nevt`, optionally followed by a marked
    /// statistics block.
    Legacy,
    /// v2.4+: tagged additive blocks, explicit statistics block and extra
    /// unused sections around the scale definitions.
    V24,
}

impl TableLayout {
    /// Layout for an already gated version.
    pub fn for_version(version: i32) -> Self {
        if version >= V24_THRESHOLD { TableLayout::V24 } else { TableLayout::Legacy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn known_versions_pass() {
        for v in SUPPORTED_VERSIONS {
            assert!(check_version(v).unwrap());
        }
    }

    #[test]
    fn unknown_versions_fail() {
        for v in [0, 14000, 23601, 26000, -20000] {
            let err = check_version(v).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
        }
    }

    #[test]
    fn restricted_set_cannot_widen() {
        assert!(check_version_in(23600, &[23600]).unwrap());
        assert!(check_version_in(24000, &[23600]).is_err());
        assert!(check_version_in(30000, &[30000]).is_err());
    }

    #[test]
    fn layout_threshold() {
        assert_eq!(TableLayout::for_version(23600), TableLayout::Legacy);
        assert_eq!(TableLayout::for_version(24000), TableLayout::V24);
        assert_eq!(TableLayout::for_version(25000), TableLayout::V24);
    }
}
