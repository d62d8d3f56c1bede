//! Manifest reconciliation against the published copy
//!
//! Decides whether a freshly built manifest needs to be written. The
//! `updated` field is excluded from the comparison and carried forward when
//! the content is otherwise unchanged, so no-op rebuilds never churn the
//! committed file.

use crate::release::manifest::{ManifestError, ReleaseManifest};

/// Outcome of reconciling a fresh manifest with the published text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Canonical text to publish
    pub text: String,

    /// Whether the published file differs from `text`
    pub changed: bool,
}

/// Reconcile `manifest` with the previously published text.
///
/// A present-but-unparseable previous text is fatal: silently overwriting a
/// corrupted manifest would hide the corruption.
pub fn plan_update(
    mut manifest: ReleaseManifest,
    previous_text: Option<&str>,
) -> Result<UpdatePlan, ManifestError> {
    let Some(previous) = previous_text else {
        let text = manifest.to_text()?;
        return Ok(UpdatePlan { text, changed: true });
    };

    let published = ReleaseManifest::from_text(previous)
        .map_err(|source| ManifestError::PreviousManifest { source })?;

    if manifest.content_matches(&published) {
        manifest.updated = published.updated;
    }

    let text = manifest.to_text()?;
    let changed = text != previous;
    Ok(UpdatePlan { text, changed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::manifest::{KeyBlock, SCHEMA_TAG};

    fn manifest(updated: &str, fingerprint: &str) -> ReleaseManifest {
        ReleaseManifest {
            schema: SCHEMA_TAG.to_string(),
            updated: updated.to_string(),
            key: KeyBlock {
                fingerprint_current: fingerprint.to_string(),
                path: "keys/publickey.asc".to_string(),
            },
            releases: Vec::new(),
        }
    }

    const FPR_A: &str = "0123456789ABCDEF0123456789ABCDEF01234567";
    const FPR_B: &str = "89ABCDEF0123456789ABCDEF0123456789ABCDEF";

    #[test]
    fn test_no_previous_text_needs_write() {
        let fresh = manifest("2024-06-15T00:00:00Z", FPR_A);
        let plan = plan_update(fresh.clone(), None).unwrap();
        assert!(plan.changed);
        assert_eq!(plan.text, fresh.to_text().unwrap());
    }

    #[test]
    fn test_unchanged_content_keeps_previous_updated() {
        let published = manifest("2024-06-15T00:00:00Z", FPR_A);
        let previous_text = published.to_text().unwrap();

        // A rebuild that only moved the wall clock.
        let fresh = manifest("2025-01-01T00:00:00Z", FPR_A);
        let plan = plan_update(fresh, Some(&previous_text)).unwrap();
        assert!(!plan.changed);
        assert_eq!(plan.text, previous_text);
    }

    #[test]
    fn test_changed_content_takes_fresh_updated() {
        let published = manifest("2024-06-15T00:00:00Z", FPR_A);
        let previous_text = published.to_text().unwrap();

        let fresh = manifest("2025-01-01T00:00:00Z", FPR_B);
        let plan = plan_update(fresh, Some(&previous_text)).unwrap();
        assert!(plan.changed);
        assert!(plan.text.contains("2025-01-01T00:00:00Z"));
        assert!(plan.text.contains(FPR_B));
    }

    #[test]
    fn test_unparseable_previous_text_is_fatal() {
        let fresh = manifest("2024-06-15T00:00:00Z", FPR_A);
        let result = plan_update(fresh, Some("{ not json"));
        assert!(matches!(
            result,
            Err(ManifestError::PreviousManifest { .. })
        ));
    }

    #[test]
    fn test_wrong_shape_previous_text_is_fatal() {
        let fresh = manifest("2024-06-15T00:00:00Z", FPR_A);
        let result = plan_update(fresh, Some(r#"{"schema": "letter/releases#2"}"#));
        assert!(matches!(
            result,
            Err(ManifestError::PreviousManifest { .. })
        ));
    }

    #[test]
    fn test_idempotent_over_unchanged_inputs() {
        let published = manifest("2024-06-15T00:00:00Z", FPR_A);
        let previous_text = published.to_text().unwrap();

        let first = plan_update(manifest("2026-02-02T00:00:00Z", FPR_A), Some(&previous_text))
            .unwrap();
        let second = plan_update(manifest("2027-03-03T00:00:00Z", FPR_A), Some(&first.text))
            .unwrap();
        assert!(!first.changed);
        assert!(!second.changed);
        assert_eq!(first.text, second.text);
    }
}
