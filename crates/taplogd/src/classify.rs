//! Usage classification collaborator.
//!
//! Called once per run on the trigger metadata. Pure - no I/O, no clock.

use taplog_common::{TriggerInfo, UsageCategory};

pub trait UsageClassifier: Send + Sync {
    fn classify(&self, trigger: &TriggerInfo) -> UsageCategory;
}

/// Keyword rules over the source app and tag token.
pub struct RuleClassifier;

impl UsageClassifier for RuleClassifier {
    fn classify(&self, trigger: &TriggerInfo) -> UsageCategory {
        let haystack = format!(
            "{} {}",
            trigger.source_app.as_deref().unwrap_or(""),
            trigger.tag_token.as_deref().unwrap_or("")
        )
        .to_lowercase();

        let matches_any = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

        if matches_any(&["transit", "maps", "navigation", "commute"]) {
            UsageCategory::Commute
        } else if matches_any(&["slack", "mail", "calendar", "office", "desk"]) {
            UsageCategory::Work
        } else if matches_any(&["home", "kitchen", "bedroom"]) {
            UsageCategory::Home
        } else if matches_any(&["shop", "store", "errand"]) {
            UsageCategory::Errand
        } else if matches_any(&["gym", "music", "game", "leisure"]) {
            UsageCategory::Leisure
        } else {
            UsageCategory::Unknown
        }
    }
}
