//! Action plans and the plain-text messages built from them.
//!
//! Every message carries the line that the suggestions are not a medical
//! diagnosis or treatment.

use serde::Serialize;

use crate::risk::RiskLevel;
use crate::weather::CoolingResource;

/// Header placed above every list of suggestions.
pub const NOT_MEDICAL_ADVICE: &str = "Suggested actions (not a medical diagnosis or treatment):";

/// Cooling spots listed in a community message.
pub const MAX_LISTED_RESOURCES: usize = 3;

/// One suggested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionItem {
    /// Stable identifier submitted back on confirmation.
    pub id: &'static str,
    /// Short title.
    pub title: &'static str,
    /// One-line detail.
    pub detail: &'static str,
}

const EXTREME_PLAN: [ActionItem; 3] = [
    ActionItem {
        id: "stay_cool",
        title: "Stay somewhere cool",
        detail: "Stay indoors in the coolest room and avoid going out.",
    },
    ActionItem {
        id: "contact_now",
        title: "Contact someone now",
        detail: "Call your caregiver or a neighbor and tell them how you are.",
    },
    ActionItem {
        id: "cooling_center",
        title: "Go to a cooling spot",
        detail: "If home stays hot, go to a nearby cooling center.",
    },
];

const HIGH_PLAN: [ActionItem; 3] = [
    ActionItem {
        id: "stay_indoor",
        title: "Stay in the shade",
        detail: "Keep indoors or in shade and avoid going out around noon.",
    },
    ActionItem {
        id: "hydrate",
        title: "Drink often",
        detail: "Take small sips of water often, even without thirst.",
    },
    ActionItem {
        id: "check_in",
        title: "Check in today",
        detail: "Confirm today so your caregiver knows you are fine.",
    },
];

const MEDIUM_PLAN: [ActionItem; 3] = [
    ActionItem {
        id: "avoid_sun",
        title: "Limit time in the sun",
        detail: "Split outdoor errands into short trips.",
    },
    ActionItem {
        id: "cooling",
        title: "Cool down",
        detail: "Use a fan or a damp towel to cool off.",
    },
    ActionItem {
        id: "watch_signs",
        title: "Watch how you feel",
        detail: "Rest right away if you feel dizzy or unwell.",
    },
];

const LOW_PLAN: [ActionItem; 3] = [
    ActionItem {
        id: "water",
        title: "Drink regularly",
        detail: "Keep a regular drinking routine through the day.",
    },
    ActionItem {
        id: "ventilate",
        title: "Air the home",
        detail: "Open windows in the morning and evening.",
    },
    ActionItem {
        id: "shade",
        title: "Protect from the sun",
        detail: "Wear a hat or use an umbrella outdoors.",
    },
];

/// The three suggested actions for a risk level. Unknown risk gets the low plan.
#[must_use]
pub fn action_plan(level: Option<RiskLevel>) -> &'static [ActionItem] {
    match level {
        Some(RiskLevel::Extreme) => &EXTREME_PLAN,
        Some(RiskLevel::High) => &HIGH_PLAN,
        Some(RiskLevel::Medium) => &MEDIUM_PLAN,
        Some(RiskLevel::Low) | None => &LOW_PLAN,
    }
}

/// Ids from `submitted` that belong to the plan for `level`, deduplicated.
#[must_use]
pub fn known_action_ids<S: AsRef<str>>(level: Option<RiskLevel>, submitted: &[S]) -> Vec<&'static str> {
    let mut ids = Vec::new();
    for raw in submitted {
        let raw = raw.as_ref().trim();
        if let Some(item) = action_plan(level).iter().find(|item| item.id == raw) {
            if !ids.contains(&item.id) {
                ids.push(item.id);
            }
        }
    }
    ids
}

fn risk_label(level: Option<RiskLevel>) -> &'static str {
    level.map_or("unknown", |level| level.as_str())
}

fn push_plan(lines: &mut Vec<String>, level: Option<RiskLevel>) {
    lines.push(NOT_MEDICAL_ADVICE.to_string());
    lines.extend(
        action_plan(level)
            .iter()
            .map(|item| format!("- {}: {}", item.title, item.detail)),
    );
}

/// Reminder a caregiver forwards to the person they look after.
///
/// The short code and link lines are left out when not given.
#[must_use]
pub fn caregiver_message(
    community_code: &str,
    level: Option<RiskLevel>,
    short_code: Option<&str>,
    action_link: Option<&str>,
) -> String {
    let mut lines = vec![
        "[Heat action reminder]".to_string(),
        format!("Community: {community_code}"),
        format!("Today's heat risk: {}", risk_label(level)),
    ];
    if let Some(link) = action_link {
        lines.push(format!("Action page: {link}"));
    }
    if let Some(code) = short_code {
        lines.push(format!("Short code: {code}"));
    }
    push_plan(&mut lines, level);
    lines.push("If you need help, press \"I need help\" on the action page.".to_string());
    lines.join("\n")
}

/// Notice for community staff to post or send out.
#[must_use]
pub fn community_message(
    community_code: &str,
    level: Option<RiskLevel>,
    resources: &[CoolingResource],
    action_link: Option<&str>,
) -> String {
    let mut lines = vec![
        "[Community heat notice]".to_string(),
        format!("Community: {community_code}"),
        format!("Today's heat risk: {}", risk_label(level)),
    ];
    push_plan(&mut lines, level);
    if !resources.is_empty() {
        lines.push("Nearby cooling spots:".to_string());
        lines.extend(
            resources
                .iter()
                .take(MAX_LISTED_RESOURCES)
                .map(|resource| format!("- {resource}")),
        );
    }
    if let Some(link) = action_link {
        lines.push(format!("Action page: {link}"));
    }
    lines.push("Contact community staff if you need help.".to_string());
    lines.join("\n")
}
