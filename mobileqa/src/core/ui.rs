//! UI snapshot model and element resolution.
//!
//! A snapshot is the pre-order traversal of the device UI tree. All queries in
//! this module are pure and deterministic: ties always resolve to the first
//! candidate in traversal order.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Reference point used to rank non-clickable candidates.
///
/// Roughly the middle of a 1080px-wide portrait phone. This is a fixed
/// placeholder, not a measured device property.
pub const REFERENCE_POINT: (i32, i32) = (540, 1000);

/// Class-name fragment identifying editable text fields.
const EDITABLE_CLASS: &str = "EditText";

/// Text fragment that marks a title field still in its placeholder state.
const PLACEHOLDER_TITLE: &str = "untitled";

/// Bounding rectangle in screen pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Integer midpoint of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        (
            ((i64::from(self.left) + i64::from(self.right)) / 2) as i32,
            ((i64::from(self.top) + i64::from(self.bottom)) / 2) as i32,
        )
    }
}

/// One element of the on-device UI tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UiNode {
    pub tag: String,
    pub index: u32,
    pub text: String,
    pub resource_id: String,
    pub class_name: String,
    pub package: String,
    pub content_desc: String,
    pub checkable: bool,
    pub checked: bool,
    pub clickable: bool,
    pub enabled: bool,
    pub focusable: bool,
    pub focused: bool,
    pub scrollable: bool,
    pub long_clickable: bool,
    pub password: bool,
    pub selected: bool,
    pub bounds: Bounds,
}

impl UiNode {
    pub fn center(&self) -> (i32, i32) {
        self.bounds.center()
    }

    pub fn area(&self) -> i64 {
        self.bounds.area()
    }

    pub fn is_editable(&self) -> bool {
        self.enabled && self.class_name.contains(EDITABLE_CLASS)
    }

    fn is_placeholder_title(&self) -> bool {
        self.text.to_lowercase().contains(PLACEHOLDER_TITLE)
    }
}

/// Immutable, ordered capture of the UI tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UiSnapshot {
    nodes: Vec<UiNode>,
}

impl UiSnapshot {
    pub fn new(nodes: Vec<UiNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[UiNode] {
        &self.nodes
    }

    /// Tiered text lookup; see [`find_by_text`].
    pub fn find_by_text(&self, text: &str, exact: bool) -> Vec<&UiNode> {
        find_by_text(&self.nodes, text, exact)
    }

    /// Resolve `text` to a single canonical target.
    pub fn resolve(&self, text: &str, exact: bool) -> Option<&UiNode> {
        choose_best_match(&self.find_by_text(text, exact))
    }

    /// All nodes whose text or description equals or contains `token`.
    pub fn find_containing(&self, token: &str) -> Vec<&UiNode> {
        find_by_text(&self.nodes, token, false)
    }

    pub fn clickable(&self) -> Vec<&UiNode> {
        self.nodes
            .iter()
            .filter(|node| node.clickable && node.enabled)
            .collect()
    }

    pub fn editable_fields(&self) -> Vec<&UiNode> {
        self.nodes.iter().filter(|node| node.is_editable()).collect()
    }

    /// Pick the editable field that should receive text for `role`.
    pub fn select_input_field(&self, role: FieldRole) -> Option<&UiNode> {
        select_input_field(&self.editable_fields(), role)
    }

    /// Human-readable summary of the interesting nodes, one per line.
    pub fn summary(&self) -> String {
        render_summary(&self.nodes)
    }
}

/// Logical role of a text field targeted by an input action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FieldRole {
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "body")]
    Body,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl FieldRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "title" => Some(Self::Title),
            "body" => Some(Self::Body),
            "" => Some(Self::Unspecified),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Body => "body",
            Self::Unspecified => "",
        }
    }
}

/// Find nodes by text or content description.
///
/// Tiers are evaluated in order and the first non-empty tier wins:
/// 1. case-sensitive exact match
/// 2. case-insensitive exact match
/// 3. case-insensitive substring match
///
/// With `exact` set only tier 1 is considered.
pub fn find_by_text<'a>(nodes: &'a [UiNode], text: &str, exact: bool) -> Vec<&'a UiNode> {
    let needle = text.to_lowercase();
    let mut exact_matches = Vec::new();
    let mut folded_matches = Vec::new();
    let mut substring_matches = Vec::new();

    for node in nodes {
        if node.text == text || node.content_desc == text {
            exact_matches.push(node);
            continue;
        }
        if exact {
            continue;
        }
        let node_text = node.text.to_lowercase();
        let node_desc = node.content_desc.to_lowercase();
        if node_text == needle || node_desc == needle {
            folded_matches.push(node);
            continue;
        }
        if node_text.contains(&needle) || node_desc.contains(&needle) {
            substring_matches.push(node);
        }
    }

    if !exact_matches.is_empty() {
        return exact_matches;
    }
    if !folded_matches.is_empty() {
        return folded_matches;
    }
    substring_matches
}

/// Select one canonical target among candidates.
///
/// Clickable candidates win, largest area first. Without clickable candidates
/// the one closest to [`REFERENCE_POINT`] is chosen.
pub fn choose_best_match<'a>(candidates: &[&'a UiNode]) -> Option<&'a UiNode> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        _ => {
            let clickable: Vec<&UiNode> = candidates
                .iter()
                .copied()
                .filter(|node| node.clickable)
                .collect();
            if !clickable.is_empty() {
                return first_max_by_key(&clickable, |node| node.area());
            }
            first_max_by_key(candidates, |node| {
                std::cmp::Reverse(squared_distance(node.center(), REFERENCE_POINT))
            })
        }
    }
}

/// Editable-field heuristic for text input.
///
/// Takes the already filtered, enabled editable candidates in traversal order.
pub fn select_input_field<'a>(candidates: &[&'a UiNode], role: FieldRole) -> Option<&'a UiNode> {
    if candidates.is_empty() {
        return None;
    }
    let mut by_top: Vec<&UiNode> = candidates.to_vec();
    // Stable: equal tops keep traversal order.
    by_top.sort_by_key(|node| node.bounds.top);

    match role {
        FieldRole::Title => candidates
            .iter()
            .copied()
            .find(|node| node.is_placeholder_title())
            .or_else(|| by_top.first().copied()),
        FieldRole::Body => {
            if candidates.len() < 2 {
                return candidates.first().copied();
            }
            let non_placeholder: Vec<&UiNode> = candidates
                .iter()
                .copied()
                .filter(|node| !node.is_placeholder_title())
                .collect();
            let Some(largest) = first_max_by_key(&non_placeholder, |node| node.area()) else {
                return Some(by_top[1]);
            };
            if std::ptr::eq(largest, by_top[0]) {
                return Some(by_top[1]);
            }
            Some(largest)
        }
        FieldRole::Unspecified => {
            if let Some(focused) = candidates.iter().copied().find(|node| node.focused) {
                return Some(focused);
            }
            by_top.first().copied()
        }
    }
}

/// Lowercase hex SHA-256 of a rendered summary, used for stall detection.
pub fn digest(summary: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    hex::encode(hasher.finalize())
}

fn render_summary(nodes: &[UiNode]) -> String {
    let mut lines = Vec::new();
    for node in nodes {
        if node.text.is_empty() && node.content_desc.is_empty() && !node.clickable {
            continue;
        }
        let mut parts = Vec::new();
        if !node.text.is_empty() {
            parts.push(format!("text=\"{}\"", node.text));
        }
        if !node.content_desc.is_empty() {
            parts.push(format!("desc=\"{}\"", node.content_desc));
        }
        if !node.resource_id.is_empty() {
            let short = node
                .resource_id
                .rsplit('/')
                .next()
                .unwrap_or(&node.resource_id);
            parts.push(format!("id={short}"));
        }

        let mut attrs = Vec::new();
        if node.clickable {
            attrs.push("clickable");
        }
        if node.scrollable {
            attrs.push("scrollable");
        }
        if node.checked {
            attrs.push("checked");
        }
        if !node.enabled {
            attrs.push("disabled");
        }
        if !attrs.is_empty() {
            parts.push(format!("[{}]", attrs.join(",")));
        }

        let b = node.bounds;
        parts.push(format!(
            "bounds=({}, {}, {}, {})",
            b.left, b.top, b.right, b.bottom
        ));
        lines.push(parts.join(" "));
    }
    lines.join("\n")
}

fn squared_distance(a: (i32, i32), b: (i32, i32)) -> i64 {
    let dx = i64::from(a.0) - i64::from(b.0);
    let dy = i64::from(a.1) - i64::from(b.1);
    dx * dx + dy * dy
}

/// Like `Iterator::max_by_key` but keeps the first maximum instead of the last.
fn first_max_by_key<'a, K: Ord>(
    nodes: &[&'a UiNode],
    key: impl Fn(&UiNode) -> K,
) -> Option<&'a UiNode> {
    let mut best: Option<(&UiNode, K)> = None;
    for node in nodes {
        let k = key(node);
        match &best {
            Some((_, best_key)) if k <= *best_key => {}
            _ => best = Some((*node, k)),
        }
    }
    best.map(|(node, _)| node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{button, edit_text, label};
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_case_sensitive_tier_wins_over_looser_tiers() {
        let nodes = vec![
            label("create note", Bounds::new(0, 0, 100, 50)),
            label("Create", Bounds::new(0, 100, 100, 150)),
            label("CREATE", Bounds::new(0, 200, 100, 250)),
        ];
        let found = find_by_text(&nodes, "Create", false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "Create");
    }

    #[test]
    fn case_insensitive_tier_beats_substring() {
        let nodes = vec![
            label("Create new note", Bounds::new(0, 0, 100, 50)),
            label("CREATE", Bounds::new(0, 100, 100, 150)),
        ];
        let found = find_by_text(&nodes, "create", false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "CREATE");
    }

    #[test]
    fn substring_tier_matches_description_too() {
        let mut settings = label("", Bounds::new(0, 0, 10, 10));
        settings.content_desc = "Open settings".to_string();
        let nodes = vec![settings];
        assert_eq!(find_by_text(&nodes, "settings", false).len(), 1);
        assert!(find_by_text(&nodes, "settings", true).is_empty());
    }

    #[test]
    fn exact_only_skips_folded_and_substring_tiers() {
        let nodes = vec![label("CREATE", Bounds::new(0, 0, 10, 10))];
        assert!(find_by_text(&nodes, "Create", true).is_empty());
    }

    #[test]
    fn clickable_largest_area_is_preferred() {
        let small = button("OK", Bounds::new(0, 0, 100, 100));
        let large = button("OK", Bounds::new(0, 200, 300, 400));
        let plain = label("OK", Bounds::new(0, 0, 1000, 1000));
        let candidates = vec![&plain, &small, &large];
        let chosen = choose_best_match(&candidates).expect("chosen");
        assert_eq!(chosen.bounds, large.bounds);
    }

    #[test]
    fn area_ties_resolve_to_first_in_traversal_order() {
        let first = button("OK", Bounds::new(0, 0, 100, 100));
        let second = button("OK", Bounds::new(500, 500, 600, 600));
        let candidates = vec![&first, &second];
        let chosen = choose_best_match(&candidates).expect("chosen");
        assert_eq!(chosen.bounds, first.bounds);
    }

    #[test]
    fn non_clickable_candidates_rank_by_distance_to_reference_point() {
        let far = label("Title", Bounds::new(0, 0, 100, 100));
        let near = label("Title", Bounds::new(500, 950, 580, 1050));
        let candidates = vec![&far, &near];
        let chosen = choose_best_match(&candidates).expect("chosen");
        assert_eq!(chosen.bounds, near.bounds);
    }

    #[test]
    fn disambiguation_is_deterministic() {
        let nodes = vec![
            label("Item", Bounds::new(0, 0, 100, 100)),
            label("Item", Bounds::new(980, 1900, 1080, 2000)),
            label("Item", Bounds::new(100, 100, 200, 200)),
        ];
        let snapshot = UiSnapshot::new(nodes);
        let first = snapshot.resolve("Item", false).cloned();
        let second = snapshot.resolve("Item", false).cloned();
        assert_eq!(first, second);
    }

    #[test]
    fn clickable_query_requires_enabled() {
        let mut disabled = button("Save", Bounds::new(0, 0, 10, 10));
        disabled.enabled = false;
        let snapshot = UiSnapshot::new(vec![disabled, button("Cancel", Bounds::new(0, 0, 5, 5))]);
        let clickable = snapshot.clickable();
        assert_eq!(clickable.len(), 1);
        assert_eq!(clickable[0].text, "Cancel");
    }

    #[test]
    fn title_role_prefers_placeholder_text() {
        let body = edit_text("", Bounds::new(0, 100, 1080, 300));
        let title = edit_text("Untitled", Bounds::new(0, 400, 1080, 500));
        let snapshot = UiSnapshot::new(vec![body, title]);
        let chosen = snapshot.select_input_field(FieldRole::Title).expect("title");
        assert_eq!(chosen.text, "Untitled");
    }

    #[test]
    fn title_role_falls_back_to_topmost() {
        let lower = edit_text("", Bounds::new(0, 400, 1080, 500));
        let upper = edit_text("", Bounds::new(0, 100, 1080, 200));
        let snapshot = UiSnapshot::new(vec![lower, upper]);
        let chosen = snapshot.select_input_field(FieldRole::Title).expect("title");
        assert_eq!(chosen.bounds.top, 100);
    }

    #[test]
    fn body_role_takes_largest_non_title_field() {
        let title = edit_text("Untitled", Bounds::new(0, 100, 1080, 200));
        let body = edit_text("", Bounds::new(0, 220, 1080, 1800));
        let snapshot = UiSnapshot::new(vec![title, body]);
        let chosen = snapshot.select_input_field(FieldRole::Body).expect("body");
        assert_eq!(chosen.bounds.top, 220);
    }

    #[test]
    fn body_role_skips_largest_when_it_is_topmost() {
        let title = edit_text("Groceries", Bounds::new(0, 100, 1080, 900));
        let body = edit_text("", Bounds::new(0, 920, 1080, 1000));
        let snapshot = UiSnapshot::new(vec![title, body]);
        let chosen = snapshot.select_input_field(FieldRole::Body).expect("body");
        assert_eq!(chosen.bounds.top, 920);
    }

    #[test]
    fn body_role_skips_placeholder_title_even_when_largest() {
        let title = edit_text("Untitled", Bounds::new(0, 100, 1080, 1500));
        let body = edit_text("", Bounds::new(0, 1600, 1080, 1700));
        let footer = edit_text("", Bounds::new(0, 1800, 1080, 1850));
        let snapshot = UiSnapshot::new(vec![title, body, footer]);
        let chosen = snapshot.select_input_field(FieldRole::Body).expect("body");
        assert_eq!(chosen.bounds.top, 1600);
    }

    #[test]
    fn body_role_with_single_field_uses_it() {
        let only = edit_text("", Bounds::new(0, 100, 1080, 200));
        let snapshot = UiSnapshot::new(vec![only]);
        let chosen = snapshot.select_input_field(FieldRole::Body).expect("body");
        assert_eq!(chosen.bounds.top, 100);
    }

    #[test]
    fn unspecified_role_prefers_focused_then_topmost() {
        let mut focused = edit_text("", Bounds::new(0, 500, 1080, 600));
        focused.focused = true;
        let top = edit_text("", Bounds::new(0, 100, 1080, 200));
        let snapshot = UiSnapshot::new(vec![top.clone(), focused]);
        let chosen = snapshot
            .select_input_field(FieldRole::Unspecified)
            .expect("field");
        assert_eq!(chosen.bounds.top, 500);

        let lower = edit_text("", Bounds::new(0, 700, 1080, 800));
        let snapshot = UiSnapshot::new(vec![lower, top]);
        let chosen = snapshot
            .select_input_field(FieldRole::Unspecified)
            .expect("field");
        assert_eq!(chosen.bounds.top, 100);
    }

    #[test]
    fn disabled_fields_are_not_editable() {
        let mut field = edit_text("", Bounds::new(0, 0, 10, 10));
        field.enabled = false;
        let snapshot = UiSnapshot::new(vec![field]);
        assert!(snapshot.select_input_field(FieldRole::Unspecified).is_none());
    }

    #[test]
    fn summary_lists_interesting_nodes_only() {
        let mut settings = button("", Bounds::new(10, 20, 30, 40));
        settings.content_desc = "Settings".to_string();
        settings.resource_id = "md.obsidian:id/gear".to_string();
        let hidden = UiNode {
            class_name: "android.widget.FrameLayout".to_string(),
            enabled: true,
            ..UiNode::default()
        };
        let mut disabled = label("Sync", Bounds::new(0, 0, 1, 1));
        disabled.enabled = false;
        let snapshot = UiSnapshot::new(vec![hidden, settings, disabled]);

        assert_eq!(
            snapshot.summary(),
            "desc=\"Settings\" id=gear [clickable] bounds=(10, 20, 30, 40)\n\
             text=\"Sync\" [disabled] bounds=(0, 0, 1, 1)"
        );
    }

    #[test]
    fn digest_is_stable_hex() {
        let a = digest("text=\"OK\"");
        assert_eq!(a, digest("text=\"OK\""));
        assert_ne!(a, digest("text=\"Cancel\""));
        assert_eq!(a.len(), 64);
    }
}
