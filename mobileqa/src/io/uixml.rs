//! Parse uiautomator XML dumps into [`UiSnapshot`]s.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::core::ui::{Bounds, UiNode, UiSnapshot};

static BOUNDS_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("valid bounds regex")
});

/// Parse `[left,top][right,bottom]`; anything else yields an empty rectangle.
pub fn parse_bounds(raw: &str) -> Bounds {
    let Some(caps) = BOUNDS_RE.captures(raw.trim()) else {
        return Bounds::default();
    };
    let coord = |idx: usize| caps[idx].parse::<i32>().ok();
    match (coord(1), coord(2), coord(3), coord(4)) {
        (Some(left), Some(top), Some(right), Some(bottom)) => {
            Bounds::new(left, top, right, bottom)
        }
        _ => Bounds::default(),
    }
}

/// Flatten the dump in document order (pre-order, parents first).
///
/// The root `hierarchy` element is included as a node like any other.
pub fn parse_snapshot(xml: &str) -> Result<UiSnapshot> {
    let start = xml
        .find('<')
        .ok_or_else(|| anyhow!("UI dump contains no XML"))?;
    let mut reader = Reader::from_str(&xml[start..]);
    let mut nodes = Vec::new();

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("parse UI XML at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(element) | Event::Empty(element) => nodes.push(node_from(&element)?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(UiSnapshot::new(nodes))
}

fn node_from(element: &BytesStart<'_>) -> Result<UiNode> {
    let mut node = UiNode {
        tag: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
        enabled: true,
        ..UiNode::default()
    };

    for attr in element.attributes() {
        let attr = attr.context("read UI XML attribute")?;
        let value = attr
            .unescape_value()
            .context("unescape UI XML attribute")?
            .into_owned();
        let flag = value == "true";
        match attr.key.as_ref() {
            b"index" => node.index = value.parse().unwrap_or(0),
            b"text" => node.text = value,
            b"resource-id" => node.resource_id = value,
            b"class" => node.class_name = value,
            b"package" => node.package = value,
            b"content-desc" => node.content_desc = value,
            b"checkable" => node.checkable = flag,
            b"checked" => node.checked = flag,
            b"clickable" => node.clickable = flag,
            b"enabled" => node.enabled = flag,
            b"focusable" => node.focusable = flag,
            b"focused" => node.focused = flag,
            b"scrollable" => node.scrollable = flag,
            b"long-clickable" => node.long_clickable = flag,
            b"password" => node.password = flag,
            b"selected" => node.selected = flag,
            b"bounds" => node.bounds = parse_bounds(&value),
            _ => {}
        }
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="md.obsidian" content-desc="" clickable="false" bounds="[0,0][1080,2400]">
    <node index="0" text="Create new vault" resource-id="md.obsidian:id/create" class="android.widget.Button" package="md.obsidian" content-desc="" clickable="true" enabled="true" bounds="[100,900][980,1040]" />
    <node index="1" text="Notes &amp; ideas" class="android.widget.EditText" focused="true" enabled="false" bounds="garbage" />
  </node>
</hierarchy>
UI hierchary dumped to: /dev/tty"#;

    #[test]
    fn flattens_in_pre_order_including_root() {
        let snapshot = parse_snapshot(DUMP).expect("parse");
        let tags: Vec<&str> = snapshot.nodes().iter().map(|n| n.tag.as_str()).collect();
        assert_eq!(tags, vec!["hierarchy", "node", "node", "node"]);
        assert_eq!(snapshot.nodes()[2].text, "Create new vault");
        assert_eq!(snapshot.nodes()[3].text, "Notes & ideas");
    }

    #[test]
    fn applies_uiautomator_defaults() {
        let snapshot = parse_snapshot(DUMP).expect("parse");
        let root = &snapshot.nodes()[0];
        assert!(root.enabled);
        assert!(!root.clickable);

        let button = &snapshot.nodes()[2];
        assert!(button.clickable);
        assert_eq!(button.bounds, Bounds::new(100, 900, 980, 1040));
        assert_eq!(button.center(), (540, 970));

        let field = &snapshot.nodes()[3];
        assert!(!field.enabled);
        assert!(field.focused);
        assert_eq!(field.index, 1);
        assert_eq!(field.bounds, Bounds::default());
    }

    #[test]
    fn bounds_parse_or_default() {
        assert_eq!(parse_bounds("[0,63][1080,210]"), Bounds::new(0, 63, 1080, 210));
        assert_eq!(parse_bounds("[1,2]"), Bounds::default());
    }

    #[test]
    fn rejects_non_xml_dump() {
        assert!(parse_snapshot("ERROR: null root node returned by UiTestAutomationBridge.").is_err());
    }
}
