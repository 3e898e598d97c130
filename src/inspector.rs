//! Developer inspector: a flat, depth-annotated view of the document with
//! editing, deletion and camera centering.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;

use glam::Vec3;
use log::debug;
use thiserror::Error;

use crate::camera::FreeCamera;
use crate::dom::Dom;
use crate::host::SceneHost;
use crate::vnode::{NodeKey, VirtualNode};

/// Offset from a centered object to the camera.
const CENTER_OFFSET: Vec3 = Vec3::new(0.0, 0.0, 5.0);

#[derive(Debug, Clone, PartialEq)]
pub struct InspectorEntry {
    pub key: NodeKey,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct Inspector {
    visible: bool,
    entries: Vec<InspectorEntry>,
    revision: Option<u64>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }

    pub fn entries(&self) -> &[InspectorEntry] {
        &self.entries
    }

    /// Rebuilds the entries from the document, depth-first.
    pub fn refresh(&mut self, dom: &Dom) {
        self.entries.clear();
        let entries = &mut self.entries;
        dom.with_root(|root| {
            if let Some(root) = root {
                collect(root, 0, entries);
            }
        });
        self.revision = Some(dom.revision());
    }

    /// Refreshes only when the document changed since the last refresh.
    pub fn refresh_if_changed(&mut self, dom: &Dom) -> bool {
        if self.revision == Some(dom.revision()) {
            return false;
        }
        self.refresh(dom);
        true
    }

    /// Writes the trimmed `value` into the node. Unknown keys return `false`.
    pub fn edit_attribute(&mut self, dom: &Dom, key: NodeKey, name: &str, value: &str) -> bool {
        let edited = dom.set_attribute(key, name, value.trim());
        if edited {
            self.refresh(dom);
        }
        edited
    }

    /// Removes the node and its subtree from its parent. The root and
    /// unknown keys are left alone.
    pub fn delete(&mut self, dom: &Dom, key: NodeKey) -> bool {
        match dom.remove(key) {
            Some(removed) => {
                debug!("deleted {} node(s) under {key}", removed.node_count());
                self.refresh(dom);
                true
            }
            None => false,
        }
    }

    /// Moves the camera in front of the object projected from `key`.
    pub fn center(&self, host: &SceneHost, camera: &mut FreeCamera, key: NodeKey) -> bool {
        let Some(object) = host.find(key) else {
            return false;
        };
        let world = host.world_position(key).unwrap_or(Vec3::ZERO);
        let target = if world == Vec3::ZERO {
            object.position
        } else {
            world
        };
        camera.position = target + CENTER_OFFSET;
        camera.look_at(target);
        true
    }

    /// Indented tree, one `<tag attr="value"> #key` line per node.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = write!(out, "{}<{}", "  ".repeat(entry.depth), entry.tag);
            for (name, value) in &entry.attributes {
                let _ = write!(out, " {name}=\"{value}\"");
            }
            let _ = writeln!(out, "> {}", entry.key);
        }
        out
    }
}

fn collect(node: &VirtualNode, depth: usize, entries: &mut Vec<InspectorEntry>) {
    entries.push(InspectorEntry {
        key: node.key(),
        tag: node.tag.clone(),
        attributes: node.attributes.clone(),
        depth,
    });
    for child in &node.children {
        collect(child, depth + 1, entries);
    }
}

/// Line typed into the developer console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tree,
    Dump,
    Set {
        key: NodeKey,
        name: String,
        value: String,
    },
    Delete(NodeKey),
    Center(NodeKey),
    Load(PathBuf),
    Lighting,
    Inspector,
    Help,
}

pub const HELP: &str = "\
commands:
  tree                       print the document tree
  dump                       print the document as markup
  set <key> <attr> <value>   set an attribute
  delete <key>               remove a node and its children
  center <key>               move the camera in front of a node
  load <path>                load another document
  lighting                   toggle ambient light
  inspector                  toggle the inspector
  help                       show this message";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("`{0}` is not a node key")]
    BadKey(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        match name {
            "" => Err(CommandError::Empty),
            "tree" => Ok(Self::Tree),
            "dump" => Ok(Self::Dump),
            "lighting" => Ok(Self::Lighting),
            "inspector" => Ok(Self::Inspector),
            "help" | "?" => Ok(Self::Help),
            "delete" => single_key(rest, "delete <key>").map(Self::Delete),
            "center" => single_key(rest, "center <key>").map(Self::Center),
            "load" if !rest.is_empty() => Ok(Self::Load(PathBuf::from(rest))),
            "load" => Err(CommandError::Usage("load <path>")),
            "set" => {
                const USAGE: &str = "set <key> <attr> <value>";
                let mut parts = rest.splitn(3, char::is_whitespace);
                let (Some(key), Some(name)) = (parts.next(), parts.next()) else {
                    return Err(CommandError::Usage(USAGE));
                };
                if key.is_empty() || name.is_empty() {
                    return Err(CommandError::Usage(USAGE));
                }
                Ok(Self::Set {
                    key: parse_key(key)?,
                    name: name.to_string(),
                    value: parts.next().unwrap_or("").to_string(),
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn single_key(rest: &str, usage: &'static str) -> Result<NodeKey, CommandError> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(CommandError::Usage(usage));
    }
    parse_key(rest)
}

/// Accepts `12` as well as `#12`, the form the tree listing prints.
fn parse_key(text: &str) -> Result<NodeKey, CommandError> {
    text.strip_prefix('#')
        .unwrap_or(text)
        .parse::<u64>()
        .map(NodeKey::from_raw)
        .map_err(|_| CommandError::BadKey(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{parse_document, ScriptRequest};

    fn loaded(markup: &str) -> (Dom, Inspector) {
        let dom = Dom::new();
        dom.replace_root(parse_document(markup, &mut Vec::<ScriptRequest>::new()).unwrap());
        let mut inspector = Inspector::new();
        inspector.refresh(&dom);
        (dom, inspector)
    }

    #[test]
    fn entries_follow_document_order_with_depth() {
        let (_, inspector) = loaded(r#"<space><group x="1"><model src="a.glb"/></group><box/></space>"#);
        let shape: Vec<(&str, usize)> = inspector
            .entries()
            .iter()
            .map(|entry| (entry.tag.as_str(), entry.depth))
            .collect();
        assert_eq!(shape, vec![("space", 0), ("group", 1), ("model", 2), ("box", 1)]);
        assert_eq!(inspector.entries()[1].attributes["x"], "1");
    }

    #[test]
    fn edits_are_trimmed_and_unknown_keys_ignored() {
        let (dom, mut inspector) = loaded("<space><box/></space>");
        let key = inspector.entries()[1].key;
        assert!(inspector.edit_attribute(&dom, key, "x", "  3.5 "));
        assert_eq!(dom.attribute(key, "x").as_deref(), Some("3.5"));
        assert_eq!(inspector.entries()[1].attributes["x"], "3.5");
        assert!(!inspector.edit_attribute(&dom, NodeKey::from_raw(u64::MAX), "x", "1"));
    }

    #[test]
    fn delete_removes_subtrees_but_not_the_root() {
        let (dom, mut inspector) = loaded("<space><group><box/></group><box/></space>");
        let root = inspector.entries()[0].key;
        let group = inspector.entries()[1].key;
        assert!(inspector.delete(&dom, group));
        assert_eq!(inspector.entries().len(), 2);
        assert!(!inspector.delete(&dom, root));
        assert!(!inspector.delete(&dom, group));
    }

    #[test]
    fn center_uses_world_position_or_falls_back_to_local() {
        let (dom, inspector) =
            loaded(r#"<space><group x="2"><box y="1"/></group><box/></space>"#);
        let mut host = SceneHost::new(dom.clone(), ".");
        host.sync();
        let mut camera = FreeCamera::new();

        let nested = inspector.entries()[2].key;
        assert!(inspector.center(&host, &mut camera, nested));
        assert_eq!(camera.position, Vec3::new(2.0, 1.0, 5.0));
        assert!((camera.direction() - Vec3::NEG_Z).length() < 1e-5);

        let at_origin = inspector.entries()[3].key;
        assert!(inspector.center(&host, &mut camera, at_origin));
        assert_eq!(camera.position, CENTER_OFFSET);

        assert!(!inspector.center(&host, &mut camera, NodeKey::from_raw(u64::MAX)));
    }

    #[test]
    fn refresh_if_changed_tracks_revisions() {
        let (dom, mut inspector) = loaded("<space/>");
        assert!(!inspector.refresh_if_changed(&dom));
        let root = inspector.entries()[0].key;
        dom.set_attribute(root, "name", "lobby");
        assert!(inspector.refresh_if_changed(&dom));
        assert!(inspector.render_text().starts_with("<space name=\"lobby\"> #"));
    }

    #[test]
    fn render_text_indents_children() {
        let (_, inspector) = loaded(r#"<space><model src="a.glb"/></space>"#);
        let text = inspector.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("  <model src=\"a.glb\"> #"));
    }

    #[test]
    fn toggle_flips_visibility() {
        let mut inspector = Inspector::new();
        assert!(!inspector.visible());
        assert!(inspector.toggle());
        assert!(!inspector.toggle());
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!("tree".parse(), Ok(Command::Tree));
        assert_eq!(" help ".parse(), Ok(Command::Help));
        assert_eq!("delete #4".parse(), Ok(Command::Delete(NodeKey::from_raw(4))));
        assert_eq!("center 7".parse(), Ok(Command::Center(NodeKey::from_raw(7))));
        assert_eq!(
            "set 3 name big ship".parse(),
            Ok(Command::Set {
                key: NodeKey::from_raw(3),
                name: "name".into(),
                value: "big ship".into(),
            })
        );
        assert_eq!(
            "load scenes/next.hsml".parse(),
            Ok(Command::Load(PathBuf::from("scenes/next.hsml")))
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "fly".parse::<Command>(),
            Err(CommandError::Unknown("fly".into()))
        );
        assert_eq!(
            "delete".parse::<Command>(),
            Err(CommandError::Usage("delete <key>"))
        );
        assert_eq!(
            "center abc".parse::<Command>(),
            Err(CommandError::BadKey("abc".into()))
        );
        assert!(matches!("set 3".parse::<Command>(), Err(CommandError::Usage(_))));
    }
}
