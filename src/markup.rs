//! HSML markup parsing.
//!
//! Markup is plain XML. The first `<space>` element is the scene root; every
//! element below it becomes a [`VirtualNode`] except `<script>`, which only
//! requests that a script be loaded.
//!
//! Tag and attribute names keep their namespace prefix (`h:model`,
//! `xlink:href`). Namespace declarations themselves are not copied.

use roxmltree::{Document, Node, ParsingOptions};
use thiserror::Error;

use crate::vnode::VirtualNode;

/// Tag intercepted by the parser instead of becoming a node.
pub const SCRIPT_TAG: &str = "script";

/// Tag of the element that roots a scene.
pub const SPACE_TAG: &str = "space";

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("invalid HSML markup: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("no <space> element found in the document")]
    MissingSpace,
}

/// Script referenced by a `<script src>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub src: String,
}

/// Receives script-load requests discovered while parsing.
pub trait ScriptSink {
    fn request_script(&mut self, request: ScriptRequest);
}

impl ScriptSink for Vec<ScriptRequest> {
    fn request_script(&mut self, request: ScriptRequest) {
        self.push(request);
    }
}

/// Parses a full document and returns the tree rooted at its `<space>`.
pub fn parse_document(text: &str, scripts: &mut dyn ScriptSink) -> Result<VirtualNode, MarkupError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(text, options)?;
    let space = document
        .descendants()
        .find(|node| node.has_tag_name(SPACE_TAG))
        .ok_or(MarkupError::MissingSpace)?;
    parse_element(space, scripts).ok_or(MarkupError::MissingSpace)
}

/// Converts one markup node into a virtual node.
///
/// Text, comments and `<script>` elements produce nothing.
pub fn parse_element(node: Node<'_, '_>, scripts: &mut dyn ScriptSink) -> Option<VirtualNode> {
    if !node.is_element() {
        return None;
    }
    let tag_name = node.tag_name();
    let tag = qualified_name(&node, tag_name.namespace(), tag_name.name());
    if tag == SCRIPT_TAG {
        if let Some(src) = node.attribute("src") {
            scripts.request_script(ScriptRequest {
                src: src.to_string(),
            });
        }
        return None;
    }

    let mut vnode = VirtualNode::new(tag);
    for attribute in node.attributes() {
        let name = qualified_name(&node, attribute.namespace(), attribute.name());
        vnode.set_attribute(name, attribute.value());
    }
    for child in node.children() {
        if let Some(child) = parse_element(child, scripts) {
            vnode.append_child(child);
        }
    }
    Some(vnode)
}

/// `prefix:local` when `namespace` is bound to a prefix in scope, otherwise
/// the bare local name.
fn qualified_name(node: &Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|uri| node.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tag and attributes of every node, keys ignored.
    fn shape(node: &VirtualNode) -> String {
        let attrs: Vec<String> = node
            .attributes
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        let children: Vec<String> = node.children.iter().map(shape).collect();
        format!("{}[{}]({})", node.tag, attrs.join(","), children.join(","))
    }

    #[test]
    fn model_attributes_are_copied_verbatim() {
        let mut scripts = Vec::new();
        let root = parse_document(
            r#"<space><model src="a.glb" x="1" scale="2"/></space>"#,
            &mut scripts,
        )
        .unwrap();
        assert_eq!(root.tag, "space");
        assert_eq!(root.children.len(), 1);
        let model = &root.children[0];
        assert_eq!(model.tag, "model");
        assert_eq!(model.attribute("src"), Some("a.glb"));
        assert_eq!(model.attribute("x"), Some("1"));
        assert_eq!(model.attribute("scale"), Some("2"));
        assert_eq!(model.attributes.len(), 3);
        assert!(scripts.is_empty());
    }

    #[test]
    fn script_tags_request_loads_and_produce_no_node() {
        let mut scripts = Vec::new();
        let root = parse_document(
            r#"<space><script src="foo.lua"/><box/></space>"#,
            &mut scripts,
        )
        .unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].tag, "box");
        assert_eq!(
            scripts,
            vec![ScriptRequest {
                src: "foo.lua".into()
            }]
        );
    }

    #[test]
    fn script_without_src_is_dropped_silently() {
        let mut scripts = Vec::new();
        let root = parse_document("<space><script/></space>", &mut scripts).unwrap();
        assert!(root.children.is_empty());
        assert!(scripts.is_empty());
    }

    #[test]
    fn space_may_be_nested_and_text_is_ignored() {
        let mut scripts = Vec::new();
        let root = parse_document(
            "<hsml>\n  <space>\n    some text\n    <!-- note -->\n    <a/>\n    <b/>\n  </space>\n</hsml>",
            &mut scripts,
        )
        .unwrap();
        let tags: Vec<&str> = root.children.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, ["a", "b"]);
    }

    #[test]
    fn prefixed_names_are_kept() {
        let mut scripts = Vec::new();
        let root = parse_document(
            r#"<space xmlns="urn:hsml" xmlns:h="urn:hsml:ext" xmlns:xlink="http://www.w3.org/1999/xlink">
                <h:model src="a.glb" xlink:href="b.glb" xml:lang="en"/>
                <box/>
            </space>"#,
            &mut scripts,
        )
        .unwrap();
        assert_eq!(root.tag, "space");
        assert!(root.attributes.is_empty());
        let model = &root.children[0];
        assert_eq!(model.tag, "h:model");
        assert_eq!(model.attribute("src"), Some("a.glb"));
        assert_eq!(model.attribute("xlink:href"), Some("b.glb"));
        assert_eq!(model.attribute("xml:lang"), Some("en"));
        assert_eq!(root.children[1].tag, "box");
    }

    #[test]
    fn doctype_declarations_are_accepted() {
        let mut scripts = Vec::new();
        let root = parse_document(
            "<!DOCTYPE hsml [<!ENTITY ship \"ship.glb\">]>\n<hsml><space><model src=\"&ship;\"/></space></hsml>",
            &mut scripts,
        )
        .unwrap();
        assert_eq!(root.children[0].attribute("src"), Some("ship.glb"));
    }

    #[test]
    fn missing_space_is_reported() {
        let mut scripts = Vec::new();
        let err = parse_document("<scene/>", &mut scripts).unwrap_err();
        assert!(matches!(err, MarkupError::MissingSpace));
    }

    #[test]
    fn malformed_markup_is_an_error() {
        let mut scripts = Vec::new();
        assert!(matches!(
            parse_document("<space><model></space>", &mut scripts),
            Err(MarkupError::Xml(_))
        ));
        assert!(parse_document("", &mut scripts).is_err());
    }

    #[test]
    fn serialized_tree_parses_back_to_the_same_shape() {
        let source = r#"<space>
            <script src="init.lua"/>
            <group x="1" label="a &amp; b">
                <model src="ship.glb" rotationY="90"/>
                <model src="rock.obj"/>
            </group>
            <box/>
        </space>"#;
        let mut scripts = Vec::new();
        let first = parse_document(source, &mut scripts).unwrap();
        let second = parse_document(&first.to_markup(), &mut Vec::<ScriptRequest>::new()).unwrap();
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.node_count(), 5);
    }
}
