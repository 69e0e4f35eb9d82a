//! Reading and writing the plugin descriptor and repository list XML formats.

use std::collections::BTreeSet;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};

use crate::descriptor::{Capability, DescriptorMeta};
use crate::error::IcyError;
use crate::ident::{PluginIdent, PluginOnlineIdent};
use crate::version::Version;

pub const ID_ROOT_PLUGIN: &str = "plugin";
pub const ID_ROOT_PLUGINS: &str = "plugins";
pub const ID_CLASSNAME: &str = "classname";
pub const ID_VERSION: &str = "version";
pub const ID_REQUIRED_KERNEL_VERSION: &str = "required_kernel_version";
pub const ID_NAME: &str = "name";
pub const ID_URL: &str = "url";
pub const ID_JAR_URL: &str = "jar_url";
pub const ID_IMAGE_URL: &str = "image_url";
pub const ID_ICON_URL: &str = "icon_url";
pub const ID_AUTHOR: &str = "author";
pub const ID_CHANGELOG: &str = "changelog";
pub const ID_WEB: &str = "web";
pub const ID_EMAIL: &str = "email";
pub const ID_DESCRIPTION: &str = "description";
pub const ID_DEPENDENCIES: &str = "dependencies";
pub const ID_DEPENDENCY: &str = "dependency";
pub const ID_CAPABILITIES: &str = "capabilities";
pub const ID_CAPABILITY: &str = "capability";

type XmlResult<T> = Result<T, IcyError>;

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn text(node: Node, name: &str) -> String {
    child(node, name)
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

fn version(node: Node, name: &str) -> XmlResult<Version> {
    text(node, name).parse()
}

fn parse_ident(node: Node) -> XmlResult<PluginIdent> {
    let class_name = text(node, ID_CLASSNAME);
    if class_name.is_empty() {
        return Err(IcyError::Descriptor(format!(
            "<{}> without <{ID_CLASSNAME}>",
            node.tag_name().name()
        )));
    }
    Ok(PluginIdent {
        class_name,
        version: version(node, ID_VERSION)?,
        required_kernel_version: version(node, ID_REQUIRED_KERNEL_VERSION)?,
    })
}

fn root<'a, 'input>(doc: &'a Document<'input>, expected: &str) -> XmlResult<Node<'a, 'input>> {
    let root = doc.root_element();
    if root.tag_name().name() != expected {
        return Err(IcyError::Descriptor(format!(
            "expected <{expected}> root, found <{}>",
            root.tag_name().name()
        )));
    }
    Ok(root)
}

fn parse_document(xml: &str) -> XmlResult<Document<'_>> {
    Document::parse(xml).map_err(|e| IcyError::Descriptor(e.to_string()))
}

/// Parses a full `plugin` descriptor document.
pub fn parse_descriptor(xml: &str) -> XmlResult<(PluginIdent, DescriptorMeta)> {
    let doc = parse_document(xml)?;
    let node = root(&doc, ID_ROOT_PLUGIN)?;
    let ident = parse_ident(node)?;

    let dependencies = match child(node, ID_DEPENDENCIES) {
        Some(deps) => deps
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == ID_DEPENDENCY)
            .map(parse_ident)
            .collect::<XmlResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let mut capabilities = BTreeSet::new();
    if let Some(caps) = child(node, ID_CAPABILITIES) {
        for cap in caps
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == ID_CAPABILITY)
        {
            let raw = cap.text().unwrap_or_default().trim();
            match raw.parse::<Capability>() {
                Ok(capability) => {
                    capabilities.insert(capability);
                }
                Err(_) => tracing::debug!(capability = raw, "Ignoring unknown capability"),
            }
        }
    }

    let changelog = text(node, ID_CHANGELOG);
    let meta = DescriptorMeta {
        name: text(node, ID_NAME),
        url: text(node, ID_URL),
        jar_url: text(node, ID_JAR_URL),
        icon_url: text(node, ID_ICON_URL),
        image_url: text(node, ID_IMAGE_URL),
        author: text(node, ID_AUTHOR),
        web: text(node, ID_WEB),
        email: text(node, ID_EMAIL),
        description: text(node, ID_DESCRIPTION),
        changelog: (!changelog.is_empty()).then_some(changelog),
        dependencies,
        capabilities,
    };
    Ok((ident, meta))
}

/// Parses a repository `plugins` list. Entries that do not parse are
/// skipped with a warning; only a broken document fails the whole list.
pub fn parse_repository_list(xml: &str) -> XmlResult<Vec<PluginOnlineIdent>> {
    let doc = parse_document(xml)?;
    let node = root(&doc, ID_ROOT_PLUGINS)?;
    let entries = node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == ID_ROOT_PLUGIN)
        .filter_map(|plugin| match parse_ident(plugin) {
            Ok(ident) => Some(PluginOnlineIdent {
                ident,
                name: text(plugin, ID_NAME),
                url: text(plugin, ID_URL),
            }),
            Err(e) => {
                tracing::warn!(
                    classname = %text(plugin, ID_CLASSNAME),
                    error = %e,
                    "Skipping invalid repository entry"
                );
                None
            }
        })
        .collect();
    Ok(entries)
}

type XmlWriter = Writer<Vec<u8>>;

fn write_failed(e: impl std::fmt::Display) -> IcyError {
    IcyError::Descriptor(format!("cannot write XML: {e}"))
}

fn writer() -> XmlResult<XmlWriter> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_failed)?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> XmlResult<String> {
    String::from_utf8(writer.into_inner()).map_err(write_failed)
}

fn open(writer: &mut XmlWriter, name: &str) -> XmlResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name))).map_err(write_failed)
}

fn close(writer: &mut XmlWriter, name: &str) -> XmlResult<()> {
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(write_failed)
}

fn element(writer: &mut XmlWriter, name: &str, value: &str) -> XmlResult<()> {
    open(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(value))).map_err(write_failed)?;
    close(writer, name)
}

fn write_ident(writer: &mut XmlWriter, ident: &PluginIdent) -> XmlResult<()> {
    element(writer, ID_CLASSNAME, &ident.class_name)?;
    element(writer, ID_VERSION, &ident.version.to_string())?;
    element(writer, ID_REQUIRED_KERNEL_VERSION, &ident.required_kernel_version.to_string())
}

/// Serializes a descriptor; the inverse of [`parse_descriptor`].
pub fn write_descriptor(ident: &PluginIdent, meta: &DescriptorMeta) -> XmlResult<String> {
    let mut writer = writer()?;
    open(&mut writer, ID_ROOT_PLUGIN)?;
    write_ident(&mut writer, ident)?;
    for (name, value) in [
        (ID_NAME, &meta.name),
        (ID_URL, &meta.url),
        (ID_JAR_URL, &meta.jar_url),
        (ID_IMAGE_URL, &meta.image_url),
        (ID_ICON_URL, &meta.icon_url),
        (ID_AUTHOR, &meta.author),
        (ID_WEB, &meta.web),
        (ID_EMAIL, &meta.email),
        (ID_DESCRIPTION, &meta.description),
    ] {
        element(&mut writer, name, value)?;
    }
    if let Some(changelog) = &meta.changelog {
        element(&mut writer, ID_CHANGELOG, changelog)?;
    }
    if !meta.capabilities.is_empty() {
        open(&mut writer, ID_CAPABILITIES)?;
        for capability in &meta.capabilities {
            element(&mut writer, ID_CAPABILITY, capability.as_str())?;
        }
        close(&mut writer, ID_CAPABILITIES)?;
    }
    open(&mut writer, ID_DEPENDENCIES)?;
    for dependency in &meta.dependencies {
        open(&mut writer, ID_DEPENDENCY)?;
        write_ident(&mut writer, dependency)?;
        close(&mut writer, ID_DEPENDENCY)?;
    }
    close(&mut writer, ID_DEPENDENCIES)?;
    close(&mut writer, ID_ROOT_PLUGIN)?;
    finish(writer)
}

/// Serializes a repository list; the inverse of [`parse_repository_list`].
pub fn write_repository_list(idents: &[PluginOnlineIdent]) -> XmlResult<String> {
    let mut writer = writer()?;
    open(&mut writer, ID_ROOT_PLUGINS)?;
    for online in idents {
        open(&mut writer, ID_ROOT_PLUGIN)?;
        write_ident(&mut writer, &online.ident)?;
        element(&mut writer, ID_NAME, &online.name)?;
        element(&mut writer, ID_URL, &online.url)?;
        close(&mut writer, ID_ROOT_PLUGIN)?;
    }
    close(&mut writer, ID_ROOT_PLUGINS)?;
    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"<?xml version="1.0"?>
<plugin>
  <classname>plugins.author.Tool</classname>
  <version>1.2.0.0</version>
  <required_kernel_version>2.0</required_kernel_version>
  <name>Tool &amp; Co</name>
  <jar_url>https://repo.example/tool.jar</jar_url>
  <author>Jane</author>
  <dependencies>
    <dependency>
      <classname>plugins.author.Lib</classname>
      <version>1.0</version>
      <required_kernel_version></required_kernel_version>
    </dependency>
  </dependencies>
</plugin>"#;

    #[test]
    fn parses_legacy_descriptor() {
        let (ident, meta) = parse_descriptor(LEGACY).unwrap();
        assert_eq!(ident.class_name, "plugins.author.Tool");
        assert_eq!(ident.required_kernel_version, "2.0".parse().unwrap());
        assert_eq!(meta.name, "Tool & Co");
        assert_eq!(meta.dependencies.len(), 1);
        assert_eq!(meta.dependencies[0].class_name, "plugins.author.Lib");
        assert!(meta.changelog.is_none());
        assert!(meta.capabilities.is_empty());
    }

    #[test]
    fn rejects_wrong_root_and_missing_class() {
        assert!(parse_descriptor("<plugins/>").is_err());
        assert!(parse_descriptor("<plugin><version>1</version></plugin>").is_err());
        assert!(parse_descriptor("<plugin>").is_err());
    }

    #[test]
    fn repository_list_round_trip() {
        let idents = vec![PluginOnlineIdent {
            ident: PluginIdent::new("plugins.a.A", "1.0.0.0 beta".parse().unwrap()),
            name: "A <alpha>".into(),
            url: "file:///repo/a.xml".into(),
        }];
        let parsed = parse_repository_list(&write_repository_list(&idents).unwrap()).unwrap();
        assert_eq!(parsed, idents);
    }

    #[test]
    fn invalid_entries_do_not_sink_the_list() {
        let list = r#"<plugins>
  <plugin>
    <classname>plugins.a.Good</classname>
    <version>1.0</version>
    <required_kernel_version>2.0</required_kernel_version>
  </plugin>
  <plugin>
    <classname>plugins.a.Odd</classname>
    <version>1.0-rc1</version>
    <required_kernel_version>2.0</required_kernel_version>
  </plugin>
  <plugin>
    <version>1.0</version>
  </plugin>
</plugins>"#;
        let parsed = parse_repository_list(list).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].ident.class_name, "plugins.a.Good");

        assert!(parse_repository_list("<plugin/>").is_err());
    }

    #[test]
    fn written_text_is_escaped() {
        let ident = PluginIdent::new("plugins.a.A", Version::new(1, 0, 0, 0));
        let meta = DescriptorMeta {
            name: "Fish & <Chips>".into(),
            description: "\"quoted\" 'text'".into(),
            ..Default::default()
        };
        let raw = write_descriptor(&ident, &meta).unwrap();
        assert!(raw.contains("Fish &amp; &lt;Chips&gt;"));

        let (_, parsed) = parse_descriptor(&raw).unwrap();
        assert_eq!(parsed.name, meta.name);
        assert_eq!(parsed.description, meta.description);
    }
}
