//! Versioned XML encoding of repository metadata.
//!
//! The plain form is `artifacts.xml`. The compressed form is `artifacts.jar`,
//! a zip archive holding a single `artifacts.xml` entry. Readers try the
//! compressed form first.
//!
//! Document shape:
//!
//! ```xml
//! <?xml version='1.0' encoding='UTF-8'?>
//! <?artifactRepository version='1.1.0'?>
//! <repository name='..' type='..' version='1'>
//!   <properties size='1'><property name='..' value='..'/></properties>
//!   <mappings size='1'><rule filter='..' output='..'/></mappings>
//!   <artifacts size='1'>
//!     <artifact classifier='..' id='..' version='..'>
//!       <processing size='1'><step id='gzip' required='true'/></processing>
//!       <properties size='1'>..</properties>
//!       <repositoryProperties size='1'>..</repositoryProperties>
//!     </artifact>
//!   </artifacts>
//! </repository>
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use depot_schema::{
    ArtifactDescriptor, ArtifactKey, METADATA_JAR, METADATA_XML, MappingRule,
    ProcessingStepDescriptor, Version, props,
};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, Event};
use thiserror::Error;
use zip::write::SimpleFileOptions;

/// Format version written by this codec.
pub const FORMAT_VERSION: FormatVersion = FormatVersion(1, 1, 0);

/// Lowest format version accepted (inclusive).
pub const MIN_FORMAT_VERSION: FormatVersion = FormatVersion(1, 0, 0);

/// Highest format version accepted (exclusive).
pub const MAX_FORMAT_VERSION: FormatVersion = FormatVersion(2, 0, 0);

/// Repository type written into new documents.
pub const REPOSITORY_TYPE: &str = "depot.simple";

const PI_TARGET: &str = "artifactRepository";

/// Failure to read or write repository metadata.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The document is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An attribute could not be parsed.
    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// The compressed form is not a readable zip archive.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Reading or writing the metadata file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required attribute is absent.
    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        /// Element that lacks the attribute.
        element: &'static str,
        /// Name of the missing attribute.
        attribute: &'static str,
    },

    /// An element appeared where it is not allowed.
    #[error("Unexpected element <{found}> inside <{parent}>")]
    UnexpectedElement {
        /// Enclosing element.
        parent: String,
        /// Element that was found.
        found: String,
    },

    /// The format version processing instruction is absent.
    #[error("Missing format version processing instruction")]
    MissingVersion,

    /// The format version is not `major.minor.micro`.
    #[error("Invalid format version '{0}'")]
    InvalidVersion(String),

    /// The format version is outside the readable range.
    #[error("Unsupported format version {found}: expected [1.0.0, 2.0.0)")]
    UnsupportedVersion {
        /// Version declared by the document.
        found: FormatVersion,
    },

    /// An attribute value does not parse.
    #[error("Invalid value '{value}' for '{attribute}'")]
    InvalidValue {
        /// Attribute name.
        attribute: &'static str,
        /// Offending value.
        value: String,
    },

    /// Structural problem not covered by the other variants.
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// Neither metadata form exists.
    #[error("No repository metadata found in {0}")]
    NotFound(String),
}

/// `major.minor.micro` metadata format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatVersion(pub u32, pub u32, pub u32);

impl FormatVersion {
    /// Parse one to three dot-separated numbers; missing parts are zero.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidVersion`] for anything else.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidVersion(text.to_string());
        let mut parts = [0u32; 3];
        let mut count = 0;
        for (slot, part) in parts.iter_mut().zip(text.trim().split('.')) {
            *slot = part.parse().map_err(|_| invalid())?;
            count += 1;
        }
        if count == 0 || text.trim().split('.').count() > 3 {
            return Err(invalid());
        }
        Ok(Self(parts[0], parts[1], parts[2]))
    }

    /// `true` when readable by this codec.
    pub fn is_supported(self) -> bool {
        self >= MIN_FORMAT_VERSION && self < MAX_FORMAT_VERSION
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Everything persisted about a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDocument {
    /// Human-readable name.
    pub name: String,
    /// Repository type identifier.
    pub kind: String,
    /// Repository type version.
    pub version: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Optional publisher.
    pub provider: Option<String>,
    /// Repository properties.
    pub properties: BTreeMap<String, String>,
    /// Mapping rules in evaluation order.
    pub rules: Vec<MappingRule>,
    /// Registered descriptors.
    pub descriptors: Vec<ArtifactDescriptor>,
    /// Keys skipped while reading because their format is obsolete. Never
    /// written.
    pub dropped: Vec<ArtifactKey>,
}

impl RepositoryDocument {
    /// Empty document with the default mapping rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: REPOSITORY_TYPE.to_string(),
            version: "1".to_string(),
            description: None,
            provider: None,
            properties: BTreeMap::new(),
            rules: MappingRule::defaults(),
            descriptors: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// `true` when the repository asks for the compressed encoding.
    pub fn is_compressed(&self) -> bool {
        self.properties
            .get(props::COMPRESSED)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialize `doc` as XML into `out`.
///
/// # Errors
///
/// Fails only if `out` fails.
pub fn write_xml<W: Write>(doc: &RepositoryDocument, out: W) -> Result<(), CodecError> {
    let mut w = Writer::new_with_indent(out, b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::PI(BytesPI::new(format!(
        "{PI_TARGET} version='{FORMAT_VERSION}'"
    ))))?;

    let mut repo = BytesStart::new("repository");
    repo.push_attribute(("name", doc.name.as_str()));
    repo.push_attribute(("type", doc.kind.as_str()));
    repo.push_attribute(("version", doc.version.as_str()));
    if let Some(description) = &doc.description {
        repo.push_attribute(("description", description.as_str()));
    }
    if let Some(provider) = &doc.provider {
        repo.push_attribute(("provider", provider.as_str()));
    }
    w.write_event(Event::Start(repo))?;

    write_properties(&mut w, "properties", &doc.properties)?;

    w.write_event(Event::Start(sized("mappings", doc.rules.len())))?;
    for rule in &doc.rules {
        let mut e = BytesStart::new("rule");
        e.push_attribute(("filter", rule.filter.as_str()));
        e.push_attribute(("output", rule.output.as_str()));
        w.write_event(Event::Empty(e))?;
    }
    w.write_event(Event::End(BytesEnd::new("mappings")))?;

    w.write_event(Event::Start(sized("artifacts", doc.descriptors.len())))?;
    for d in &doc.descriptors {
        write_descriptor(&mut w, d)?;
    }
    w.write_event(Event::End(BytesEnd::new("artifacts")))?;

    w.write_event(Event::End(BytesEnd::new("repository")))?;
    w.into_inner().flush()?;
    Ok(())
}

fn sized(name: &str, size: usize) -> BytesStart<'_> {
    let mut e = BytesStart::new(name);
    e.push_attribute(("size", size.to_string().as_str()));
    e
}

fn write_properties<W: Write>(
    w: &mut Writer<W>,
    element: &str,
    properties: &BTreeMap<String, String>,
) -> Result<(), CodecError> {
    w.write_event(Event::Start(sized(element, properties.len())))?;
    for (name, value) in properties {
        let mut e = BytesStart::new("property");
        e.push_attribute(("name", name.as_str()));
        e.push_attribute(("value", value.as_str()));
        w.write_event(Event::Empty(e))?;
    }
    w.write_event(Event::End(BytesEnd::new(element)))?;
    Ok(())
}

fn write_descriptor<W: Write>(w: &mut Writer<W>, d: &ArtifactDescriptor) -> Result<(), CodecError> {
    let key = d.key();
    let mut e = BytesStart::new("artifact");
    e.push_attribute(("classifier", key.classifier()));
    e.push_attribute(("id", key.id()));
    e.push_attribute(("version", key.version().as_str()));
    w.write_event(Event::Start(e))?;

    if !d.processing_steps().is_empty() {
        w.write_event(Event::Start(sized("processing", d.processing_steps().len())))?;
        for step in d.processing_steps() {
            let mut s = BytesStart::new("step");
            s.push_attribute(("id", step.processor_id.as_str()));
            if let Some(data) = &step.data {
                s.push_attribute(("data", data.as_str()));
            }
            s.push_attribute(("required", if step.required { "true" } else { "false" }));
            w.write_event(Event::Empty(s))?;
        }
        w.write_event(Event::End(BytesEnd::new("processing")))?;
    }

    write_properties(w, "properties", d.properties())?;
    if !d.repository_properties().is_empty() {
        write_properties(w, "repositoryProperties", d.repository_properties())?;
    }
    w.write_event(Event::End(BytesEnd::new("artifact")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Minimal element tree; text content is not part of the format.
#[derive(Debug)]
struct Node {
    name: String,
    attrs: BTreeMap<String, String>,
    children: Vec<Node>,
}

impl Node {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn require(&self, element: &'static str, attribute: &'static str) -> Result<&str, CodecError> {
        self.attr(attribute)
            .ok_or(CodecError::MissingAttribute { element, attribute })
    }

    fn expect_children(&self, allowed: &[&str]) -> Result<(), CodecError> {
        match self.children.iter().find(|c| !allowed.contains(&c.name.as_str())) {
            Some(extra) => Err(CodecError::UnexpectedElement {
                parent: self.name.clone(),
                found: extra.name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_size(&self) -> Result<(), CodecError> {
        if let Some(size) = self.attr("size") {
            let declared: usize = size.trim().parse().map_err(|_| CodecError::InvalidValue {
                attribute: "size",
                value: size.to_string(),
            })?;
            if declared != self.children.len() {
                tracing::warn!(
                    element = %self.name,
                    declared,
                    actual = self.children.len(),
                    "Declared size does not match element count"
                );
            }
        }
        Ok(())
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>, CodecError> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn element(e: &BytesStart<'_>) -> Result<Node, CodecError> {
    Ok(Node {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attrs: attributes(e)?,
        children: Vec::new(),
    })
}

/// Parse the document into its root element and the format version declared
/// in the processing instruction.
fn parse_tree(xml: &str) -> Result<(Option<String>, Node), CodecError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut version = None;
    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::PI(pi) => {
                if pi.target() == PI_TARGET.as_bytes() {
                    let content = String::from_utf8_lossy(pi.content()).into_owned();
                    version = pseudo_attribute(&content, "version");
                }
            }
            Event::Start(e) => stack.push(element(&e)?),
            Event::Empty(e) => {
                let node = element(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => return Err(CodecError::Malformed("multiple root elements".into())),
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| CodecError::Malformed("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => return Err(CodecError::Malformed("multiple root elements".into())),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::Malformed("unterminated element".into()));
    }
    let root = root.ok_or_else(|| CodecError::Malformed("empty document".into()))?;
    Ok((version, root))
}

/// Value of `name='..'` or `name=".."` inside processing-instruction content.
fn pseudo_attribute(content: &str, name: &str) -> Option<String> {
    let start = content.find(&format!("{name}="))? + name.len() + 1;
    let rest = &content[start..];
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Parse an XML document.
///
/// Descriptors in the obsolete packed format are dropped.
///
/// # Errors
///
/// Fails on malformed XML, a missing or out-of-range format version, missing
/// required attributes, or unknown elements.
pub fn read_xml(xml: &str) -> Result<RepositoryDocument, CodecError> {
    let (version, root) = parse_tree(xml)?;
    let version = FormatVersion::parse(&version.ok_or(CodecError::MissingVersion)?)?;
    if !version.is_supported() {
        return Err(CodecError::UnsupportedVersion { found: version });
    }

    if root.name != "repository" {
        return Err(CodecError::UnexpectedElement {
            parent: "document".into(),
            found: root.name,
        });
    }
    root.expect_children(&["properties", "mappings", "artifacts"])?;

    let mut doc = RepositoryDocument {
        name: root.require("repository", "name")?.to_string(),
        kind: root.require("repository", "type")?.to_string(),
        version: root.require("repository", "version")?.to_string(),
        description: root.attr("description").map(String::from),
        provider: root.attr("provider").map(String::from),
        properties: BTreeMap::new(),
        rules: Vec::new(),
        descriptors: Vec::new(),
        dropped: Vec::new(),
    };

    for child in &root.children {
        match child.name.as_str() {
            "properties" => doc.properties = read_properties(child)?,
            "mappings" => doc.rules = read_rules(child)?,
            "artifacts" => {
                let (kept, dropped) = read_artifacts(child)?;
                doc.descriptors = kept;
                doc.dropped = dropped;
            }
            _ => {}
        }
    }
    Ok(doc)
}

fn read_properties(node: &Node) -> Result<BTreeMap<String, String>, CodecError> {
    node.expect_children(&["property"])?;
    node.check_size()?;
    node.children
        .iter()
        .map(|p| -> Result<(String, String), CodecError> {
            Ok((
                p.require("property", "name")?.to_string(),
                p.require("property", "value")?.to_string(),
            ))
        })
        .collect()
}

fn read_rules(node: &Node) -> Result<Vec<MappingRule>, CodecError> {
    node.expect_children(&["rule"])?;
    node.check_size()?;
    node.children
        .iter()
        .map(|r| -> Result<MappingRule, CodecError> {
            Ok(MappingRule::new(
                r.require("rule", "filter")?,
                r.require("rule", "output")?,
            ))
        })
        .collect()
}

fn read_artifacts(
    node: &Node,
) -> Result<(Vec<ArtifactDescriptor>, Vec<ArtifactKey>), CodecError> {
    node.expect_children(&["artifact"])?;
    node.check_size()?;
    let mut out = Vec::with_capacity(node.children.len());
    let mut dropped = Vec::new();
    for a in &node.children {
        let descriptor = read_artifact(a)?;
        if descriptor.format() == Some(props::FORMAT_PACKED) {
            tracing::warn!(key = %descriptor.key(), "Dropping artifact in obsolete packed format");
            dropped.push(descriptor.key().clone());
            continue;
        }
        out.push(descriptor);
    }
    Ok((out, dropped))
}

fn read_artifact(node: &Node) -> Result<ArtifactDescriptor, CodecError> {
    node.expect_children(&["processing", "properties", "repositoryProperties"])?;
    let key = ArtifactKey::new(
        node.require("artifact", "classifier")?,
        node.require("artifact", "id")?,
        Version::new(node.require("artifact", "version")?),
    );
    let mut descriptor = ArtifactDescriptor::new(key);

    for child in &node.children {
        match child.name.as_str() {
            "processing" => {
                child.expect_children(&["step"])?;
                child.check_size()?;
                let steps = child
                    .children
                    .iter()
                    .map(read_step)
                    .collect::<Result<Vec<_>, _>>()?;
                descriptor.set_processing_steps(steps);
            }
            "properties" => {
                for (k, v) in read_properties(child)? {
                    descriptor.set_property(k, v);
                }
            }
            "repositoryProperties" => {
                for (k, v) in read_properties(child)? {
                    descriptor.set_repository_property(k, v);
                }
            }
            _ => {}
        }
    }
    Ok(descriptor)
}

fn read_step(node: &Node) -> Result<ProcessingStepDescriptor, CodecError> {
    let required = match node.attr("required") {
        None => true,
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        Some(v) => {
            return Err(CodecError::InvalidValue {
                attribute: "required",
                value: v.to_string(),
            });
        }
    };
    Ok(ProcessingStepDescriptor::new(
        node.require("step", "id")?,
        node.attr("data").map(String::from),
        required,
    ))
}

// ---------------------------------------------------------------------------
// Compressed form
// ---------------------------------------------------------------------------

/// Write `doc` as a zip archive with one `artifacts.xml` entry.
///
/// # Errors
///
/// Fails if the archive cannot be written.
pub fn write_jar<W: Write + Seek>(doc: &RepositoryDocument, out: W) -> Result<(), CodecError> {
    let mut zip = zip::ZipWriter::new(out);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file(METADATA_XML, options)?;
    write_xml(doc, &mut zip)?;
    zip.finish()?;
    Ok(())
}

/// Read a document from a zip archive.
///
/// # Errors
///
/// Fails if the archive is unreadable, lacks the entry, or the XML is invalid.
pub fn read_jar<R: Read + Seek>(input: R) -> Result<RepositoryDocument, CodecError> {
    let mut archive = zip::ZipArchive::new(input)?;
    let mut entry = archive.by_name(METADATA_XML)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    read_xml(&xml)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Path of whichever metadata file currently exists in `dir`, compressed first.
pub fn existing_metadata(dir: &Path) -> Option<PathBuf> {
    [METADATA_JAR, METADATA_XML]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Load the repository in `dir`, preferring the compressed form.
///
/// # Errors
///
/// [`CodecError::NotFound`] if neither file exists, otherwise the parse error
/// of the form that was read.
pub fn load(dir: &Path) -> Result<RepositoryDocument, CodecError> {
    let jar = dir.join(METADATA_JAR);
    if jar.is_file() {
        match read_jar(BufReader::new(File::open(&jar)?)) {
            Ok(doc) => return Ok(doc),
            Err(e) if dir.join(METADATA_XML).is_file() => {
                tracing::warn!(path = %jar.display(), error = %e, "Falling back to plain metadata");
            }
            Err(e) => return Err(e),
        }
    }
    let xml = dir.join(METADATA_XML);
    if xml.is_file() {
        return read_xml(&std::fs::read_to_string(&xml)?);
    }
    Err(CodecError::NotFound(dir.display().to_string()))
}

/// Persist `doc` into `dir` in the form its properties select, replacing the
/// file atomically and deleting the other form.
///
/// # Errors
///
/// Fails if the file cannot be written.
pub fn save(dir: &Path, doc: &RepositoryDocument) -> Result<PathBuf, CodecError> {
    std::fs::create_dir_all(dir)?;
    let (target, stale) = if doc.is_compressed() {
        (METADATA_JAR, METADATA_XML)
    } else {
        (METADATA_XML, METADATA_JAR)
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    if doc.is_compressed() {
        write_jar(doc, tmp.as_file_mut())?;
    } else {
        write_xml(doc, std::io::BufWriter::new(tmp.as_file_mut()))?;
    }
    tmp.as_file().sync_all()?;

    let target = dir.join(target);
    tmp.persist(&target).map_err(|e| CodecError::Io(e.error))?;

    match std::fs::remove_file(dir.join(stale)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RepositoryDocument {
        let mut doc = RepositoryDocument::new("Sample & Co");
        doc.description = Some("Test <repo>".into());
        doc.properties.insert("p2.timestamp".into(), "1700000000000".into());
        let key = ArtifactKey::new("osgi.bundle", "foo", Version::new("1.0.0"));
        doc.descriptors.push(
            ArtifactDescriptor::new(key.clone())
                .with_property(props::DOWNLOAD_SIZE, "42")
                .with_property("download.checksum.sha-256", "abcd"),
        );
        doc.descriptors.push(
            ArtifactDescriptor::new(key)
                .with_processing_steps(vec![ProcessingStepDescriptor::new(
                    "gzip",
                    Some("level=9".into()),
                    true,
                )])
                .with_repository_property(props::ARTIFACT_UUID, "u-1"),
        );
        doc
    }

    fn to_xml(doc: &RepositoryDocument) -> String {
        let mut out = Vec::new();
        write_xml(doc, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn xml_round_trip() {
        let doc = sample();
        let xml = to_xml(&doc);
        assert!(xml.contains("<?artifactRepository version='1.1.0'?>"));
        assert_eq!(read_xml(&xml).unwrap(), doc);
    }

    #[test]
    fn repository_private_properties_survive() {
        let doc = read_xml(&to_xml(&sample())).unwrap();
        assert_eq!(doc.descriptors[1].blob_id(), Some("u-1"));
        assert_eq!(
            doc.descriptors[1].processing_steps()[0].data.as_deref(),
            Some("level=9")
        );
    }

    #[test]
    fn jar_round_trip() {
        let doc = sample();
        let mut buf = std::io::Cursor::new(Vec::new());
        write_jar(&doc, &mut buf).unwrap();
        buf.set_position(0);
        assert_eq!(read_jar(buf).unwrap(), doc);
    }

    #[test]
    fn rejects_out_of_range_versions() {
        let xml = to_xml(&sample()).replace("version='1.1.0'", "version='2.0.0'");
        assert!(matches!(
            read_xml(&xml),
            Err(CodecError::UnsupportedVersion { .. })
        ));
        let xml = to_xml(&sample()).replace("version='1.1.0'", "version='0.9'");
        assert!(matches!(
            read_xml(&xml),
            Err(CodecError::UnsupportedVersion { .. })
        ));
        let xml = to_xml(&sample()).replace("version='1.1.0'", "version='1.0'");
        assert!(read_xml(&xml).is_ok());
    }

    #[test]
    fn rejects_missing_version_and_unknown_elements() {
        let xml = to_xml(&sample()).replace("<?artifactRepository version='1.1.0'?>", "");
        assert!(matches!(read_xml(&xml), Err(CodecError::MissingVersion)));

        let xml = to_xml(&sample()).replace("<mappings", "<surprise/><mappings");
        assert!(matches!(
            read_xml(&xml),
            Err(CodecError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn rejects_missing_required_attribute() {
        let xml = to_xml(&sample()).replace(" type='depot.simple'", "");
        let xml = xml.replace(" type=\"depot.simple\"", "");
        assert!(matches!(
            read_xml(&xml),
            Err(CodecError::MissingAttribute {
                attribute: "type",
                ..
            })
        ));
    }

    #[test]
    fn packed_artifacts_are_dropped() {
        let mut doc = sample();
        doc.descriptors.push(
            ArtifactDescriptor::new(ArtifactKey::new("osgi.bundle", "old", Version::new("1.0.0")))
                .with_property(props::FORMAT, props::FORMAT_PACKED),
        );
        let read = read_xml(&to_xml(&doc)).unwrap();
        assert_eq!(read.descriptors.len(), 2);
        assert!(read.descriptors.iter().all(|d| d.key().id() == "foo"));
        assert_eq!(read.dropped.len(), 1);
        assert_eq!(read.dropped[0].id(), "old");
    }

    #[test]
    fn save_switches_forms_and_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = sample();

        save(dir.path(), &doc).unwrap();
        assert!(dir.path().join(METADATA_XML).is_file());
        assert!(!dir.path().join(METADATA_JAR).exists());

        doc.properties.insert(props::COMPRESSED.into(), "true".into());
        save(dir.path(), &doc).unwrap();
        assert!(dir.path().join(METADATA_JAR).is_file());
        assert!(!dir.path().join(METADATA_XML).exists());

        assert_eq!(load(dir.path()).unwrap(), doc);
    }

    #[test]
    fn load_reports_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path()), Err(CodecError::NotFound(_))));
    }

    #[test]
    fn format_version_parsing() {
        assert_eq!(FormatVersion::parse("1").unwrap(), FormatVersion(1, 0, 0));
        assert_eq!(FormatVersion::parse("1.1.0").unwrap(), FormatVersion(1, 1, 0));
        assert!(FormatVersion::parse("1.x").is_err());
        assert!(FormatVersion::parse("1.0.0.0").is_err());
    }
}
