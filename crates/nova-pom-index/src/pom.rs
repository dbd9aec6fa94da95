//! Structural POM reading.
//!
//! [`parse_pom`] is the strict reader used by real builds: the document must be
//! well-formed XML. [`scan_pom_lenient`] recovers what it can from documents
//! that are mid-edit and broken, for degraded results and discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use nova_core::{Position, Range};
use nova_pom_model::{
    Dependency, LineageEntry, ParentRef, PartialCoordinate, Plugin, Problem, ProjectModel,
};
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum PomError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed POM at {}:{}: {message}", .position.line + 1, .position.character + 1)]
    Xml { message: String, position: Position },
    #[error("root element is <{0}>, expected <project>")]
    NotAProject(String),
}

impl PomError {
    pub fn to_problem(&self) -> Problem {
        let problem = Problem::error(self.to_string());
        match self {
            PomError::Xml { position, .. } => problem.with_range(Range::point(*position)),
            _ => problem,
        }
    }
}

/// A POM as written, before inheritance and interpolation.
#[derive(Debug, Clone, Default)]
pub struct RawPom {
    pub coordinate: PartialCoordinate,
    pub parent: Option<ParentRef>,
    pub packaging: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Vec<Dependency>,
    pub plugins: Vec<Plugin>,
    pub modules: Vec<String>,
    pub profiles: Vec<RawProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct RawProfile {
    pub id: String,
    pub active_by_default: bool,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub modules: Vec<String>,
}

impl RawPom {
    /// The model exactly as written: no parent, no interpolation.
    pub fn to_model(&self) -> ProjectModel {
        ProjectModel {
            coordinate: self.coordinate.clone(),
            parent: self.parent.clone(),
            packaging: self.packaging.clone(),
            properties: self.properties.clone(),
            dependencies: self.dependencies.clone(),
            dependency_management: self.dependency_management.clone(),
            plugins: self.plugins.clone(),
            modules: self.modules.clone(),
            lineage: vec![LineageEntry {
                coordinate: self.inherited_coordinate(),
                file: None,
            }],
            installed_pom: None,
            extension: None,
        }
    }

    /// Own coordinate with group and version taken from `<parent>` when absent.
    pub fn inherited_coordinate(&self) -> PartialCoordinate {
        let mut coordinate = self.coordinate.clone();
        if let Some(parent) = &self.parent {
            coordinate.inherit_from(&parent.coordinate);
        }
        coordinate
    }
}

pub fn read_pom(path: &Path) -> Result<RawPom, PomError> {
    let text = std::fs::read_to_string(path).map_err(|source| PomError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pom(&text)
}

pub fn parse_pom(text: &str) -> Result<RawPom, PomError> {
    let doc = roxmltree::Document::parse(text).map_err(|err| {
        let pos = err.pos();
        PomError::Xml {
            message: err.to_string(),
            position: Position::new(pos.row.saturating_sub(1), pos.col.saturating_sub(1)),
        }
    })?;

    let project = doc.root_element();
    if project.tag_name().name() != "project" {
        return Err(PomError::NotAProject(project.tag_name().name().to_owned()));
    }

    let mut pom = RawPom {
        coordinate: PartialCoordinate {
            group_id: child_text(&project, "groupId"),
            artifact_id: child_text(&project, "artifactId"),
            version: child_text(&project, "version"),
        },
        packaging: child_text(&project, "packaging"),
        ..RawPom::default()
    };

    if let Some(parent) = child_element(&project, "parent") {
        pom.parent = Some(ParentRef {
            coordinate: PartialCoordinate {
                group_id: child_text(&parent, "groupId"),
                artifact_id: child_text(&parent, "artifactId"),
                version: child_text(&parent, "version"),
            },
            relative_path: child_element(&parent, "relativePath")
                .map(|node| node.text().map(str::trim).unwrap_or_default().to_owned()),
        });
    }

    if let Some(props) = child_element(&project, "properties") {
        pom.properties = parse_properties(&props);
    }
    if let Some(deps) = child_element(&project, "dependencies") {
        pom.dependencies = parse_dependencies(&doc, &deps);
    }
    if let Some(deps) = child_element(&project, "dependencyManagement")
        .and_then(|dm| child_element(&dm, "dependencies"))
    {
        pom.dependency_management = parse_dependencies(&doc, &deps);
    }
    if let Some(plugins) =
        child_element(&project, "build").and_then(|build| child_element(&build, "plugins"))
    {
        pom.plugins = parse_plugins(&doc, &plugins);
    }
    if let Some(modules) = child_element(&project, "modules") {
        pom.modules = parse_modules(&modules);
    }
    if let Some(profiles) = child_element(&project, "profiles") {
        pom.profiles = profiles
            .children()
            .filter(|n| n.is_element() && n.has_tag_name("profile"))
            .map(|profile| RawProfile {
                id: child_text(&profile, "id").unwrap_or_else(|| "default".to_owned()),
                active_by_default: child_element(&profile, "activation")
                    .and_then(|activation| child_text(&activation, "activeByDefault"))
                    .is_some_and(|value| value == "true"),
                properties: child_element(&profile, "properties")
                    .map(|props| parse_properties(&props))
                    .unwrap_or_default(),
                dependencies: child_element(&profile, "dependencies")
                    .map(|deps| parse_dependencies(&doc, &deps))
                    .unwrap_or_default(),
                modules: child_element(&profile, "modules")
                    .map(|modules| parse_modules(&modules))
                    .unwrap_or_default(),
            })
            .collect();
    }

    Ok(pom)
}

fn parse_properties(node: &roxmltree::Node<'_, '_>) -> BTreeMap<String, String> {
    node.children()
        .filter(|n| n.is_element())
        .map(|n| {
            let value = n.text().map(str::trim).unwrap_or_default();
            (n.tag_name().name().to_owned(), value.to_owned())
        })
        .collect()
}

fn parse_modules(node: &roxmltree::Node<'_, '_>) -> Vec<String> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("module"))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_dependencies(doc: &roxmltree::Document<'_>, node: &roxmltree::Node<'_, '_>) -> Vec<Dependency> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("dependency"))
        .map(|dep| Dependency {
            group_id: child_text(&dep, "groupId"),
            artifact_id: child_text(&dep, "artifactId"),
            version: child_text(&dep, "version"),
            scope: child_text(&dep, "scope"),
            classifier: child_text(&dep, "classifier"),
            type_: child_text(&dep, "type"),
            optional: child_text(&dep, "optional").is_some_and(|value| value == "true"),
            range: Some(node_range(doc, &dep)),
        })
        .collect()
}

fn parse_plugins(doc: &roxmltree::Document<'_>, node: &roxmltree::Node<'_, '_>) -> Vec<Plugin> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("plugin"))
        .map(|plugin| Plugin {
            group_id: child_text(&plugin, "groupId"),
            artifact_id: child_text(&plugin, "artifactId"),
            version: child_text(&plugin, "version"),
            range: Some(node_range(doc, &plugin)),
        })
        .collect()
}

fn node_range(doc: &roxmltree::Document<'_>, node: &roxmltree::Node<'_, '_>) -> Range {
    let to_position = |offset: usize| {
        let pos = doc.text_pos_at(offset);
        Position::new(pos.row.saturating_sub(1), pos.col.saturating_sub(1))
    };
    let span = node.range();
    Range::new(to_position(span.start), to_position(span.end))
}

fn child_element<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child_element(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Replaces `${name}` placeholders with values from `props`, leaving unknown
/// placeholders untouched.
pub fn resolve_placeholders(text: &str, props: &BTreeMap<String, String>) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

    let mut current = text.to_owned();
    // Property values may reference other properties; bound the passes so
    // self-referencing properties terminate.
    for _ in 0..8 {
        if !current.contains("${") {
            break;
        }
        let next = re
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                props
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_owned())
            })
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Computes the effective model of `raw` given its parent's effective model.
///
/// Applies coordinate inheritance, property merging (parent, own, then active
/// profiles), `project.*` properties, placeholder interpolation and
/// dependency management. The lineage is this project followed by the
/// parent's lineage.
pub fn effective_model(
    raw: &RawPom,
    parent: Option<&ProjectModel>,
    active_profiles: &[String],
) -> ProjectModel {
    let mut coordinate = raw.inherited_coordinate();
    if let Some(parent) = parent {
        coordinate.inherit_from(&parent.coordinate);
    }

    let explicit: Vec<&RawProfile> = raw
        .profiles
        .iter()
        .filter(|profile| active_profiles.iter().any(|id| *id == profile.id))
        .collect();
    let active: Vec<&RawProfile> = if explicit.is_empty() {
        raw.profiles
            .iter()
            .filter(|profile| profile.active_by_default)
            .collect()
    } else {
        explicit
    };

    let mut properties = parent
        .map(|parent| parent.properties.clone())
        .unwrap_or_default();
    properties.extend(raw.properties.clone());
    for profile in &active {
        properties.extend(profile.properties.clone());
    }
    for (name, value) in [
        ("groupId", &coordinate.group_id),
        ("artifactId", &coordinate.artifact_id),
        ("version", &coordinate.version),
    ] {
        if let Some(value) = value {
            properties.insert(format!("project.{name}"), value.clone());
            properties.insert(format!("pom.{name}"), value.clone());
        }
    }
    if let Some(version) = raw
        .parent
        .as_ref()
        .and_then(|parent| parent.coordinate.version.as_ref())
    {
        properties.insert("project.parent.version".to_owned(), version.clone());
    }

    let interpolate = |value: &Option<String>| {
        value
            .as_deref()
            .map(|value| resolve_placeholders(value, &properties))
    };
    coordinate = PartialCoordinate {
        group_id: interpolate(&coordinate.group_id),
        artifact_id: interpolate(&coordinate.artifact_id),
        version: interpolate(&coordinate.version),
    };

    let interpolate_dependency = |dep: &Dependency| Dependency {
        group_id: interpolate(&dep.group_id),
        artifact_id: interpolate(&dep.artifact_id),
        version: interpolate(&dep.version),
        scope: interpolate(&dep.scope),
        classifier: interpolate(&dep.classifier),
        type_: interpolate(&dep.type_),
        optional: dep.optional,
        range: dep.range,
    };

    let mut managed: BTreeMap<(Option<String>, Option<String>), Dependency> = BTreeMap::new();
    let inherited_management = parent
        .map(|parent| parent.dependency_management.as_slice())
        .unwrap_or_default();
    for dep in inherited_management.iter().chain(&raw.dependency_management) {
        let dep = interpolate_dependency(dep);
        managed.insert((dep.group_id.clone(), dep.artifact_id.clone()), dep);
    }

    let own_dependencies = raw
        .dependencies
        .iter()
        .chain(active.iter().flat_map(|profile| &profile.dependencies));
    let dependencies = own_dependencies
        .map(|dep| {
            let mut dep = interpolate_dependency(dep);
            if let Some(managed) = managed.get(&(dep.group_id.clone(), dep.artifact_id.clone())) {
                if dep.version.is_none() {
                    dep.version = managed.version.clone();
                }
                if dep.scope.is_none() {
                    dep.scope = managed.scope.clone();
                }
            }
            dep
        })
        .collect();

    let plugins = raw
        .plugins
        .iter()
        .map(|plugin| Plugin {
            group_id: interpolate(&plugin.group_id),
            artifact_id: interpolate(&plugin.artifact_id),
            version: interpolate(&plugin.version),
            range: plugin.range,
        })
        .collect();

    let mut modules = raw.modules.clone();
    for profile in &active {
        for module in &profile.modules {
            if !modules.contains(module) {
                modules.push(module.clone());
            }
        }
    }

    let mut lineage = vec![LineageEntry {
        coordinate: coordinate.clone(),
        file: None,
    }];
    if let Some(parent) = parent {
        lineage.extend(parent.lineage.iter().cloned());
    }

    ProjectModel {
        coordinate,
        parent: raw.parent.clone(),
        packaging: raw.packaging.clone(),
        properties,
        dependencies,
        dependency_management: managed.into_values().collect(),
        plugins,
        modules,
        lineage,
        installed_pom: None,
        extension: None,
    }
}

/// Recovers coordinate, parent, packaging, properties and modules from text
/// that may not be well-formed.
///
/// Blocks that cannot contribute to the project's identity (dependencies,
/// build, profiles, ...) are cut out first; an unterminated block swallows
/// the rest of the document.
pub fn scan_pom_lenient(text: &str) -> RawPom {
    let mut outer = strip_comments(text);
    for tag in [
        "dependencyManagement",
        "dependencies",
        "build",
        "profiles",
        "reporting",
        "repositories",
        "pluginRepositories",
        "distributionManagement",
    ] {
        cut_block(&mut outer, tag);
    }

    let parent = block_content(&outer, "parent").map(|block| {
        let elements = simple_elements(block);
        ParentRef {
            coordinate: PartialCoordinate {
                group_id: first_value(&elements, "groupId"),
                artifact_id: first_value(&elements, "artifactId"),
                version: first_value(&elements, "version"),
            },
            relative_path: elements
                .iter()
                .find(|(tag, _)| tag == "relativePath")
                .map(|(_, value)| value.clone()),
        }
    });
    let properties = block_content(&outer, "properties")
        .map(|block| simple_elements(block).into_iter().collect())
        .unwrap_or_default();
    let modules = block_content(&outer, "modules")
        .map(|block| {
            simple_elements(block)
                .into_iter()
                .filter(|(tag, value)| tag == "module" && !value.is_empty())
                .map(|(_, value)| value)
                .collect()
        })
        .unwrap_or_default();

    for tag in ["parent", "properties", "modules"] {
        cut_block(&mut outer, tag);
    }
    let elements = simple_elements(&outer);

    RawPom {
        coordinate: PartialCoordinate {
            group_id: first_value(&elements, "groupId"),
            artifact_id: first_value(&elements, "artifactId"),
            version: first_value(&elements, "version"),
        },
        parent,
        packaging: first_value(&elements, "packaging"),
        properties,
        modules,
        ..RawPom::default()
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Byte span of the first `<tag ...>` opening tag: (start, end of tag, self-closing).
fn find_open_tag(text: &str, tag: &str) -> Option<(usize, usize, bool)> {
    let needle = format!("<{tag}");
    let mut from = 0;
    while let Some(found) = text[from..].find(&needle) {
        let start = from + found;
        let after = start + needle.len();
        match text[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let close = text[after..].find('>').map(|idx| after + idx + 1)?;
                let self_closing = text[..close].ends_with("/>");
                return Some((start, close, self_closing));
            }
            _ => from = after,
        }
    }
    None
}

fn block_content<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let (_, open_end, self_closing) = find_open_tag(text, tag)?;
    if self_closing {
        return Some("");
    }
    let closing = format!("</{tag}>");
    let end = text[open_end..]
        .find(&closing)
        .map_or(text.len(), |idx| open_end + idx);
    Some(&text[open_end..end])
}

fn cut_block(text: &mut String, tag: &str) {
    let closing = format!("</{tag}>");
    while let Some((start, open_end, self_closing)) = find_open_tag(text, tag) {
        let end = if self_closing {
            open_end
        } else {
            text[open_end..]
                .find(&closing)
                .map_or(text.len(), |idx| open_end + idx + closing.len())
        };
        text.replace_range(start..end, "");
    }
}

/// `<name>text</name>` pairs without nested markup, in document order.
fn simple_elements(text: &str) -> Vec<(String, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"<([A-Za-z_][\w.\-]*)\s*>([^<]*)</([A-Za-z_][\w.\-]*)\s*>")
            .expect("valid regex")
    });
    re.captures_iter(text)
        .filter(|caps| caps[1] == caps[3])
        .map(|caps| (caps[1].to_owned(), unescape(caps[2].trim())))
        .collect()
}

fn first_value(elements: &[(String, String)], tag: &str) -> Option<String> {
    elements
        .iter()
        .find(|(name, value)| name == tag && !value.is_empty())
        .map(|(_, value)| value.clone())
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHILD: &str = r#"<project>
  <parent>
    <groupId>org.example</groupId>
    <artifactId>parent</artifactId>
    <version>1.0</version>
  </parent>
  <artifactId>child</artifactId>
  <properties>
    <lib.version>2.3</lib.version>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>lib</artifactId>
      <version>${lib.version}</version>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>managed</artifactId>
    </dependency>
  </dependencies>
</project>"#;

    #[test]
    fn strict_parse_reads_parent_and_dependencies() {
        let pom = parse_pom(CHILD).expect("parse");
        assert_eq!(pom.coordinate.artifact_id.as_deref(), Some("child"));
        assert_eq!(pom.coordinate.group_id, None);
        let parent = pom.parent.as_ref().expect("parent");
        assert_eq!(parent.coordinate.version.as_deref(), Some("1.0"));
        assert_eq!(parent.effective_relative_path(), "../pom.xml");
        assert_eq!(pom.dependencies.len(), 2);
        assert_eq!(
            pom.dependencies[0].range.map(|range| range.start.line),
            Some(11)
        );
    }

    #[test]
    fn strict_parse_reports_position_of_malformed_xml() {
        let err = parse_pom("<project>\n  <groupId>x</group>\n</project>").unwrap_err();
        match &err {
            PomError::Xml { position, .. } => assert_eq!(position.line, 1),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_problem().range.is_some());
    }

    #[test]
    fn effective_model_inherits_interpolates_and_manages() {
        let parent_raw = parse_pom(
            r#"<project>
  <groupId>org.example</groupId>
  <artifactId>parent</artifactId>
  <version>1.0</version>
  <properties><shared>yes</shared></properties>
  <dependencyManagement><dependencies>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>managed</artifactId>
      <version>${project.version}</version>
      <scope>test</scope>
    </dependency>
  </dependencies></dependencyManagement>
</project>"#,
        )
        .expect("parse parent");
        let parent = effective_model(&parent_raw, None, &[]);

        let child = effective_model(&parse_pom(CHILD).expect("parse"), Some(&parent), &[]);
        assert_eq!(child.coordinate.to_string(), "org.example:child:1.0");
        assert_eq!(child.properties.get("shared").map(String::as_str), Some("yes"));
        assert_eq!(child.dependencies[0].version.as_deref(), Some("2.3"));
        assert_eq!(child.dependencies[1].version.as_deref(), Some("1.0"));
        assert_eq!(child.dependencies[1].scope.as_deref(), Some("test"));
        assert_eq!(child.lineage.len(), 2);
        assert_eq!(
            child.lineage[1].coordinate.to_string(),
            "org.example:parent:1.0"
        );
    }

    #[test]
    fn profiles_activate_by_id_or_default() {
        let raw = parse_pom(
            r#"<project>
  <groupId>g</groupId><artifactId>a</artifactId><version>1</version>
  <profiles>
    <profile>
      <id>dev</id>
      <activation><activeByDefault>true</activeByDefault></activation>
      <properties><env>dev</env></properties>
    </profile>
    <profile>
      <id>ci</id>
      <properties><env>ci</env></properties>
      <modules><module>extra</module></modules>
    </profile>
  </profiles>
</project>"#,
        )
        .expect("parse");

        let default = effective_model(&raw, None, &[]);
        assert_eq!(default.properties.get("env").map(String::as_str), Some("dev"));
        assert!(default.modules.is_empty());

        let ci = effective_model(&raw, None, &["ci".to_owned()]);
        assert_eq!(ci.properties.get("env").map(String::as_str), Some("ci"));
        assert_eq!(ci.modules, vec!["extra".to_owned()]);
    }

    #[test]
    fn placeholders_resolve_transitively_and_terminate() {
        let props = BTreeMap::from([
            ("a".to_owned(), "${b}".to_owned()),
            ("b".to_owned(), "42".to_owned()),
            ("loop".to_owned(), "${loop}".to_owned()),
        ]);
        assert_eq!(resolve_placeholders("v${a}", &props), "v42");
        assert_eq!(resolve_placeholders("${loop}", &props), "${loop}");
        assert_eq!(resolve_placeholders("${missing}", &props), "${missing}");
    }

    #[test]
    fn lenient_scan_survives_broken_dependency_block() {
        let text = r#"<project>
  <!-- <groupId>commented.out</groupId> -->
  <parent>
    <groupId>org.example</groupId>
    <artifactId>parent</artifactId>
    <version>1.0</version>
    <relativePath>../parent/pom.xml</relativePath>
  </parent>
  <groupId>org.example.app</groupId>
  <artifactId>app</artifactId>
  <version>2.0-SNAPSHOT</version>
  <packaging>pom</packaging>
  <properties>
    <java.version>17</java.version>
  </properties>
  <modules><module>core</module></modules>
  <dependencies>
    <dependency>
      <groupId>broken
      <artifactId>oops</artifactId>
  "#;
        let pom = scan_pom_lenient(text);
        assert_eq!(pom.coordinate.to_string(), "org.example.app:app:2.0-SNAPSHOT");
        assert_eq!(pom.packaging.as_deref(), Some("pom"));
        assert_eq!(
            pom.parent.as_ref().and_then(|p| p.relative_path.as_deref()),
            Some("../parent/pom.xml")
        );
        assert_eq!(
            pom.properties.get("java.version").map(String::as_str),
            Some("17")
        );
        assert_eq!(pom.modules, vec!["core".to_owned()]);
        assert!(pom.dependencies.is_empty());
    }

    #[test]
    fn lenient_scan_inherits_from_parent_block() {
        let pom = scan_pom_lenient(
            "<project><parent><groupId>g</groupId><artifactId>p</artifactId><version>3</version></parent><artifactId>c</artifactId>",
        );
        assert_eq!(pom.coordinate.group_id, None);
        assert_eq!(pom.inherited_coordinate().to_string(), "g:c:3");
    }
}
