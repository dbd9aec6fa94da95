use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully resolved `groupId:artifactId:version` triple.
///
/// This is the identity used for lookups; see [`PartialCoordinate`] for the
/// shape seen while a document is being edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl Coordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Parses `group:artifact:version`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(':');
        let group_id = parts.next()?.trim();
        let artifact_id = parts.next()?.trim();
        let version = parts.next()?.trim();
        if parts.next().is_some()
            || group_id.is_empty()
            || artifact_id.is_empty()
            || version.is_empty()
        {
            return None;
        }
        Some(Self::new(group_id, artifact_id, version))
    }

    pub fn group_artifact(&self) -> GroupArtifact {
        GroupArtifact::new(self.group_id.clone(), self.artifact_id.clone())
    }

    pub fn to_partial(&self) -> PartialCoordinate {
        PartialCoordinate {
            group_id: Some(self.group_id.clone()),
            artifact_id: Some(self.artifact_id.clone()),
            version: Some(self.version.clone()),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupArtifact {
    pub group_id: String,
    pub artifact_id: String,
}

impl GroupArtifact {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> Coordinate {
        Coordinate::new(self.group_id.clone(), self.artifact_id.clone(), version)
    }
}

impl fmt::Display for GroupArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// A coordinate whose fields may be missing or not yet interpolated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PartialCoordinate {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
}

impl PartialCoordinate {
    /// The full coordinate, if every field is present, non-empty and free of
    /// unresolved `${...}` placeholders.
    pub fn complete(&self) -> Option<Coordinate> {
        fn usable(field: &Option<String>) -> Option<&str> {
            let value = field.as_deref()?.trim();
            (!value.is_empty() && !value.contains("${")).then_some(value)
        }
        Some(Coordinate::new(
            usable(&self.group_id)?,
            usable(&self.artifact_id)?,
            usable(&self.version)?,
        ))
    }

    pub fn group_artifact(&self) -> Option<GroupArtifact> {
        Some(GroupArtifact::new(
            self.group_id.clone()?,
            self.artifact_id.clone()?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.group_id.is_none() && self.artifact_id.is_none() && self.version.is_none()
    }

    /// Fills missing group and version from `parent`, the way a child POM
    /// inherits them.
    pub fn inherit_from(&mut self, parent: &PartialCoordinate) {
        if self.group_id.is_none() {
            self.group_id = parent.group_id.clone();
        }
        if self.version.is_none() {
            self.version = parent.version.clone();
        }
    }
}

impl fmt::Display for PartialCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "?".to_owned());
        write!(
            f,
            "{}:{}:{}",
            field(&self.group_id),
            field(&self.artifact_id),
            field(&self.version)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_three_non_empty_parts() {
        assert_eq!(
            Coordinate::parse("org.example:lib:1.0"),
            Some(Coordinate::new("org.example", "lib", "1.0"))
        );
        assert_eq!(Coordinate::parse("org.example:lib"), None);
        assert_eq!(Coordinate::parse("org.example::1.0"), None);
        assert_eq!(Coordinate::parse("a:b:c:d"), None);
    }

    #[test]
    fn placeholders_keep_coordinates_partial() {
        let partial = PartialCoordinate {
            group_id: Some("org.example".into()),
            artifact_id: Some("lib".into()),
            version: Some("${revision}".into()),
        };
        assert_eq!(partial.complete(), None);
        assert_eq!(partial.to_string(), "org.example:lib:${revision}");
    }

    #[test]
    fn children_inherit_group_and_version_only() {
        let mut child = PartialCoordinate {
            artifact_id: Some("child".into()),
            ..Default::default()
        };
        child.inherit_from(&Coordinate::new("org.example", "parent", "2.0").to_partial());
        assert_eq!(
            child.complete(),
            Some(Coordinate::new("org.example", "child", "2.0"))
        );
    }
}
