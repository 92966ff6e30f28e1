//! Construct identity: ConstructType and Urn

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MasonryError;

/// Identifies a reusable construct template as a (package, name) pair.
///
/// Parsed from dotted strings like `masonry.aws.Bucket` (package is
/// everything before the last dot). Total ordering is string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructType {
    pub package: String,
    pub name: String,
}

impl ConstructType {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConstructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

impl FromStr for ConstructType {
    type Err = MasonryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (package, name) = s.rsplit_once('.').ok_or_else(|| {
            MasonryError::InvalidConstructType {
                input: s.to_string(),
                reason: "expected '<package>.<Name>'".to_string(),
            }
        })?;
        if package.is_empty() || name.is_empty() {
            return Err(MasonryError::InvalidConstructType {
                input: s.to_string(),
                reason: "package and name must be non-empty".to_string(),
            });
        }
        Ok(Self {
            package: package.to_string(),
            name: name.to_string(),
        })
    }
}

impl Serialize for ConstructType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConstructType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Hierarchical resource identity.
///
/// Wire format:
/// `urn:<account>:<project>:<environment>:<application>:<type>/<subtype>[:<parent>/<resource>][:<output>]`
///
/// The sixth segment holds `parent/resource` when a parent resource is
/// present, or just `resource` otherwise. The output segment is only
/// emitted when non-empty; when it is, the resource segment is always
/// emitted (possibly empty) to keep parsing unambiguous. Immutable once
/// parsed; equality and ordering are fieldwise lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Urn {
    pub account_id: String,
    pub project: String,
    pub environment: String,
    pub application: String,
    pub urn_type: String,
    pub subtype: String,
    pub parent_resource: String,
    pub resource: String,
    pub output: String,
}

impl Urn {
    /// Builds a construct-instance URN.
    pub fn construct(
        account_id: impl Into<String>,
        project: impl Into<String>,
        environment: impl Into<String>,
        application: impl Into<String>,
        construct_type: &ConstructType,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            project: project.into(),
            environment: environment.into(),
            application: application.into(),
            urn_type: "construct".to_string(),
            subtype: construct_type.to_string(),
            parent_resource: String::new(),
            resource: resource.into(),
            output: String::new(),
        }
    }

    /// True when this URN addresses an output of a construct.
    pub fn is_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Equality ignoring the output segment.
    pub fn same_construct(&self, other: &Urn) -> bool {
        self.account_id == other.account_id
            && self.project == other.project
            && self.environment == other.environment
            && self.application == other.application
            && self.urn_type == other.urn_type
            && self.subtype == other.subtype
            && self.parent_resource == other.parent_resource
            && self.resource == other.resource
    }

    /// The construct type carried in the subtype segment, if any.
    pub fn construct_type(&self) -> Result<ConstructType, MasonryError> {
        self.subtype.parse()
    }

    /// Subtype compatibility against an allow-list entry. A name of `*`
    /// matches any construct in the package.
    pub fn matches_type(&self, allowed: &ConstructType) -> bool {
        match self.construct_type() {
            Ok(ct) => {
                ct.package == allowed.package && (allowed.name == "*" || ct.name == allowed.name)
            }
            Err(_) => false,
        }
    }

    /// This URN without its output segment.
    pub fn without_output(&self) -> Urn {
        let mut urn = self.clone();
        urn.output.clear();
        urn
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "urn:{}:{}:{}:{}:{}/{}",
            self.account_id,
            self.project,
            self.environment,
            self.application,
            self.urn_type,
            self.subtype
        )?;
        let has_resource = !self.parent_resource.is_empty() || !self.resource.is_empty();
        if has_resource || !self.output.is_empty() {
            f.write_str(":")?;
            if !self.parent_resource.is_empty() {
                write!(f, "{}/", self.parent_resource)?;
            }
            f.write_str(&self.resource)?;
        }
        if !self.output.is_empty() {
            write!(f, ":{}", self.output)?;
        }
        Ok(())
    }
}

impl FromStr for Urn {
    type Err = MasonryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MasonryError::InvalidUrn {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s.strip_prefix("urn:").ok_or_else(|| invalid("missing 'urn:' prefix"))?;
        let parts: Vec<&str> = rest.split(':').collect();
        if !(5..=7).contains(&parts.len()) {
            return Err(invalid("expected 5 to 7 segments"));
        }

        let (urn_type, subtype) = parts[4]
            .split_once('/')
            .ok_or_else(|| invalid("type segment must be '<type>/<subtype>'"))?;

        let mut urn = Urn {
            account_id: parts[0].to_string(),
            project: parts[1].to_string(),
            environment: parts[2].to_string(),
            application: parts[3].to_string(),
            urn_type: urn_type.to_string(),
            subtype: subtype.to_string(),
            ..Default::default()
        };

        if let Some(resource_part) = parts.get(5) {
            match resource_part.split_once('/') {
                Some((parent, resource)) => {
                    urn.parent_resource = parent.to_string();
                    urn.resource = resource.to_string();
                }
                None => urn.resource = resource_part.to_string(),
            }
        }
        if let Some(output) = parts.get(6) {
            urn.output = output.to_string();
        }

        Ok(urn)
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn construct_type_parses_multi_dot_package() {
        let ct: ConstructType = "masonry.aws.Bucket".parse().unwrap();
        assert_eq!(ct.package, "masonry.aws");
        assert_eq!(ct.name, "Bucket");
        assert_eq!(ct.to_string(), "masonry.aws.Bucket");
    }

    #[test]
    fn construct_type_rejects_missing_dot() {
        assert!("Bucket".parse::<ConstructType>().is_err());
        assert!(".Bucket".parse::<ConstructType>().is_err());
        assert!("pkg.".parse::<ConstructType>().is_err());
    }

    #[test]
    fn urn_round_trip() {
        for raw in [
            "urn:acct:proj:dev:app:construct/masonry.aws.Bucket",
            "urn:acct:proj:dev:app:construct/masonry.aws.Bucket:my-bucket",
            "urn:acct:proj:dev:app:construct/masonry.aws.Bucket:parent/my-bucket",
            "urn:acct:proj:dev:app:construct/masonry.aws.Bucket:my-bucket:BucketArn",
        ] {
            let urn: Urn = raw.parse().unwrap();
            assert_eq!(urn.to_string(), raw);
        }
    }

    #[test]
    fn urn_output_without_resource_round_trips() {
        let mut urn: Urn = "urn:a:p:e:app:construct/pkg.Name".parse().unwrap();
        urn.output = "Arn".to_string();
        let reparsed: Urn = urn.to_string().parse().unwrap();
        assert_eq!(reparsed, urn);
        assert!(reparsed.is_output());
    }

    #[test]
    fn urn_rejects_bad_type_segment() {
        assert!("urn:a:p:e:app:construct".parse::<Urn>().is_err());
        assert!("a:p:e:app:construct/x".parse::<Urn>().is_err());
    }

    #[test]
    fn same_construct_ignores_output() {
        let a: Urn = "urn:a:p:e:app:construct/pkg.Name:res:Out1".parse().unwrap();
        let b: Urn = "urn:a:p:e:app:construct/pkg.Name:res".parse().unwrap();
        assert!(a.same_construct(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn matches_type_with_wildcard() {
        let urn: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        assert!(urn.matches_type(&ConstructType::new("masonry.aws", "Bucket")));
        assert!(urn.matches_type(&ConstructType::new("masonry.aws", "*")));
        assert!(!urn.matches_type(&ConstructType::new("masonry.gcp", "Bucket")));
    }

    #[test]
    fn ordering_is_fieldwise() {
        let a: Urn = "urn:a:p:e:app:construct/pkg.A:r".parse().unwrap();
        let b: Urn = "urn:a:p:e:app:construct/pkg.B:r".parse().unwrap();
        assert!(a < b);
    }
}
