// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package relationship syntax.

A relationship field like `Depends` is a comma delimited list of groups that must all
be satisfied. Each group is a `|` delimited list of alternatives, any one of which
satisfies the group.

See <https://www.debian.org/doc/debian-policy/ch-relationships.html>.
*/

use {
    crate::{
        catalog::PackageRecord,
        error::{DebianError, Result},
        package_version::PackageVersion,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// Regular expression to parse a single alternative.
static RE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^
        # Package names terminate at whitespace, ( or the architecture qualifier.
        (?P<package>[^\s(:\[]+)
        # Optional :arch qualifier.
        (?::(?P<qualifier>[^\s(\[]+))?
        \s*
        (?:\(
            \s*
            (?P<relop><<|<=|=|>=|>>|<|>)
            \s*
            (?P<version>[^\s)]+)
            \s*
        \))?
        \s*
        # Architecture restrictions only appear in source package relationships.
        (?:\[[^\]]*\])?
        \s*
        $
        "#,
    )
    .unwrap()
});

/// A relational operator between a candidate version and a constraint version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionRelationship {
    /// `<<`
    StrictlyEarlier,
    /// `<=`
    EarlierOrEqual,
    /// `=`
    ExactlyEqual,
    /// `>=`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl VersionRelationship {
    /// Whether the result of comparing a candidate to the constraint satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::StrictlyEarlier => ordering == Ordering::Less,
            Self::EarlierOrEqual => ordering != Ordering::Greater,
            Self::ExactlyEqual => ordering == Ordering::Equal,
            Self::LaterOrEqual => ordering != Ordering::Less,
            Self::StrictlyLater => ordering == Ordering::Greater,
        }
    }
}

impl FromStr for VersionRelationship {
    type Err = DebianError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "<<" => Ok(Self::StrictlyEarlier),
            // `<` and `>` are deprecated spellings of `<=` and `>=`.
            "<=" | "<" => Ok(Self::EarlierOrEqual),
            "=" => Ok(Self::ExactlyEqual),
            ">=" | ">" => Ok(Self::LaterOrEqual),
            ">>" => Ok(Self::StrictlyLater),
            _ => Err(DebianError::DependencyParse(s.to_string())),
        }
    }
}

impl Display for VersionRelationship {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::StrictlyEarlier => "<<",
            Self::EarlierOrEqual => "<=",
            Self::ExactlyEqual => "=",
            Self::LaterOrEqual => ">=",
            Self::StrictlyLater => ">>",
        })
    }
}

/// A version constraint on a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DependencyVersionConstraint {
    pub relationship: VersionRelationship,
    pub version: PackageVersion,
}

impl DependencyVersionConstraint {
    /// Whether a candidate version satisfies this constraint.
    pub fn matches(&self, candidate: &PackageVersion) -> bool {
        self.relationship.accepts(candidate.cmp(&self.version))
    }
}

/// A single dependency alternative, `name[:arch] [(op version)]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SingleDependency {
    /// Package or virtual package the dependency is on.
    pub package: String,

    /// Architecture qualifier such as `any` or `native`.
    ///
    /// Parsed and preserved but not used when matching candidates.
    pub architecture_qualifier: Option<String>,

    pub version_constraint: Option<DependencyVersionConstraint>,
}

impl SingleDependency {
    /// Parse an alternative expression.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let caps = RE_DEPENDENCY
            .captures(s)
            .ok_or_else(|| DebianError::DependencyParse(s.to_string()))?;

        let version_constraint = match (caps.name("relop"), caps.name("version")) {
            (Some(relop), Some(version)) => Some(DependencyVersionConstraint {
                relationship: VersionRelationship::from_str(relop.as_str())?,
                version: PackageVersion::parse(version.as_str())?,
            }),
            _ => None,
        };

        Ok(Self {
            package: caps["package"].to_string(),
            architecture_qualifier: caps.name("qualifier").map(|m| m.as_str().to_string()),
            version_constraint,
        })
    }

    /// Whether a candidate package satisfies this alternative.
    ///
    /// The candidate must be named after the target or provide it. Provided names carry no
    /// version of their own, so a versioned constraint is always checked against the
    /// candidate's real version.
    pub fn fulfilled(&self, candidate: &PackageRecord) -> bool {
        if candidate.name() != self.package && !candidate.provides_name(&self.package) {
            return false;
        }

        match &self.version_constraint {
            Some(constraint) => constraint.matches(candidate.version()),
            None => true,
        }
    }
}

impl Display for SingleDependency {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.package)?;
        if let Some(qualifier) = &self.architecture_qualifier {
            write!(f, ":{}", qualifier)?;
        }
        if let Some(constraint) = &self.version_constraint {
            write!(f, " ({} {})", constraint.relationship, constraint.version)?;
        }

        Ok(())
    }
}

/// A group of alternatives, any one of which satisfies the group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyVariants(Vec<SingleDependency>);

impl DependencyVariants {
    /// Parse a `|` delimited expression.
    pub fn parse(s: &str) -> Result<Self> {
        let alternatives = s
            .split('|')
            .map(SingleDependency::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(alternatives))
    }

    /// Iterate over alternatives in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &SingleDependency> {
        self.0.iter()
    }

    /// Whether any alternative is fulfilled by the candidate.
    pub fn fulfilled(&self, candidate: &PackageRecord) -> bool {
        self.0.iter().any(|dep| dep.fulfilled(candidate))
    }
}

impl From<SingleDependency> for DependencyVariants {
    fn from(dep: SingleDependency) -> Self {
        Self(vec![dep])
    }
}

impl Display for DependencyVariants {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let parts = self.0.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        f.write_str(&parts.join(" | "))
    }
}

/// A list of groups that must all be satisfied.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyList {
    groups: Vec<DependencyVariants>,
}

impl DependencyList {
    /// Parse the value of a relationship field.
    ///
    /// An empty or whitespace-only value yields an empty list.
    pub fn parse(s: &str) -> Result<Self> {
        let groups = s
            .split(',')
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .map(DependencyVariants::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { groups })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterate over the AND'ed groups.
    pub fn groups(&self) -> impl Iterator<Item = &DependencyVariants> {
        self.groups.iter()
    }
}

impl Display for DependencyList {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let parts = self.groups.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        f.write_str(&parts.join(", "))
    }
}

/// What a caller asked to resolve.
///
/// A bare package name selects packages by name. Anything with a version constraint or
/// alternatives is treated as a relationship expression and may also match providers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageRequest {
    Name(String),
    Constraint(DependencyVariants),
}

impl PackageRequest {
    /// Parse a request from user input.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() {
            return Err(DebianError::DependencyParse(s.to_string()));
        }

        if s.contains(|c: char| matches!(c, '(' | '|' | ' ' | '\t' | ':')) {
            Ok(Self::Constraint(DependencyVariants::parse(s)?))
        } else {
            Ok(Self::Name(s.to_string()))
        }
    }

    /// Whether a candidate satisfies this request.
    pub fn matches(&self, candidate: &PackageRecord) -> bool {
        match self {
            Self::Name(name) => candidate.name() == name,
            Self::Constraint(variants) => variants.fulfilled(candidate),
        }
    }
}

impl FromStr for PackageRequest {
    type Err = DebianError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for PackageRequest {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Constraint(variants) => variants.fmt(f),
        }
    }
}
