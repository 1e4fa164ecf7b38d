//! npm package specifier parsing and validation.
//!
//! Parses specifiers like `@scope/name@version`, `name@version`, `@scope/name`, `name`.
//! Validates names against npm naming rules.

use crate::error::{CostaError, CostaResult};

/// Maximum npm package name length (scope + name combined).
const MAX_PACKAGE_NAME_LENGTH: usize = 214;

/// A parsed npm package specifier.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NpmPackageNameSchema {
    /// Optional scope, including the leading `@` (e.g. `"@pipcook"`).
    pub scope: Option<String>,
    /// Package name (without scope).
    pub name: String,
    /// Optional version or dist-tag (e.g. `"1.0.0"`, `"beta"`).
    pub version: Option<String>,
}

impl NpmPackageNameSchema {
    /// Parse an npm package specifier string.
    ///
    /// Accepted formats:
    /// - `@scope/name@version`
    /// - `@scope/name`
    /// - `name@version`
    /// - `name`
    ///
    /// # Errors
    ///
    /// Returns `CostaError::SourceResolution` if the specifier is empty or a
    /// scoped name has no `/` boundary, and `CostaError::InvalidPackageName`
    /// if a component fails npm naming rules.
    #[allow(clippy::arithmetic_side_effects)] // index arithmetic on find() results is safe
    pub fn parse(spec: &str) -> CostaResult<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(CostaError::resolution(spec, "empty package specifier"));
        }

        let malformed = || CostaError::resolution(spec, "invalid scoped package specifier");

        let parsed = if let Some(without_at) = spec.strip_prefix('@') {
            let slash_pos = without_at.find('/').ok_or_else(malformed)?;
            let scope = &without_at[..slash_pos];
            if scope.is_empty() || scope.starts_with('@') {
                return Err(malformed());
            }

            let rest = &without_at[slash_pos + 1..];
            let (name, version) = split_version(rest).ok_or_else(malformed)?;
            Self {
                scope: Some(format!("@{scope}")),
                name: name.to_string(),
                version: version.map(ToString::to_string),
            }
        } else {
            let (name, version) = split_version(spec)
                .ok_or_else(|| CostaError::resolution(spec, "invalid package specifier"))?;
            Self {
                scope: None,
                name: name.to_string(),
                version: version.map(ToString::to_string),
            }
        };

        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate the scope and name against npm naming rules.
    fn validate(&self) -> CostaResult<()> {
        let full_name = self.package_name();
        if full_name.len() > MAX_PACKAGE_NAME_LENGTH {
            return Err(CostaError::InvalidPackageName {
                name: full_name,
                reason: format!("exceeds maximum length of {MAX_PACKAGE_NAME_LENGTH} characters"),
            });
        }

        if let Some(scope) = &self.scope {
            validate_name_component(scope.trim_start_matches('@'), "scope")?;
        }
        validate_name_component(&self.name, "name")
    }

    /// Full package name including scope (e.g. `@scope/name` or `name`).
    #[must_use]
    pub fn package_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Split `name[@version]`; `None` when either side of the `@` is empty.
#[allow(clippy::arithmetic_side_effects)]
fn split_version(s: &str) -> Option<(&str, Option<&str>)> {
    if s.is_empty() {
        return None;
    }
    match s.find('@') {
        Some(at_pos) => {
            let name = &s[..at_pos];
            let version = &s[at_pos + 1..];
            if name.is_empty() || version.is_empty() {
                None
            } else {
                Some((name, Some(version)))
            }
        },
        None => Some((s, None)),
    }
}

/// Validate a single name component (scope or package name) against npm rules.
///
/// Must match `[a-z0-9][a-z0-9._-]*` (lowercase only, starts with alphanumeric).
fn validate_name_component(name: &str, kind: &str) -> CostaResult<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(CostaError::InvalidPackageName {
            name: name.to_string(),
            reason: format!("{kind} cannot be empty"),
        });
    };

    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(CostaError::InvalidPackageName {
            name: name.to_string(),
            reason: format!("{kind} must start with a lowercase letter or digit"),
        });
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '.' && c != '_' && c != '-' {
            return Err(CostaError::InvalidPackageName {
                name: name.to_string(),
                reason: format!(
                    "{kind} contains invalid character '{c}' (allowed: a-z, 0-9, '.', '_', '-')"
                ),
            });
        }
    }

    Ok(())
}

impl std::fmt::Display for NpmPackageNameSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.package_name())?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}
