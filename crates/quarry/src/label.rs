//! Build labels: qualified target names of the form
//! `[@subrepo]//package:target`.

use std::fmt;

use crate::error::{RunError, RunResult};

/// A fully resolved build label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildLabel {
    pub subrepo: Option<String>,
    pub package: String,
    pub name: String,
}

impl BuildLabel {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subrepo: None,
            package: package.into(),
            name: name.into(),
        }
    }

    /// Parses a label, resolving relative forms against the current
    /// package and subrepo:
    ///
    /// - `@repo//pkg:name` / `//pkg:name` — absolute
    /// - `//pkg` — target named after the last package component
    /// - `:name` — current package
    /// - `pkg:name` — relative to the current package
    pub(crate) fn parse(s: &str, current_package: &str, current_subrepo: Option<&str>) -> RunResult<Self> {
        let invalid = || RunError::value(format!("invalid build label '{s}'"));
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let (subrepo, rest) = if let Some(rest) = s.strip_prefix('@') {
            let slash = rest.find("//").ok_or_else(invalid)?;
            (Some(rest[..slash].to_owned()), &rest[slash..])
        } else {
            (current_subrepo.map(str::to_owned).filter(|_| !s.starts_with("//")), s)
        };
        let label = if let Some(rest) = rest.strip_prefix("//") {
            match rest.split_once(':') {
                Some((pkg, name)) if !name.is_empty() => Self {
                    subrepo,
                    package: pkg.to_owned(),
                    name: name.to_owned(),
                },
                Some(_) => return Err(invalid()),
                None => {
                    let name = rest.rsplit('/').next().unwrap_or(rest);
                    if name.is_empty() {
                        return Err(invalid());
                    }
                    Self {
                        subrepo,
                        package: rest.to_owned(),
                        name: name.to_owned(),
                    }
                }
            }
        } else if let Some(name) = rest.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid());
            }
            Self {
                subrepo,
                package: current_package.to_owned(),
                name: name.to_owned(),
            }
        } else if let Some((pkg, name)) = rest.split_once(':') {
            if name.is_empty() {
                return Err(invalid());
            }
            let package = if current_package.is_empty() {
                pkg.to_owned()
            } else {
                format!("{current_package}/{pkg}")
            };
            Self {
                subrepo,
                package,
                name: name.to_owned(),
            }
        } else {
            return Err(invalid());
        };
        Ok(label)
    }
}

impl fmt::Display for BuildLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(subrepo) = &self.subrepo {
            write!(f, "@{subrepo}")?;
        }
        write!(f, "//{}:{}", self.package, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_labels() {
        let l = BuildLabel::parse("//src/core:core", "pkg", None).unwrap();
        assert_eq!(l.package, "src/core");
        assert_eq!(l.name, "core");
        assert_eq!(l.subrepo, None);
        assert_eq!(l.to_string(), "//src/core:core");
    }

    #[test]
    fn package_only_label_names_last_component() {
        let l = BuildLabel::parse("//src/core", "", None).unwrap();
        assert_eq!(l.name, "core");
        assert_eq!(l.package, "src/core");
    }

    #[test]
    fn local_label_uses_current_package() {
        let l = BuildLabel::parse(":lib", "src/core", Some("sub")).unwrap();
        assert_eq!(l.package, "src/core");
        assert_eq!(l.name, "lib");
        assert_eq!(l.subrepo.as_deref(), Some("sub"));
    }

    #[test]
    fn subrepo_label() {
        let l = BuildLabel::parse("@third_party//a/b:c", "pkg", None).unwrap();
        assert_eq!(l.subrepo.as_deref(), Some("third_party"));
        assert_eq!(l.to_string(), "@third_party//a/b:c");
    }

    #[test]
    fn relative_label() {
        let l = BuildLabel::parse("sub:tgt", "src", None).unwrap();
        assert_eq!(l.package, "src/sub");
        assert_eq!(l.name, "tgt");
    }

    #[test]
    fn absolute_label_escapes_current_subrepo() {
        let l = BuildLabel::parse("//a:b", "pkg", Some("sub")).unwrap();
        assert_eq!(l.subrepo, None);
    }

    #[test]
    fn invalid_labels() {
        for bad in ["", "no-colon-or-slashes", "//pkg:", ":", "has space:x", "@norepo"] {
            assert!(BuildLabel::parse(bad, "", None).is_err(), "{bad} should fail");
        }
    }
}
