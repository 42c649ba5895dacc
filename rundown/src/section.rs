//! Section options and their value types.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::annotation::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRequirement {
    Any,
    MustExist,
    MustNotExist,
}

/// Type of a section option, as written in `type="…"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    String,
    Enum(Vec<String>),
    File(FileRequirement),
}

impl FromStr for OptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "string" => Ok(OptionType::String),
            "bool" | "boolean" => Ok(OptionType::Bool),
            "file" => Ok(OptionType::File(FileRequirement::Any)),
            "file:exist" | "file:exists" => Ok(OptionType::File(FileRequirement::MustExist)),
            "file:not-exist" | "file:not-exists" => {
                Ok(OptionType::File(FileRequirement::MustNotExist))
            }
            other => match other.strip_prefix("enum:") {
                Some(values) => {
                    let values: Vec<String> = values
                        .split('|')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect();
                    if values.is_empty() {
                        Err("enum type needs at least one value".to_string())
                    } else {
                        Ok(OptionType::Enum(values))
                    }
                }
                None => Err(format!("unknown option type `{other}`")),
            },
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl OptionType {
    pub fn is_bool(&self) -> bool {
        matches!(self, OptionType::Bool)
    }

    /// Check a raw value. File checks resolve relative paths against the
    /// process working directory; use [`OptionType::normalise_to_path`]
    /// first to resolve against something else.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match self {
            OptionType::String => Ok(()),
            OptionType::Bool => match parse_bool(value) {
                Some(_) => Ok(()),
                None => Err(format!("expected true or false, got `{value}`")),
            },
            OptionType::Enum(values) => {
                if values.iter().any(|v| v == value) {
                    Ok(())
                } else {
                    Err(format!(
                        "must be one of {}, got `{value}`",
                        values.join(", ")
                    ))
                }
            }
            OptionType::File(requirement) => {
                if value.is_empty() {
                    return Err("expected a file path".to_string());
                }
                let exists = Path::new(value).exists();
                match requirement {
                    FileRequirement::MustExist if !exists => {
                        Err(format!("file `{value}` does not exist"))
                    }
                    FileRequirement::MustNotExist if exists => {
                        Err(format!("file `{value}` already exists"))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Canonical form of an already validated value.
    pub fn normalise(&self, value: &str) -> String {
        match self {
            OptionType::Bool => parse_bool(value).unwrap_or(false).to_string(),
            _ => value.to_string(),
        }
    }

    /// Resolve a file value against `pwd`.
    pub fn normalise_to_path(&self, value: &str, pwd: &Path) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            pwd.join(path)
        }
    }

    /// Short placeholder used in help output.
    pub fn describe(&self) -> String {
        match self {
            OptionType::Bool => String::new(),
            OptionType::String => "<string>".to_string(),
            OptionType::Enum(values) => format!("<{}>", values.join("|")),
            OptionType::File(_) => "<file>".to_string(),
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Bool => write!(f, "bool"),
            OptionType::String => write!(f, "string"),
            OptionType::Enum(values) => write!(f, "enum:{}", values.join("|")),
            OptionType::File(FileRequirement::Any) => write!(f, "file"),
            OptionType::File(FileRequirement::MustExist) => write!(f, "file:exist"),
            OptionType::File(FileRequirement::MustNotExist) => write!(f, "file:not-exist"),
        }
    }
}

/// A declared option of a section (or of the document root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: String,
    pub kind: OptionType,
    pub required: bool,
    pub default: Option<String>,
    pub prompt: Option<String>,
    pub description: Option<String>,
    /// Environment variable the bound value is exported as.
    pub env_binding: String,
    pub span: Range<usize>,
}

impl OptionSpec {
    /// `OPT_` followed by the upper-cased name with dashes as underscores.
    pub fn default_env_binding(name: &str) -> String {
        format!("OPT_{}", name.to_ascii_uppercase().replace('-', "_"))
    }

    /// Build a spec from an `<r opt=…>` annotation. Returns the spec and any
    /// problems found; an invalid default is dropped.
    pub fn from_attributes(
        attrs: &Attributes,
        description: Option<String>,
        span: Range<usize>,
    ) -> (OptionSpec, Vec<String>) {
        let mut warnings = Vec::new();
        let name = attrs.value("opt").unwrap_or_default().trim().to_string();
        if name.is_empty() {
            warnings.push("option annotation without a name".to_string());
        }
        let kind = match attrs.value("type").unwrap_or("").parse::<OptionType>() {
            Ok(kind) => kind,
            Err(e) => {
                warnings.push(format!("{e}; treating `{name}` as a string"));
                OptionType::String
            }
        };
        let mut default = attrs.value("default").map(str::to_string);
        if let Some(value) = &default {
            let check = match &kind {
                OptionType::File(_) => Ok(()),
                other => other.validate(value),
            };
            if let Err(e) = check {
                warnings.push(format!("default for `{name}` is invalid: {e}"));
                default = None;
            }
        }
        let description = attrs
            .value("desc")
            .map(str::to_string)
            .or(description)
            .filter(|d| !d.is_empty());
        let spec = OptionSpec {
            env_binding: attrs
                .value("as")
                .map(str::to_string)
                .unwrap_or_else(|| Self::default_env_binding(&name)),
            required: attrs.has("required"),
            prompt: attrs.value("prompt").map(str::to_string),
            name,
            kind,
            default,
            description,
            span,
        };
        (spec, warnings)
    }

    /// `--name <placeholder>` as shown in help output.
    pub fn usage(&self) -> String {
        let placeholder = self.kind.describe();
        if placeholder.is_empty() {
            format!("--{}", self.name)
        } else {
            format!("--{} {placeholder}", self.name)
        }
    }
}
