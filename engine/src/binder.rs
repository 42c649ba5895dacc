//! Binding command-line option tokens to declared options.
//!
//! Tokens are `--name value`, `--name=value`, `--flag`, `--no-flag` or the
//! older `+name=value`. Every declared option ends up exported under its
//! env binding: the given value, else its default, else an answer from the
//! prompt, else empty (`false` for bools).

use std::collections::BTreeMap;
use std::path::Path;

use rundown::{OptionSpec, OptionType};
use tracing::debug;

use crate::context::Context;
use crate::error::{EngineError, Result};

/// Asks for a value the command line left out.
pub type Prompt<'p> = &'p mut dyn FnMut(&OptionSpec) -> Option<String>;

fn split_token(token: &str) -> Option<(&str, Option<&str>)> {
    let rest = token.strip_prefix("--").or_else(|| token.strip_prefix('+'))?;
    if rest.is_empty() {
        return None;
    }
    Some(match rest.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (rest, None),
    })
}

fn is_option_token(token: &str) -> bool {
    token.starts_with("--") || token.starts_with('+')
}

/// Parse `args` against `options` into raw values by option name.
pub fn parse_args(
    options: &[&OptionSpec],
    section: Option<&str>,
    args: &[String],
) -> Result<BTreeMap<String, String>> {
    let find = |name: &str| options.iter().copied().find(|o| o.name == name);
    let mut given = BTreeMap::new();
    let mut tokens = args.iter().peekable();

    while let Some(token) = tokens.next() {
        let (name, inline) = split_token(token).ok_or_else(|| EngineError::Argument(token.clone()))?;
        let (option, negated) = match find(name) {
            Some(option) => (option, false),
            None => match name.strip_prefix("no-").and_then(find) {
                Some(option) if option.kind.is_bool() && inline.is_none() => (option, true),
                _ => {
                    return Err(EngineError::UnknownOption {
                        option: name.to_string(),
                        section: section.map(str::to_string),
                    });
                }
            },
        };

        let value = match inline {
            Some(value) => value.to_string(),
            None if negated => "false".to_string(),
            None if option.kind.is_bool() => "true".to_string(),
            None => match tokens.next_if(|next| !is_option_token(next)) {
                Some(value) => value.clone(),
                None => {
                    return Err(EngineError::InvalidOption {
                        option: option.name.clone(),
                        reason: "expected a value".to_string(),
                    });
                }
            },
        };
        given.insert(option.name.clone(), value);
    }
    Ok(given)
}

/// Validate one value and put it in canonical form.
fn resolve(option: &OptionSpec, value: &str, pwd: &Path) -> Result<String> {
    let value = match option.kind {
        OptionType::File(_) => option.kind.normalise_to_path(value, pwd).display().to_string(),
        _ => value.to_string(),
    };
    option
        .kind
        .validate(&value)
        .map_err(|reason| EngineError::InvalidOption {
            option: option.name.clone(),
            reason,
        })?;
    Ok(option.kind.normalise(&value))
}

/// Bind `args` to `options` and export the results into `ctx`.
///
/// File values are resolved against `pwd`, the directory the program was
/// started in.
pub fn bind(
    options: &[&OptionSpec],
    section: Option<&str>,
    args: &[String],
    pwd: &Path,
    ctx: &mut Context,
    mut prompt: Option<Prompt<'_>>,
) -> Result<()> {
    let mut given = parse_args(options, section, args)?;

    for option in options {
        let mut raw = given.remove(&option.name).or_else(|| option.default.clone());
        if raw.is_none() && option.required {
            raw = prompt.as_mut().and_then(|ask| ask(option));
        }
        let value = match raw {
            Some(raw) => resolve(option, &raw, pwd)?,
            None if option.required => {
                return Err(EngineError::MissingOption {
                    option: option.name.clone(),
                    section: section.map(str::to_string),
                });
            }
            None if option.kind.is_bool() => "false".to_string(),
            None => String::new(),
        };
        debug!(option = %option.name, binding = %option.env_binding, value = %value, "bound option");
        ctx.set(option.env_binding.clone(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Output;
    use crate::error::ExitCode;

    fn option(name: &str, kind: &str) -> OptionSpec {
        OptionSpec {
            name: name.to_string(),
            kind: kind.parse().unwrap(),
            required: false,
            default: None,
            prompt: None,
            description: None,
            env_binding: OptionSpec::default_env_binding(name),
            span: 0..0,
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ctx() -> Context {
        Context::empty(Path::new("doc.md"), Output::capture().0, 80)
    }

    #[test]
    fn all_token_forms() {
        let name = option("name", "string");
        let dry = option("dry-run", "bool");
        let level = option("level", "enum:low|high");
        let options = [&name, &dry, &level];
        let mut ctx = ctx();
        bind(
            &options,
            None,
            &args(&["--name", "x y", "--dry-run", "+level=high"]),
            Path::new("/"),
            &mut ctx,
            None,
        )
        .unwrap();
        assert_eq!(ctx.get("OPT_NAME"), Some("x y"));
        assert_eq!(ctx.get("OPT_DRY_RUN"), Some("true"));
        assert_eq!(ctx.get("OPT_LEVEL"), Some("high"));

        let given = parse_args(&options, None, &args(&["--no-dry-run", "--name=a=b"])).unwrap();
        assert_eq!(given["dry-run"], "false");
        assert_eq!(given["name"], "a=b");
    }

    #[test]
    fn invalid_enum_names_allowed_values() {
        let env = option("env", "enum:dev|prod");
        let err = bind(&[&env], Some("deploy"), &args(&["--env", "staging"]), Path::new("/"), &mut ctx(), None)
            .unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::Invocation);
        let message = err.to_string();
        assert!(message.contains("--env"), "{message}");
        assert!(message.contains("dev, prod"), "{message}");
    }

    #[test]
    fn unknown_option_and_stray_argument() {
        let env = option("env", "string");
        let err = parse_args(&[&env], Some("deploy"), &args(&["--region", "eu"])).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOption { ref option, .. } if option == "region"));
        let err = parse_args(&[&env], None, &args(&["oops"])).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::Argument);
    }

    #[test]
    fn defaults_prompts_and_missing() {
        let mut with_default = option("region", "string");
        with_default.default = Some("eu".into());
        let flag = option("force", "bool");
        let free = option("note", "string");
        let mut ctx = ctx();
        bind(&[&with_default, &flag, &free], None, &[], Path::new("/"), &mut ctx, None).unwrap();
        assert_eq!(ctx.get("OPT_REGION"), Some("eu"));
        assert_eq!(ctx.get("OPT_FORCE"), Some("false"));
        assert_eq!(ctx.get("OPT_NOTE"), Some(""));

        let mut required = option("token", "string");
        required.required = true;
        let err = bind(&[&required], Some("s"), &[], Path::new("/"), &mut ctx, None).unwrap_err();
        assert!(matches!(err, EngineError::MissingOption { .. }));

        let mut ask = |_: &OptionSpec| Some("secret".to_string());
        bind(&[&required], Some("s"), &[], Path::new("/"), &mut ctx, Some(&mut ask)).unwrap();
        assert_eq!(ctx.get("OPT_TOKEN"), Some("secret"));
    }

    #[test]
    fn file_values_resolve_against_pwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.txt"), "x").unwrap();
        let input = option("input", "file:exist");
        let mut ctx = ctx();
        bind(&[&input], None, &args(&["--input", "in.txt"]), dir.path(), &mut ctx, None).unwrap();
        assert_eq!(ctx.get("OPT_INPUT"), Some(dir.path().join("in.txt").to_str().unwrap()));

        let err = bind(&[&input], None, &args(&["--input", "missing.txt"]), dir.path(), &mut ctx, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOption { .. }));
    }
}
