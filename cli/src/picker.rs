//! Interactive prompts on stderr/stdin for `--ask`.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use rundown::{Loaded, OptionSpec};

use engine::EngineError;

fn read_answer(question: &str) -> io::Result<String> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{question} ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Resolve an answer given as a list number or a section name.
fn choose(names: &[String], answer: &str) -> Option<String> {
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| names.get(i)).cloned();
    }
    names.iter().find(|name| name.as_str() == answer).cloned()
}

/// List the sections and read a choice. `None` on an empty answer.
pub fn pick_section(loaded: &Loaded) -> Result<Option<String>> {
    let mut names = Vec::new();
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "Sections:")?;
    for doc in &loaded.documents {
        for section in doc.sections() {
            names.push(section.name().to_string());
            match section.short_description() {
                Some(desc) => writeln!(stderr, "  {:>2}) {}  {desc}", names.len(), section.name())?,
                None => writeln!(stderr, "  {:>2}) {}", names.len(), section.name())?,
            }
        }
    }
    drop(stderr);
    if names.is_empty() {
        anyhow::bail!("the document declares no sections");
    }

    let answer = read_answer("Choose a section (empty to quit):")?;
    if answer.is_empty() {
        return Ok(None);
    }
    match choose(&names, &answer) {
        Some(name) => Ok(Some(name)),
        None => Err(EngineError::UnknownSection(answer).into()),
    }
}

/// Ask for a missing option that declares a `prompt`.
pub fn ask_option(option: &OptionSpec) -> Option<String> {
    let question = option.prompt.as_deref()?;
    match read_answer(question) {
        Ok(answer) if !answer.is_empty() => Some(answer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_by_number_or_name() {
        let names = vec!["build".to_string(), "deploy".to_string()];
        assert_eq!(choose(&names, "2").as_deref(), Some("deploy"));
        assert_eq!(choose(&names, "build").as_deref(), Some("build"));
        assert_eq!(choose(&names, "0"), None);
        assert_eq!(choose(&names, "3"), None);
        assert_eq!(choose(&names, "test"), None);
    }
}
