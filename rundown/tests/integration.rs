use std::fs;
use std::path::Path;

use rundown::{Loaded, NodeKind, loader};

const TOOLS: &str = "\
# Tools

Shared helpers for the project.

<r opt=\"verbose\" type=\"bool\"/>

## Build <r section=\"build\"/>

<r desc=\"Compile everything\"/>

```bash stdout
make
```

## Deploy <r section=\"deploy\"/>

<r opt=\"env\" type=\"enum:dev|prod\" required>Target environment</r>

<r invoke=\"build\"/>

```bash skip-on-failure
./deploy.sh \"$OPT_ENV\"
```
";

fn load(source: &str) -> Loaded {
    loader::load_source(source.to_string(), Path::new("RUNDOWN.md")).expect("load failed")
}

#[test]
fn sections_in_document_order() {
    let loaded = load(TOOLS);
    assert_eq!(loaded.section_names(), vec!["build", "deploy"]);
    assert_eq!(loaded.root().title().as_deref(), Some("Tools"));
    assert!(loaded.diagnostics().next().is_none());
}

#[test]
fn section_metadata() {
    let loaded = load(TOOLS);
    let (_, build) = loaded.find_section("build").unwrap();
    assert_eq!(build.level(), 2);
    assert_eq!(build.short_description(), Some("Compile everything"));
    assert!(build.options().is_empty());

    let (_, deploy) = loaded.find_section("deploy").unwrap();
    let env = &deploy.options()[0];
    assert_eq!(env.usage(), "--env <dev|prod>");
    assert!(env.kind.validate("staging").is_err());
    assert_eq!(env.env_binding, "OPT_ENV");
    assert!(deploy.end().is_some());
}

#[test]
fn root_options_exclude_section_options() {
    let loaded = load(TOOLS);
    let names: Vec<_> = loaded.root().root_options().iter().map(|o| o.name.clone()).collect();
    assert_eq!(names, vec!["verbose"]);
}

#[test]
fn invoked_section_is_expanded_in_place() {
    let loaded = load(TOOLS);
    let doc = loaded.root();
    let invokes = doc
        .ast
        .preorder()
        .into_iter()
        .filter(|id| matches!(doc.ast.kind(*id), NodeKind::InvokeBlock(_)))
        .count();
    assert_eq!(invokes, 1);
    let executions = doc
        .ast
        .preorder()
        .into_iter()
        .filter(|id| matches!(doc.ast.kind(*id), NodeKind::ExecutionBlock(_)))
        .count();
    // build, its copy inside deploy, and the deploy script
    assert_eq!(executions, 3);
}

#[test]
fn imported_sections_are_namespaced() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("shared.md"), "## Lint <r section=\"lint\"/>\n\n```bash\ncargo fmt\n```\n").unwrap();
    let main = dir.path().join("RUNDOWN.md");
    fs::write(&main, format!("<r import=\"shared\" from=\"shared.md\"/>\n\n{TOOLS}")).unwrap();

    let loaded = loader::load(&main).unwrap();
    assert_eq!(loaded.section_names(), vec!["build", "deploy", "shared:lint"]);
    let (doc, _) = loaded.find_section("shared:lint").unwrap();
    assert_eq!(doc.file_id, 1);
    assert!(loaded.find_section("lint").is_none());
}

#[test]
fn invalid_option_default_is_an_error() {
    let loaded = load("## A <r section=\"a\"/>\n\n<r opt=\"n\" type=\"bool\" default=\"maybe\"/>\n");
    let errors: Vec<_> = loaded.diagnostics().filter(|d| d.is_error()).collect();
    assert_eq!(errors.len(), 1);
    let (_, section) = loaded.find_section("a").unwrap();
    assert_eq!(section.options()[0].default, None);
}
