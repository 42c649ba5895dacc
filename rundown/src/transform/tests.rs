use super::*;
use crate::ast::{NodeKind, SkipTarget, SpinnerMode};
use crate::document::Document;

fn parse(source: &str) -> Document {
    Document::parse(source, "test.md", 0)
}

fn kinds_of<F: Fn(&NodeKind) -> bool>(doc: &Document, f: F) -> Vec<NodeId> {
    doc.ast
        .preorder()
        .into_iter()
        .filter(|id| f(doc.ast.kind(*id)))
        .collect()
}

fn exec_specs(doc: &Document) -> Vec<crate::ast::ExecutionSpec> {
    doc.ast
        .preorder()
        .into_iter()
        .filter_map(|id| match doc.ast.kind(id) {
            NodeKind::ExecutionBlock(spec) => Some((**spec).clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn fence_modifiers_make_an_execution_block() {
    let doc = parse("# T\n\n```bash stdout spinner:\"Say hi\"\necho hi\n```\n");
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].interpreter, "bash");
    assert!(specs[0].show_stdout);
    assert_eq!(specs[0].spinner_name, "Say hi");
    assert_eq!(specs[0].code.text(&doc.source), "echo hi\n");
    assert!(kinds_of(&doc, |k| matches!(k, NodeKind::CodeBlock(_))).is_empty());
}

#[test]
fn preceding_annotation_is_folded_into_fence() {
    let doc = parse("# T\n<r stdout nospin/>\n```bash\necho hi\n```\n");
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 1);
    assert!(specs[0].show_stdout);
    assert_eq!(specs[0].spinner, SpinnerMode::Hidden);
    assert!(kinds_of(&doc, |k| matches!(k, NodeKind::RundownBlock { .. })).is_empty());
}

#[test]
fn bare_interpreter_fence_runs() {
    let doc = parse("```bash\necho hi\n```\n");
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].interpreter, "bash");
    assert_eq!(specs[0].spinner, SpinnerMode::Visible);
    assert!(kinds_of(&doc, |k| matches!(k, NodeKind::CodeBlock(_))).is_empty());
}

#[test]
fn data_fence_stays_code() {
    let doc = parse("```json\n{}\n```\n\n```\nplain\n```\n");
    assert!(exec_specs(&doc).is_empty());
    assert_eq!(kinds_of(&doc, |k| matches!(k, NodeKind::CodeBlock(_))).len(), 2);
}

#[test]
fn stdout_into_alone_runs() {
    let doc = parse("# V\n\n```bash stdout-into:VERSION\necho 1.2.3\n```\n");
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].stdout_into.as_deref(), Some("VERSION"));
    assert!(!specs[0].show_stdout);
}

#[test]
fn if_alone_runs() {
    let doc = parse("<r if=\"test -f go.mod\"/>\n```sh\ngo build\n```\n");
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].interpreter, "sh");
    assert_eq!(specs[0].if_script.as_deref(), Some("test -f go.mod"));
    assert!(kinds_of(&doc, |k| matches!(k, NodeKind::RundownBlock { .. })).is_empty());
}

#[test]
fn reveal_only_never_runs() {
    let doc = parse("```bash reveal-only\nrm -rf build\n```\n");
    assert!(exec_specs(&doc).is_empty());
    let mut again = doc.ast.clone();
    let diagnostics = transform(&mut again, &doc.source, 0);
    assert!(diagnostics.is_empty());
    assert_eq!(again.dump(&doc.source), doc.ast.dump(&doc.source));
}

#[test]
fn reveal_keeps_the_listing() {
    let doc = parse("```bash reveal\necho hi\n```\n");
    let top = doc.ast.child_ids(doc.ast.root());
    assert_eq!(top.len(), 2);
    assert!(matches!(doc.ast.kind(top[0]), NodeKind::CodeBlock(_)));
    assert!(matches!(doc.ast.kind(top[1]), NodeKind::ExecutionBlock(_)));
}

#[test]
fn save_takes_priority_over_execution() {
    let doc = parse("<r save=CONFIG as=.json stdout/>\n```json\n{}\n```\n");
    let saves = kinds_of(&doc, |k| matches!(k, NodeKind::SaveCodeBlock { .. }));
    assert_eq!(saves.len(), 1);
    match doc.ast.kind(saves[0]) {
        NodeKind::SaveCodeBlock {
            variable, suffix, ..
        } => {
            assert_eq!(variable, "CONFIG");
            assert_eq!(suffix, ".json");
        }
        _ => unreachable!(),
    }
    assert!(exec_specs(&doc).is_empty());
}

#[test]
fn heading_section_gets_an_end_before_the_next_peer() {
    let source = "\
## Build <r section=\"build\"/>

```bash stdout
echo build
```

### Detail

text

## Deploy <r section=\"deploy\"/>

```bash stdout
echo deploy
```
";
    let doc = parse(source);
    let sections = doc.sections();
    assert_eq!(
        sections.iter().map(|s| s.name()).collect::<Vec<_>>(),
        vec!["build", "deploy"]
    );
    let build = sections[0];
    assert_eq!(build.level(), 2);
    assert_eq!(build.short_description(), Some("Build"));

    let top = doc.ast.child_ids(doc.ast.root());
    let end = build.end().unwrap();
    let end_pos = top.iter().position(|id| *id == end).unwrap();
    // The end sits directly before deploy's pointer, not between it and its heading.
    assert!(matches!(
        doc.ast.kind(top[end_pos + 1]),
        NodeKind::SectionPointer(p) if p.name == "deploy"
    ));
    // The heading text no longer carries the annotation's trailing space.
    let heading = build.pointer.heading.unwrap();
    assert_eq!(doc.text_of(heading), "Build");

    let deploy_end = sections[1].end().unwrap();
    assert_eq!(doc.ast.last_child(doc.ast.root()), Some(deploy_end));
}

#[test]
fn nested_section_ends_close_inside_out() {
    let source = "\
## Outer <r section=\"outer\"/>

### Inner <r section=\"inner\"/>

text

## Next
";
    let doc = parse(source);
    let outer = doc.section("outer").unwrap();
    let inner = doc.section("inner").unwrap();
    let top = doc.ast.child_ids(doc.ast.root());
    let pos = |id: NodeId| top.iter().position(|n| *n == id).unwrap();
    assert!(pos(inner.end().unwrap()) < pos(outer.end().unwrap()));
}

#[test]
fn options_and_description_attach_to_section() {
    let source = "\
## Deploy <r section=\"deploy\"/>

<r opt=\"env\" type=\"enum:dev|prod\" required>Target environment</r>

<r desc=\"Ship it\">Deploys the thing to the chosen environment.</r>

<r opt=\"force\" type=\"bool\"/>
";
    let doc = parse(source);
    assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    let section = doc.section("deploy").unwrap();
    let options = section.options();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].name, "env");
    assert!(options[0].required);
    assert_eq!(options[0].description.as_deref(), Some("Target environment"));
    assert_eq!(options[1].env_binding, "OPT_FORCE");
    assert_eq!(section.short_description(), Some("Ship it"));
    assert!(section.long_description().is_some());
    assert!(doc.root_options().is_empty());
}

#[test]
fn root_options_live_outside_sections() {
    let doc = parse("<r opt=\"name\" default=\"world\"/>\n\n# Hi\n");
    let root = doc.root_options();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].default.as_deref(), Some("world"));
}

#[test]
fn free_standing_section_wraps_its_content() {
    let source = "\
<r section=\"setup\">

Some prose.

```bash stdout
echo setup
```

</r>
";
    let doc = parse(source);
    let section = doc.section("setup").unwrap();
    assert_eq!(section.level(), 0);
    let top = doc.ast.child_ids(doc.ast.root());
    assert_eq!(top.first(), Some(&section.id));
    assert_eq!(top.last().copied(), section.end());
    assert_eq!(exec_specs(&doc).len(), 1);
}

#[test]
fn text_runs_keep_source_offsets() {
    let doc = parse("Fish &amp; chips\n");
    let para = doc.ast.first_child(doc.ast.root()).unwrap();
    let spans: Vec<_> = doc
        .ast
        .child_ids(para)
        .into_iter()
        .filter_map(|id| match doc.ast.kind(id) {
            NodeKind::Text(span) => Some(span.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(doc.text_of(para), "Fish & chips");
    let chips = spans.iter().find(|s| s.text(&doc.source) == " chips").unwrap();
    assert_eq!(chips.range, 10..16);
    assert!(chips.literal.is_none());
    for span in spans.iter().filter(|s| s.literal.is_none()) {
        assert_eq!(&doc.source[span.range.clone()], span.text(&doc.source));
    }
}

#[test]
fn on_failure_paragraph_becomes_block() {
    let doc = parse("```bash\nexit 7\n```\n\n<r on-failure=\"boom\">Boom handler</r>\n");
    let top = doc.ast.child_ids(doc.ast.root());
    assert!(matches!(doc.ast.kind(top[1]), NodeKind::OnFailure { pattern } if pattern == "boom"));
    let para = doc.ast.first_child(top[1]).unwrap();
    assert!(matches!(doc.ast.kind(para), NodeKind::Paragraph));
    assert_eq!(doc.text_of(top[1]), "Boom handler");
}

#[test]
fn annotation_spanning_paragraphs() {
    let source = "<r stop-ok>\nAll done.\n\nNothing more to do.\n</r>\n";
    let doc = parse(source);
    let stops = kinds_of(&doc, |k| matches!(k, NodeKind::StopOk(_)));
    assert_eq!(stops.len(), 1);
    let paragraphs = doc.ast.child_ids(stops[0]);
    assert_eq!(paragraphs.len(), 2);
    assert_eq!(doc.text_of(paragraphs[1]), "Nothing more to do.");
}

#[test]
fn sub_env_splits_text() {
    let doc = parse("<r sub-env>Hello $NAME, at ${HOST:-localhost}.</r>\n");
    let subs = kinds_of(&doc, |k| matches!(k, NodeKind::EnvironmentSubstitution(_)));
    assert_eq!(subs.len(), 2);
    assert!(matches!(doc.ast.kind(subs[0]), NodeKind::EnvironmentSubstitution(e) if e.name == "NAME"));
}

#[test]
fn conditional_brackets_content() {
    let doc = parse("<r if=\"test -f x\">\n\nOnly sometimes.\n\n</r>\n");
    let top = doc.ast.child_ids(doc.ast.root());
    assert_eq!(top.len(), 3);
    match doc.ast.kind(top[0]) {
        NodeKind::ConditionalStart { if_script, end } => {
            assert_eq!(if_script, "test -f x");
            assert_eq!(*end, Some(top[2]));
        }
        other => panic!("expected conditional, got {other:?}"),
    }
}

#[test]
fn skip_targets_point_at_section_end() {
    let source = "\
## Build <r section=\"build\"/>

```bash skip-on-success
true
```

<r skip/>

## Other
";
    let doc = parse(source);
    let end = doc.section("build").unwrap().end().unwrap();
    assert_eq!(exec_specs(&doc)[0].skip_target, SkipTarget::Node(end));
    let skip = kinds_of(&doc, |k| matches!(k, NodeKind::SkipBlock { .. }))[0];
    assert!(matches!(doc.ast.kind(skip), NodeKind::SkipBlock { target } if *target == SkipTarget::Node(end)));
}

#[test]
fn skip_outside_sections_ends_document() {
    let doc = parse("```bash skip-on-success\ntrue\n```\n");
    assert_eq!(exec_specs(&doc)[0].skip_target, SkipTarget::End);
}

#[test]
fn invoke_copies_and_relevels() {
    let source = "\
# Guide

## Greet <r section=\"greet\"/>

#### Saying hello

```bash stdout
echo hello
```

## Use

<r invoke=\"greet\" name=\"bob\"/>
";
    let doc = parse(source);
    let invokes = kinds_of(&doc, |k| matches!(k, NodeKind::InvokeBlock(_)));
    assert_eq!(invokes.len(), 1);
    let invoke = invokes[0];
    match doc.ast.kind(invoke) {
        NodeKind::InvokeBlock(spec) => {
            assert!(spec.expanded);
            assert_eq!(spec.args.get("name").map(String::as_str), Some("bob"));
        }
        _ => unreachable!(),
    }
    let children = doc.ast.child_ids(invoke);
    assert_eq!(children.len(), 2);
    // Invoked under `## Use`, so the copied heading becomes level 3.
    assert!(matches!(doc.ast.kind(children[0]), NodeKind::Heading { level: 3 }));
    let specs = exec_specs(&doc);
    assert_eq!(specs.len(), 2);
    assert_ne!(specs[0].id, specs[1].id);
    assert_eq!(specs[1].skip_target, SkipTarget::ExitOf(invoke));
}

#[test]
fn invoked_copy_is_independent() {
    let source = "\
## Greet <r section=\"greet\"/>

Hello

## Use

<r invoke=\"greet\"/>
";
    let mut doc = parse(source);
    let section = doc.section("greet").unwrap();
    let heading = section.pointer.heading.unwrap();
    let paragraph = doc.ast.next_sibling(heading).unwrap();
    doc.ast.set_kind(paragraph, NodeKind::ThematicBreak);

    let invoke = kinds_of(&doc, |k| matches!(k, NodeKind::InvokeBlock(_)))[0];
    let copy = doc.ast.first_child(invoke).unwrap();
    assert!(matches!(doc.ast.kind(copy), NodeKind::Paragraph));
}

#[test]
fn invoked_conditional_points_at_its_copy() {
    let source = "\
## Part <r section=\"part\"/>

<r if=\"false\">

hidden text

</r>

## Main

<r invoke=\"part\"/>
";
    let doc = parse(source);
    let invoke = kinds_of(&doc, |k| matches!(k, NodeKind::InvokeBlock(_)))[0];
    let copied = doc.ast.subtree(invoke);
    let starts: Vec<_> = copied
        .iter()
        .filter_map(|id| match doc.ast.kind(*id) {
            NodeKind::ConditionalStart { end, .. } => Some(end.unwrap()),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 1);
    assert!(copied.contains(&starts[0]));
    assert!(matches!(doc.ast.kind(starts[0]), NodeKind::ConditionalEnd { start } if copied.contains(start)));
}

#[test]
fn conditional_section_invocation_is_wrapped() {
    let source = "\
## Greet <r section=\"greet\" if=\"true\"/>

Hello

## Use

<r invoke=\"greet\"/>
";
    let doc = parse(source);
    let invoke = kinds_of(&doc, |k| matches!(k, NodeKind::InvokeBlock(_)))[0];
    let children = doc.ast.child_ids(invoke);
    assert!(matches!(doc.ast.kind(children[0]), NodeKind::ConditionalStart { .. }));
    assert!(matches!(
        doc.ast.kind(*children.last().unwrap()),
        NodeKind::ConditionalEnd { .. }
    ));
}

#[test]
fn unknown_invoke_target_warns() {
    let doc = parse("<r invoke=\"missing\"/>\n");
    assert!(doc
        .diagnostics
        .iter()
        .any(|d| d.message.contains("missing")));
}

#[test]
fn dependency_invocations_are_recorded() {
    let source = "\
## Setup <r section=\"setup\"/>

prep

## Deploy <r section=\"deploy\"/>

<r invoke=\"setup\" as=\"dependency\"/>
";
    let doc = parse(source);
    assert_eq!(doc.section("deploy").unwrap().dependencies(), ["setup".to_string()]);
}

#[test]
fn emoji_shortcodes_become_nodes() {
    let doc = parse("Ship it :rocket:\n");
    let emoji = kinds_of(&doc, |k| matches!(k, NodeKind::Emoji { .. }));
    assert_eq!(emoji.len(), 1);
}

#[test]
fn malformed_annotations_are_reported() {
    let doc = parse("<r stdout>\n\nnever closed\n");
    assert!(!doc.diagnostics.is_empty());
    let doc = parse("text <r bogus-attr/> more\n");
    assert!(doc.diagnostics.iter().any(|d| d.message.contains("bogus-attr")));
}

#[test]
fn transform_is_idempotent() {
    let source = "\
# Guide

<r opt=\"name\" default=\"world\"/>

## Build <r section=\"build\"/>

<r stdout/>
```bash
echo build
```

<r on-failure=\"oops\">It failed</r>

<r sub-env>Hello $NAME :tada:</r>

```bash reveal skip-on-success
true
```

## Use

<r invoke=\"build\"/>

<r if=\"true\">

maybe

</r>
";
    let mut doc = parse(source);
    let before = doc.ast.dump(&doc.source);
    let diagnostics = transform(&mut doc.ast, &doc.source, 0);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    assert_eq!(before, doc.ast.dump(&doc.source));
}
