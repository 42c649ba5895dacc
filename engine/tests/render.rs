use std::path::Path;
use std::sync::Once;

use engine::{Context, EngineError, ExitCode, Output, RenderOptions, RenderOutcome, StopSignal};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct Run {
    outcome: Result<RenderOutcome, EngineError>,
    output: String,
    ctx: Context,
}

async fn render(source: &str, section: Option<&str>, args: &[&str], opts: RenderOptions) -> Run {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("RUNDOWN.md");
    let loaded = rundown::loader::load_source(source.to_string(), &path).unwrap();
    let (output, captured) = Output::capture();
    let mut ctx = Context::new(&path, output, opts.cols);
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let stop = StopSignal::new();
    let outcome = match section {
        Some(name) => engine::run_section(&loaded, name, &args, dir.path(), &mut ctx, &opts, stop, None).await,
        None => engine::run_document(&loaded, &args, dir.path(), &mut ctx, &opts, stop, None).await,
    };
    Run {
        outcome,
        output: captured.contents(),
        ctx,
    }
}

async fn run(source: &str) -> Run {
    render(source, None, &[], RenderOptions::default()).await
}

#[tokio::test]
async fn stdout_streams_between_spinner_markers() {
    let run = run("# Hello\n\n<r stdout/>\n~~~ bash\nprintf \"hi\\n\"\n~~~\n").await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.starts_with("# Hello\n\n"), "{}", run.output);
    assert!(
        run.output
            .contains("[spinner:start] Running\n  hi\n[spinner:success] Running\n"),
        "{}",
        run.output
    );
}

#[tokio::test]
async fn captured_env_reaches_later_blocks() {
    let source = "\
# Env

<r capture-env=\"X\"/>
```bash
export X=42
```

<r sub-env stdout/>
```bash
echo \"value=$X\"
```
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert_eq!(run.ctx.get("X"), Some("42"));
    assert!(run.output.contains("  value=42\n"), "{}", run.output);
}

#[tokio::test]
async fn failure_runs_matching_handlers_only() {
    let source = "\
# Fail

```bash
echo boom >&2; exit 7
```

<r on-failure=\"boom\">Boom handler</r>

<r on-failure=\"nomatch\">Other handler</r>

After the failure.
";
    let run = run(source).await;
    let outcome = run.outcome.unwrap();
    assert_eq!(outcome, RenderOutcome::ScriptFailed { code: 7 });
    assert_eq!(outcome.exit_code(), ExitCode::ScriptFailed);
    assert!(run.output.contains("[spinner:error] Running\n"), "{}", run.output);
    assert!(run.output.contains("Script Failed:"), "{}", run.output);
    assert!(run.output.contains("› 1 │ echo boom >&2; exit 7"), "{}", run.output);
    assert!(run.output.contains("Boom handler"), "{}", run.output);
    assert!(!run.output.contains("Other handler"), "{}", run.output);
    assert!(!run.output.contains("After the failure"), "{}", run.output);
    assert_eq!(run.ctx.status, 7);
}

const DEPLOY: &str = "\
# Tools

## Deploy <r section=\"deploy\"/>

<r opt=\"env\" type=\"enum:dev|prod\" required/>

```bash stdout
echo \"env=$OPT_ENV\"
```

## Other <r section=\"other\"/>

```bash stdout
echo other
```
";

#[tokio::test]
async fn section_rejects_invalid_enum_value() {
    let run = render(DEPLOY, Some("deploy"), &["--env", "staging"], RenderOptions::default()).await;
    let err = run.outcome.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Invocation);
    assert!(err.to_string().contains("--env"));
    assert!(err.to_string().contains("dev, prod"));
    assert!(run.output.is_empty());
}

#[tokio::test]
async fn section_renders_only_itself_with_bound_options() {
    let run = render(DEPLOY, Some("deploy"), &["--env", "prod"], RenderOptions::default()).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert_eq!(run.ctx.get("OPT_ENV"), Some("prod"));
    assert!(run.output.contains("env=prod"), "{}", run.output);
    assert!(!run.output.contains("other"), "{}", run.output);
}

#[tokio::test]
async fn unknown_section() {
    let run = render(DEPLOY, Some("nope"), &[], RenderOptions::default()).await;
    assert!(matches!(run.outcome, Err(EngineError::UnknownSection(_))));
}

#[tokio::test]
async fn stop_ok_respects_its_condition() {
    let gate = |condition: &str| {
        format!(
            "# Gate\n\n<r stop-ok=\"done early\" if=\"{condition}\"/>\n\n```bash stdout\necho reached\n```\n"
        )
    };

    let open = run(&gate("false")).await;
    assert_eq!(open.outcome.unwrap(), RenderOutcome::Completed);
    assert!(open.output.contains("reached"), "{}", open.output);

    let closed = run(&gate("true")).await;
    assert_eq!(closed.outcome.unwrap(), RenderOutcome::StoppedOk);
    assert!(closed.output.contains("done early"), "{}", closed.output);
    assert!(!closed.output.contains("reached"), "{}", closed.output);
}

#[tokio::test]
async fn stop_fail_exits_two() {
    let run = run("# Gate\n\n<r stop-fail=\"not supported\"/>\n\nnever\n").await;
    let outcome = run.outcome.unwrap();
    assert_eq!(outcome.exit_code(), ExitCode::StopFail);
    assert!(run.output.contains("not supported"));
    assert!(!run.output.contains("never"));
}

#[tokio::test]
async fn carriage_returns_keep_the_indent() {
    let run = run("# Progress\n\n```bash stdout\nprintf '1%%\\r2%%\\r3%%\\n'\n```\n").await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("  1%\r  2%\r  3%\n"), "{:?}", run.output);
}

#[tokio::test]
async fn conditional_blocks() {
    let source = "\
# Cond

<r if=\"false\">

hidden text

</r>

<r if=\"true\">

shown text

</r>
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("shown text"), "{}", run.output);
    assert!(!run.output.contains("hidden text"), "{}", run.output);
}

#[tokio::test]
async fn invoked_conditional_keeps_its_own_end() {
    let source = "\
# Doc

## Part <r section=\"part\"/>

<r if=\"false\">

hidden text

</r>

part tail

## Main

<r invoke=\"part\"/>

main tail
";
    let section = render(source, Some("part"), &[], RenderOptions::default()).await;
    assert_eq!(section.outcome.unwrap(), RenderOutcome::Completed);
    assert!(!section.output.contains("hidden text"), "{}", section.output);

    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(!run.output.contains("hidden text"), "{}", run.output);
    assert_eq!(run.output.matches("part tail").count(), 2, "{}", run.output);
    assert!(run.output.contains("main tail"), "{}", run.output);
}

#[tokio::test]
async fn fence_conditions() {
    let source = "\
# Cond

<r if=\"false\"/>
```bash
echo skipped > skipped.txt
```

<r if=\"true\" stdout/>
```bash
echo ran
```

<r if=\"true\"/>
```bash
echo quiet > quiet.txt
```
";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("RUNDOWN.md");
    let loaded = rundown::loader::load_source(source.to_string(), &path).unwrap();
    let (output, captured) = Output::capture();
    let mut ctx = Context::new(&path, output, RenderOptions::default().cols);
    let outcome = engine::run_document(&loaded, &[], dir.path(), &mut ctx, &RenderOptions::default(), StopSignal::new(), None)
        .await
        .unwrap();
    let output = captured.contents();
    assert_eq!(outcome, RenderOutcome::Completed);
    assert!(output.contains("  ran\n"), "{output}");
    assert!(!dir.path().join("skipped.txt").exists());
    assert!(dir.path().join("quiet.txt").exists());
}

#[tokio::test]
async fn bare_fence_runs() {
    let run = run("# Plain\n\n```bash\nexit 3\n```\n\nafter\n").await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::ScriptFailed { code: 3 });
    assert!(run.output.contains("[spinner:start] Running"), "{}", run.output);
    assert!(!run.output.contains("after"), "{}", run.output);
}

#[tokio::test]
async fn backward_jump_is_an_internal_error() {
    use rundown::ast::SkipTarget;
    use rundown::{Document, NodeKind};

    let mut doc = Document::parse("# Loop\n\nonce\n", "RUNDOWN.md", 0);
    let root = doc.ast.root();
    let heading = doc.ast.first_child(root).unwrap();
    let para = doc.ast.last_child(root).unwrap();
    let skip = doc.ast.alloc(NodeKind::SkipBlock {
        target: SkipTarget::Node(heading),
    });
    doc.ast.insert_after(para, skip);

    let (output, _captured) = Output::capture();
    let mut ctx = Context::new(Path::new("RUNDOWN.md"), output, RenderOptions::default().cols);
    let result = engine::render::render(
        &doc,
        &mut ctx,
        &RenderOptions::default(),
        StopSignal::new(),
        engine::Scope::Document,
    )
    .await;
    assert!(matches!(result, Err(EngineError::Internal(_))), "{result:?}");
}

#[tokio::test]
async fn skip_on_success_moves_to_next_section() {
    let source = "\
# Doc

## Install <r section=\"install\"/>

```bash skip-on-success
true
```

install steps

## Use <r section=\"use\"/>

usage notes
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("[spinner:skip] Running"), "{}", run.output);
    assert!(!run.output.contains("install steps"), "{}", run.output);
    assert!(run.output.contains("usage notes"), "{}", run.output);
}

#[tokio::test]
async fn whole_document_stops_after_first_root_section() {
    let source = "\
# Intro <r section=\"intro\"/>

```bash stdout
echo one
```

# Second <r section=\"second\"/>

```bash stdout
echo two
```
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("one"), "{}", run.output);
    assert!(!run.output.contains("two"), "{}", run.output);
}

#[tokio::test]
async fn invocation_binds_arguments() {
    let source = "\
# Doc

## Greet <r section=\"greet\"/>

<r opt=\"name\" default=\"world\"/>

```bash stdout
echo \"hello $OPT_NAME\"
```

## Main

<r invoke=\"greet\" name=\"bob\"/>
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("hello world"), "{}", run.output);
    assert!(run.output.contains("hello bob"), "{}", run.output);
}

#[tokio::test]
async fn stdout_into_variable() {
    let source = "\
# Vars

```bash stdout-into:VERSION
echo '  1.2.3  '
```

<r sub-env>Version $VERSION</r>
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert_eq!(run.ctx.get("VERSION"), Some("1.2.3"));
    assert!(run.output.contains("Version 1.2.3"), "{}", run.output);
}

#[tokio::test]
async fn display_mode_lists_without_running() {
    let opts = RenderOptions {
        display_only: true,
        ..RenderOptions::default()
    };
    let run = render("# Show\n\n```bash spinner:\"Say hi\"\necho hi > marker\n```\n", None, &[], opts).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("▶ Say hi"), "{}", run.output);
    assert!(run.output.contains("echo hi > marker"), "{}", run.output);
    assert!(!run.output.contains("[spinner:"), "{}", run.output);
}

#[tokio::test]
async fn raised_stop_cancels_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("RUNDOWN.md");
    let loaded = rundown::loader::load_source("# A\n\ntext\n".to_string(), &path).unwrap();
    let (output, captured) = Output::capture();
    let mut ctx = Context::new(&path, output, 80);
    let stop = StopSignal::new();
    stop.raise();
    let outcome = engine::run_document(&loaded, &[], Path::new("."), &mut ctx, &RenderOptions::default(), stop, None)
        .await
        .unwrap();
    assert_eq!(outcome, RenderOutcome::Cancelled);
    assert_eq!(outcome.exit_code(), ExitCode::Cancelled);
    assert!(captured.contents().is_empty());
}

#[tokio::test]
async fn prose_layout() {
    let source = "\
# Guide

Some *styled* text with `code` inside.

- first
- second
  1. nested

---
";
    let run = run(source).await;
    assert_eq!(run.outcome.unwrap(), RenderOutcome::Completed);
    assert!(run.output.contains("  Some styled text with code inside.\n\n"), "{}", run.output);
    assert!(run.output.contains("  • first\n  • second\n    1. nested\n"), "{}", run.output);
    assert!(run.output.contains("──"), "{}", run.output);
}
