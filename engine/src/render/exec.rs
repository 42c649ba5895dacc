//! Running an execution block from inside the render walk.

use rundown::NodeId;
use rundown::ast::{ExecutionSpec, NodeKind, SpinnerMode};
use tracing::{debug, info};

use super::failure::{detect_error_line, listing};
use super::text::{indent, paint, RED};
use super::{Failure, Flow, Renderer};
use crate::config::SpinnerKind;
use crate::error::{EngineError, Result};
use crate::executor::modifier::{
    EnvSubstitution, EnvironmentCapture, ProgressTimer, SpinnerConstant, SpinnerFromScript,
    StdoutStream,
};
use crate::executor::{ExecutionResult, Invocation, Modifier};
use crate::rewriter::AnsiRewriter;
use crate::spinner::{self, SharedSpinner, SpinnerHooks};

impl Renderer<'_> {
    pub(super) async fn execution(&mut self, id: NodeId, spec: &ExecutionSpec) -> Result<Flow> {
        if let Some(script) = &spec.if_script {
            if !self.predicate(id, script).await? {
                debug!(block = spec.id, "condition false, block skipped");
                return Ok(Flow::Next);
            }
        }

        let body = spec.code.text(&self.doc.source);
        let pad = " ".repeat(indent(self.level));
        if self.opts.display_only {
            let title = paint(self.opts.color, "1", &format!("▶ {}", spec.spinner_name));
            self.ctx.output.emit(format!("{pad}{title}\n").as_bytes())?;
            self.text.code_block(self.ctx, self.level, &body)?;
            return Ok(Flow::Next);
        }

        let env = self.ctx.vars().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let cwd = self.ctx.cwd.clone();
        let invocation = Invocation {
            id: spec.id,
            interpreter: &spec.interpreter,
            script: &body,
            capture_env: !spec.capture_env.is_empty(),
            cwd: &cwd,
            env,
        };

        if spec.replace_process {
            if !self.opts.allow_replace_process {
                return Err(EngineError::Internal(format!(
                    "block {} replaces the process, which is only allowed when running a section",
                    spec.id
                )));
            }
            info!(block = spec.id, "replacing process");
            return Err(self.executor.replace_process(invocation));
        }

        let kind = match spec.spinner {
            SpinnerMode::Hidden => SpinnerKind::Null,
            _ => self.opts.spinner,
        };
        let spinner = spinner::shared(spinner::create(
            kind,
            self.ctx.output.clone(),
            indent(self.level),
            self.opts.color,
            &spec.spinner_name,
        ));
        let mut modifiers = self.modifiers(spec, &spinner, &pad);

        let result = self.executor.execute(invocation, &mut modifiers).await?;
        drop(modifiers);

        for (key, value) in &result.env_updates {
            self.ctx.set(key.clone(), value.clone());
        }
        let title = spinner.lock().current_heading();

        if result.cancelled {
            spinner.lock().error(&title);
            return Ok(Flow::Stop(super::RenderOutcome::Cancelled));
        }

        if result.success() {
            self.ctx.import_map(result.captured_env.clone());
            if let Some(variable) = &spec.stdout_into {
                self.ctx.set(variable.clone(), result.stdout_text().trim().to_string());
            }
            self.ctx.status = 0;
            if spec.skip_on_success {
                spinner.lock().skip(&title);
                return Ok(self.jump(spec.skip_target));
            }
            spinner.lock().success(&title);
            return Ok(Flow::Next);
        }

        self.ctx.status = result.exit_code;
        if spec.skip_on_failure {
            spinner.lock().skip(&title);
            return Ok(self.jump(spec.skip_target));
        }
        spinner.lock().error(&title);
        self.report_failure(id, spec, &body, &result)?;
        Ok(Flow::Next)
    }

    fn modifiers(&self, spec: &ExecutionSpec, spinner: &SharedSpinner, pad: &str) -> Vec<Box<dyn Modifier>> {
        let mut modifiers: Vec<Box<dyn Modifier>> = Vec::new();
        if spec.substitute_env {
            let vars = self.ctx.vars().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            modifiers.push(Box::new(EnvSubstitution::new(vars)));
        }
        modifiers.push(Box::new(SpinnerConstant::new(spinner.clone(), spec.spinner_name.clone())));
        match spec.spinner {
            SpinnerMode::FromScript => {
                modifiers.push(Box::new(SpinnerFromScript::new(spinner.clone(), false)));
            }
            SpinnerMode::FromScriptAll => {
                modifiers.push(Box::new(SpinnerFromScript::new(spinner.clone(), true)));
            }
            SpinnerMode::Visible | SpinnerMode::Hidden => {}
        }
        if spec.show_stdout || spec.show_stderr {
            let rewriter = AnsiRewriter::new(
                pad,
                self.ctx.output.clone(),
                Box::new(SpinnerHooks(spinner.clone())),
            );
            modifiers.push(Box::new(
                StdoutStream::new(rewriter, spec.show_stdout, spec.show_stderr)
                    .with_spinner(spinner.clone()),
            ));
        }
        if !spec.capture_env.is_empty() {
            modifiers.push(Box::new(EnvironmentCapture::new(spec.capture_env.clone())));
        }
        modifiers.push(Box::new(ProgressTimer::new(Some(spinner.clone()))));
        modifiers
    }

    /// Print the failure banner and listing, then let only the `on-failure`
    /// blocks that follow the failed block render.
    fn report_failure(
        &mut self,
        id: NodeId,
        spec: &ExecutionSpec,
        body: &str,
        result: &ExecutionResult,
    ) -> Result<()> {
        let color = self.opts.color;
        let pad = " ".repeat(indent(self.level));
        let stderr = result.stderr_text();
        let (line, located) = detect_error_line(&result.script_path, result.header_lines, &stderr, body);
        info!(block = spec.id, exit_code = result.exit_code, line, located, "script failed");

        let mut out = String::from("\n");
        out.push_str(&format!(
            "{pad}{}\n\n",
            paint(color, RED, &format!("Script Failed: exit code {}", result.exit_code))
        ));
        out.push_str(&listing(body, line, &pad, color));
        if !spec.show_stderr && !stderr.trim().is_empty() {
            out.push('\n');
            for text in stderr.trim_end().lines() {
                out.push_str(&format!("{pad}{text}\n"));
            }
        }
        out.push('\n');
        self.ctx.output.emit(out.as_bytes())?;

        let doc = self.doc;
        let limit = doc
            .ast
            .following_siblings(id)
            .find(|sibling| !matches!(doc.ast.kind(*sibling), NodeKind::OnFailure { .. }))
            .and_then(|sibling| self.enter_pos.get(&sibling).copied())
            .or_else(|| {
                doc.ast
                    .parent(id)
                    .and_then(|parent| self.exit_pos.get(&parent).copied())
            })
            .unwrap_or(self.steps.len());
        self.failure = Some(Failure {
            output: result.output_text(),
            code: result.exit_code,
            limit,
        });
        Ok(())
    }
}
