//! One build, start to finish: run the builder and map its result onto the
//! outcome taxonomy, degrading to a tolerant scan when the builder cannot
//! produce a model.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use nova_core::panic_payload_to_str;
use nova_pom_index::{effective_model, scan_pom_lenient};
use nova_pom_model::{
    BuildFailure, BuildInput, BuildOptions, BuildOutput, BuildState, Problem, ResolvedProject,
    SourceKey,
};
use nova_scheduler::{is_cancellation, RequestContext};

use crate::documents::CapturedInput;
use crate::env::{ResolverEnv, Services};

/// Final result of a build request.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Completed(Arc<ResolvedProject>),
    /// Built from the tolerant scan after the builder gave up.
    Degraded(Arc<ResolvedProject>),
    /// Superseded or explicitly cancelled. Never carries a result.
    Cancelled,
    /// Internal failure; the message is for logs only.
    Failed(Arc<str>),
}

impl BuildOutcome {
    pub fn state(&self) -> BuildState {
        match self {
            BuildOutcome::Completed(_) => BuildState::Completed,
            BuildOutcome::Degraded(_) => BuildState::Degraded,
            BuildOutcome::Cancelled => BuildState::Cancelled,
            BuildOutcome::Failed(_) => BuildState::Failed,
        }
    }

    pub fn project(&self) -> Option<&Arc<ResolvedProject>> {
        match self {
            BuildOutcome::Completed(project) | BuildOutcome::Degraded(project) => Some(project),
            BuildOutcome::Cancelled | BuildOutcome::Failed(_) => None,
        }
    }

    pub fn into_project(self) -> Option<Arc<ResolvedProject>> {
        match self {
            BuildOutcome::Completed(project) | BuildOutcome::Degraded(project) => Some(project),
            BuildOutcome::Cancelled | BuildOutcome::Failed(_) => None,
        }
    }
}

/// Runs the builder for `input` on the calling thread.
pub(crate) fn execute(
    services: &Services,
    key: &SourceKey,
    input: &CapturedInput,
    options: &BuildOptions,
    ctx: &RequestContext,
) -> BuildOutcome {
    if ctx.is_cancelled() {
        return BuildOutcome::Cancelled;
    }

    let build_input = BuildInput {
        key: key.clone(),
        snapshot: input.snapshot,
    };
    let env = ResolverEnv::new(services, ctx.clone());
    let result = catch_unwind(AssertUnwindSafe(|| -> Result<BuildOutput, BuildFailure> {
        let mut reader = input.source.open(ctx.token())?;
        services
            .builder
            .build(&mut reader, &build_input, options, &env)
    }));

    let outcome = match result {
        Err(panic) => {
            let message = panic_payload_to_str(&*panic).to_owned();
            tracing::error!(
                target: "nova.pom.resolve",
                key = %key,
                panic = %message,
                "builder panicked"
            );
            BuildOutcome::Failed(format!("builder panicked: {message}").into())
        }
        Ok(Ok(output)) => BuildOutcome::Completed(Arc::new(finish(build_input, output, false))),
        Ok(Err(BuildFailure::Cancelled)) => BuildOutcome::Cancelled,
        Ok(Err(BuildFailure::Structural { problems })) => {
            degrade(build_input, input, options, problems, ctx)
        }
        Ok(Err(BuildFailure::Resolution {
            partial: Some(partial),
            problems,
        })) => {
            let mut output = *partial;
            for problem in problems {
                if !output.problems.contains(&problem) {
                    output.problems.push(problem);
                }
            }
            BuildOutcome::Completed(Arc::new(finish(build_input, output, false)))
        }
        Ok(Err(BuildFailure::Resolution {
            partial: None,
            problems,
        })) => degrade(build_input, input, options, problems, ctx),
        Ok(Err(BuildFailure::Internal(err))) => {
            tracing::warn!(
                target: "nova.pom.resolve",
                key = %key,
                error = %format!("{err:#}"),
                "builder failed internally"
            );
            BuildOutcome::Failed(format!("{err:#}").into())
        }
    };

    // A result computed for a superseded snapshot is never published.
    if ctx.is_cancelled() {
        return BuildOutcome::Cancelled;
    }
    outcome
}

fn finish(input: BuildInput, output: BuildOutput, degraded: bool) -> ResolvedProject {
    ResolvedProject {
        key: input.key,
        snapshot: input.snapshot,
        model: output.model,
        problems: output.problems,
        dependency_outcome: output.dependency_outcome,
        degraded,
    }
}

/// Minimal model from the tolerant scan: coordinate, parent, packaging,
/// properties and modules. Dependencies are never guessed.
fn degrade(
    build_input: BuildInput,
    input: &CapturedInput,
    options: &BuildOptions,
    mut problems: Vec<Problem>,
    ctx: &RequestContext,
) -> BuildOutcome {
    let text = match input.source.read_text(ctx.token()) {
        Ok(text) => text,
        Err(err) if is_cancellation(&err) => return BuildOutcome::Cancelled,
        Err(err) => {
            tracing::warn!(
                target: "nova.pom.resolve",
                key = %build_input.key,
                error = %err,
                "could not re-read document for degraded result"
            );
            return BuildOutcome::Failed(err.to_string().into());
        }
    };

    let raw = scan_pom_lenient(&text);
    let mut model = effective_model(&raw, None, &options.active_profiles);
    if let (Some(own), Some(path)) = (model.lineage.first_mut(), build_input.key.as_path()) {
        own.file = Some(path.to_path_buf());
    }
    if problems.is_empty() {
        problems.push(Problem::error(
            "the project could not be built; showing a partial model",
        ));
    }

    tracing::debug!(
        target: "nova.pom.resolve",
        key = %build_input.key,
        problems = problems.len(),
        "built degraded result"
    );
    let output = BuildOutput {
        model,
        problems,
        dependency_outcome: None,
    };
    BuildOutcome::Degraded(Arc::new(finish(build_input, output, true)))
}
