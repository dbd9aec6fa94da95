use std::io::Read;
use std::path::{Path, PathBuf};

use nova_core::normalize_path;
use nova_pom_index::{effective_model, parse_pom, root_pom, PomError, RawPom};
use nova_pom_model::{
    BuildEnvironment, BuildFailure, BuildInput, BuildOptions, BuildOutput, Coordinate,
    Dependency, DependencyFailure, DependencyOutcome, ParentRef, PartialCoordinate, PomBuilder,
    Problem, ProjectModel,
};
use nova_scheduler::TaskError;

/// Parent chains longer than this are assumed to be cyclic.
const MAX_PARENT_DEPTH: usize = 16;

/// What a build found wrong so far.
#[derive(Default)]
struct Findings {
    problems: Vec<Problem>,
    failures: Vec<DependencyFailure>,
}

/// Builder that computes the effective model from the POM structure alone.
///
/// Parents are looked up through `relativePath`, then the workspace, then the
/// local store. With dependency resolution requested, a dependency counts as
/// resolved when the workspace, the local store or the remote registry knows
/// its exact coordinate; transitive dependencies are not followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralPomBuilder;

impl PomBuilder for StructuralPomBuilder {
    fn build(
        &self,
        source: &mut dyn Read,
        input: &BuildInput,
        options: &BuildOptions,
        env: &dyn BuildEnvironment,
    ) -> Result<BuildOutput, BuildFailure> {
        let text = read_document(source)?;
        let raw = parse_pom(&text).map_err(|err| BuildFailure::Structural {
            problems: vec![err.to_problem()],
        })?;
        env.context().check()?;

        let mut findings = Findings::default();
        let parent = self.load_parent(&raw, input.base_dir(), options, env, &mut findings, 0)?;

        let mut model = effective_model(&raw, parent.as_ref(), &options.active_profiles);
        if let Some(own) = model.lineage.first_mut() {
            own.file = input.key.as_path().map(Path::to_path_buf);
        }

        for dep in &model.dependencies {
            if dep.version.is_none() {
                findings.problems.push(with_range(
                    Problem::warning(format!("version of {} is not specified", describe(dep))),
                    dep,
                ));
            }
        }

        if options.resolve_dependencies {
            for dep in &model.dependencies {
                env.context().check()?;
                if let Some(reason) = unresolved_reason(dep, env)? {
                    findings.problems.push(with_range(
                        Problem::error(format!("{}: {reason}", describe(dep))),
                        dep,
                    ));
                    findings.failures.push(DependencyFailure {
                        dependency: partial_of(dep),
                        reason,
                    });
                }
            }
        }

        let Findings { problems, failures } = findings;
        let resolved = failures.is_empty();
        let output = BuildOutput {
            model,
            problems: problems.clone(),
            dependency_outcome: options
                .resolve_dependencies
                .then_some(DependencyOutcome { failures }),
        };
        if resolved {
            Ok(output)
        } else {
            Err(BuildFailure::Resolution {
                partial: Some(Box::new(output)),
                problems,
            })
        }
    }
}

impl StructuralPomBuilder {
    fn load_parent(
        &self,
        raw: &RawPom,
        base_dir: Option<&Path>,
        options: &BuildOptions,
        env: &dyn BuildEnvironment,
        findings: &mut Findings,
        depth: usize,
    ) -> Result<Option<ProjectModel>, BuildFailure> {
        let Some(parent_ref) = &raw.parent else {
            return Ok(None);
        };
        if depth >= MAX_PARENT_DEPTH {
            findings.problems.push(Problem::error(format!(
                "parent chain is deeper than {MAX_PARENT_DEPTH} levels"
            )));
            return Ok(None);
        }
        env.context().check()?;

        let located = self.locate_parent(parent_ref, base_dir, env, &mut findings.problems)?;
        let Some((file, parent_raw)) = located else {
            let reason = "parent POM not found in the workspace or local repository".to_owned();
            findings.problems.push(Problem::error(format!(
                "{}: {reason}",
                parent_ref.coordinate
            )));
            findings.failures.push(DependencyFailure {
                dependency: parent_ref.coordinate.clone(),
                reason,
            });
            return Ok(None);
        };

        let grandparent = self.load_parent(
            &parent_raw,
            file.parent(),
            options,
            env,
            findings,
            depth + 1,
        )?;
        let mut model = effective_model(&parent_raw, grandparent.as_ref(), &options.active_profiles);
        if let Some(own) = model.lineage.first_mut() {
            own.file = Some(file);
        }
        Ok(Some(model))
    }

    fn locate_parent(
        &self,
        parent_ref: &ParentRef,
        base_dir: Option<&Path>,
        env: &dyn BuildEnvironment,
        problems: &mut Vec<Problem>,
    ) -> Result<Option<(PathBuf, RawPom)>, BuildFailure> {
        let relative = parent_ref.effective_relative_path();
        if let (Some(base_dir), false) = (base_dir, relative.is_empty()) {
            let candidate = root_pom(&normalize_path(&base_dir.join(relative)));
            if let Some(raw) = read_parent(&candidate, env, problems)? {
                if matches_parent(&raw, parent_ref) {
                    return Ok(Some((candidate, raw)));
                }
            }
        }

        let Some(coordinate) = parent_ref.coordinate.complete() else {
            return Ok(None);
        };
        let located = env
            .find_workspace(&coordinate)
            .or_else(|| env.find_local(&coordinate));
        let Some(file) = located else {
            return Ok(None);
        };
        Ok(read_parent(&file, env, problems)?.map(|raw| (file, raw)))
    }
}

fn read_document(source: &mut dyn Read) -> Result<String, BuildFailure> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| BuildFailure::Structural {
        problems: vec![Problem::error("document is not valid UTF-8")],
    })
}

/// Reads and parses a parent POM. A missing file is `None`; a malformed one
/// is reported and skipped.
fn read_parent(
    path: &Path,
    env: &dyn BuildEnvironment,
    problems: &mut Vec<Problem>,
) -> Result<Option<RawPom>, BuildFailure> {
    let mut reader = match env.open(path) {
        Ok(reader) => reader,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    match parse_pom(&String::from_utf8_lossy(&bytes)) {
        Ok(raw) => Ok(Some(raw)),
        Err(PomError::Xml { message, .. }) => {
            problems.push(Problem::warning(format!(
                "parent POM {} is malformed: {message}",
                path.display()
            )));
            Ok(None)
        }
        Err(err) => {
            problems.push(Problem::warning(format!(
                "parent POM {} is unusable: {err}",
                path.display()
            )));
            Ok(None)
        }
    }
}

fn matches_parent(raw: &RawPom, parent_ref: &ParentRef) -> bool {
    let declared = raw.inherited_coordinate();
    let wanted = &parent_ref.coordinate;
    let same = |a: &Option<String>, b: &Option<String>| match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    same(&declared.group_id, &wanted.group_id)
        && declared.artifact_id.is_some()
        && declared.artifact_id == wanted.artifact_id
        && same(&declared.version, &wanted.version)
}

/// Why `dep` cannot be resolved, or `None` when some index knows it.
fn unresolved_reason(
    dep: &Dependency,
    env: &dyn BuildEnvironment,
) -> Result<Option<String>, BuildFailure> {
    let Some(coordinate) = dep.coordinate() else {
        return Ok(Some("coordinate is incomplete".to_owned()));
    };
    if is_known_locally(&coordinate, env) {
        return Ok(None);
    }
    match env.remote_versions(&coordinate.group_artifact()) {
        Ok(versions) if versions.contains(&coordinate.version) => Ok(None),
        Ok(_) => Ok(Some(
            "not found in the workspace or local repository".to_owned(),
        )),
        Err(TaskError::Cancelled) => Err(BuildFailure::Cancelled),
        Err(err) => Ok(Some(format!("remote lookup failed: {err}"))),
    }
}

fn is_known_locally(coordinate: &Coordinate, env: &dyn BuildEnvironment) -> bool {
    env.find_workspace(coordinate).is_some() || env.find_local(coordinate).is_some()
}

fn partial_of(dep: &Dependency) -> PartialCoordinate {
    PartialCoordinate {
        group_id: dep.group_id.clone(),
        artifact_id: dep.artifact_id.clone(),
        version: dep.version.clone(),
    }
}

fn describe(dep: &Dependency) -> String {
    partial_of(dep).to_string()
}

fn with_range(problem: Problem, dep: &Dependency) -> Problem {
    match dep.range {
        Some(range) => problem.with_range(range),
        None => problem,
    }
}
