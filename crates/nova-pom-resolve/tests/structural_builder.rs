use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nova_config::NovaPomConfig;
use nova_pom_model::{BuildState, Coordinate, EditVersion, GroupArtifact, SourceKey};
use nova_pom_resolve::{
    BuildOutcome, OpenDocuments, PomResolver, RemoteRegistry, ResolveError,
    StructuralPomBuilder,
};
use nova_scheduler::RequestContext;

const WAIT: Duration = Duration::from_secs(10);

const PARENT_POM: &str = r#"<project>
  <groupId>org.acme</groupId>
  <artifactId>parent</artifactId>
  <version>1.0</version>
  <packaging>pom</packaging>
  <properties><junit.version>4.13</junit.version></properties>
  <modules>
    <module>lib</module>
    <module>app</module>
  </modules>
  <dependencyManagement><dependencies>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>${junit.version}</version>
    </dependency>
  </dependencies></dependencyManagement>
</project>"#;

const LIB_POM: &str = r#"<project>
  <parent>
    <groupId>org.acme</groupId>
    <artifactId>parent</artifactId>
    <version>1.0</version>
  </parent>
  <artifactId>lib</artifactId>
</project>"#;

fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn install(m2: &Path, group: &str, artifact: &str, version: &str) {
    let dir = group
        .split('.')
        .fold(m2.to_path_buf(), |dir, segment| dir.join(segment))
        .join(artifact)
        .join(version);
    write(
        &dir.join(format!("{artifact}-{version}.pom")),
        &format!(
            "<project><groupId>{group}</groupId><artifactId>{artifact}</artifactId>\
             <version>{version}</version></project>"
        ),
    );
}

fn config(dir: &Path) -> NovaPomConfig {
    let mut config = NovaPomConfig::default();
    config.resolver.workers = 2;
    config.resolver.scratch_dir = Some(dir.join("scratch"));
    config.local_store.roots = vec![dir.join("m2")];
    config.local_store.rescan_interval_secs = 0;
    config
}

fn resolver(dir: &Path, docs: Arc<OpenDocuments>) -> Arc<PomResolver> {
    PomResolver::new(&config(dir), Arc::new(StructuralPomBuilder), docs, None).unwrap()
}

fn app_pom(dependencies: &str) -> String {
    format!(
        r#"<project>
  <parent>
    <groupId>org.acme</groupId>
    <artifactId>parent</artifactId>
    <version>1.0</version>
  </parent>
  <artifactId>app</artifactId>
  <dependencies>{dependencies}</dependencies>
</project>"#
    )
}

fn dependency(group: &str, artifact: &str, version: Option<&str>) -> String {
    let version = version
        .map(|version| format!("<version>{version}</version>"))
        .unwrap_or_default();
    format!(
        "<dependency><groupId>{group}</groupId><artifactId>{artifact}</artifactId>{version}</dependency>"
    )
}

#[test]
fn parent_settings_flow_into_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    let m2 = dir.path().join("m2");
    install(&m2, "junit", "junit", "4.13");
    install(&m2, "org.acme", "util", "1.0");
    write(&ws.join("pom.xml"), PARENT_POM);
    let app = ws.join("app/pom.xml");
    write(
        &app,
        &app_pom(&[
            dependency("junit", "junit", None),
            dependency("org.acme", "util", Some("${project.version}")),
            dependency("org.missing", "nothing", Some("9")),
        ]
        .concat()),
    );

    let resolver = resolver(dir.path(), Arc::new(OpenDocuments::new()));
    let outcome = resolver
        .resolve_current(&SourceKey::from_path(&app))
        .wait_timeout(WAIT)
        .expect("build finished");
    assert_eq!(outcome.state(), BuildState::Completed);
    let project = outcome.project().unwrap();

    let model = &project.model;
    assert_eq!(model.coordinate.to_string(), "org.acme:app:1.0");
    assert_eq!(model.dependencies[0].version.as_deref(), Some("4.13"));
    assert_eq!(model.dependencies[1].version.as_deref(), Some("1.0"));
    assert_eq!(model.lineage.len(), 2);
    assert_eq!(model.lineage[0].file.as_deref(), Some(app.as_path()));
    assert_eq!(model.lineage[1].file, Some(ws.join("pom.xml")));

    let failures = &project.dependency_outcome.as_ref().unwrap().failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].dependency.to_string(), "org.missing:nothing:9");
    assert!(project
        .problems
        .iter()
        .any(|problem| problem.message.contains("org.missing:nothing:9")));
    resolver.shutdown();
}

#[test]
fn sibling_modules_resolve_through_workspace_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    install(&dir.path().join("m2"), "junit", "junit", "4.13");
    write(&ws.join("pom.xml"), PARENT_POM);
    write(&ws.join("lib/pom.xml"), LIB_POM);
    let app = ws.join("app/pom.xml");
    write(
        &app,
        &app_pom(&[
            dependency("org.acme", "lib", Some("${project.version}")),
            dependency("junit", "junit", None),
        ]
        .concat()),
    );

    let resolver = resolver(dir.path(), Arc::new(OpenDocuments::new()));
    resolver.on_roots_added(&[ws.clone()]);
    resolver
        .workspace()
        .wait_until_idle(&RequestContext::default())
        .unwrap();

    let ctx = RequestContext::default();
    assert_eq!(
        resolver
            .workspace()
            .find_by_coordinate(&Coordinate::new("org.acme", "lib", "1.0"), &ctx),
        Some(ws.join("lib/pom.xml"))
    );
    assert_eq!(
        resolver
            .workspace()
            .find_versions(&GroupArtifact::new("org.acme", "parent"), &ctx),
        vec!["1.0".to_owned()]
    );

    let outcome = resolver
        .resolve_current(&SourceKey::from_path(&app))
        .wait_timeout(WAIT)
        .expect("build finished");
    let project = outcome.project().unwrap();
    assert!(project.dependency_outcome.as_ref().unwrap().is_success());
    assert!(!project.has_errors());
    resolver.shutdown();
}

#[test]
fn builds_wait_for_discovery_still_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    install(&dir.path().join("m2"), "junit", "junit", "4.13");
    write(&ws.join("pom.xml"), PARENT_POM);
    write(&ws.join("lib/pom.xml"), LIB_POM);
    let app = ws.join("app/pom.xml");
    write(
        &app,
        &app_pom(&[
            dependency("org.acme", "lib", Some("${project.version}")),
            dependency("junit", "junit", None),
        ]
        .concat()),
    );
    // Deeper modules are discovered before `lib`, keeping the backlog busy.
    for n in 0..200 {
        write(
            &ws.join(format!("generated/module-{n}/nested/pom.xml")),
            &format!(
                "<project><groupId>org.generated</groupId><artifactId>module-{n}</artifactId>\
                 <version>1</version></project>"
            ),
        );
    }

    let resolver = resolver(dir.path(), Arc::new(OpenDocuments::new()));
    resolver.on_roots_added(&[ws.clone()]);
    let key = SourceKey::from_path(&app);
    let handle = resolver.resolve_current(&key);

    let outcome = handle.wait_timeout(WAIT).expect("build finished");
    let project = outcome.project().unwrap();
    assert!(project.dependency_outcome.as_ref().unwrap().is_success());
    assert!(!project.has_errors());
    assert_eq!(resolver.workspace().pending_len(), 0);

    // The cached result is the one served once discovery is done.
    let again = resolver.resolve_current(&key);
    assert!(again.ptr_eq(&handle));
    resolver.shutdown();
}

#[test]
fn malformed_documents_degrade_but_keep_their_identity() {
    let dir = tempfile::tempdir().unwrap();
    let docs = Arc::new(OpenDocuments::new());
    let key = SourceKey::from_path(dir.path().join("edit/pom.xml"));
    docs.open(
        key.clone(),
        EditVersion(3),
        r#"<project>
  <groupId>com.acme</groupId>
  <artifactId>app</artifactId>
  <version>2.0</version>
  <modules><module>core</module></modules>
  <dependencies>
    <dependency><groupId>x</groupId>
  </dependencies>
</project>"#,
    );
    let resolver = resolver(dir.path(), docs);

    let outcome = resolver
        .resolve(&key, EditVersion(3))
        .wait_timeout(WAIT)
        .expect("build finished");
    let BuildOutcome::Degraded(project) = &outcome else {
        panic!("expected a degraded result, got {outcome:?}");
    };
    assert_eq!(
        project.model.coordinate.complete(),
        Some(Coordinate::new("com.acme", "app", "2.0"))
    );
    assert_eq!(project.model.modules, vec!["core".to_owned()]);
    assert!(project.model.dependencies.is_empty());
    assert!(project.has_errors());
    assert!(project.problems[0].range.is_some());
    assert_eq!(resolver.scheduler().status().degraded, 1);
    resolver.shutdown();
}

#[test]
fn snapshots_with_a_profile_bypass_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let pom = dir.path().join("ws/pom.xml");
    write(
        &pom,
        r#"<project>
  <groupId>g</groupId><artifactId>a</artifactId><version>1</version>
  <properties><env>local</env></properties>
  <profiles>
    <profile>
      <id>ci</id>
      <properties><env>ci</env></properties>
    </profile>
  </profiles>
</project>"#,
    );
    let resolver = resolver(dir.path(), Arc::new(OpenDocuments::new()));
    let key = SourceKey::from_path(&pom);

    let ci = resolver.get_snapshot(&key, Some("ci"), false).unwrap();
    assert_eq!(ci.model.properties.get("env").map(String::as_str), Some("ci"));
    assert!(ci.dependency_outcome.is_none());
    let plain = resolver.get_snapshot(&key, None, true).unwrap();
    assert_eq!(plain.model.properties.get("env").map(String::as_str), Some("local"));
    assert!(plain.dependency_outcome.as_ref().unwrap().is_success());

    assert!(resolver.cache().is_empty());
    assert!(resolver.get_last_successful(&key).is_none());
    assert_eq!(resolver.scheduler().status().completed, 0);
    resolver.shutdown();
}

struct SlowRegistry {
    delay: Duration,
    known: Vec<(GroupArtifact, String)>,
}

impl RemoteRegistry for SlowRegistry {
    fn versions(&self, group_artifact: &GroupArtifact) -> anyhow::Result<Vec<String>> {
        std::thread::sleep(self.delay);
        Ok(self
            .known
            .iter()
            .filter(|(known, _)| known == group_artifact)
            .map(|(_, version)| version.clone())
            .collect())
    }
}

fn remote_resolver(dir: &Path, delay: Duration) -> Arc<PomResolver> {
    let mut config = config(dir);
    config.resolver.remote_timeout_ms = 50;
    let registry = SlowRegistry {
        delay,
        known: vec![(GroupArtifact::new("org.remote", "lib"), "1".to_owned())],
    };
    PomResolver::new(
        &config,
        Arc::new(StructuralPomBuilder),
        Arc::new(OpenDocuments::new()),
        Some(Arc::new(registry)),
    )
    .unwrap()
}

fn remote_only_pom(dir: &Path) -> PathBuf {
    let pom = dir.join("remote/pom.xml");
    write(
        &pom,
        &format!(
            "<project><groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
             <dependencies>{}</dependencies></project>",
            dependency("org.remote", "lib", Some("1"))
        ),
    );
    pom
}

#[test]
fn remote_registry_resolves_unknown_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let pom = remote_only_pom(dir.path());
    let resolver = remote_resolver(dir.path(), Duration::ZERO);

    let outcome = resolver
        .resolve_current(&SourceKey::from_path(&pom))
        .wait_timeout(WAIT)
        .expect("build finished");
    let project = outcome.project().unwrap();
    assert!(project.dependency_outcome.as_ref().unwrap().is_success());
    resolver.shutdown();
}

#[test]
fn slow_remote_lookups_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let pom = remote_only_pom(dir.path());
    let resolver = remote_resolver(dir.path(), Duration::from_secs(2));

    let outcome = resolver
        .resolve_current(&SourceKey::from_path(&pom))
        .wait_timeout(WAIT)
        .expect("build finished");
    assert_eq!(outcome.state(), BuildState::Completed);
    let project = outcome.project().unwrap();
    let failures = &project.dependency_outcome.as_ref().unwrap().failures;
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.starts_with("remote lookup failed"));
    resolver.shutdown();
}

#[test]
fn invalid_config_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nova.toml");
    std::fs::write(&path, "[resolver\nworkers = 2\n").unwrap();

    let result = PomResolver::from_config_path(
        &path,
        Arc::new(StructuralPomBuilder),
        Arc::new(OpenDocuments::new()),
    );
    assert!(matches!(result, Err(ResolveError::Config(_))));
}
