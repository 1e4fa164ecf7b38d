//! End-to-end runtime tests.
//!
//! Provisioning commands go through a recording [`CommandRunner`] that
//! simulates npm by creating the module directory, so no npm or Python is
//! needed. Registry tests serve metadata from a local `TcpListener`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use costa::{
    CommandRunner, CommandSpec, CostaError, CostaResult, CostaRuntime, InstallOptions,
    OutputSink, PluginRef, RootManifest, RuntimeOptions, SourceProtocol,
};
use costa_telemetry::{LogConfig, setup_logging};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static LOGGING: Once = Once::new();

/// Route runtime events to stderr once per test binary; `COSTA_TEST_LOG`
/// overrides the default `warn` filter.
fn init_logging() {
    LOGGING.call_once(|| {
        let level = std::env::var("COSTA_TEST_LOG").unwrap_or_else(|_| "warn".into());
        let config = LogConfig::new(level).with_ansi(false).with_timestamps(false);
        let _ = setup_logging(&config);
    });
}

/// What the runner saw when a command was invoked.
#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    args: Vec<String>,
    module_dir_had_marker: bool,
}

struct FakeNpmRunner {
    install_dir: PathBuf,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeNpmRunner {
    fn new(install_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn programs(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.program.clone())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeNpmRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _stdout: &dyn OutputSink,
        _stderr: &dyn OutputSink,
    ) -> CostaResult<()> {
        let program = spec
            .program
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let mut module_dir_had_marker = false;
        if program == "npm" {
            // `npm install <spec> --prefix <dir>`: local specs install under
            // `name@version` from their manifest, registry specs under the alias.
            let local_manifest = Path::new(&spec.args[1]).join("package.json");
            let alias = if local_manifest.exists() {
                let manifest: serde_json::Value =
                    serde_json::from_slice(&std::fs::read(&local_manifest).unwrap()).unwrap();
                format!(
                    "{}@{}",
                    manifest["name"].as_str().unwrap(),
                    manifest["version"].as_str().unwrap()
                )
            } else {
                spec.args[1].split("@npm:").next().unwrap().to_string()
            };
            let module_dir = self.install_dir.join("node_modules").join(alias);
            module_dir_had_marker = module_dir.join("marker").exists();
            std::fs::create_dir_all(&module_dir).unwrap();
        }

        self.invocations.lock().unwrap().push(Invocation {
            program,
            args: spec.args.clone(),
            module_dir_had_marker,
        });
        Ok(())
    }
}

fn write_plugin(dir: &Path, name: &str, version: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "main": "index.js",
        "pipcook": { "category": "dataCollect" },
        "conda": { "dependencies": { "numpy": "1.18.1" } }
    });
    std::fs::write(
        dir.join("package.json"),
        serde_json::to_vec(&manifest).unwrap(),
    )
    .unwrap();
}

fn runtime_with_fake_runner(root: &Path) -> (CostaRuntime, Arc<FakeNpmRunner>) {
    init_logging();
    let toolchain = root.join("toolchain");
    std::fs::create_dir_all(&toolchain).unwrap();
    let options = RuntimeOptions::with_root(root.join("home")).with_toolchain_root(&toolchain);
    let runner = Arc::new(FakeNpmRunner::new(&options.install_dir));
    let runtime = CostaRuntime::with_command_runner(options, runner.clone()).unwrap();
    (runtime, runner)
}

#[tokio::test]
async fn fetch_and_install_local_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(&tmp.path().join("my-plugin"), "my-plugin", "0.1.0");
    let (runtime, runner) = runtime_with_fake_runner(tmp.path());

    let pkg = runtime
        .fetch("./my-plugin", Some(tmp.path()))
        .await
        .unwrap();
    assert_eq!(pkg.source.protocol, SourceProtocol::Fs);
    assert_eq!(pkg.plugin_id(), "my-plugin@0.1.0");

    assert!(runtime.install(&pkg, &InstallOptions::default()).await.unwrap());
    assert!(
        runtime
            .is_installed(&PluginRef::new("my-plugin", "0.1.0"))
            .await
            .unwrap()
    );

    let programs = runner.programs();
    assert!(programs.contains(&"npm".to_string()));
    assert!(programs.contains(&"python3".to_string()));
    assert!(programs.contains(&"pip".to_string()));

    let npm = runner
        .invocations
        .lock()
        .unwrap()
        .iter()
        .find(|i| i.program == "npm")
        .cloned()
        .unwrap();
    assert_eq!(npm.args[1], pkg.source.uri);

    // A second, non-forced install is a no-op.
    let before = runner.invocations.lock().unwrap().len();
    assert!(runtime.install(&pkg, &InstallOptions::default()).await.unwrap());
    assert_eq!(runner.invocations.lock().unwrap().len(), before);
}

#[tokio::test]
async fn forced_install_uninstalls_first() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(&tmp.path().join("p"), "forced", "1.0.0");
    let (runtime, runner) = runtime_with_fake_runner(tmp.path());
    let layout = runtime.layout().clone();

    // Pre-existing install with a marker the uninstall must remove.
    std::fs::create_dir_all(layout.module_dir("forced@1.0.0")).unwrap();
    std::fs::write(layout.module_dir("forced@1.0.0").join("marker"), "old").unwrap();
    std::fs::write(
        layout.root_manifest(),
        r#"{"dependencies":{"forced@1.0.0":"file:../p","other@2.0.0":"npm:other@2.0.0"}}"#,
    )
    .unwrap();

    let pkg = runtime.fetch("./p", Some(tmp.path())).await.unwrap();
    let options = InstallOptions::default().with_force(true);
    assert!(runtime.install(&pkg, &options).await.unwrap());

    let npm = runner
        .invocations
        .lock()
        .unwrap()
        .iter()
        .find(|i| i.program == "npm")
        .cloned()
        .unwrap();
    assert!(!npm.module_dir_had_marker, "module dir was not removed before npm ran");

    let root = RootManifest::load(&layout.root_manifest()).unwrap();
    let deps = root.dependencies().unwrap();
    assert!(!deps.contains_key("forced@1.0.0"));
    assert!(deps.contains_key("other@2.0.0"));
}

#[tokio::test]
async fn batch_uninstall_with_partial_miss() {
    let tmp = tempfile::tempdir().unwrap();
    let (runtime, _) = runtime_with_fake_runner(tmp.path());
    let layout = runtime.layout().clone();

    std::fs::create_dir_all(layout.module_dir("present@1.0.0")).unwrap();
    std::fs::create_dir_all(layout.python_path("present@1.0.0")).unwrap();
    std::fs::write(
        layout.root_manifest(),
        r#"{"dependencies":{"present@1.0.0":"npm:present@1.0.0"}}"#,
    )
    .unwrap();

    let removed = runtime
        .uninstall(&[
            PluginRef::new("absent", "9.9.9"),
            PluginRef::new("present", "1.0.0"),
        ])
        .await
        .unwrap();

    assert!(removed);
    assert!(!layout.module_dir("present@1.0.0").exists());
    assert!(!layout.env_dir("present@1.0.0").exists());
    let root = RootManifest::load(&layout.root_manifest()).unwrap();
    assert!(root.dependencies().unwrap().is_empty());

    let again = runtime
        .uninstall(&[PluginRef::new("present", "1.0.0")])
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn install_without_toolchain_reports_search_paths() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(&tmp.path().join("p"), "needs-python", "1.0.0");
    let options = RuntimeOptions::with_root(tmp.path().join("home"))
        .with_toolchain_root(tmp.path().join("no-such-toolchain"));
    let runner = Arc::new(FakeNpmRunner::new(&options.install_dir));
    let runtime = CostaRuntime::with_command_runner(options, runner.clone()).unwrap();

    let pkg = runtime.fetch("./p", Some(tmp.path())).await.unwrap();
    let err = runtime
        .install(&pkg, &InstallOptions::default())
        .await
        .unwrap_err();

    match err {
        CostaError::ToolchainMissing { searched, .. } => {
            assert_eq!(searched[0], tmp.path().join("no-such-toolchain"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.programs().is_empty());
}

/// Registry stub: serves `/demo` with an ETag and answers revalidations with 304.
async fn spawn_registry() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = serde_json::json!({
        "name": "demo",
        "dist-tags": { "latest": "1.0.0", "beta": "2.0.0-beta.1" },
        "versions": {
            "1.0.0": { "name": "demo", "version": "1.0.0", "pipcook": {} },
            "2.0.0-beta.1": { "name": "demo", "version": "2.0.0-beta.1", "pipcook": {} }
        }
    })
    .to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
            let response = if request.contains("if-none-match: \"demo-v1\"") {
                "HTTP/1.1 304 Not Modified\r\netag: \"demo-v1\"\r\nconnection: close\r\n\r\n"
                    .to_string()
            } else {
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                     etag: \"demo-v1\"\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                )
            };
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn registry_fetch_selects_tags_and_revalidates() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    let registry = spawn_registry().await;
    let runtime =
        CostaRuntime::new(RuntimeOptions::with_root(tmp.path()).with_registry(&registry)).unwrap();

    let latest = runtime.fetch("demo", None).await.unwrap();
    assert_eq!(latest.manifest.version, "1.0.0");
    assert_eq!(latest.source.uri, format!("{registry}/demo"));

    let beta = runtime.fetch("demo@beta", None).await.unwrap();
    assert_eq!(beta.manifest.version, "2.0.0-beta.1");
    assert_eq!(runtime.cached_registry_responses().await, 1);

    let missing = runtime.fetch("demo@3.0.0", None).await.unwrap_err();
    assert!(matches!(missing, CostaError::SourceResolution { .. }));
}

#[tokio::test]
async fn local_manifest_with_escaping_version_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(&tmp.path().join("evil"), "evil", "1/../../../../victim");
    let (runtime, runner) = runtime_with_fake_runner(tmp.path());

    let err = runtime
        .fetch("./evil", Some(tmp.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, CostaError::Validation { .. }));
    assert!(runner.programs().is_empty());
}
