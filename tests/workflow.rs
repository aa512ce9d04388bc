// tests/workflow.rs

//! End-to-end install, rollback and uninstall workflows.

mod common;

use common::{Sandbox, manifest, record_count, sample_blob, sample_tree, seal};
use setupkit::package::ExternalInstaller;
use setupkit::transaction::{LogEntry, RunLock, read_entries};
use setupkit::{
    CallbackProgress, Codec, ContentTree, Description, EnvMode, Error, HostSystem, InstallConfig,
    InstallEngine, InstallState, Package, PackageReader, ProgressEvent, RunOptions, Selection,
    TargetSystem, UninstallState,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Options that request cancellation once `n` records have been processed
fn cancel_after(n: usize) -> RunOptions {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let seen = AtomicUsize::new(0);
    let progress = CallbackProgress::new(move |event| {
        if let ProgressEvent::Position { .. } = event
            && seen.fetch_add(1, Ordering::SeqCst) + 1 >= n
        {
            flag.store(true, Ordering::SeqCst);
        }
    });
    RunOptions::new()
        .with_cancel(cancel)
        .with_progress(Arc::new(progress))
}

fn files_only_blob(count: usize) -> Vec<u8> {
    let mut tree = ContentTree::new();
    let root = tree.root();
    for i in 0..count {
        tree.add_file_bytes(root, format!("file{}.txt", i), format!("content {}", i).into_bytes())
            .unwrap();
    }
    seal(&Package::new(manifest("files"), tree))
}

#[test]
fn test_uninstall_restores_root_and_environment() {
    let sandbox = Sandbox::new();
    {
        let mut host = sandbox.host();
        host.set_env_var("DEMO_PATH", "/usr/bin").unwrap();
    }
    let env_before = sandbox.env();
    let root_before = sandbox.snapshot();

    let mut tree = sample_tree();
    let root = tree.root();
    tree.add_env_var(root, "path", "DEMO_PATH", "${INSTALL_ROOT}/bin", EnvMode::Prepend)
        .unwrap();
    let blob = seal(&Package::new(manifest("demo"), tree).with_codec(Codec::Bzip2));

    let report = sandbox.install(
        &blob,
        Some(Selection::from_names(["core", "docs", "extras"])),
        RunOptions::new(),
    );
    assert_eq!(report.state, InstallState::Completed);
    assert!(sandbox.root.join("docs/api/index.html").exists());

    let env = sandbox.env();
    let expected_path = format!("{}/bin{}/usr/bin", sandbox.root.display(), setupkit::target::LIST_SEPARATOR);
    assert_eq!(env.get("DEMO_PATH"), Some(&expected_path));
    assert_eq!(
        env.get("DEMO_HOME").map(String::as_str),
        Some(sandbox.root.to_string_lossy().as_ref())
    );

    let uninstall = sandbox.uninstall("demo");
    assert_eq!(uninstall.state, UninstallState::Completed);
    assert_eq!(uninstall.unresolved, 0);
    assert_eq!(uninstall.reversed, report.performed);

    assert_eq!(sandbox.snapshot(), root_before);
    assert!(!sandbox.root.exists());
    assert_eq!(sandbox.env(), env_before);
    assert!(!sandbox.log_path("demo").exists());
}

#[test]
fn test_cancel_at_every_record_leaves_nothing() {
    let records = record_count(&sample_tree());
    let blob = sample_blob(Codec::Deflate);

    for n in 1..=records {
        let sandbox = Sandbox::new();
        let report = sandbox.install(&blob, None, cancel_after(n));

        assert_eq!(report.state, InstallState::Failed, "cancel after record {}", n);
        assert!(
            matches!(report.failure, Some(Error::Cancelled(_))),
            "cancel after record {}: {:?}",
            n,
            report.failure
        );
        assert!(sandbox.snapshot().is_empty(), "files left after cancel at {}", n);
        assert!(!sandbox.root.exists());
        assert!(sandbox.env().is_empty());
        assert!(!sandbox.log_path("demo").exists());
    }
}

#[test]
fn test_failure_keeps_earlier_install_log() {
    let sandbox = Sandbox::new();
    let first = sandbox.install(&files_only_blob(2), None, RunOptions::new());
    assert!(first.is_success());
    let log_before = fs::read(sandbox.log_path("files")).unwrap();

    // A second run that is cancelled must not disturb the first run's entries
    let second = sandbox.install(&files_only_blob(2), None, cancel_after(1));
    assert_eq!(second.state, InstallState::Failed);
    assert_eq!(fs::read(sandbox.log_path("files")).unwrap(), log_before);
    assert!(sandbox.root.join("file0.txt").exists());
}

#[test]
fn test_uninstall_with_missing_targets() {
    let sandbox = Sandbox::new();
    let report = sandbox.install(&files_only_blob(5), None, RunOptions::new());
    assert!(report.is_success());

    // Delete the last three logged targets behind the installer's back
    let entries = read_entries(&sandbox.log_path("files")).unwrap();
    let targets: Vec<_> = entries
        .iter()
        .filter(|e| e.is_action())
        .filter_map(|e| e.path().map(|p| p.to_path_buf()))
        .collect();
    for path in &targets[targets.len() - 3..] {
        fs::remove_file(path).unwrap();
    }

    let uninstall = sandbox.uninstall("files");
    assert_eq!(uninstall.state, UninstallState::CompletedWithWarnings);
    assert_eq!(uninstall.unresolved, 3);
    assert_eq!(uninstall.reversed, targets.len() - 3);
    assert!(!sandbox.root.exists());
}

#[test]
fn test_uninstall_tolerates_torn_log() {
    let sandbox = Sandbox::new();
    let report = sandbox.install(&files_only_blob(3), None, RunOptions::new());
    assert!(report.is_success());

    // A crash mid-append leaves a partial last line
    let mut log = OpenOptions::new()
        .append(true)
        .open(sandbox.log_path("files"))
        .unwrap();
    log.write_all(b"1a2b3c4d|{\"type\":\"CreateFi").unwrap();
    drop(log);

    let uninstall = sandbox.uninstall("files");
    assert_eq!(uninstall.state, UninstallState::Completed);
    assert_eq!(uninstall.reversed, report.performed);
    assert!(!sandbox.root.exists());
}

#[test]
fn test_uninstall_of_truncated_log_undoes_logged_prefix() {
    let sandbox = Sandbox::new();
    let report = sandbox.install(&files_only_blob(4), None, RunOptions::new());
    assert!(report.is_success());

    // Keep Begin, the root directory and the first file
    let log_path = sandbox.log_path("files");
    let content = fs::read_to_string(&log_path).unwrap();
    let kept: String = content.lines().take(3).map(|l| format!("{}\n", l)).collect();
    fs::write(&log_path, kept).unwrap();

    let uninstall = sandbox.uninstall("files");
    assert_eq!(uninstall.reversed, 1);
    assert_eq!(uninstall.skipped, 1);
    assert!(!sandbox.root.join("file0.txt").exists());
    assert!(sandbox.root.join("file1.txt").exists());
}

#[test]
fn test_uninstall_without_log_fails() {
    let sandbox = Sandbox::new();
    let mut host = sandbox.host();
    let result = setupkit::UninstallEngine::new(
        setupkit::UninstallConfig::new(sandbox.log_path("missing")),
        &mut host,
    )
    .run();
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn test_reinstall_then_uninstall() {
    let sandbox = Sandbox::new();
    let blob = sample_blob(Codec::Store);

    assert!(sandbox.install(&blob, None, RunOptions::new()).is_success());
    let again = sandbox.install(&blob, None, RunOptions::new());
    assert!(again.is_success(), "{:?}", again.failure);

    let entries = read_entries(&sandbox.log_path("demo")).unwrap();
    let runs = entries
        .iter()
        .filter(|e| matches!(e, LogEntry::Begin { .. }))
        .count();
    assert_eq!(runs, 2);

    let uninstall = sandbox.uninstall("demo");
    assert_eq!(uninstall.unresolved, 0);
    assert!(!sandbox.root.exists());
    assert!(sandbox.env().is_empty());
}

#[test]
fn test_install_fails_while_locked() {
    let sandbox = Sandbox::new();
    let blob = sample_blob(Codec::Store);
    let log_path = sandbox.log_path("demo");
    let config = InstallConfig::new(&sandbox.root, &log_path).with_lock_retries(1);

    let _held = RunLock::acquire(&config.lock_path, 1).unwrap();
    let mut host = sandbox.host();
    let mut package = PackageReader::new(blob.as_slice()).unwrap();
    let result = InstallEngine::new(config, &mut host).install(&mut package);

    assert!(matches!(result, Err(Error::LockError(_))));
    assert!(!sandbox.root.exists());
}

#[test]
fn test_build_from_description_and_install() {
    let sandbox = Sandbox::new();
    let src = sandbox.state_dir.with_file_name("src");
    fs::create_dir_all(src.join("app/bin")).unwrap();
    fs::write(src.join("app/bin/tool"), b"tool").unwrap();
    fs::write(src.join("app/bin/tool.pdb"), b"symbols").unwrap();
    fs::create_dir_all(src.join("manual")).unwrap();
    fs::write(src.join("manual/index.txt"), b"manual").unwrap();

    let description = r#"
[package]
name = "tool"
version = "2.0"
default_root = "/opt/tool"
codec = "deflate"

[[component]]
name = "core"

[[component]]
name = "docs"
default = false

[[source]]
path = "app"
exclude = ["**/*.pdb"]

[[source]]
path = "manual"
dest = "docs"
components = ["docs"]

[[link]]
path = "tool"
target = "bin/tool"

[[env]]
variable = "TOOL_HOME"
value = "${INSTALL_ROOT}"
"#;
    let path = src.join("setupkit.toml");
    fs::write(&path, description).unwrap();

    let package = Description::load(&path).unwrap().build_package().unwrap();
    let blob = seal(&package);

    let report = sandbox.install(&blob, None, RunOptions::new());
    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(fs::read(sandbox.root.join("bin/tool")).unwrap(), b"tool");
    assert!(!sandbox.root.join("bin/tool.pdb").exists());
    assert!(!sandbox.root.join("docs").exists());
    assert!(fs::symlink_metadata(sandbox.root.join("tool")).is_ok());
    assert!(sandbox.env().contains_key("TOOL_HOME"));

    sandbox.uninstall("tool");
    assert!(!sandbox.root.exists());
}

#[cfg(unix)]
mod external {
    use super::*;
    use setupkit::package::ExternalCommand;

    fn shell(script: String) -> ExternalCommand {
        ExternalCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_external_installer_round_trip() {
        let sandbox = Sandbox::new();
        let marker = sandbox.state_dir.with_file_name("runtime-installed");

        let mut manifest = manifest("ext");
        manifest.external.push(ExternalInstaller {
            name: "runtime".into(),
            components: common::tags(&["core"]),
            install: Some(shell(format!("touch '{}'", marker.display()))),
            uninstall: shell(format!("rm '{}'", marker.display())),
            timeout_secs: Some(30),
        });
        let blob = seal(&Package::new(manifest, ContentTree::new()));

        let report = sandbox.install(&blob, None, RunOptions::new());
        assert!(report.is_success(), "{:?}", report.failure);
        assert!(marker.exists());

        let uninstall = sandbox.uninstall("ext");
        assert_eq!(uninstall.state, UninstallState::Completed);
        assert!(!marker.exists());
    }

    #[test]
    fn test_failing_installer_rolls_back() {
        let sandbox = Sandbox::new();
        let mut manifest = manifest("ext");
        manifest.external.push(ExternalInstaller {
            name: "broken".into(),
            components: Default::default(),
            install: Some(shell("exit 3".into())),
            uninstall: shell("exit 0".into()),
            timeout_secs: None,
        });
        let blob = seal(&Package::new(manifest, sample_tree()));

        let report = sandbox.install(&blob, None, RunOptions::new());
        assert_eq!(report.state, InstallState::Failed);
        assert!(matches!(report.failure, Some(Error::ExternalProgram(_))));
        assert!(!sandbox.root.exists());
        assert!(sandbox.env().is_empty());
    }

    #[test]
    fn test_failing_uninstaller_is_a_warning() {
        let sandbox = Sandbox::new();
        let mut manifest = manifest("ext");
        manifest.external.push(ExternalInstaller {
            name: "sticky".into(),
            components: Default::default(),
            install: None,
            uninstall: shell("exit 5".into()),
            timeout_secs: None,
        });
        let blob = seal(&Package::new(manifest, sample_tree()));

        assert!(sandbox.install(&blob, None, RunOptions::new()).is_success());
        let uninstall = sandbox.uninstall("ext");
        assert_eq!(uninstall.state, UninstallState::CompletedWithWarnings);
        assert!(uninstall.warnings.iter().any(|w| w.contains("code 5")));
        // Everything else was still reversed
        assert!(!sandbox.root.exists());
    }

    #[test]
    fn test_host_runs_programs() {
        let sandbox = Sandbox::new();
        let mut host: HostSystem = sandbox.host();
        let code = host
            .run_program(&shell("exit 0".into()), std::time::Duration::from_secs(10))
            .unwrap();
        assert_eq!(code, 0);
    }
}
