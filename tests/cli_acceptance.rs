/// Acceptance tests for the cpack command line
///
/// These run the built binary against packages written in a temp dir.
/// Nothing here needs the host application, git or a network.
mod common;

use common::TestEnv;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_info_text_lists_inputs() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");

    env.cpack()
        .arg("info")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("Python:       3.11"))
        .stdout(predicate::str::contains("ComfyUI:      abc123"))
        .stdout(predicate::str::contains("steps"))
        .stdout(predicate::str::contains("integer"))
        .stdout(predicate::str::contains("[1, 50]"));
}

#[test]
fn test_info_json() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");

    let output = env
        .cpack()
        .args(["info", "--format", "json"])
        .arg(&archive)
        .output()
        .unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["python"], "3.11");
    assert_eq!(info["comfyui"], "abc123");
    let names: Vec<&str> = info["inputs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["image", "steps"]);
}

#[test]
fn test_info_rejects_non_archive() {
    let env = TestEnv::new();
    let bogus = env.path().join("bogus.zip");
    fs::write(&bogus, "not a zip").unwrap();

    env.cpack()
        .arg("info")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[cpack]"));
}

#[test]
fn test_run_rejects_invalid_inputs_before_install() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");

    env.cpack()
        .arg("run")
        .arg(&archive)
        .args(["--", "--steps", "many", "--bogus", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation failed!"))
        .stderr(predicate::str::contains("- bogus: unknown input"))
        .stderr(predicate::str::contains("- image: field required"))
        .stderr(predicate::str::contains("- steps: invalid integer"));

    assert!(!env.workspace_root().exists());
}

#[test]
fn test_run_rejects_out_of_range_value() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");

    env.cpack()
        .arg("run")
        .arg(&archive)
        .args(["--", "--image", "cat.png", "--steps=99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("- steps: 99 is outside the allowed range [1, 50]"));

    assert!(!env.workspace_root().exists());
}

#[test]
fn test_run_rejects_zero_timeout() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");

    env.cpack()
        .arg("run")
        .arg(&archive)
        .args(["--timeout", "0s", "--", "--image", "cat.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn test_unpack_installs_host_application() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");
    let config = env.path().join("cpack.toml");
    let missing_repo = env.path().join("no-such-repo");
    fs::write(
        &config,
        format!("[host]\nrepo = \"file://{}\"\n", missing_repo.display()),
    )
    .unwrap();

    env.cpack()
        .arg("--config")
        .arg(&config)
        .arg("unpack")
        .arg(&archive)
        .arg("-o")
        .arg(env.path().join("ws"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to install host application"));

    assert!(!env.path().join("ws").join(".DONE").exists());
}

#[test]
fn test_unpack_extracts_layout() {
    let env = TestEnv::new();
    let archive = env.write_package("pkg.cpack.zip");
    let dest = env.path().join("unpacked");

    env.cpack()
        .arg("unpack")
        .arg(&archive)
        .arg("--extract-only")
        .arg("-o")
        .arg(&dest)
        .assert()
        .success();

    for name in [
        "requirements.txt",
        "snapshot.json",
        "workflow_api.json",
        "workflow.json",
    ] {
        assert!(dest.join(name).is_file(), "missing {}", name);
    }
    assert_eq!(
        fs::read_to_string(dest.join("requirements.txt")).unwrap(),
        "torch==2.3.0\n"
    );
}

#[test]
fn test_hash_uses_cache_on_second_call() {
    let env = TestEnv::new();
    let file = env.path().join("model.safetensors");
    fs::write(&file, "hello").unwrap();

    env.cpack()
        .arg("hash")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        ))
        .stderr(predicate::str::contains("0 cached, 1 hashed"));

    assert!(env.cache_dir().join("model_hashes.json").is_file());

    env.cpack()
        .arg("hash")
        .arg(&file)
        .assert()
        .success()
        .stderr(predicate::str::contains("1 cached, 0 hashed"));
}

#[test]
fn test_hash_missing_file_fails() {
    let env = TestEnv::new();

    env.cpack()
        .arg("hash")
        .arg(env.path().join("missing.bin"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot hash"));
}

#[cfg(unix)]
mod pack {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// Answers the version query and `pip freeze` like a real interpreter
    fn fake_python(env: &TestEnv) -> PathBuf {
        let python = env.path().join("python");
        fs::write(
            &python,
            "#!/bin/sh\ncase \"$1\" in\n  -c) echo 3.11 ;;\n  -m) echo torch==2.3.0 ;;\nesac\n",
        )
        .unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();
        python
    }

    #[test]
    fn test_pack_then_info() {
        let env = TestEnv::new();
        let python = fake_python(&env);

        let host = env.path().join("ComfyUI");
        fs::create_dir_all(host.join("models").join("checkpoints")).unwrap();
        fs::write(
            host.join("models").join("checkpoints").join("sd15.safetensors"),
            "weights",
        )
        .unwrap();
        fs::create_dir_all(host.join("input")).unwrap();
        fs::write(host.join("input").join("cat.png"), "png").unwrap();
        fs::write(host.join("input").join("unused.png"), "png").unwrap();

        let api = env.path().join("workflow_api.json");
        fs::write(&api, common::sample_graph().to_json_pretty().unwrap()).unwrap();
        let workflow = env.path().join("workflow.json");
        fs::write(&workflow, "{\"nodes\": []}").unwrap();
        let archive = env.path().join("out.cpack.zip");

        env.cpack()
            .arg("pack")
            .arg("--workflow-api")
            .arg(&api)
            .arg("--workflow")
            .arg(&workflow)
            .arg("--host-dir")
            .arg(&host)
            .arg("-o")
            .arg(&archive)
            .arg("--python")
            .arg(&python)
            .args(["--extra-requirement", "comfy-cli"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Package written"));

        let unpacked = env.path().join("unpacked");
        env.cpack()
            .arg("unpack")
            .arg(&archive)
            .arg("--extract-only")
            .arg("-o")
            .arg(&unpacked)
            .assert()
            .success();

        assert_eq!(
            fs::read_to_string(unpacked.join("requirements.txt")).unwrap(),
            "torch==2.3.0\ncomfy-cli\n"
        );
        assert!(unpacked.join("input").join("cat.png").is_file());
        assert!(!unpacked.join("input").join("unused.png").exists());

        let snapshot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(unpacked.join("snapshot.json")).unwrap())
                .unwrap();
        assert_eq!(snapshot["python"], "3.11");
        assert_eq!(
            snapshot["models"][0]["filename"],
            "models/checkpoints/sd15.safetensors"
        );

        env.cpack()
            .arg("info")
            .arg(&archive)
            .assert()
            .success()
            .stdout(predicate::str::contains("Models:       1"));
    }
}
