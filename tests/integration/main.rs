//! Integration tests for scanner-indexer

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use flate2::write::GzEncoder;
    use predicates::prelude::*;
    use scanner_indexer::digest::{Algorithm, LayerDigest};
    use scanner_indexer::registry::media_types;
    use serde_json::json;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Runs the binary against a config file inside `temp`
    fn indexer(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("scanner-indexer");
        cmd.arg("--config").arg(temp.path().join("config.toml"));
        cmd
    }

    fn write_blob(repo: &Path, content: &[u8]) -> LayerDigest {
        let digest = LayerDigest::of(Algorithm::Sha256, content);
        let dir = repo.join("blobs").join("sha256");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(digest.hex()), content).unwrap();
        digest
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Lay out `library/app:1.0` with one plain and one gzip layer
    fn write_layout(root: &Path) -> PathBuf {
        let repo = root.join("library").join("app");
        let plain = write_blob(&repo, b"plain layer");
        let zipped = gzip(b"zipped layer");
        let gz = write_blob(&repo, &zipped);

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": media_types::OCI_MANIFEST,
            "layers": [
                { "mediaType": media_types::OCI_LAYER, "digest": plain.to_string(), "size": 11 },
                { "mediaType": media_types::OCI_LAYER_GZIP, "digest": gz.to_string(), "size": zipped.len() },
            ],
        });
        let manifest_digest = write_blob(&repo, manifest.to_string().as_bytes());

        let index = json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": media_types::OCI_MANIFEST,
                "digest": manifest_digest.to_string(),
                "annotations": { "org.opencontainers.image.ref.name": "1.0" },
            }],
        });
        std::fs::write(repo.join("index.json"), index.to_string()).unwrap();
        root.to_path_buf()
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Fetch an image's layers"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("scanner-indexer"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[gc]"));
    }

    #[test]
    fn config_init_then_set() {
        let temp = TempDir::new().unwrap();
        indexer(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        indexer(&temp)
            .args(["config", "set", "gc.interval_secs", "7200"])
            .assert()
            .success();
        indexer(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("interval_secs = 7200"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_file_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[gc\n").unwrap();
        indexer(&temp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn fetch_prints_layers_and_cleans_arena() {
        let temp = TempDir::new().unwrap();
        let layout = write_layout(&temp.path().join("layouts"));
        let arena = temp.path().join("arena");

        let output = indexer(&temp)
            .args(["fetch", "library/app:1.0", "--format", "json", "--layout"])
            .arg(&layout)
            .arg("--arena")
            .arg(&arena)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
        let layers = report["layers"].as_array().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0]["size"], 11);
        assert_eq!(layers[1]["size"], 12);
        assert_eq!(std::fs::read_dir(&arena).unwrap().count(), 0);
    }

    #[test]
    fn fetch_plain_lists_paths() {
        let temp = TempDir::new().unwrap();
        let layout = write_layout(&temp.path().join("layouts"));

        indexer(&temp)
            .args(["fetch", "library/app:1.0", "--format", "plain", "--layout"])
            .arg(&layout)
            .arg("--arena")
            .arg(temp.path().join("arena"))
            .assert()
            .success()
            .stdout(predicate::str::contains("sha256-"));
    }

    #[test]
    fn fetch_unknown_tag_fails() {
        let temp = TempDir::new().unwrap();
        let layout = write_layout(&temp.path().join("layouts"));

        indexer(&temp)
            .args(["fetch", "library/app:2.0", "--layout"])
            .arg(&layout)
            .arg("--arena")
            .arg(temp.path().join("arena"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Manifest not found"));
    }

    #[test]
    fn fetch_rejects_bad_platform() {
        let temp = TempDir::new().unwrap();
        indexer(&temp)
            .args(["fetch", "app", "--layout", "/nonexistent", "--platform", "linux"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid platform"));
    }

    fn write_store(path: &Path) {
        let snapshot = json!({
            "content": ["expired", "legacy"],
            "metadata": { "expired": "2020-01-01T00:00:00Z" },
        });
        std::fs::write(path, snapshot.to_string()).unwrap();
    }

    #[test]
    fn gc_once_migrates_and_collects() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("manifests.json");
        write_store(&store);

        indexer(&temp)
            .args(["gc", "--once", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains("Migrated 1 manifest(s)"))
            .stdout(predicate::str::contains("Deleted 1 expired manifest(s)"));

        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&store).unwrap()).unwrap();
        assert_eq!(snapshot["content"], json!(["legacy"]));
        let metadata = snapshot["metadata"].as_object().unwrap();
        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key("legacy"));
    }

    #[test]
    fn gc_disabled_only_migrates() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("manifests.json");
        write_store(&store);
        indexer(&temp)
            .args(["config", "set", "gc.enabled", "false"])
            .assert()
            .success();

        indexer(&temp)
            .args(["gc", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains("Manifest GC is disabled"));

        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&store).unwrap()).unwrap();
        assert_eq!(snapshot["metadata"].as_object().unwrap().len(), 2);
    }
}
