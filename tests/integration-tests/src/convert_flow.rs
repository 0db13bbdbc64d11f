//! End-to-end conversion over the `hello-world` fixture.

use crate::copy_project_to_temp_dir;
use projmgr::worker::{Worker, WorkerOptions};
use std::path::{Path, PathBuf};

const PROJECT: &str = "hello-world";

struct Setup {
    _temp_dir: tempfile::TempDir,
    solution_dir: PathBuf,
    options: WorkerOptions,
}

fn setup() -> Setup {
    std::env::set_var("AC6_TOOLCHAIN_6_18_0", "/opt/ac6");
    let temp_dir = copy_project_to_temp_dir(PROJECT);
    let root = temp_dir.path().to_path_buf();
    let solution_dir = root.join("solution");
    let mut options = WorkerOptions::new(solution_dir.join("Hello.csolution.yml"));
    options.pack_root = Some(root.join("packs"));
    options.compiler_root = Some(root.join("etc"));
    Setup {
        _temp_dir: temp_dir,
        solution_dir,
        options,
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("unable to read '{}': {e}", path.display()))
}

#[test]
fn version_range_pack_pick() {
    let setup = setup();
    let mut worker = Worker::new(setup.options.clone()).unwrap();
    assert!(worker.convert().unwrap());

    // Both 5.9.0 and 6.0.0 are installed; the open range picks 6.0.0 and
    // the lockfile records the user expression against the resolved id.
    let lock = read(&setup.solution_dir.join("Hello.cbuild-pack.yml"));
    assert!(lock.contains("resolved-pack: ARM::CMSIS@6.0.0"), "{lock}");
    assert!(!lock.contains("ARM::CMSIS@5.9.0"), "{lock}");
    assert!(lock.contains("- ARM::CMSIS@>=5.5.0"), "{lock}");

    let cbuild = read(
        &setup
            .solution_dir
            .join("tmp/Hello/A/Debug/Hello.Debug+A.cbuild.yml"),
    );
    assert!(cbuild.contains("from-pack: ARM::CMSIS@6.0.0"), "{cbuild}");
}

#[test]
fn default_variant_selection_with_trail() {
    let setup = setup();
    let mut worker = Worker::new(setup.options.clone()).unwrap();
    assert!(worker.convert().unwrap());

    let cbuild = read(
        &setup
            .solution_dir
            .join("tmp/Hello/A/Debug/Hello.Debug+A.cbuild.yml"),
    );
    assert!(
        cbuild.contains("component: ARM::CMSIS:CORE&default@6.0.0"),
        "{cbuild}"
    );
    assert!(cbuild.contains("selected-by: CMSIS:CORE"), "{cbuild}");
    assert!(!cbuild.contains("CORE&custom"), "{cbuild}");
}

#[test]
fn plm_update_required_keeps_old_file() {
    let setup = setup();
    // Pre-seed a deployed config file originating from version 1.0.0;
    // the pack now offers 2.0.0, a major bump.
    let rte = setup.solution_dir.join("RTE").join("RteTest");
    std::fs::create_dir_all(&rte).unwrap();
    std::fs::write(rte.join("system.c"), "// system v1 (user edited)\n").unwrap();
    std::fs::write(rte.join("system.c.base@1.0.0"), "// system v1\n").unwrap();

    let mut worker = Worker::new(setup.options.clone()).unwrap();
    let ok = worker.convert().unwrap();
    assert!(!ok, "a major config update must be an error");

    let streams = worker
        .diagnostics
        .context_messages("Hello.Debug+A")
        .expect("context messages");
    assert!(
        streams.errors.iter().any(|e| e.contains("update required")),
        "{streams:?}"
    );

    // The deployed file is kept in place, the status lands in the plan.
    let content = read(&rte.join("system.c"));
    assert_eq!(content, "// system v1 (user edited)\n");
    let cbuild = read(
        &setup
            .solution_dir
            .join("tmp/Hello/A/Debug/Hello.Debug+A.cbuild.yml"),
    );
    assert!(cbuild.contains("status: update required"), "{cbuild}");
}

#[test]
fn index_references_resolve_to_existing_files() {
    let setup = setup();
    let mut worker = Worker::new(setup.options.clone()).unwrap();
    assert!(worker.convert().unwrap());

    let idx_path = setup.solution_dir.join("Hello.cbuild-idx.yml");
    let idx: serde_yaml::Value = serde_yaml::from_str(&read(&idx_path)).unwrap();
    let build_idx = idx.get("build-idx").expect("build-idx root");
    let idx_dir = idx_path.parent().unwrap();

    let csolution = build_idx.get("csolution").unwrap().as_str().unwrap();
    assert!(idx_dir.join(csolution).is_file());

    for cbuild in build_idx
        .get("cbuilds")
        .and_then(|c| c.as_sequence())
        .expect("cbuilds list")
    {
        let reference = cbuild.get("cbuild").unwrap().as_str().unwrap();
        let cbuild_path = idx_dir.join(reference);
        assert!(cbuild_path.is_file(), "missing {}", cbuild_path.display());

        // The cbuild's own references resolve relative to the cbuild.
        let plan: serde_yaml::Value = serde_yaml::from_str(&read(&cbuild_path)).unwrap();
        let build = plan.get("build").unwrap();
        let cbuild_dir = cbuild_path.parent().unwrap();
        for key in ["solution", "project"] {
            let reference = build.get(key).unwrap().as_str().unwrap();
            assert!(
                cbuild_dir.join(reference).is_file(),
                "{key} reference '{reference}' does not resolve"
            );
        }
    }
}

#[test]
fn context_set_persists_selection() {
    let setup = setup();
    let mut options = setup.options.clone();
    options.context_selectors = vec!["Hello.Debug+A".to_string()];
    options.use_context_set = true;
    let mut worker = Worker::new(options).unwrap();
    assert!(worker.convert().unwrap());

    let set_path = setup.solution_dir.join("Hello.cbuild-set.yml");
    let content = read(&set_path);
    assert!(content.contains("context: Hello.Debug+A"), "{content}");
    assert!(content.contains("compiler: AC6"), "{content}");

    // A later run with no explicit selectors reads the persisted set.
    let mut options = setup.options.clone();
    options.use_context_set = true;
    let mut worker = Worker::new(options).unwrap();
    worker.parse_context_selection().unwrap();
    assert_eq!(worker.selected_contexts, vec!["Hello.Debug+A"]);

    // Re-emitting the parsed selection yields identical bytes.
    assert!(worker.convert().unwrap());
    assert_eq!(read(&set_path), content);
}

#[test]
fn dry_run_writes_nothing() {
    let setup = setup();
    let mut options = setup.options.clone();
    options.dry_run = true;
    let mut worker = Worker::new(options).unwrap();
    assert!(worker.convert().unwrap());
    assert!(!setup.solution_dir.join("Hello.cbuild-idx.yml").exists());
    assert!(!setup.solution_dir.join("RTE").exists());
}
