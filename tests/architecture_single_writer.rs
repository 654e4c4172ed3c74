use std::fs;
use std::path::{Path, PathBuf};

/// Only the snapshot type itself and the aggregator actor may build a
/// `DashboardSnapshot` by literal; everything else reads published ones.
const ALLOWED_SNAPSHOT_WRITERS: &[&str] = &[
    "src/domain/snapshot.rs",
    "src/coordination/aggregator.rs",
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn relative(repo_root: &Path, file: &Path) -> String {
    file.strip_prefix(repo_root)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

#[test]
fn snapshots_are_only_assembled_by_the_aggregator() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = relative(repo_root, &file);
        if ALLOWED_SNAPSHOT_WRITERS.iter().any(|allowed| *allowed == rel) {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") {
                continue;
            }
            let builds_snapshot = trimmed.contains("DashboardSnapshot {")
                && !trimmed.contains("struct DashboardSnapshot");
            let mutates_snapshot = trimmed.contains("send_modify(");
            if builds_snapshot || mutates_snapshot {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "dashboard snapshot written outside the aggregator:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn api_handlers_do_not_reach_data_sources_directly() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src/api"), &mut files);
    assert!(!files.is_empty(), "api sources not found");

    let mut offenders = Vec::new();
    for file in files {
        let rel = relative(repo_root, &file);
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains("OrchestratorClient") || trimmed.contains("PostgresFallbackStore") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "api layer bypasses the aggregator:\n{}",
        offenders.join("\n")
    );
}
