//! Version-control service tests against real throwaway git repositories.

use std::path::Path;
use std::process::Command as StdCommand;
use std::time::Duration;

use vista_core::{
    DiffOptions, OpStatus, PatchTarget, ProjectRoot, VcsService, VistaError, WhitespaceStatus,
};

const PATCH: &str = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
    run_git(dir.path(), &["add", "a.txt"]);
    run_git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

fn service(dir: &Path) -> VcsService {
    VcsService::new(ProjectRoot::new(dir).unwrap(), "git", Duration::from_secs(10))
}

#[tokio::test]
async fn diff_reports_changes_and_honours_ignore_whitespace() {
    let repo = make_git_repo();
    let vcs = service(repo.path());

    std::fs::write(repo.path().join("a.txt"), "one  \ntwo\n").unwrap();
    let plain = vcs.diff("a.txt", DiffOptions::default()).await.unwrap();
    assert!(plain.contains("+one  "), "{plain}");

    let ignored = vcs
        .diff("a.txt", DiffOptions { ignore_whitespace: true })
        .await
        .unwrap();
    assert!(ignored.trim().is_empty(), "{ignored}");
}

#[tokio::test]
async fn blame_is_porcelain() {
    let repo = make_git_repo();
    let vcs = service(repo.path());
    let blame = vcs.blame("a.txt").await.unwrap();
    assert!(blame.contains("author test-user"), "{blame}");
    assert!(blame.contains("\tone"));
}

#[tokio::test]
async fn whitespace_check_classifies_clean_and_issues() {
    let repo = make_git_repo();
    let vcs = service(repo.path());

    let clean = vcs.check_whitespace("a.txt").await.unwrap();
    assert_eq!(clean.status, WhitespaceStatus::Clean);
    assert!(clean.output.is_none());

    std::fs::write(repo.path().join("a.txt"), "one \ntwo\n").unwrap();
    let report = vcs.check_whitespace("a.txt").await.unwrap();
    assert_eq!(report.status, WhitespaceStatus::IssuesFound);
    let output = report.output.unwrap();
    assert!(output.contains("trailing whitespace"), "{output}");
}

#[tokio::test]
async fn missing_binary_is_vcs_error_not_issues() {
    let repo = make_git_repo();
    let vcs = VcsService::new(
        ProjectRoot::new(repo.path()).unwrap(),
        "vista-no-such-git-binary",
        Duration::from_secs(10),
    );
    assert!(matches!(
        vcs.check_whitespace("a.txt").await,
        Err(VistaError::Vcs(_))
    ));
}

#[tokio::test]
async fn escaping_paths_are_denied_before_spawning() {
    let repo = make_git_repo();
    // A binary that cannot run: reaching the spawn would yield Vcs, not AccessDenied.
    let vcs = VcsService::new(
        ProjectRoot::new(repo.path()).unwrap(),
        "vista-no-such-git-binary",
        Duration::from_secs(10),
    );
    let bad = "../../etc/passwd";
    assert!(matches!(vcs.diff(bad, DiffOptions::default()).await, Err(VistaError::AccessDenied)));
    assert!(matches!(vcs.blame(bad).await, Err(VistaError::AccessDenied)));
    assert!(matches!(vcs.check_whitespace(bad).await, Err(VistaError::AccessDenied)));
    assert!(matches!(vcs.restore_file(bad).await, Err(VistaError::AccessDenied)));
    let evil_patch = "--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1 +1 @@\n-x\n+y\n";
    assert!(matches!(
        vcs.apply_patch(evil_patch, PatchTarget::WorkingTree).await,
        Err(VistaError::AccessDenied)
    ));
    // No ---/+++ lines: only the diff --git header names the path.
    let binary_patch = "diff --git a/../evil b/../evil\nnew file mode 100644\nBinary files /dev/null and b/../evil differ\n";
    assert!(matches!(
        vcs.apply_patch(binary_patch, PatchTarget::Index).await,
        Err(VistaError::AccessDenied)
    ));
}

#[tokio::test]
async fn apply_patch_to_worktree_and_index_are_separate() {
    let repo = make_git_repo();
    let vcs = service(repo.path());

    let staged = vcs.apply_patch_to_index(PATCH).await.unwrap();
    assert_eq!(staged.status, OpStatus::Ok, "{}", staged.message);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("a.txt")).unwrap(),
        "one\ntwo\n"
    );
    let cached = run_git(repo.path(), &["diff", "--cached", "--name-only"]);
    assert_eq!(cached.trim(), "a.txt");

    let applied = vcs.apply_patch_to_worktree(PATCH).await.unwrap();
    assert_eq!(applied.status, OpStatus::Ok, "{}", applied.message);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("a.txt")).unwrap(),
        "one\nthree\n"
    );
}

#[tokio::test]
async fn rejected_patch_is_structured_failure() {
    let repo = make_git_repo();
    let vcs = service(repo.path());
    let stale = PATCH.replace("-two", "-not-in-file");
    let outcome = vcs
        .apply_patch(&stale, PatchTarget::WorkingTree)
        .await
        .unwrap();
    assert_eq!(outcome.status, OpStatus::Error);
    assert!(!outcome.message.is_empty());
}

#[tokio::test]
async fn empty_patch_is_input_error() {
    let repo = make_git_repo();
    let vcs = service(repo.path());
    assert!(matches!(
        vcs.apply_patch("  \n", PatchTarget::Index).await,
        Err(VistaError::Input(_))
    ));
}

#[tokio::test]
async fn restore_discards_working_tree_changes() {
    let repo = make_git_repo();
    let vcs = service(repo.path());
    std::fs::write(repo.path().join("a.txt"), "scribbles\n").unwrap();

    let outcome = vcs.restore_file("a.txt").await.unwrap();
    assert_eq!(outcome.status, OpStatus::Ok);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("a.txt")).unwrap(),
        "one\ntwo\n"
    );

    let missing = vcs.restore_file("never-tracked.txt").await.unwrap();
    assert_eq!(missing.status, OpStatus::Error);
}

#[tokio::test]
async fn repo_status_without_upstream_degrades_to_zero() {
    let repo = make_git_repo();
    let vcs = service(repo.path());
    std::fs::write(repo.path().join("a.txt"), "changed\n").unwrap();
    std::fs::write(repo.path().join("new.txt"), "new\n").unwrap();

    let status = vcs.repo_status().await.unwrap();
    assert_eq!(status.branch, "main");
    assert_eq!(status.upstream, None);
    assert_eq!(status.modified_files, 2);
    assert_eq!((status.ahead, status.behind), (0, 0));
}

#[tokio::test]
async fn repo_status_outside_repository_is_vcs_error() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = service(dir.path());
    assert!(matches!(vcs.repo_status().await, Err(VistaError::Vcs(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn slow_git_is_bounded_by_timeout() {
    use std::os::unix::fs::PermissionsExt;

    let repo = make_git_repo();
    let bin_dir = tempfile::tempdir().unwrap();
    let fake = bin_dir.path().join("slow-git");
    std::fs::write(&fake, "#!/bin/sh\nsleep 5\n").unwrap();
    std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

    let vcs = VcsService::new(
        ProjectRoot::new(repo.path()).unwrap(),
        fake.to_string_lossy().into_owned(),
        Duration::from_millis(200),
    );
    let started = std::time::Instant::now();
    let err = vcs.repo_status().await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(4));
    match err {
        VistaError::Vcs(msg) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected timeout, got {other:?}"),
    }
}
