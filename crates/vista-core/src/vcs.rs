//! Git-backed review helpers: diff, blame, whitespace check, patch apply,
//! file restore and repository status.
//!
//! Every call re-checks path containment before spawning, passes arguments as
//! a discrete list (never through a shell), and is bounded by a timeout. A
//! request that is cancelled while git runs does not kill the child; its
//! output is simply discarded.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::containment::ProjectRoot;
use crate::error::{Result, VistaError};
use crate::metrics::METRICS;
use crate::obs;

/// Options for [`VcsService::diff`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOptions {
    #[serde(default)]
    pub ignore_whitespace: bool,
}

/// Where a patch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    WorkingTree,
    /// The staging index only (`git apply --cached`).
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Ok,
    Error,
}

/// Outcome of a mutating operation. Git rejecting the change is an
/// `Error` outcome, not a [`VistaError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpOutcome {
    pub status: OpStatus,
    pub message: String,
}

impl OpOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Ok,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitespaceStatus {
    Clean,
    IssuesFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitespaceReport {
    pub status: WhitespaceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub branch: String,
    /// `None` when the branch has no upstream; ahead/behind are then 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub modified_files: usize,
    pub ahead: u32,
    pub behind: u32,
}

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs git against the project root.
#[derive(Debug, Clone)]
pub struct VcsService {
    root: ProjectRoot,
    git: String,
    timeout: Duration,
}

impl VcsService {
    pub fn new(root: ProjectRoot, git: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root,
            git: git.into(),
            timeout,
        }
    }

    pub fn root(&self) -> &ProjectRoot {
        &self.root
    }

    /// Working-tree diff of one path against the index.
    pub async fn diff(&self, path: &str, options: DiffOptions) -> Result<String> {
        let rel = self.pathspec(path)?;
        let mut args = vec!["diff", "--no-color", "--no-ext-diff", "--no-textconv"];
        if options.ignore_whitespace {
            args.push("-w");
        }
        args.extend(["--", rel.as_str()]);
        let out = self.run(&args, None).await?;
        if !out.success() {
            return Err(VistaError::Vcs(out.diagnostic()));
        }
        Ok(out.stdout)
    }

    /// Line attribution in git's porcelain format.
    pub async fn blame(&self, path: &str) -> Result<String> {
        let abs = self.root.resolve(path)?;
        if !abs.is_file() {
            return Err(VistaError::NotFound(path.to_string()));
        }
        let rel = self.relative_str(&abs)?;
        let out = self
            .run(&["blame", "--porcelain", "--", rel.as_str()], None)
            .await?;
        if !out.success() {
            return Err(VistaError::Vcs(out.diagnostic()));
        }
        Ok(out.stdout)
    }

    /// Classify whitespace problems in the working-tree changes of one path.
    ///
    /// `git diff --check` exits non-zero when it finds problems; that is an
    /// `IssuesFound` report. Only failures to run git at all are errors.
    pub async fn check_whitespace(&self, path: &str) -> Result<WhitespaceReport> {
        let rel = self.pathspec(path)?;
        let out = self
            .run(
                &["diff", "--check", "--no-color", "--", rel.as_str()],
                None,
            )
            .await?;
        match out.code {
            Some(0) => Ok(WhitespaceReport {
                status: WhitespaceStatus::Clean,
                output: None,
            }),
            Some(1) | Some(2) if !out.stdout.trim().is_empty() => Ok(WhitespaceReport {
                status: WhitespaceStatus::IssuesFound,
                output: Some(out.stdout),
            }),
            _ => Err(VistaError::Vcs(out.diagnostic())),
        }
    }

    /// Apply a unified diff, streamed to git's stdin.
    pub async fn apply_patch(&self, patch: &str, target: PatchTarget) -> Result<OpOutcome> {
        if patch.trim().is_empty() {
            return Err(VistaError::Input("patch must not be empty".into()));
        }
        let paths = patch_paths(patch);
        if paths.is_empty() {
            return Err(VistaError::Input("patch contains no file headers".into()));
        }
        for p in &paths {
            self.root.contain(p)?;
        }

        let mut args = vec!["apply", "--verbose"];
        if target == PatchTarget::Index {
            args.push("--cached");
        }
        args.push("-");
        let out = self.run(&args, Some(patch.as_bytes())).await?;
        if !out.success() {
            return Ok(OpOutcome::error(out.diagnostic()));
        }
        let where_ = match target {
            PatchTarget::WorkingTree => "working tree",
            PatchTarget::Index => "index",
        };
        Ok(OpOutcome::ok(format!(
            "patch applied to {where_} ({} file(s))",
            paths.len()
        )))
    }

    pub async fn apply_patch_to_worktree(&self, patch: &str) -> Result<OpOutcome> {
        self.apply_patch(patch, PatchTarget::WorkingTree).await
    }

    pub async fn apply_patch_to_index(&self, patch: &str) -> Result<OpOutcome> {
        self.apply_patch(patch, PatchTarget::Index).await
    }

    /// Discard working-tree changes to one path, restoring it from HEAD.
    ///
    /// Destructive: the discarded content is not recoverable through Vista.
    pub async fn restore_file(&self, path: &str) -> Result<OpOutcome> {
        let rel = self.pathspec(path)?;
        if rel == "." {
            return Err(VistaError::Input("restore needs a file path, not the root".into()));
        }
        let out = self
            .run(&["checkout", "HEAD", "--", rel.as_str()], None)
            .await?;
        if !out.success() {
            return Ok(OpOutcome::error(out.diagnostic()));
        }
        Ok(OpOutcome::ok(format!("restored {rel} from HEAD")))
    }

    /// Current branch, number of changed paths, and upstream divergence.
    pub async fn repo_status(&self) -> Result<RepoStatus> {
        let out = self
            .run(&["status", "--porcelain=v1", "--branch"], None)
            .await?;
        if !out.success() {
            return Err(VistaError::Vcs(out.diagnostic()));
        }
        Ok(parse_status(&out.stdout))
    }

    /// Contained path, relative to the root, usable as a git pathspec.
    fn pathspec(&self, path: &str) -> Result<String> {
        let abs = self.root.resolve_lenient(path)?;
        self.relative_str(&abs)
    }

    fn relative_str(&self, abs: &Path) -> Result<String> {
        let rel = self.root.relative(abs)?;
        if rel.as_os_str().is_empty() {
            return Ok(".".to_string());
        }
        rel.to_str()
            .map(str::to_string)
            .ok_or_else(|| VistaError::Input("path is not valid UTF-8".into()))
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<GitOutput> {
        let subcommand = args.first().copied().unwrap_or("");
        let started = Instant::now();
        METRICS.inc_vcs_invocations();

        let mut cmd = Command::new(&self.git);
        cmd.arg("--no-pager")
            .args(args)
            .current_dir(self.root.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("LC_ALL", "C")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| VistaError::Vcs(format!("failed to run {}: {e}", self.git)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.to_vec();
            // Separate task so a large patch cannot deadlock against a full stdout pipe.
            tokio::spawn(async move {
                let _ = pipe.write_all(&input).await;
                let _ = pipe.shutdown().await;
            });
        }
        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| VistaError::Vcs(format!("git {subcommand}: {e}")))?,
            Err(_) => {
                let _ = child.kill().await;
                let limit_ms = self.timeout.as_millis() as u64;
                obs::emit_vcs_timeout(subcommand, limit_ms);
                return Err(VistaError::Vcs(format!(
                    "git {subcommand} timed out after {limit_ms}ms"
                )));
            }
        };

        let stdout = stdout
            .await
            .map_err(|e| VistaError::Internal(e.to_string()))?;
        let stderr = stderr
            .await
            .map_err(|e| VistaError::Internal(e.to_string()))?;

        obs::emit_vcs_invoked(
            subcommand,
            status.code(),
            started.elapsed().as_millis() as u64,
        );
        Ok(GitOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// File paths named in a unified diff's headers, including `diff --git`
/// lines so binary and mode-only sections are covered too.
fn patch_paths(patch: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        // Drop a trailing "\t<timestamp>" as written by `diff -u`.
        let raw = raw.split('\t').next().unwrap_or(raw).trim().trim_matches('"');
        if raw == "/dev/null" || raw.is_empty() {
            return;
        }
        let path = raw
            .strip_prefix("a/")
            .or_else(|| raw.strip_prefix("b/"))
            .unwrap_or(raw);
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    };
    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let (old, new) = split_git_header(rest);
            push(old);
            push(new);
        } else if let Some(rest) = line
            .strip_prefix("--- ")
            .or_else(|| line.strip_prefix("+++ "))
            .or_else(|| line.strip_prefix("rename from "))
            .or_else(|| line.strip_prefix("rename to "))
            .or_else(|| line.strip_prefix("copy from "))
            .or_else(|| line.strip_prefix("copy to "))
        {
            push(rest);
        }
    }
    paths
}

/// Split `a/<old> b/<new>` (either side possibly quoted). Names containing
/// `" b/"` are ambiguous; the split that yields identical sides wins.
fn split_git_header(rest: &str) -> (&str, &str) {
    if let Some((old, new)) = rest.split_once("\" \"") {
        return (old, new);
    }
    let splits: Vec<usize> = rest.match_indices(" b/").map(|(i, _)| i).collect();
    let same = splits
        .iter()
        .copied()
        .find(|&i| rest.get(2..i) == rest.get(i + 3..));
    match same.or_else(|| splits.first().copied()) {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    }
}

fn parse_status(porcelain: &str) -> RepoStatus {
    let mut lines = porcelain.lines();
    let header = lines
        .next()
        .and_then(|l| l.strip_prefix("## "))
        .unwrap_or("");
    let (branch, upstream, ahead, behind) = parse_branch_header(header);
    RepoStatus {
        branch,
        upstream,
        modified_files: lines.filter(|l| !l.trim().is_empty()).count(),
        ahead,
        behind,
    }
}

/// Parse `main...origin/main [ahead 1, behind 2]` and its variants.
fn parse_branch_header(header: &str) -> (String, Option<String>, u32, u32) {
    if let Some(branch) = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
    {
        return (branch.trim().to_string(), None, 0, 0);
    }
    if header.starts_with("HEAD (no branch)") {
        return ("HEAD".to_string(), None, 0, 0);
    }

    let (names, counts) = match header.split_once(" [") {
        Some((names, counts)) => (names, counts.trim_end_matches(']')),
        None => (header, ""),
    };
    let (branch, upstream) = match names.split_once("...") {
        Some((branch, upstream)) => (branch, Some(upstream.trim().to_string())),
        None => (names, None),
    };

    let mut ahead = 0;
    let mut behind = 0;
    if upstream.is_some() {
        for part in counts.split(", ") {
            if let Some(n) = part.strip_prefix("ahead ") {
                ahead = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = part.strip_prefix("behind ") {
                behind = n.trim().parse().unwrap_or(0);
            }
        }
    }
    (branch.trim().to_string(), upstream, ahead, behind)
}
