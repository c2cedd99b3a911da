//! Repository sync adapter: the local working copy and its remote.
//!
//! All operations shell out to the `git` binary. The adapter assumes it is
//! the only writer of its working copy; callers serialize access (see
//! [`crate::service::NoteService`]).

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::GitConfig;
use crate::error::SyncError;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// The last commit made by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    /// Full commit id.
    pub id: String,
    /// First line of the commit message.
    pub summary: String,
    /// When the commit was made.
    pub at: DateTime<Utc>,
    /// Whether the commit has reached the remote.
    pub pushed: bool,
}

impl CommitInfo {
    /// Abbreviated id for display.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// Snapshot of the working copy for `/gitstatus` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Local working copy.
    pub repo_dir: PathBuf,
    /// Remote URL without credentials.
    pub remote: String,
    /// Tracked branch.
    pub branch: String,
    /// Whether the working copy has been cloned.
    pub ready: bool,
    /// Last successful pull or push.
    pub last_sync: Option<DateTime<Utc>>,
    /// Last commit made by the bot.
    pub last_commit: Option<CommitInfo>,
    /// Last sync failure, cleared by the next success.
    pub last_error: Option<String>,
    /// Local commits not yet on the remote branch.
    pub unpushed: u32,
}

/// Wraps clone/pull/add/commit/push against one remote branch.
#[derive(Debug)]
pub struct RepoSync {
    /// Path to the git binary.
    git_path: PathBuf,
    config: GitConfig,
    status: SyncStatus,
}

impl RepoSync {
    /// Creates an adapter, locating `git` in PATH.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::GitNotFound` if git is not installed.
    pub fn new(config: GitConfig) -> Result<Self> {
        let git_path = which::which("git").map_err(|_| SyncError::GitNotFound)?;
        debug!(path = %git_path.display(), "git found");
        Ok(Self::with_git_binary(config, git_path))
    }

    /// Creates an adapter using a specific git binary.
    pub fn with_git_binary(config: GitConfig, git_path: impl Into<PathBuf>) -> Self {
        let status = SyncStatus {
            repo_dir: config.repo_dir.clone(),
            remote: config.display_url(),
            branch: config.branch.clone(),
            ready: config.repo_dir.join(".git").exists(),
            last_sync: None,
            last_commit: None,
            last_error: None,
            unpushed: 0,
        };
        Self {
            git_path: git_path.into(),
            config,
            status,
        }
    }

    /// Local working copy path.
    pub fn repo_dir(&self) -> &Path {
        &self.config.repo_dir
    }

    /// Current status snapshot.
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Clones the remote if there is no working copy, otherwise pulls.
    ///
    /// Failures are recorded in the status and returned; the next call
    /// starts over from scratch.
    pub async fn ensure_ready(&mut self) -> Result<()> {
        let result = if self.repo_dir().join(".git").exists() {
            self.update_remote_url().await;
            self.reset_index().await;
            self.pull().await
        } else {
            self.clone_remote().await
        };

        match result {
            Ok(()) => {
                self.status.ready = true;
                self.status.last_sync = Some(Utc::now());
                self.status.last_error = None;
                self.status.unpushed = self.count_unpushed().await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Working copy sync failed");
                self.status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stages `paths`, commits them as the bot and pushes to the branch.
    ///
    /// `paths` are new files relative to the working copy. If staging or
    /// committing fails they are unstaged and deleted, leaving the working
    /// copy as it was before the note.
    ///
    /// A rejected push triggers exactly one pull-and-retry. If the retry
    /// fails too, the commit stays in the local history and
    /// `SyncError::NotPushed` is returned; the next successful cycle pushes it.
    pub async fn commit_and_push(&mut self, paths: &[PathBuf], message: &str) -> Result<String> {
        if let Err(e) = self.stage_and_commit(paths, message).await {
            warn!(error = %e, files = paths.len(), "Commit failed, discarding note files");
            self.discard(paths).await;
            self.status.last_error = Some(e.to_string());
            return Err(e);
        }

        let commit = self.head().await?;
        info!(commit = %commit, files = paths.len(), "Committed");
        self.record_commit(&commit, message);

        match self.push().await {
            Ok(()) => return Ok(self.pushed(commit).await),
            Err(first) => {
                warn!(commit = %commit, error = %first, "Push rejected, pulling and retrying once");
            }
        }

        if let Err(e) = self.pull().await {
            return Err(self.not_pushed(commit, e).await);
        }

        // Rebase rewrote the commit
        let commit = self.head().await?;
        self.record_commit(&commit, message);

        match self.push().await {
            Ok(()) => Ok(self.pushed(commit).await),
            Err(e) => Err(self.not_pushed(commit, e).await),
        }
    }

    /// Re-reads the unpushed commit count.
    pub async fn refresh_status(&mut self) {
        if self.repo_dir().join(".git").exists() {
            self.status.unpushed = self.count_unpushed().await;
        }
    }

    /// Current HEAD commit id.
    pub async fn head(&self) -> Result<String> {
        let out = self.run_git_checked("rev-parse", &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn stage_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        // -f: the notes are ours even if the repository ignores their names
        let mut add_args = vec!["add".to_string(), "-f".to_string(), "--".to_string()];
        add_args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        self.run_git_checked("add", add_args.as_slice()).await?;

        let mut commit_args = self.identity_args();
        commit_args.extend(["commit".to_string(), "-m".to_string(), message.to_string()]);
        self.run_git_checked("commit", commit_args.as_slice()).await?;
        Ok(())
    }

    /// Unstages and deletes files that never made it into a commit.
    async fn discard(&self, paths: &[PathBuf]) {
        let mut reset_args = vec!["reset".to_string(), "-q".to_string(), "--".to_string()];
        reset_args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        if let Err(e) = self.run_git_checked("reset", reset_args.as_slice()).await {
            warn!(error = %e, "Failed to unstage discarded files");
        }

        for path in paths {
            let absolute = self.repo_dir().join(path);
            match std::fs::remove_file(&absolute) {
                Ok(()) => debug!(path = %path.display(), "Discarded uncommitted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %absolute.display(), error = %e, "Failed to remove file"),
            }
        }
    }

    /// Empties the index so a leftover from an interrupted cycle cannot
    /// block `pull --rebase`. Working tree files are untouched.
    async fn reset_index(&self) {
        if let Err(e) = self.run_git_checked("reset", &["reset", "-q"]).await {
            debug!(error = %e, "Could not reset index");
        }
    }

    async fn pushed(&mut self, commit: String) -> String {
        info!(commit = %commit, branch = %self.config.branch, "Pushed");
        if let Some(last) = self.status.last_commit.as_mut() {
            last.pushed = true;
        }
        self.status.last_sync = Some(Utc::now());
        self.status.last_error = None;
        self.status.unpushed = self.count_unpushed().await;
        commit
    }

    async fn not_pushed(&mut self, commit: String, cause: SyncError) -> SyncError {
        warn!(commit = %commit, error = %cause, "Commit left unpushed");
        let err = SyncError::NotPushed {
            commit,
            reason: cause.to_string(),
        };
        self.status.last_error = Some(err.to_string());
        self.status.unpushed = self.count_unpushed().await;
        err
    }

    fn record_commit(&mut self, commit: &str, message: &str) {
        self.status.last_commit = Some(CommitInfo {
            id: commit.to_string(),
            summary: message.lines().next().unwrap_or_default().to_string(),
            at: Utc::now(),
            pushed: false,
        });
    }

    async fn clone_remote(&self) -> Result<()> {
        let dir = self.repo_dir().to_path_buf();
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SyncError::WorkingCopy {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        info!(
            remote = %self.config.display_url(),
            branch = %self.config.branch,
            path = %dir.display(),
            "Cloning repository"
        );
        let url = self.config.authenticated_url();
        let dir_arg = dir.to_string_lossy().into_owned();
        let output = self
            .run_git_in(
                None,
                &["clone", "--branch", &self.config.branch, &url, &dir_arg],
            )
            .await
            .map_err(|source| SyncError::Spawn { op: "clone", source })?;
        self.check("clone", output)?;
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        // Rebasing local commits writes new ones, so it needs the identity too
        let mut pull_args = self.identity_args();
        pull_args.extend([
            "pull".to_string(),
            "--rebase".to_string(),
            "origin".to_string(),
            self.config.branch.clone(),
        ]);
        let result = self.run_git_checked("pull", pull_args.as_slice()).await;

        match result {
            Ok(out) => {
                trace!(output = %out.trim(), "pull completed");
                Ok(())
            }
            Err(e) => {
                // Never leave the working copy mid-rebase
                if self.repo_dir().join(".git").join("rebase-merge").exists()
                    || self.repo_dir().join(".git").join("rebase-apply").exists()
                {
                    let _ = self.run_git("rebase", &["rebase", "--abort"]).await;
                }
                Err(e)
            }
        }
    }

    /// `-c` overrides that make the bot the committer.
    fn identity_args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("user.name={}", self.config.username),
            "-c".to_string(),
            format!("user.email={}", self.config.email),
        ]
    }

    async fn push(&self) -> Result<()> {
        let refspec = format!("HEAD:{}", self.config.branch);
        self.run_git_checked("push", &["push", "origin", &refspec])
            .await
            .map(|_| ())
    }

    /// Keeps the stored origin URL in line with the configured credentials.
    async fn update_remote_url(&self) {
        let wanted = self.config.authenticated_url();
        let current = self
            .run_git_checked("remote", &["remote", "get-url", "origin"])
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default();
        if current != wanted {
            debug!(remote = %self.config.display_url(), "Updating origin URL");
            if let Err(e) = self
                .run_git_checked("remote", &["remote", "set-url", "origin", &wanted])
                .await
            {
                warn!(error = %e, "Failed to update origin URL");
            }
        }
    }

    async fn count_unpushed(&self) -> u32 {
        let range = format!("origin/{}..HEAD", self.config.branch);
        match self
            .run_git_checked("rev-list", &["rev-list", "--count", &range])
            .await
        {
            Ok(out) => out.trim().parse().unwrap_or(0),
            Err(e) => {
                debug!(error = %e, "Could not count unpushed commits");
                0
            }
        }
    }

    /// Runs git inside the working copy.
    async fn run_git<S: AsRef<str>>(&self, op: &'static str, args: &[S]) -> Result<Output> {
        let dir = self.repo_dir().to_path_buf();
        self.run_git_in(Some(&dir), args)
            .await
            .map_err(|source| SyncError::Spawn { op, source })
    }

    /// Runs git inside the working copy and checks the exit status.
    async fn run_git_checked<S: AsRef<str>>(&self, op: &'static str, args: &[S]) -> Result<String> {
        let output = self.run_git(op, args).await?;
        self.check(op, output)
    }

    async fn run_git_in<S: AsRef<str>>(
        &self,
        cwd: Option<&Path>,
        args: &[S],
    ) -> std::io::Result<Output> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        trace!(args = ?self.scrub(&args.join(" ")), "running git command");

        let mut command = Command::new(&self.git_path);
        command
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command.output().await?;

        trace!(
            status = %output.status,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "git command completed"
        );
        Ok(output)
    }

    fn check(&self, op: &'static str, output: Output) -> Result<String> {
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            Err(SyncError::CommandFailed {
                op,
                stderr: self.scrub(detail),
            })
        }
    }

    /// Removes the access token from text that may end up in logs or chat.
    fn scrub(&self, text: &str) -> String {
        match self.config.token.as_deref() {
            Some(token) if !token.is_empty() => text.replace(token, "***"),
            _ => text.to_string(),
        }
    }
}
