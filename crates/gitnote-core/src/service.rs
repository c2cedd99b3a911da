//! The message coordinator.
//!
//! [`NoteService`] owns the access registry and the working copy. Every
//! incoming chat message goes through [`NoteService::handle`], which applies
//! the access gate, routes the text and turns every outcome, errors
//! included, into replies. It never fails.
//!
//! The working copy is guarded by a single mutex: clone, pull, note write,
//! commit and push for one message all happen while holding it, so messages
//! from all users form one queue.

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::access::{AccessController, AuthState, Decision, User};
use crate::config::BotConfig;
use crate::error::{AccessError, Error, NoteError, Result, SyncError};
use crate::notes::NoteWriter;
use crate::router::{help_text, route, Action, Command};
use crate::sync::{RepoSync, SyncStatus};

/// A chat message as seen by the service.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub user_id: u64,
    pub chat_id: i64,
    pub display_name: String,
    /// Platform username without the `@`.
    pub username: Option<String>,
    pub text: String,
    /// Text of the message this one replies to.
    pub reply_text: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// A message sent now.
    pub fn new(
        user_id: u64,
        chat_id: i64,
        display_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            chat_id,
            display_name: display_name.into(),
            username: None,
            text: text.into(),
            reply_text: None,
            sent_at: Utc::now(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_reply_text(mut self, text: impl Into<String>) -> Self {
        self.reply_text = Some(text.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = at;
        self
    }
}

/// A reply or notification to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub chat_id: i64,
    pub text: String,
}

impl Outbound {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// Coordinates access control, note writing and repository sync.
pub struct NoteService {
    access: RwLock<AccessController>,
    repo: Mutex<RepoSync>,
    /// Copy of the repository status, readable while the repo lock is held.
    status: RwLock<SyncStatus>,
    writer: NoteWriter,
    bot_username: Option<String>,
}

impl NoteService {
    /// Builds the service from its parts.
    pub fn new(access: AccessController, repo: RepoSync) -> Self {
        let writer = NoteWriter::new(repo.repo_dir());
        let status = repo.status().clone();
        Self {
            access: RwLock::new(access),
            repo: Mutex::new(repo),
            status: RwLock::new(status),
            writer,
            bot_username: None,
        }
    }

    /// Loads the access registry and locates git.
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let access = AccessController::load(config.access_file(), config.admin_ids.clone())?;
        let repo = RepoSync::new(config.git.clone())?;
        Ok(Self::new(access, repo))
    }

    /// Sets the bot's own username so `/command@name` is recognized.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Clones or updates the working copy ahead of the first message.
    pub async fn prepare(&self) -> Result<()> {
        let mut repo = self.repo.lock().await;
        let result = repo.ensure_ready().await;
        self.publish(&repo).await;
        result.map_err(Error::from)
    }

    /// Latest repository status without waiting for the repo lock.
    pub async fn status_snapshot(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Current authorization state of a user.
    pub async fn authorization(&self, user_id: u64) -> AuthState {
        self.access.read().await.check_authorization(user_id)
    }

    /// Handles one message and returns the replies to send.
    pub async fn handle(&self, msg: IncomingMessage) -> Vec<Outbound> {
        let touched = self
            .access
            .write()
            .await
            .touch(msg.user_id, &msg.display_name, msg.username.as_deref());
        let user = match touched {
            Ok(user) => user,
            Err(e) => {
                error!(user_id = msg.user_id, error = %e, "Failed to register user");
                return vec![Outbound::new(
                    msg.chat_id,
                    "Something went wrong while checking your access. Please try again later.",
                )];
            }
        };

        let action = route(&msg.text, self.bot_username.as_deref());
        debug!(user_id = user.id, chat_id = msg.chat_id, action = ?action, "Routed message");

        match self.dispatch(&user, &msg, action).await {
            Ok(replies) => replies,
            Err(e) => {
                match &e {
                    Error::AuthorizationDenied { .. } | Error::Access(_) => {
                        info!(user_id = user.id, error = %e, "Request refused")
                    }
                    _ => {
                        error!(user_id = user.id, chat_id = msg.chat_id, error = %e, "Message handling failed")
                    }
                }
                vec![Outbound::new(msg.chat_id, self.describe_error(&e).await)]
            }
        }
    }

    async fn dispatch(
        &self,
        user: &User,
        msg: &IncomingMessage,
        action: Action,
    ) -> Result<Vec<Outbound>> {
        let chat = msg.chat_id;
        let reply = |text: String| -> Result<Vec<Outbound>> {
            Ok(vec![Outbound::new(chat, text)])
        };

        match action {
            Action::Start => reply(self.start_text(user).await),
            Action::ShowHelp => {
                let is_admin = self.access.read().await.is_admin(user.id);
                reply(help_text(is_admin))
            }
            Action::ShowStatus => {
                self.require_authorized(user.id).await?;
                reply(self.status_text().await)
            }
            Action::ShowFolder => {
                self.require_authorized(user.id).await?;
                reply(self.show_folder(user).await?)
            }
            Action::SaveNote { name, content } => {
                self.require_authorized(user.id).await?;
                reply(self.save_note(user, msg, name, content).await?)
            }
            Action::RequestAccess => self.request_access(user, chat).await,
            Action::ListPending => {
                self.require_admin(user.id).await?;
                reply(self.pending_text().await)
            }
            Action::AdminDecision {
                request_id,
                decision,
            } => self.decide(user, chat, request_id, decision).await,
            Action::Usage(command) => reply(format!(
                "Usage: {}\n{}",
                command,
                command.description()
            )),
            Action::Unknown(token) => reply(format!(
                "Unknown command {}. Send /help to see what I can do.",
                token
            )),
        }
    }

    async fn require_authorized(&self, user_id: u64) -> Result<()> {
        match self.access.read().await.check_authorization(user_id) {
            AuthState::Authorized => Ok(()),
            state => Err(Error::AuthorizationDenied { user_id, state }),
        }
    }

    async fn require_admin(&self, user_id: u64) -> Result<()> {
        if self.access.read().await.is_admin(user_id) {
            Ok(())
        } else {
            Err(AccessError::NotAdmin(user_id).into())
        }
    }

    async fn save_note(
        &self,
        user: &User,
        msg: &IncomingMessage,
        name: Option<String>,
        content: String,
    ) -> Result<String> {
        let content = if content.trim().is_empty() {
            msg.reply_text.clone().unwrap_or_default()
        } else {
            content
        };
        if content.trim().is_empty() {
            return Err(NoteError::Empty.into());
        }

        let mut repo = self.repo.lock().await;
        let result = self
            .write_and_sync(&mut repo, user, &content, name.as_deref(), msg.sent_at)
            .await;
        self.publish(&repo).await;
        result
    }

    async fn write_and_sync(
        &self,
        repo: &mut RepoSync,
        user: &User,
        content: &str,
        name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<String> {
        repo.ensure_ready().await?;
        let note = self.writer.write(user, content, name, at)?;
        let path = note.path.display().to_string();

        match repo
            .commit_and_push(std::slice::from_ref(&note.path), &note.commit_message())
            .await
        {
            Ok(commit) => {
                info!(user_id = user.id, path = %path, commit = %commit, "Note saved");
                Ok(format!("Saved {} ({})", path, short_id(&commit)))
            }
            Err(SyncError::NotPushed { commit, reason }) => {
                warn!(user_id = user.id, path = %path, commit = %commit, reason = %reason, "Note saved locally only");
                Ok(format!(
                    "Saved {} locally as {} but it is not synced yet. It will be pushed with the next note.",
                    path,
                    short_id(&commit)
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn show_folder(&self, user: &User) -> Result<String> {
        let mut repo = self.repo.lock().await;
        let ready = repo.ensure_ready().await;
        self.publish(&repo).await;
        ready?;

        let folder = self.writer.ensure_folder(user)?;
        Ok(format!(
            "Your notes go to {}/ in {} ({}).",
            folder.display(),
            repo.status().remote,
            repo.status().branch
        ))
    }

    async fn request_access(&self, user: &User, chat: i64) -> Result<Vec<Outbound>> {
        let (request, admins) = {
            let mut access = self.access.write().await;
            let request = access.request_access(user.id)?;
            (request, access.admin_ids())
        };

        let mut replies = Vec::with_capacity(admins.len() + 1);
        if admins.is_empty() {
            warn!(request_id = request.id, "Access requested but no admins are configured");
            replies.push(Outbound::new(
                chat,
                format!(
                    "Access request #{} recorded, but no admins are configured to review it.",
                    request.id
                ),
            ));
            return Ok(replies);
        }

        replies.push(Outbound::new(
            chat,
            format!(
                "Access request #{} sent. You will get a message when an admin decides.",
                request.id
            ),
        ));
        let notice = format!(
            "Access request #{} from {} (id {}, folder {}).\nReply /approve {} or /deny {}.",
            request.id, user.display_name, user.id, user.folder, request.id, request.id
        );
        for admin in admins {
            replies.push(Outbound::new(admin as i64, notice.clone()));
        }
        Ok(replies)
    }

    async fn pending_text(&self) -> String {
        let access = self.access.read().await;
        let open = access.open_requests();
        if open.is_empty() {
            return "No open access requests.".to_string();
        }

        let mut lines = vec![format!("Open access requests ({}):", open.len())];
        for request in open {
            let name = access
                .user(request.user_id)
                .map(|u| u.display_name.as_str())
                .unwrap_or("unknown");
            lines.push(format!(
                "#{} {} (id {}) since {}",
                request.id,
                name,
                request.user_id,
                request.created_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        lines.join("\n")
    }

    async fn decide(
        &self,
        admin: &User,
        chat: i64,
        request_id: u64,
        decision: Decision,
    ) -> Result<Vec<Outbound>> {
        let target = self
            .access
            .write()
            .await
            .resolve_request(request_id, decision, admin.id)?;

        let (to_admin, to_user) = match decision {
            Decision::Approve => (
                format!(
                    "Approved request #{}: {} can now save notes.",
                    request_id, target.display_name
                ),
                "Your access request was approved. Send any text to save it as a note.".to_string(),
            ),
            Decision::Reject => (
                format!("Rejected request #{} from {}.", request_id, target.display_name),
                "Your access request was denied.".to_string(),
            ),
        };
        Ok(vec![
            Outbound::new(chat, to_admin),
            Outbound::new(target.id as i64, to_user),
        ])
    }

    async fn start_text(&self, user: &User) -> String {
        let access = self.access.read().await;
        let greeting = format!("Hi {}!", user.display_name);
        match access.check_authorization(user.id) {
            AuthState::Authorized => format!(
                "{} Send me any text and I will save it under notes/{}/ and push it to the repository. /help lists all commands.",
                greeting, user.folder
            ),
            state => {
                let open = access.open_request_for(user.id).map(|r| r.id);
                format!("{} {}", greeting, access_hint(state, open))
            }
        }
    }

    async fn status_text(&self) -> String {
        let mut repo = self.repo.lock().await;
        if repo.status().ready {
            repo.refresh_status().await;
        } else if let Err(e) = repo.ensure_ready().await {
            debug!(error = %e, "Working copy not ready for status");
        }
        self.publish(&repo).await;
        let head = if repo.status().ready && repo.status().last_commit.is_none() {
            repo.head().await.ok()
        } else {
            None
        };

        let status = repo.status();
        let mut lines = vec![format!("Repository: {} ({})", status.remote, status.branch)];
        if status.ready {
            lines.push(format!("Working copy: {}", status.repo_dir.display()));
        } else {
            lines.push("Working copy: not cloned yet".to_string());
        }
        lines.push(match status.last_sync {
            Some(at) => format!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => "Last sync: never".to_string(),
        });
        match (&status.last_commit, head) {
            (Some(commit), _) => lines.push(format!(
                "Last commit: {} {} ({})",
                commit.short_id(),
                commit.summary,
                if commit.pushed { "pushed" } else { "not pushed" }
            )),
            (None, Some(head)) => lines.push(format!("HEAD: {}", short_id(&head))),
            (None, None) => {}
        }
        lines.push(format!("Unpushed commits: {}", status.unpushed));
        if let Some(err) = &status.last_error {
            lines.push(format!("Last error: {}", err));
        }
        lines.join("\n")
    }

    async fn publish(&self, repo: &RepoSync) {
        *self.status.write().await = repo.status().clone();
    }

    async fn describe_error(&self, err: &Error) -> String {
        match err {
            Error::AuthorizationDenied { user_id, state } => {
                let open = self
                    .access
                    .read()
                    .await
                    .open_request_for(*user_id)
                    .map(|r| r.id);
                format!("Not saved. {}", access_hint(*state, open))
            }
            Error::Access(e) => match e {
                AccessError::AlreadyRequested { request_id } => format!(
                    "Your access request #{} is already waiting for an admin.",
                    request_id
                ),
                AccessError::AlreadyAuthorized => "You already have access.".to_string(),
                AccessError::NotAdmin(_) => "Only admins can use this command.".to_string(),
                AccessError::RequestNotFound(id) => format!("Access request #{} not found.", id),
                AccessError::AlreadyResolved { request_id, status } => {
                    format!("Access request #{} was already {}.", request_id, status)
                }
                AccessError::UnknownUser(_) | AccessError::Persistence(_) => {
                    "Could not update the access registry. Please try again later.".to_string()
                }
            },
            Error::Sync(SyncError::NotPushed { commit, .. }) => format!(
                "Saved locally as {} but not synced yet. It will be pushed with the next note.",
                short_id(commit)
            ),
            Error::Sync(e) => format!("Not saved: repository sync failed ({}).", e),
            Error::Note(NoteError::Empty) => format!(
                "Nothing to save. Send some text, or reply to a message with {}.",
                Command::Save
            ),
            Error::Note(NoteError::InvalidName(name)) => {
                format!("'{}' is not a usable file name.", name)
            }
            Error::Note(e) => format!("Not saved: {}.", e),
            Error::Config(e) => format!("Not saved: {}.", e),
        }
    }
}

/// What a user without write access should do next.
fn access_hint(state: AuthState, open_request: Option<u64>) -> String {
    match (state, open_request) {
        (AuthState::Authorized, _) => "You have access.".to_string(),
        (_, Some(id)) => format!("Your access request #{} is waiting for an admin.", id),
        (AuthState::Denied, None) => {
            "Your access request was denied. Send /request to ask again.".to_string()
        }
        (AuthState::Pending, None) => {
            "You need access before you can save notes. Send /request to ask an admin.".to_string()
        }
    }
}

fn short_id(commit: &str) -> &str {
    &commit[..commit.len().min(8)]
}
