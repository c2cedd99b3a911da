//! Access control: who may write notes.
//!
//! Every user has one of three states. New users start as `pending`;
//! configured admins are always `authorized`. A user leaves `pending` only
//! through an admin decision on an access request:
//!
//! ```text
//! pending --approve--> authorized
//! pending --reject---> denied --request--> pending
//! ```
//!
//! The registry is persisted to a JSON file after every mutation, so
//! decisions survive restarts.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use gitnote_persistence::{atomic_write_json, read_json_optional};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AccessError;
use crate::notes::slugify;

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Authorization state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Pending,
    Authorized,
    Denied,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Pending => "pending",
            AuthState::Authorized => "authorized",
            AuthState::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// Lifecycle of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Open,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Open => "open",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// An admin's verdict on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// A chat user known to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Telegram user id.
    pub id: u64,
    /// Name shown in replies and commit messages.
    pub display_name: String,
    /// Current authorization state.
    pub state: AuthState,
    /// Personal folder under `notes/`. Assigned once.
    pub folder: String,
    /// First contact.
    pub created_at: DateTime<Utc>,
}

/// A request by a user to be allowed to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: u64,
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// On-disk shape of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    users: BTreeMap<u64, User>,
    #[serde(default)]
    requests: Vec<AccessRequest>,
    #[serde(default)]
    next_request_id: u64,
}

impl Registry {
    fn folder_taken(&self, folder: &str, except: u64) -> bool {
        self.users
            .values()
            .any(|u| u.id != except && u.folder == folder)
    }
}

/// Tracks users, their authorization state and access requests.
#[derive(Debug)]
pub struct AccessController {
    path: PathBuf,
    admins: HashSet<u64>,
    registry: Registry,
}

impl AccessController {
    /// Loads the registry at `path`, starting empty when the file does not exist.
    pub fn load(path: impl Into<PathBuf>, admins: HashSet<u64>) -> Result<Self> {
        let path = path.into();
        let registry: Registry = read_json_optional(&path)?.unwrap_or_default();
        info!(
            users = registry.users.len(),
            open_requests = registry
                .requests
                .iter()
                .filter(|r| r.status == RequestStatus::Open)
                .count(),
            path = %path.display(),
            "Loaded access registry"
        );
        Ok(Self {
            path,
            admins,
            registry,
        })
    }

    /// Whether `user_id` is a configured admin.
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admins.contains(&user_id)
    }

    /// Configured admin ids.
    pub fn admin_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.admins.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Current state of a user. Unknown users are `pending`.
    pub fn check_authorization(&self, user_id: u64) -> AuthState {
        if self.is_admin(user_id) {
            return AuthState::Authorized;
        }
        self.registry
            .users
            .get(&user_id)
            .map(|u| u.state)
            .unwrap_or(AuthState::Pending)
    }

    /// Looks up a user.
    pub fn user(&self, user_id: u64) -> Option<&User> {
        self.registry.users.get(&user_id)
    }

    /// Registers a user on first contact and refreshes their display name.
    pub fn touch(
        &mut self,
        user_id: u64,
        display_name: &str,
        username: Option<&str>,
    ) -> Result<User> {
        let is_admin = self.is_admin(user_id);

        if let Some(existing) = self.registry.users.get(&user_id) {
            let needs_promotion = is_admin && existing.state != AuthState::Authorized;
            if existing.display_name == display_name && !needs_promotion {
                return Ok(existing.clone());
            }
        }

        let mut next = self.registry.clone();
        let folder = match next.users.get(&user_id) {
            Some(existing) => existing.folder.clone(),
            None => assign_folder(&next, user_id, username),
        };
        let user = next
            .users
            .entry(user_id)
            .and_modify(|u| {
                u.display_name = display_name.to_string();
                if is_admin {
                    u.state = AuthState::Authorized;
                }
            })
            .or_insert_with(|| User {
                id: user_id,
                display_name: display_name.to_string(),
                state: if is_admin {
                    AuthState::Authorized
                } else {
                    AuthState::Pending
                },
                folder,
                created_at: Utc::now(),
            })
            .clone();

        self.commit(next)?;
        debug!(user_id, folder = %user.folder, state = %user.state, "User registered");
        Ok(user)
    }

    /// The open request of a user, if any.
    pub fn open_request_for(&self, user_id: u64) -> Option<&AccessRequest> {
        self.registry
            .requests
            .iter()
            .find(|r| r.user_id == user_id && r.status == RequestStatus::Open)
    }

    /// All open requests, oldest first.
    pub fn open_requests(&self) -> Vec<AccessRequest> {
        self.registry
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Open)
            .cloned()
            .collect()
    }

    /// Opens an access request for a known user.
    ///
    /// # Errors
    ///
    /// `AlreadyAuthorized` if the user may already write, `AlreadyRequested`
    /// if a request is still open, `UnknownUser` if the user never
    /// contacted the bot.
    pub fn request_access(&mut self, user_id: u64) -> Result<AccessRequest> {
        if self.check_authorization(user_id) == AuthState::Authorized {
            return Err(AccessError::AlreadyAuthorized);
        }
        if !self.registry.users.contains_key(&user_id) {
            return Err(AccessError::UnknownUser(user_id));
        }
        if let Some(open) = self.open_request_for(user_id) {
            return Err(AccessError::AlreadyRequested {
                request_id: open.id,
            });
        }

        let mut next = self.registry.clone();
        next.next_request_id += 1;
        let request = AccessRequest {
            id: next.next_request_id,
            user_id,
            created_at: Utc::now(),
            status: RequestStatus::Open,
            resolved_by: None,
            resolved_at: None,
        };
        next.requests.push(request.clone());
        if let Some(user) = next.users.get_mut(&user_id) {
            user.state = AuthState::Pending;
        }

        self.commit(next)?;
        info!(user_id, request_id = request.id, "Access requested");
        Ok(request)
    }

    /// Approves or rejects an open request.
    ///
    /// # Errors
    ///
    /// `NotAdmin` if `admin_id` is not an admin, `RequestNotFound` for an
    /// unknown id, `AlreadyResolved` if the request was decided before.
    pub fn resolve_request(
        &mut self,
        request_id: u64,
        decision: Decision,
        admin_id: u64,
    ) -> Result<User> {
        if !self.is_admin(admin_id) {
            return Err(AccessError::NotAdmin(admin_id));
        }

        let mut next = self.registry.clone();
        let request = next
            .requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or(AccessError::RequestNotFound(request_id))?;
        if request.status != RequestStatus::Open {
            return Err(AccessError::AlreadyResolved {
                request_id,
                status: request.status,
            });
        }

        let (status, state) = match decision {
            Decision::Approve => (RequestStatus::Approved, AuthState::Authorized),
            Decision::Reject => (RequestStatus::Rejected, AuthState::Denied),
        };
        request.status = status;
        request.resolved_by = Some(admin_id);
        request.resolved_at = Some(Utc::now());
        let user_id = request.user_id;

        let user = next
            .users
            .get_mut(&user_id)
            .ok_or(AccessError::UnknownUser(user_id))?;
        user.state = state;
        let user = user.clone();

        self.commit(next)?;
        info!(request_id, user_id, admin_id, status = %status, "Access request resolved");
        Ok(user)
    }

    /// Persists `next` and makes it current.
    fn commit(&mut self, next: Registry) -> Result<()> {
        atomic_write_json(&self.path, &next)?;
        self.registry = next;
        Ok(())
    }
}

/// Picks a folder name for a new user: their username slug, or `user-<id>`.
fn assign_folder(registry: &Registry, user_id: u64, username: Option<&str>) -> String {
    let base = username
        .map(slugify)
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| format!("user-{}", user_id));

    let mut folder = base.clone();
    let mut attempt = 0u32;
    while registry.folder_taken(&folder, user_id) {
        attempt += 1;
        folder = if attempt == 1 {
            format!("{}-{}", base, user_id)
        } else {
            format!("{}-{}-{}", base, user_id, attempt)
        };
    }
    folder
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const ADMIN: u64 = 1;
    const ALICE: u64 = 100;
    const BOB: u64 = 200;

    fn controller() -> (TempDir, AccessController) {
        let dir = tempdir().unwrap();
        let ctl = AccessController::load(dir.path().join("access.json"), HashSet::from([ADMIN]))
            .unwrap();
        (dir, ctl)
    }

    #[test]
    fn test_unknown_user_is_pending() {
        let (_dir, ctl) = controller();
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Pending);
    }

    #[test]
    fn test_admin_is_always_authorized() {
        let (_dir, mut ctl) = controller();
        assert_eq!(ctl.check_authorization(ADMIN), AuthState::Authorized);

        let admin = ctl.touch(ADMIN, "Root", Some("root")).unwrap();
        assert_eq!(admin.state, AuthState::Authorized);
    }

    #[test]
    fn test_touch_assigns_folder_once() {
        let (_dir, mut ctl) = controller();

        let first = ctl.touch(ALICE, "Alice", Some("Alice_W")).unwrap();
        assert_eq!(first.folder, "alice_w");
        assert_eq!(first.state, AuthState::Pending);

        let renamed = ctl.touch(ALICE, "Alice W.", Some("someone_else")).unwrap();
        assert_eq!(renamed.folder, "alice_w");
        assert_eq!(renamed.display_name, "Alice W.");
    }

    #[test]
    fn test_folder_falls_back_to_user_id() {
        let (_dir, mut ctl) = controller();
        let user = ctl.touch(BOB, "Bob", None).unwrap();
        assert_eq!(user.folder, "user-200");
    }

    #[test]
    fn test_folder_collision_is_disambiguated() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", Some("notes")).unwrap();
        let bob = ctl.touch(BOB, "Bob", Some("notes")).unwrap();
        assert_eq!(bob.folder, "notes-200");
    }

    #[test]
    fn test_folder_suffix_collision_keeps_searching() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", Some("notes")).unwrap();
        ctl.touch(300, "Carol", Some("notes-200")).unwrap();

        let bob = ctl.touch(BOB, "Bob", Some("notes")).unwrap();
        assert_eq!(bob.folder, "notes-200-2");
    }

    #[test]
    fn test_request_then_approve() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", Some("alice")).unwrap();

        let request = ctl.request_access(ALICE).unwrap();
        assert_eq!(request.status, RequestStatus::Open);
        assert_eq!(ctl.open_requests().len(), 1);

        let user = ctl
            .resolve_request(request.id, Decision::Approve, ADMIN)
            .unwrap();
        assert_eq!(user.state, AuthState::Authorized);
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Authorized);
        assert!(ctl.open_requests().is_empty());
    }

    #[test]
    fn test_only_one_open_request_per_user() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", None).unwrap();

        let first = ctl.request_access(ALICE).unwrap();
        let err = ctl.request_access(ALICE).unwrap_err();
        assert!(matches!(
            err,
            AccessError::AlreadyRequested { request_id } if request_id == first.id
        ));
    }

    #[test]
    fn test_authorized_user_cannot_request() {
        let (_dir, mut ctl) = controller();
        let err = ctl.request_access(ADMIN).unwrap_err();
        assert!(matches!(err, AccessError::AlreadyAuthorized));
    }

    #[test]
    fn test_unknown_user_cannot_request() {
        let (_dir, mut ctl) = controller();
        let err = ctl.request_access(ALICE).unwrap_err();
        assert!(matches!(err, AccessError::UnknownUser(ALICE)));
    }

    #[test]
    fn test_non_admin_cannot_resolve() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", None).unwrap();
        ctl.touch(BOB, "Bob", None).unwrap();
        let request = ctl.request_access(ALICE).unwrap();

        let err = ctl
            .resolve_request(request.id, Decision::Approve, BOB)
            .unwrap_err();
        assert!(matches!(err, AccessError::NotAdmin(BOB)));
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Pending);
    }

    #[test]
    fn test_request_resolves_only_once() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", None).unwrap();
        let request = ctl.request_access(ALICE).unwrap();

        ctl.resolve_request(request.id, Decision::Reject, ADMIN)
            .unwrap();
        let err = ctl
            .resolve_request(request.id, Decision::Approve, ADMIN)
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::AlreadyResolved { status: RequestStatus::Rejected, .. }
        ));
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Denied);
    }

    #[test]
    fn test_missing_request() {
        let (_dir, mut ctl) = controller();
        let err = ctl.resolve_request(42, Decision::Approve, ADMIN).unwrap_err();
        assert!(matches!(err, AccessError::RequestNotFound(42)));
    }

    #[test]
    fn test_denied_user_may_ask_again() {
        let (_dir, mut ctl) = controller();
        ctl.touch(ALICE, "Alice", None).unwrap();
        let first = ctl.request_access(ALICE).unwrap();
        ctl.resolve_request(first.id, Decision::Reject, ADMIN).unwrap();
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Denied);

        let second = ctl.request_access(ALICE).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Pending);
    }

    #[test]
    fn test_registry_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.json");
        {
            let mut ctl = AccessController::load(&path, HashSet::from([ADMIN])).unwrap();
            ctl.touch(ALICE, "Alice", Some("alice")).unwrap();
            let request = ctl.request_access(ALICE).unwrap();
            ctl.resolve_request(request.id, Decision::Approve, ADMIN)
                .unwrap();
            ctl.touch(BOB, "Bob", None).unwrap();
            ctl.request_access(BOB).unwrap();
        }

        let ctl = AccessController::load(&path, HashSet::from([ADMIN])).unwrap();
        assert_eq!(ctl.check_authorization(ALICE), AuthState::Authorized);
        assert_eq!(ctl.user(ALICE).unwrap().folder, "alice");
        assert_eq!(ctl.open_requests().len(), 1);
        assert_eq!(ctl.open_requests()[0].user_id, BOB);
    }

    #[test]
    fn test_request_ids_keep_increasing_after_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.json");
        let first_id = {
            let mut ctl = AccessController::load(&path, HashSet::from([ADMIN])).unwrap();
            ctl.touch(ALICE, "Alice", None).unwrap();
            ctl.request_access(ALICE).unwrap().id
        };

        let mut ctl = AccessController::load(&path, HashSet::from([ADMIN])).unwrap();
        ctl.touch(BOB, "Bob", None).unwrap();
        let second_id = ctl.request_access(BOB).unwrap().id;
        assert!(second_id > first_id);
    }

    #[test]
    fn test_registry_file_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.json");
        let mut ctl = AccessController::load(&path, HashSet::from([ADMIN])).unwrap();
        ctl.touch(ALICE, "Alice", Some("alice")).unwrap();
        ctl.request_access(ALICE).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["users"]["100"]["state"], "pending");
        assert_eq!(raw["users"]["100"]["folder"], "alice");
        assert_eq!(raw["requests"][0]["status"], "open");
        assert!(raw["requests"][0].get("resolved_by").is_none());
        assert_eq!(raw["next_request_id"], 1);
    }
}
