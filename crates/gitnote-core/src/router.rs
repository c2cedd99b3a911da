//! Message routing: chat text to a closed set of actions.
//!
//! Routing looks at the first token only. A token starting with `/` must
//! match a command name exactly (case-sensitive); anything else is note
//! content.

use std::fmt;

use crate::access::Decision;

/// Bot commands that can be invoked with `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Help,
    GitStatus,
    MyFolder,
    Save,
    Request,
    Pending,
    Approve,
    Deny,
}

impl Command {
    /// Every command, in the order shown by `/help`.
    pub const ALL: [Command; 9] = [
        Command::Start,
        Command::Help,
        Command::GitStatus,
        Command::MyFolder,
        Command::Save,
        Command::Request,
        Command::Pending,
        Command::Approve,
        Command::Deny,
    ];

    /// Name as typed after the slash.
    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::GitStatus => "gitstatus",
            Command::MyFolder => "myfolder",
            Command::Save => "save",
            Command::Request => "request",
            Command::Pending => "pending",
            Command::Approve => "approve",
            Command::Deny => "deny",
        }
    }

    /// Looks up a command by exact name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Argument synopsis, empty for commands without arguments.
    pub fn usage(self) -> &'static str {
        match self {
            Command::Save => "<name> <text>",
            Command::Approve | Command::Deny => "<request id>",
            _ => "",
        }
    }

    /// One-line description.
    pub fn description(self) -> &'static str {
        match self {
            Command::Start => "Start the bot",
            Command::Help => "Show available commands",
            Command::GitStatus => "Show repository sync status",
            Command::MyFolder => "Show (and create) your notes folder",
            Command::Save => "Save text under an explicit file name",
            Command::Request => "Ask an admin for write access",
            Command::Pending => "List open access requests (admin)",
            Command::Approve => "Approve an access request (admin)",
            Command::Deny => "Reject an access request (admin)",
        }
    }

    /// Whether only admins may run the command.
    pub fn admin_only(self) -> bool {
        matches!(self, Command::Pending | Command::Approve | Command::Deny)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.usage().is_empty() {
            write!(f, "/{}", self.name())
        } else {
            write!(f, "/{} {}", self.name(), self.usage())
        }
    }
}

/// What the bot should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    ShowHelp,
    ShowStatus,
    ShowFolder,
    /// Save text as a note, optionally under an explicit name.
    SaveNote {
        name: Option<String>,
        content: String,
    },
    RequestAccess,
    ListPending,
    AdminDecision {
        request_id: u64,
        decision: Decision,
    },
    /// A known command with missing or malformed arguments.
    Usage(Command),
    /// A `/token` that is not one of ours.
    Unknown(String),
}

/// Routes message text to an [`Action`].
///
/// `bot_username` allows the `/command@botname` form used in group chats;
/// commands addressed to a different bot are treated as unknown.
pub fn route(text: &str, bot_username: Option<&str>) -> Action {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('/') {
        return Action::SaveNote {
            name: None,
            content: text.to_string(),
        };
    }

    let (token, rest) = match trimmed.find(char::is_whitespace) {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };

    let name = match token[1..].split_once('@') {
        Some((name, target)) => {
            let ours = bot_username
                .map(|me| me.eq_ignore_ascii_case(target))
                .unwrap_or(false);
            if !ours {
                return Action::Unknown(token.to_string());
            }
            name
        }
        None => &token[1..],
    };

    match Command::from_name(name) {
        Some(command) => command_action(command, rest),
        None => Action::Unknown(token.to_string()),
    }
}

fn command_action(command: Command, rest: &str) -> Action {
    match command {
        Command::Start => Action::Start,
        Command::Help => Action::ShowHelp,
        Command::GitStatus => Action::ShowStatus,
        Command::MyFolder => Action::ShowFolder,
        Command::Request => Action::RequestAccess,
        Command::Pending => Action::ListPending,
        Command::Save => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                return Action::Usage(Command::Save);
            }
            let (name, content) = match rest.find(char::is_whitespace) {
                Some(idx) => (&rest[..idx], rest[idx..].trim_start()),
                None => (rest, ""),
            };
            Action::SaveNote {
                name: Some(name.to_string()),
                content: content.to_string(),
            }
        }
        Command::Approve => decision_action(command, rest, Decision::Approve),
        Command::Deny => decision_action(command, rest, Decision::Reject),
    }
}

fn decision_action(command: Command, rest: &str, decision: Decision) -> Action {
    let arg = rest.trim();
    let arg = arg.strip_prefix('#').unwrap_or(arg);
    match arg.parse::<u64>() {
        Ok(request_id) => Action::AdminDecision {
            request_id,
            decision,
        },
        Err(_) => Action::Usage(command),
    }
}

/// Help text listing the commands visible to this user.
pub fn help_text(is_admin: bool) -> String {
    let mut lines = vec!["Available commands:".to_string()];
    for command in Command::ALL {
        if command.admin_only() && !is_admin {
            continue;
        }
        lines.push(format!("{} - {}", command, command.description()));
    }
    lines.push(String::new());
    lines.push("Any other text is saved as a new note in your folder.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_note() {
        assert_eq!(
            route("buy milk", None),
            Action::SaveNote {
                name: None,
                content: "buy milk".to_string()
            }
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(route("/start", None), Action::Start);
        assert_eq!(route("/help", None), Action::ShowHelp);
        assert_eq!(route("/gitstatus", None), Action::ShowStatus);
        assert_eq!(route("/myfolder", None), Action::ShowFolder);
        assert_eq!(route("/request", None), Action::RequestAccess);
        assert_eq!(route("/pending", None), Action::ListPending);
    }

    #[test]
    fn test_commands_are_case_sensitive() {
        assert_eq!(route("/Help", None), Action::Unknown("/Help".to_string()));
        assert_eq!(
            route("/GITSTATUS now", None),
            Action::Unknown("/GITSTATUS".to_string())
        );
    }

    #[test]
    fn test_prefix_is_not_enough() {
        assert_eq!(
            route("/helpme", None),
            Action::Unknown("/helpme".to_string())
        );
    }

    #[test]
    fn test_save_with_name_and_content() {
        assert_eq!(
            route("/save shopping.txt buy milk\nand eggs", None),
            Action::SaveNote {
                name: Some("shopping.txt".to_string()),
                content: "buy milk\nand eggs".to_string()
            }
        );
    }

    #[test]
    fn test_save_content_on_next_line() {
        assert_eq!(
            route("/save todo\n- call mom", None),
            Action::SaveNote {
                name: Some("todo".to_string()),
                content: "- call mom".to_string()
            }
        );
    }

    #[test]
    fn test_save_name_only_keeps_empty_content() {
        assert_eq!(
            route("/save filename.txt", None),
            Action::SaveNote {
                name: Some("filename.txt".to_string()),
                content: String::new()
            }
        );
    }

    #[test]
    fn test_save_without_name_is_usage() {
        assert_eq!(route("/save", None), Action::Usage(Command::Save));
        assert_eq!(route("/save   ", None), Action::Usage(Command::Save));
    }

    #[test]
    fn test_admin_decisions() {
        assert_eq!(
            route("/approve 12", None),
            Action::AdminDecision {
                request_id: 12,
                decision: Decision::Approve
            }
        );
        assert_eq!(
            route("/deny #3", None),
            Action::AdminDecision {
                request_id: 3,
                decision: Decision::Reject
            }
        );
        assert_eq!(route("/approve", None), Action::Usage(Command::Approve));
        assert_eq!(route("/deny bob", None), Action::Usage(Command::Deny));
    }

    #[test]
    fn test_bot_mention_suffix() {
        assert_eq!(route("/help@GitNoteBot", Some("gitnotebot")), Action::ShowHelp);
        assert_eq!(
            route("/help@OtherBot", Some("gitnotebot")),
            Action::Unknown("/help@OtherBot".to_string())
        );
        assert_eq!(
            route("/help@GitNoteBot", None),
            Action::Unknown("/help@GitNoteBot".to_string())
        );
    }

    #[test]
    fn test_leading_whitespace_before_command() {
        assert_eq!(route("  /start", None), Action::Start);
    }

    #[test]
    fn test_bare_slash_is_unknown() {
        assert_eq!(route("/", None), Action::Unknown("/".to_string()));
    }

    #[test]
    fn test_every_command_routes_by_name() {
        for command in Command::ALL {
            let action = route(&format!("/{}", command.name()), None);
            assert!(
                !matches!(action, Action::Unknown(_)),
                "{} did not route",
                command.name()
            );
        }
    }

    #[test]
    fn test_help_hides_admin_commands() {
        let user_help = help_text(false);
        assert!(user_help.contains("/save <name> <text>"));
        assert!(!user_help.contains("/approve"));

        let admin_help = help_text(true);
        assert!(admin_help.contains("/approve <request id>"));
        assert!(admin_help.contains("/pending"));
    }
}
