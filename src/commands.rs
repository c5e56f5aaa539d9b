//! Chat command parsing.
//!
//! Messages whose first token starts with `!` are commands. Parsing is
//! pure; dispatch lives in the session manager.

use regex::Regex;
use std::sync::OnceLock;

/// A parsed `!command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!stop` / `!cancel`
    Stop,
    /// `!escape` / `!interrupt`
    Escape,
    Help,
    Invite(String),
    Kick(String),
    PermissionsInteractive,
    /// `!permissions auto`: always refused; permissions cannot be
    /// upgraded from chat.
    PermissionsAuto,
    Cd(String),
    Worktree(WorktreeCommand),
    Update,
    ReleaseNotes,
    Plugin(PluginCommand),
    /// A known or dynamically announced slash command, relayed to the
    /// assistant as `/name args`.
    Slash { name: String, args: String },
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeCommand {
    List,
    Switch(String),
    Remove(String),
    Cleanup,
    Off,
    /// `!worktree <branch>` with no subcommand keyword.
    Create(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCommand {
    List,
    Install(String),
    Uninstall(String),
}

/// Parse a message into a command. `known_slash` and `dynamic` list the
/// slash commands relayable to the assistant. Returns None for ordinary
/// messages and unknown commands (the latter are the caller's to log).
pub fn parse(text: &str, known_slash: &[String], dynamic: &[String]) -> Option<Command> {
    let trimmed = text.trim();
    let mut tokens = trimmed.split_whitespace();
    let first = tokens.next()?;
    let name = first.strip_prefix('!')?.to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    let rest = trimmed[first.len()..].trim();

    let command = match name.as_str() {
        "stop" | "cancel" => Command::Stop,
        "escape" | "interrupt" => Command::Escape,
        "help" => Command::Help,
        "invite" => Command::Invite(username_arg(rest)?),
        "kick" => Command::Kick(username_arg(rest)?),
        "permissions" => match rest.to_ascii_lowercase().as_str() {
            "interactive" => Command::PermissionsInteractive,
            "auto" => Command::PermissionsAuto,
            _ => return None,
        },
        "cd" => {
            if rest.is_empty() {
                return None;
            }
            Command::Cd(rest.to_string())
        }
        "worktree" => Command::Worktree(parse_worktree(rest)?),
        "update" => Command::Update,
        "release-notes" | "changelog" => Command::ReleaseNotes,
        "plugin" => Command::Plugin(parse_plugin(rest)?),
        "kill" => Command::Kill,
        other if known_slash.iter().any(|c| c == other) || dynamic.iter().any(|c| c == other) => {
            Command::Slash {
                name: other.to_string(),
                args: rest.to_string(),
            }
        }
        _ => return None,
    };
    Some(command)
}

/// Subcommand keywords win over bare branch names, so
/// `!worktree switch X` can never create a worktree named "switch".
fn parse_worktree(rest: &str) -> Option<WorktreeCommand> {
    let mut tokens = rest.split_whitespace();
    let sub = tokens.next()?;
    let arg = tokens.next();
    Some(match sub.to_ascii_lowercase().as_str() {
        "list" => WorktreeCommand::List,
        "switch" => WorktreeCommand::Switch(arg?.to_string()),
        "remove" => WorktreeCommand::Remove(arg?.to_string()),
        "cleanup" => WorktreeCommand::Cleanup,
        "off" => WorktreeCommand::Off,
        branch => WorktreeCommand::Create(branch.to_string()),
    })
}

fn parse_plugin(rest: &str) -> Option<PluginCommand> {
    let mut tokens = rest.split_whitespace();
    Some(match tokens.next()?.to_ascii_lowercase().as_str() {
        "list" => PluginCommand::List,
        "install" => PluginCommand::Install(tokens.next()?.to_string()),
        "uninstall" => PluginCommand::Uninstall(tokens.next()?.to_string()),
        _ => return None,
    })
}

fn username_arg(rest: &str) -> Option<String> {
    let user = rest.split_whitespace().next()?;
    let user = user.trim_start_matches('@');
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

/// A leading `on branch <name>` clause in a session-start prompt: the
/// session begins in a worktree for that branch.
pub fn parse_branch_prefix(prompt: &str) -> Option<(String, String)> {
    static BRANCH: OnceLock<Regex> = OnceLock::new();
    let regex = BRANCH.get_or_init(|| {
        Regex::new(r"(?i)^on\s+branch\s+([A-Za-z0-9._/\-]+)\s*(.*)$").unwrap()
    });
    let captures = regex.captures(prompt.trim())?;
    let branch = captures.get(1)?.as_str().to_string();
    let rest = captures.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
    Some((branch, rest))
}

/// Help text posted by `!help`.
pub fn help_text() -> &'static str {
    "Available commands:\n\
     - `!stop` / `!cancel` — cancel this session\n\
     - `!escape` / `!interrupt` — interrupt the current turn\n\
     - `!invite @user` / `!kick @user` — manage who may use this session\n\
     - `!permissions interactive` — require interactive approval for actions\n\
     - `!cd <path>` — change the working directory\n\
     - `!worktree list|switch <branch>|remove <branch>|cleanup|off`\n\
     - `!update` — show update status\n\
     - `!release-notes` — show release notes\n\
     - `!plugin list|install <name>|uninstall <name>`\n\
     - `!kill` — terminate every active session (admins only)\n\
     Known slash commands are relayed to the assistant (e.g. `!context`)."
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_branch_prefix, Command, PluginCommand, WorktreeCommand};

    fn known() -> Vec<String> {
        vec!["context".into(), "cost".into(), "compact".into()]
    }

    #[test]
    fn lifecycle_commands_parse() {
        assert_eq!(parse("!stop", &known(), &[]), Some(Command::Stop));
        assert_eq!(parse("!cancel", &known(), &[]), Some(Command::Stop));
        assert_eq!(parse("!escape", &known(), &[]), Some(Command::Escape));
        assert_eq!(parse("!kill", &known(), &[]), Some(Command::Kill));
    }

    #[test]
    fn worktree_switch_is_never_a_create() {
        assert_eq!(
            parse("!worktree switch feature-branch", &known(), &[]),
            Some(Command::Worktree(WorktreeCommand::Switch(
                "feature-branch".into()
            )))
        );
        assert_eq!(
            parse("!worktree feature-branch", &known(), &[]),
            Some(Command::Worktree(WorktreeCommand::Create(
                "feature-branch".into()
            )))
        );
    }

    #[test]
    fn permissions_auto_is_recognized() {
        assert_eq!(
            parse("!permissions auto", &known(), &[]),
            Some(Command::PermissionsAuto)
        );
        assert_eq!(
            parse("!permissions interactive", &known(), &[]),
            Some(Command::PermissionsInteractive)
        );
    }

    #[test]
    fn invite_strips_the_mention_sigil() {
        assert_eq!(
            parse("!invite @carol", &known(), &[]),
            Some(Command::Invite("carol".into()))
        );
    }

    #[test]
    fn known_and_dynamic_slash_commands_relay() {
        assert_eq!(
            parse("!context", &known(), &[]),
            Some(Command::Slash {
                name: "context".into(),
                args: String::new()
            })
        );
        assert_eq!(parse("!review src/", &known(), &[]), None);
        assert_eq!(
            parse("!review src/", &known(), &["review".to_string()]),
            Some(Command::Slash {
                name: "review".into(),
                args: "src/".into()
            })
        );
    }

    #[test]
    fn plugin_subcommands_parse() {
        assert_eq!(
            parse("!plugin install fancy", &known(), &[]),
            Some(Command::Plugin(PluginCommand::Install("fancy".into())))
        );
        assert_eq!(
            parse("!plugin list", &known(), &[]),
            Some(Command::Plugin(PluginCommand::List))
        );
    }

    #[test]
    fn ordinary_messages_are_not_commands() {
        assert_eq!(parse("hello there", &known(), &[]), None);
        assert_eq!(parse("!unknowncmd", &known(), &[]), None);
    }

    #[test]
    fn branch_prefix_splits_prompt() {
        let (branch, rest) = parse_branch_prefix("on branch feature-x help me").unwrap();
        assert_eq!(branch, "feature-x");
        assert_eq!(rest, "help me");
        assert!(parse_branch_prefix("help me on branch feature-x").is_none());
    }
}
