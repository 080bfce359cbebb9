//! Command types and definitions.

use std::fmt;

use crate::store::ProfileId;

/// Arguments for adding destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    pub profile: ProfileId,
    pub references: Vec<String>,
}

/// Arguments for removing a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveArgs {
    pub profile: ProfileId,
    pub reference: String,
}

/// Arguments for commands that replace a text setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextArgs {
    pub profile: ProfileId,
    pub text: String,
}

/// Arguments for on/off commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleArgs {
    pub profile: ProfileId,
    pub enabled: bool,
}

/// Arguments for commands that set a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberArgs {
    pub profile: ProfileId,
    pub value: u64,
}

/// Available operator commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// List all profiles.
    Profiles,

    /// Show the settings of a profile.
    Info(ProfileId),

    /// Show scheduler status of one or every profile.
    Status(Option<ProfileId>),

    /// List the destinations of a profile.
    Groups(ProfileId),

    /// Add destinations to a profile.
    Add(AddArgs),

    /// Remove a destination from a profile.
    Remove(RemoveArgs),

    /// Leave every group the account was banned or muted in.
    LeaveBlocked(ProfileId),

    /// Turn broadcasting on or off.
    Broadcast(ToggleArgs),

    /// Set the broadcast text.
    Text(TextArgs),

    /// Set the messages-per-minute limit.
    Rate(NumberArgs),

    /// Set the pause between cycles in seconds.
    Interval(NumberArgs),

    /// Turn private auto-replies on or off.
    AutoReply(ToggleArgs),

    /// Set the private auto-reply text.
    AutoReplyText(TextArgs),

    /// Turn mention replies on or off.
    Mention(ToggleArgs),

    /// Set the mention reply text.
    MentionText(TextArgs),

    /// Start a cycle now.
    Run(ProfileId),

    /// Delete a profile and its destinations.
    Delete(ProfileId),

    /// Show help information.
    Help,

    /// Show information about the broadcaster.
    About,

    /// Stop the broadcaster.
    Quit,
}

impl OperatorCommand {
    /// Parses a command from a console line.
    ///
    /// Returns `None` if the line is not a valid command.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();

        let (cmd, args) = match text.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd.to_lowercase(), args.trim()),
            None => (text.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "profiles" | "accounts" | "ls" => Some(Self::Profiles),
            "info" | "profile" => parse_profile(args).map(Self::Info),
            "status" | "stat" | "s" => {
                if args.is_empty() {
                    Some(Self::Status(None))
                } else {
                    parse_profile(args).map(|id| Self::Status(Some(id)))
                }
            }
            "groups" | "destinations" | "list" => parse_profile(args).map(Self::Groups),
            "add" => Self::parse_add(args),
            "remove" | "rm" | "del" => Self::parse_remove(args),
            "leave-blocked" | "leaveblocked" => parse_profile(args).map(Self::LeaveBlocked),
            "broadcast" | "bc" => parse_toggle(args).map(Self::Broadcast),
            "text" | "message" => parse_text(args).map(Self::Text),
            "rate" | "mpm" => parse_number(args).map(Self::Rate),
            "interval" => parse_number(args).map(Self::Interval),
            "autoreply" => parse_toggle(args).map(Self::AutoReply),
            "autoreply-text" => parse_text(args).map(Self::AutoReplyText),
            "mention" => parse_toggle(args).map(Self::Mention),
            "mention-text" => parse_text(args).map(Self::MentionText),
            "run" | "now" => parse_profile(args).map(Self::Run),
            "delete" | "delete-profile" => parse_profile(args).map(Self::Delete),
            "help" | "h" | "?" => Some(Self::Help),
            "about" | "version" => Some(Self::About),
            "quit" | "exit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }

    /// Parses add command arguments: `<id> <ref> [ref...]`
    fn parse_add(args: &str) -> Option<Self> {
        let mut parts = args.split_whitespace();
        let profile = parts.next()?.parse().ok()?;
        let references: Vec<String> = parts.map(str::to_owned).collect();

        if references.is_empty() {
            return None;
        }

        Some(Self::Add(AddArgs {
            profile,
            references,
        }))
    }

    /// Parses remove command arguments: `<id> <ref>`
    fn parse_remove(args: &str) -> Option<Self> {
        let mut parts = args.split_whitespace();
        let profile = parts.next()?.parse().ok()?;
        let reference = parts.next()?.to_owned();

        if parts.next().is_some() {
            return None;
        }

        Some(Self::Remove(RemoveArgs { profile, reference }))
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Info(_) => "info",
            Self::Status(_) => "status",
            Self::Groups(_) => "groups",
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::LeaveBlocked(_) => "leave-blocked",
            Self::Broadcast(_) => "broadcast",
            Self::Text(_) => "text",
            Self::Rate(_) => "rate",
            Self::Interval(_) => "interval",
            Self::AutoReply(_) => "autoreply",
            Self::AutoReplyText(_) => "autoreply-text",
            Self::Mention(_) => "mention",
            Self::MentionText(_) => "mention-text",
            Self::Run(_) => "run",
            Self::Delete(_) => "delete",
            Self::Help => "help",
            Self::About => "about",
            Self::Quit => "quit",
        }
    }

    /// Returns all available commands with their aliases and descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("profiles", "(ls)", "List all profiles"),
            ("info <id>", "", "Show profile settings"),
            ("status [id]", "(s)", "Show broadcast status"),
            ("groups <id>", "(list)", "List destinations"),
            ("add <id> <link> [link...]", "", "Add destinations"),
            ("remove <id> <link>", "(rm)", "Remove a destination"),
            ("leave-blocked <id>", "", "Leave and remove groups the account cannot post to"),
            ("broadcast <id> on|off", "(bc)", "Turn broadcasting on or off"),
            ("text <id> <text>", "", "Set the broadcast text"),
            ("rate <id> <n>", "", "Set messages per minute"),
            ("interval <id> <sec>", "", "Set seconds between cycles"),
            ("autoreply <id> on|off", "", "Turn private auto-replies on or off"),
            ("autoreply-text <id> <text>", "", "Set the auto-reply text"),
            ("mention <id> on|off", "", "Turn mention replies on or off"),
            ("mention-text <id> <text>", "", "Set the mention reply text"),
            ("run <id>", "(now)", "Start a cycle now"),
            ("delete <id>", "", "Delete a profile"),
            ("about", "", "Show version information"),
            ("help", "(h, ?)", "Show this help message"),
            ("quit", "(q)", "Stop the broadcaster"),
        ]
    }
}

fn parse_profile(args: &str) -> Option<ProfileId> {
    let mut parts = args.split_whitespace();
    let profile = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(profile)
}

/// Parses `<id> on|off`.
fn parse_toggle(args: &str) -> Option<ToggleArgs> {
    let (profile, value) = args.split_once(char::is_whitespace)?;
    let enabled = match value.trim().to_lowercase().as_str() {
        "on" | "yes" | "true" | "1" | "enable" => true,
        "off" | "no" | "false" | "0" | "disable" => false,
        _ => return None,
    };
    Some(ToggleArgs {
        profile: profile.parse().ok()?,
        enabled,
    })
}

/// Parses `<id> <text>`, keeping the text as written.
fn parse_text(args: &str) -> Option<TextArgs> {
    let (profile, text) = args.split_once(char::is_whitespace)?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(TextArgs {
        profile: profile.parse().ok()?,
        text: text.to_owned(),
    })
}

/// Parses `<id> <number>`.
fn parse_number(args: &str) -> Option<NumberArgs> {
    let mut parts = args.split_whitespace();
    let profile = parts.next()?.parse().ok()?;
    let value = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(NumberArgs { profile, value })
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |enabled: bool| if enabled { "on" } else { "off" };
        match self {
            Self::Info(id)
            | Self::Groups(id)
            | Self::LeaveBlocked(id)
            | Self::Run(id)
            | Self::Delete(id) => {
                write!(f, "{} {id}", self.name())
            }
            Self::Status(Some(id)) => write!(f, "status {id}"),
            Self::Add(args) => write!(f, "add {} {}", args.profile, args.references.join(" ")),
            Self::Remove(args) => write!(f, "remove {} {}", args.profile, args.reference),
            Self::Broadcast(args) | Self::AutoReply(args) | Self::Mention(args) => {
                write!(f, "{} {} {}", self.name(), args.profile, on_off(args.enabled))
            }
            Self::Text(args) | Self::AutoReplyText(args) | Self::MentionText(args) => {
                write!(f, "{} {} {}", self.name(), args.profile, args.text)
            }
            Self::Rate(args) | Self::Interval(args) => {
                write!(f, "{} {} {}", self.name(), args.profile, args.value)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the operator.
    pub message: String,

    /// Profile whose cycle should start right away.
    pub trigger_cycle: Option<ProfileId>,

    /// Whether the broadcaster should stop.
    pub quit: bool,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            trigger_cycle: None,
            quit: false,
        }
    }

    /// Creates a successful result that starts a cycle.
    #[must_use]
    pub fn success_with_trigger(message: impl Into<String>, profile: ProfileId) -> Self {
        Self {
            trigger_cycle: Some(profile),
            ..Self::success(message)
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            trigger_cycle: None,
            quit: false,
        }
    }

    /// Creates the result of the quit command.
    #[must_use]
    pub fn quit(message: impl Into<String>) -> Self {
        Self {
            quit: true,
            ..Self::success(message)
        }
    }
}
