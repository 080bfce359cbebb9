//! Command handler implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{AddArgs, CommandResult, NumberArgs, OperatorCommand, RemoveArgs, TextArgs, ToggleArgs};
use crate::resolver::{DestinationResolver, normalize_reference};
use crate::scheduler::{BroadcastScheduler, ProfileStatus};
use crate::store::{
    Profile, ProfileId, RemoveOutcome, SettingUpdate, SettingsStore, StoreError,
};
use crate::telegram::{MessagingSession, mask_phone, truncate_for_log};

/// Handles operator commands against the store and the scheduler.
pub struct CommandHandler {
    store: Arc<SettingsStore>,

    resolver: Arc<DestinationResolver>,

    scheduler: Arc<BroadcastScheduler>,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        store: Arc<SettingsStore>,
        resolver: Arc<DestinationResolver>,
        scheduler: Arc<BroadcastScheduler>,
    ) -> Self {
        Self {
            store,
            resolver,
            scheduler,
        }
    }

    /// Tries to parse and execute a console line.
    ///
    /// Returns `None` if the line is not a command.
    pub async fn try_handle(&self, line: &str) -> Option<CommandResult> {
        let command = OperatorCommand::parse(line)?;

        debug!("Handling command: {}", command);
        let result = self.execute(command).await;
        info!(
            "Command result: success={}, trigger_cycle={:?}",
            result.success, result.trigger_cycle
        );

        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(&self, command: OperatorCommand) -> CommandResult {
        match command {
            OperatorCommand::Profiles => self.handle_profiles(),
            OperatorCommand::Info(id) => self.handle_info(id),
            OperatorCommand::Status(id) => self.handle_status(id),
            OperatorCommand::Groups(id) => self.handle_groups(id),
            OperatorCommand::Add(args) => self.handle_add(args).await,
            OperatorCommand::Remove(args) => self.handle_remove(args).await,
            OperatorCommand::LeaveBlocked(id) => self.handle_leave_blocked(id).await,
            OperatorCommand::Broadcast(args) => self.handle_broadcast(args),
            OperatorCommand::Text(args) => {
                self.update_text(args, SettingUpdate::BroadcastText, "Broadcast text")
            }
            OperatorCommand::Rate(args) => self.handle_rate(args),
            OperatorCommand::Interval(args) => self.handle_interval(args),
            OperatorCommand::AutoReply(args) => {
                self.update_toggle(args, SettingUpdate::AutoReplyEnabled, "Auto-reply")
            }
            OperatorCommand::AutoReplyText(args) => {
                self.update_text(args, SettingUpdate::AutoReplyText, "Auto-reply text")
            }
            OperatorCommand::Mention(args) => {
                self.update_toggle(args, SettingUpdate::MentionReplyEnabled, "Mention reply")
            }
            OperatorCommand::MentionText(args) => {
                self.update_text(args, SettingUpdate::MentionReplyText, "Mention reply text")
            }
            OperatorCommand::Run(id) => self.handle_run(id),
            OperatorCommand::Delete(id) => self.handle_delete(id),
            OperatorCommand::Help => Self::handle_help(),
            OperatorCommand::About => Self::handle_about(),
            OperatorCommand::Quit => CommandResult::quit("Shutting down..."),
        }
    }

    fn handle_profiles(&self) -> CommandResult {
        let profiles = match self.store.list_profiles() {
            Ok(profiles) => profiles,
            Err(e) => return store_error(&e),
        };

        if profiles.is_empty() {
            return CommandResult::error(
                "No profiles yet. Run 'broadcaster add-profile' to log in an account.",
            );
        }

        let connected = self.scheduler.connected_profiles();
        let mut lines = vec!["Profiles:".to_owned()];
        for profile in &profiles {
            let groups = self.store.count_destinations(profile.id).unwrap_or_default();
            lines.push(format!(
                "  #{} {} | broadcast {} | {} groups | {}",
                profile.id,
                mask_phone(&profile.phone),
                on_off(profile.settings.broadcast_enabled),
                groups,
                if connected.contains(&profile.id) {
                    "connected"
                } else {
                    "offline"
                }
            ));
        }

        CommandResult::success(lines.join("\n"))
    }

    fn handle_info(&self, id: ProfileId) -> CommandResult {
        let profile = match self.load_profile(id) {
            Ok(profile) => profile,
            Err(result) => return result,
        };
        let settings = &profile.settings;
        let groups = self.store.count_destinations(id).unwrap_or_default();

        let message = format!(
            "Profile #{id} ({})\n\
             Created: {}\n\
             Session: {}\n\
             Broadcast: {} every {} at {}/min to {groups} groups\n\
             Text: \"{}\"\n\
             Auto-reply: {} \"{}\"\n\
             Mention reply: {} \"{}\"",
            mask_phone(&profile.phone),
            profile.created_at.format("%Y-%m-%d %H:%M"),
            profile.session_path.display(),
            on_off(settings.broadcast_enabled),
            format_duration(settings.send_interval_secs),
            settings.messages_per_minute,
            truncate_for_log(&settings.broadcast_text, 40),
            on_off(settings.auto_reply_enabled),
            truncate_for_log(&settings.auto_reply_text, 30),
            on_off(settings.mention_reply_enabled),
            truncate_for_log(&settings.mention_reply_text, 30),
        );

        CommandResult::success(message)
    }

    fn handle_status(&self, id: Option<ProfileId>) -> CommandResult {
        let profiles = match id {
            Some(id) => match self.load_profile(id) {
                Ok(profile) => vec![profile],
                Err(result) => return result,
            },
            None => match self.store.list_profiles() {
                Ok(profiles) => profiles,
                Err(e) => return store_error(&e),
            },
        };

        if profiles.is_empty() {
            return CommandResult::error("No profiles configured.");
        }

        let lines: Vec<String> = profiles
            .iter()
            .map(|profile| format_status(profile, &self.scheduler.status(profile.id)))
            .collect();

        CommandResult::success(lines.join("\n"))
    }

    fn handle_groups(&self, id: ProfileId) -> CommandResult {
        if let Err(result) = self.load_profile(id) {
            return result;
        }

        let destinations = match self.store.list_destinations(id) {
            Ok(destinations) => destinations,
            Err(e) => return store_error(&e),
        };

        if destinations.is_empty() {
            return CommandResult::error(format!(
                "Profile #{id} has no destinations. Use 'add {id} <link>' to add some."
            ));
        }

        let mut lines = vec![format!("Destinations of #{id}:")];
        for (i, reference) in destinations.iter().enumerate() {
            lines.push(format!("  {}. {reference}", i + 1));
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_add(&self, args: AddArgs) -> CommandResult {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for reference in &args.references {
            match normalize_reference(reference) {
                Ok(canonical) => valid.push(canonical),
                Err(e) => invalid.push(e.to_string()),
            }
        }

        if valid.is_empty() {
            return CommandResult::error(format!("Nothing added:\n  {}", invalid.join("\n  ")));
        }

        let summary = match self.store.add_destinations(args.profile, &valid) {
            Ok(summary) => summary,
            Err(e) => return store_error(&e),
        };

        if let Some(session) = self.scheduler.session(args.profile) {
            for reference in &valid {
                self.try_join(session.as_ref(), reference).await;
            }
        }

        let mut message = format!(
            "✓ Added {} destinations to #{} ({} already present)",
            summary.added, args.profile, summary.already_present
        );
        if !invalid.is_empty() {
            message.push_str(&format!("\nSkipped:\n  {}", invalid.join("\n  ")));
        }

        CommandResult::success(message)
    }

    /// Joins a freshly added destination. Failures only get logged; the
    /// scheduler deals with destinations it cannot post to.
    async fn try_join(&self, session: &dyn MessagingSession, reference: &str) {
        let profile_id = session.profile_id();
        let joined = match self.resolver.resolve(session, reference).await {
            Ok(entity) => session.join_destination(&entity).await,
            Err(e) => Err(e),
        };
        match joined {
            Ok(()) => debug!("Profile {}: joined {}", profile_id, reference),
            Err(e) => warn!("Profile {}: could not join {}: {}", profile_id, reference, e),
        }
    }

    async fn handle_remove(&self, args: RemoveArgs) -> CommandResult {
        let reference = normalize_reference(&args.reference)
            .unwrap_or_else(|_| args.reference.trim().to_owned());

        match self.store.remove_destination(args.profile, &reference) {
            Ok(RemoveOutcome::Removed) => {}
            Ok(RemoveOutcome::NotFound) => {
                return CommandResult::error(format!(
                    "'{reference}' is not a destination of #{}",
                    args.profile
                ));
            }
            Err(e) => return store_error(&e),
        }

        if let Some(session) = self.scheduler.session(args.profile) {
            let left = match self.resolver.resolve(session.as_ref(), &reference).await {
                Ok(entity) => session.leave_destination(&entity).await,
                Err(e) => Err(e),
            };
            if let Err(e) = left {
                warn!("Profile {}: could not leave {}: {}", args.profile, reference, e);
            }
        }
        self.resolver.invalidate(args.profile, &reference);

        CommandResult::success(format!("✓ Removed {reference} from #{}", args.profile))
    }

    /// Leaves every channel or group the account was banned or muted in and
    /// drops the matching destinations.
    async fn handle_leave_blocked(&self, id: ProfileId) -> CommandResult {
        if let Err(result) = self.load_profile(id) {
            return result;
        }
        let Some(session) = self.scheduler.session(id) else {
            return CommandResult::error(format!("Profile #{id} is not connected."));
        };

        let restricted = match session.list_restricted_memberships().await {
            Ok(restricted) => restricted,
            Err(e) => {
                warn!("Profile {}: failed to list memberships: {}", id, e);
                return CommandResult::error(format!("Could not list groups of #{id}: {e}"));
            }
        };
        if restricted.is_empty() {
            return CommandResult::success(format!("No blocked groups for #{id}"));
        }

        let destinations = match self.store.list_destinations(id) {
            Ok(destinations) => destinations,
            Err(e) => return store_error(&e),
        };

        let mut left = 0;
        let mut removed = 0;
        for entity in &restricted {
            match session.leave_destination(entity).await {
                Ok(()) => {
                    info!("Profile {}: left blocked group {}", id, entity.title);
                    left += 1;
                }
                Err(e) => warn!("Profile {}: could not leave {}: {}", id, entity.title, e),
            }

            let mut references = self.resolver.cached_references(id, entity.id);
            references.push(entity.reference());
            for reference in destinations.iter().filter(|d| references.contains(d)) {
                match self.store.remove_destination(id, reference) {
                    Ok(RemoveOutcome::Removed) => removed += 1,
                    Ok(RemoveOutcome::NotFound) => {}
                    Err(e) => warn!("Profile {}: failed to remove {}: {}", id, reference, e),
                }
                self.resolver.invalidate(id, reference);
            }
        }

        CommandResult::success(format!(
            "✓ Left {left} of {} blocked groups of #{id}, removed {removed} destinations",
            restricted.len()
        ))
    }

    fn handle_broadcast(&self, args: ToggleArgs) -> CommandResult {
        if let Err(e) = self
            .store
            .update_setting(args.profile, &SettingUpdate::BroadcastEnabled(args.enabled))
        {
            return store_error(&e);
        }

        if args.enabled {
            CommandResult::success_with_trigger(
                format!("▶ Broadcast enabled for #{}", args.profile),
                args.profile,
            )
        } else {
            CommandResult::success(format!("⏸ Broadcast disabled for #{}", args.profile))
        }
    }

    fn handle_rate(&self, args: NumberArgs) -> CommandResult {
        let Ok(rate) = u32::try_from(args.value) else {
            return CommandResult::error(format!("Rate {} is too large", args.value));
        };
        match self
            .store
            .update_setting(args.profile, &SettingUpdate::MessagesPerMinute(rate))
        {
            Ok(()) => CommandResult::success(format!(
                "✓ #{} now sends at most {rate} messages per minute",
                args.profile
            )),
            Err(e) => store_error(&e),
        }
    }

    fn handle_interval(&self, args: NumberArgs) -> CommandResult {
        match self
            .store
            .update_setting(args.profile, &SettingUpdate::SendIntervalSecs(args.value))
        {
            Ok(()) => CommandResult::success(format!(
                "✓ #{} now waits {} between cycles",
                args.profile,
                format_duration(args.value)
            )),
            Err(e) => store_error(&e),
        }
    }

    fn update_toggle(
        &self,
        args: ToggleArgs,
        update: fn(bool) -> SettingUpdate,
        label: &str,
    ) -> CommandResult {
        match self.store.update_setting(args.profile, &update(args.enabled)) {
            Ok(()) => CommandResult::success(format!(
                "✓ {label} {} for #{}",
                if args.enabled { "enabled" } else { "disabled" },
                args.profile
            )),
            Err(e) => store_error(&e),
        }
    }

    fn update_text(
        &self,
        args: TextArgs,
        update: fn(String) -> SettingUpdate,
        label: &str,
    ) -> CommandResult {
        let preview = truncate_for_log(&args.text, 30);
        match self.store.update_setting(args.profile, &update(args.text)) {
            Ok(()) => CommandResult::success(format!(
                "✓ {label} of #{} set to \"{preview}\"",
                args.profile
            )),
            Err(e) => store_error(&e),
        }
    }

    fn handle_run(&self, id: ProfileId) -> CommandResult {
        let profile = match self.load_profile(id) {
            Ok(profile) => profile,
            Err(result) => return result,
        };

        if !profile.settings.broadcast_enabled {
            return CommandResult::error(format!(
                "Broadcast is off for #{id}. Use 'broadcast {id} on' first."
            ));
        }
        if self.scheduler.session(id).is_none() {
            return CommandResult::error(format!("Profile #{id} is not connected."));
        }

        let status = self.scheduler.status(id);
        let message = match status.backoff {
            Some(backoff) => format!(
                "Cycle for #{id} queued; rate limited for another {}",
                format_duration(backoff.remaining.as_secs())
            ),
            None => format!("▶ Starting a cycle for #{id}..."),
        };
        CommandResult::success_with_trigger(message, id)
    }

    fn handle_delete(&self, id: ProfileId) -> CommandResult {
        let session_path = match self.load_profile(id) {
            Ok(profile) => profile.session_path,
            Err(result) => return result,
        };

        match self.store.delete_profile(id) {
            Ok(RemoveOutcome::Removed) => {
                self.scheduler.remove_profile(id);
                CommandResult::success(format!(
                    "✓ Deleted profile #{id}. Session file kept at {}",
                    session_path.display()
                ))
            }
            Ok(RemoveOutcome::NotFound) => CommandResult::error(format!("Profile #{id} not found")),
            Err(e) => store_error(&e),
        }
    }

    fn handle_help() -> CommandResult {
        let mut lines = vec!["Broadcaster Commands".to_owned(), String::new()];

        for (cmd, aliases, desc) in OperatorCommand::all_commands() {
            let alias_str = if aliases.is_empty() {
                String::new()
            } else {
                format!(" {aliases}")
            };
            lines.push(format!("  {cmd}{alias_str} - {desc}"));
        }

        CommandResult::success(lines.join("\n"))
    }

    fn handle_about() -> CommandResult {
        let version = env!("CARGO_PKG_VERSION");
        let message = format!(
            "Group Broadcaster v{version}\n\
             Broadcasts messages to Telegram groups from several accounts."
        );
        CommandResult::success(message)
    }

    fn load_profile(&self, id: ProfileId) -> Result<Profile, CommandResult> {
        match self.store.get_profile(id) {
            Ok(Some(profile)) => Ok(profile),
            Ok(None) => Err(CommandResult::error(format!(
                "Profile #{id} not found. Use 'profiles' to list them."
            ))),
            Err(e) => Err(store_error(&e)),
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler").finish_non_exhaustive()
    }
}

fn store_error(error: &StoreError) -> CommandResult {
    match error {
        StoreError::NotFound(id) => CommandResult::error(format!("Profile #{id} not found")),
        StoreError::InvalidValue { .. } => CommandResult::error(error.to_string()),
        _ => {
            warn!("Store error: {}", error);
            CommandResult::error(format!("Storage error: {error}"))
        }
    }
}

fn format_status(profile: &Profile, status: &ProfileStatus) -> String {
    let state = if !status.connected {
        "offline".to_owned()
    } else if status.in_flight {
        "sending".to_owned()
    } else if let Some(backoff) = &status.backoff {
        format!(
            "rate limited ({}s wait since {} UTC), {} left, resumes at {}",
            backoff.wait_secs,
            backoff.since.format("%H:%M:%S"),
            format_remaining(backoff.remaining),
            backoff.resume_at
        )
    } else if !profile.settings.broadcast_enabled {
        "idle (broadcast off)".to_owned()
    } else {
        match status.next_cycle_in {
            Some(wait) if !wait.is_zero() => format!("next cycle in {}", format_remaining(wait)),
            _ => "due".to_owned(),
        }
    };

    let stats = &status.stats;
    let mut line = format!(
        "#{} {}: {state} | sent {} | removed {} | cycles {}",
        profile.id,
        mask_phone(&profile.phone),
        stats.total_sent,
        stats.total_removed,
        stats.cycles
    );
    if let (Some(outcome), Some(at)) = (&stats.last_outcome, stats.last_cycle_at) {
        line.push_str(&format!(
            " | last {} at {}",
            outcome.label(),
            at.format("%H:%M:%S")
        ));
    }
    if let Some(error) = &stats.last_error {
        line.push_str(&format!(" | last error: {}", truncate_for_log(error, 40)));
    }
    line
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn format_remaining(duration: Duration) -> String {
    // Round up so "0s left" never shows while a wait is pending.
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    format_duration(secs)
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::telegram::SessionError;
    use crate::testing::{FakeSession, test_store};

    const G1: &str = "https://t.me/group_one";
    const G2: &str = "https://t.me/group_two";

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SettingsStore>,
        resolver: Arc<DestinationResolver>,
        scheduler: Arc<BroadcastScheduler>,
        handler: CommandHandler,
        profile: ProfileId,
    }

    fn fixture() -> Fixture {
        let (dir, store, profile) = test_store();
        let store = Arc::new(store);
        let resolver = Arc::new(DestinationResolver::new(None));
        let scheduler = Arc::new(BroadcastScheduler::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            &SchedulerConfig::default(),
        ));
        let handler = CommandHandler::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&scheduler),
        );
        Fixture {
            _dir: dir,
            store,
            resolver,
            scheduler,
            handler,
            profile,
        }
    }

    async fn run(fixture: &Fixture, line: &str) -> CommandResult {
        fixture.handler.try_handle(line).await.unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(90), "1m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3660), "1h 1m");
        assert_eq!(format_duration(7200), "2h");
    }

    #[test]
    fn test_format_remaining_rounds_up() {
        assert_eq!(format_remaining(Duration::from_millis(500)), "1s");
        assert_eq!(format_remaining(Duration::from_secs(12)), "12s");
    }

    #[tokio::test]
    async fn test_unknown_line_is_not_a_command() {
        let fixture = fixture();
        assert!(fixture.handler.try_handle("hello there").await.is_none());
    }

    #[tokio::test]
    async fn test_add_normalises_and_deduplicates() {
        let fixture = fixture();
        let p = fixture.profile;

        let result = run(&fixture, &format!("add {p} @Group_One t.me/group_one")).await;
        assert!(result.success);
        assert!(result.message.contains("Added 1"));
        assert!(result.message.contains("1 already present"));

        let result = run(&fixture, &format!("add {p} @group_two bad!link")).await;
        assert!(result.success);
        assert!(result.message.contains("Skipped"));

        assert_eq!(
            fixture.store.list_destinations(p).unwrap(),
            vec![G1.to_owned(), G2.to_owned()]
        );
    }

    #[tokio::test]
    async fn test_add_only_invalid_references_fails() {
        let fixture = fixture();
        let result = run(&fixture, &format!("add {} !!! ???", fixture.profile)).await;
        assert!(!result.success);
        assert_eq!(fixture.store.count_destinations(fixture.profile).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_to_unknown_profile_fails() {
        let fixture = fixture();
        let result = run(&fixture, "add 99 @group_one").await;
        assert!(!result.success);
        assert!(result.message.contains("#99"));
    }

    #[tokio::test]
    async fn test_add_joins_when_connected() {
        let fixture = fixture();
        let session = Arc::new(
            FakeSession::new(fixture.profile)
                .with_destination(G1)
                .with_destination(G2)
                .fail_join(G2, SessionError::Banned),
        );
        fixture.scheduler.register_session(session.clone());

        let result = run(&fixture, &format!("add {} {G1} {G2}", fixture.profile)).await;

        assert!(result.success);
        assert_eq!(session.joined(), vec![G1.to_owned()]);
        assert_eq!(fixture.store.count_destinations(fixture.profile).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_leaves_and_invalidates_cache() {
        let fixture = fixture();
        let p = fixture.profile;
        fixture.store.add_destination(p, G1).unwrap();
        let session = Arc::new(FakeSession::new(p).with_destination(G1));
        fixture.scheduler.register_session(session.clone());
        fixture.resolver.resolve(session.as_ref(), G1).await.unwrap();
        assert_eq!(fixture.resolver.len(), 1);

        let result = run(&fixture, &format!("remove {p} @group_one")).await;

        assert!(result.success);
        assert!(fixture.store.list_destinations(p).unwrap().is_empty());
        assert_eq!(session.left(), vec![G1.to_owned()]);
        assert!(fixture.resolver.is_empty());

        let again = run(&fixture, &format!("remove {p} @group_one")).await;
        assert!(!again.success);
    }

    #[tokio::test]
    async fn test_leave_blocked_drops_restricted_destinations() {
        // The first fake destination gets provider id 1001.
        const BY_ID: &str = "https://t.me/c/1001";
        const INVITE: &str = "https://t.me/+AbCdEf12";
        let fixture = fixture();
        let p = fixture.profile;
        fixture.store.add_destinations(p, &[BY_ID, G2, INVITE]).unwrap();
        let session = Arc::new(
            FakeSession::new(p)
                .with_destination(BY_ID)
                .with_destination(G2)
                .with_destination(INVITE)
                .with_restricted(&[BY_ID, INVITE]),
        );
        fixture.scheduler.register_session(session.clone());
        fixture.resolver.resolve(session.as_ref(), INVITE).await.unwrap();

        let result = run(&fixture, &format!("leave-blocked {p}")).await;

        assert!(result.success);
        assert!(result.message.contains("Left 2 of 2"));
        assert!(result.message.contains("removed 2"));
        assert_eq!(session.left(), vec![BY_ID.to_owned(), INVITE.to_owned()]);
        assert_eq!(fixture.store.list_destinations(p).unwrap(), vec![G2.to_owned()]);
        assert!(fixture.resolver.is_empty());

        let again = run(&fixture, &format!("leave-blocked {p}")).await;
        assert!(again.success);
        assert!(again.message.contains("removed 0"));
    }

    #[tokio::test]
    async fn test_leave_blocked_requires_connection() {
        let fixture = fixture();
        let result = run(&fixture, &format!("leave-blocked {}", fixture.profile)).await;
        assert!(!result.success);
        assert!(result.message.contains("not connected"));
        assert!(!run(&fixture, "leave-blocked 42").await.success);
    }

    #[tokio::test]
    async fn test_broadcast_on_triggers_cycle() {
        let fixture = fixture();
        let p = fixture.profile;

        let on = run(&fixture, &format!("broadcast {p} on")).await;
        assert!(on.success);
        assert_eq!(on.trigger_cycle, Some(p));
        assert!(fixture.store.get_settings(p).unwrap().broadcast_enabled);

        let off = run(&fixture, &format!("bc {p} off")).await;
        assert!(off.success);
        assert_eq!(off.trigger_cycle, None);
        assert!(!fixture.store.get_settings(p).unwrap().broadcast_enabled);
    }

    #[tokio::test]
    async fn test_setting_commands_update_store() {
        let fixture = fixture();
        let p = fixture.profile;

        assert!(run(&fixture, &format!("text {p} Buy now")).await.success);
        assert!(run(&fixture, &format!("rate {p} 12")).await.success);
        assert!(run(&fixture, &format!("interval {p} 300")).await.success);
        assert!(run(&fixture, &format!("autoreply {p} off")).await.success);
        assert!(run(&fixture, &format!("mention {p} on")).await.success);
        assert!(run(&fixture, &format!("mention-text {p} Ping me later")).await.success);

        let settings = fixture.store.get_settings(p).unwrap();
        assert_eq!(settings.broadcast_text, "Buy now");
        assert_eq!(settings.messages_per_minute, 12);
        assert_eq!(settings.send_interval_secs, 300);
        assert!(!settings.auto_reply_enabled);
        assert!(settings.mention_reply_enabled);
        assert_eq!(settings.mention_reply_text, "Ping me later");
    }

    #[tokio::test]
    async fn test_zero_rate_is_rejected() {
        let fixture = fixture();
        let p = fixture.profile;

        let result = run(&fixture, &format!("rate {p} 0")).await;

        assert!(!result.success);
        assert!(result.message.contains("messages_per_minute"));
        assert_eq!(fixture.store.get_settings(p).unwrap().messages_per_minute, 30);
    }

    #[tokio::test]
    async fn test_oversized_interval_is_rejected() {
        let fixture = fixture();
        let p = fixture.profile;

        let result = run(&fixture, &format!("interval {p} 9223372036854775807")).await;

        assert!(!result.success);
        assert!(result.message.contains("one week"));
        assert_eq!(fixture.store.get_settings(p).unwrap().send_interval_secs, 60);
        assert!(run(&fixture, &format!("interval {p} 604800")).await.success);
    }

    #[tokio::test]
    async fn test_run_requires_enabled_and_connected() {
        let fixture = fixture();
        let p = fixture.profile;

        assert!(!run(&fixture, &format!("run {p}")).await.success);

        fixture
            .store
            .update_setting(p, &SettingUpdate::BroadcastEnabled(true))
            .unwrap();
        assert!(!run(&fixture, &format!("run {p}")).await.success);

        fixture
            .scheduler
            .register_session(Arc::new(FakeSession::new(p)));
        let result = run(&fixture, &format!("now {p}")).await;
        assert!(result.success);
        assert_eq!(result.trigger_cycle, Some(p));
    }

    #[tokio::test]
    async fn test_delete_profile_disconnects() {
        let fixture = fixture();
        let p = fixture.profile;
        fixture.store.add_destination(p, G1).unwrap();
        let session = Arc::new(FakeSession::new(p));
        fixture.scheduler.register_session(session.clone());

        let result = run(&fixture, &format!("delete {p}")).await;

        assert!(result.success);
        assert!(fixture.store.get_profile(p).unwrap().is_none());
        assert!(session.is_disconnected());
        assert!(!run(&fixture, &format!("delete {p}")).await.success);
    }

    #[tokio::test]
    async fn test_listing_commands() {
        let fixture = fixture();
        let p = fixture.profile;
        fixture.store.add_destination(p, G1).unwrap();

        let profiles = run(&fixture, "profiles").await;
        assert!(profiles.success);
        assert!(profiles.message.contains(&format!("#{p}")));
        assert!(profiles.message.contains("offline"));

        let groups = run(&fixture, &format!("groups {p}")).await;
        assert!(groups.message.contains(G1));

        let status = run(&fixture, "status").await;
        assert!(status.success);
        assert!(status.message.contains("offline"));

        let info = run(&fixture, &format!("info {p}")).await;
        assert!(info.success);
        assert!(info.message.contains("Broadcast: off"));

        assert!(!run(&fixture, "info 42").await.success);
    }

    #[tokio::test]
    async fn test_help_and_quit() {
        let fixture = fixture();

        let help = run(&fixture, "help").await;
        assert!(help.success);
        assert!(help.message.contains("broadcast <id> on|off"));

        let quit = run(&fixture, "quit").await;
        assert!(quit.quit);
    }
}
