use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{ParticipantStatus, ScheduleId, UserId},
    protocol::{now_millis, Participant, SchedulePatch},
};
use storage::{BackingStore, Storage};
use tracing_subscriber::EnvFilter;
use triggers::{on_participants_changed, WatcherOptions};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/schedules.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateSchedule {
        schedule_id: String,
        #[arg(long)]
        no_chat: bool,
    },
    ListSchedules,
    /// Sets (or with `--remove`, drops) one participant's RSVP and runs the
    /// RSVP watcher on the change.
    SetRsvp {
        schedule_id: String,
        user_id: String,
        #[arg(long, default_value = "")]
        user_name: String,
        #[arg(long, default_value = "going")]
        status: ParticipantStatus,
        #[arg(long)]
        remove: bool,
        #[arg(long)]
        announce_removals: bool,
    },
    ListMessages {
        schedule_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;

    match cli.command {
        Command::CreateSchedule {
            schedule_id,
            no_chat,
        } => {
            let record = storage
                .create_schedule(&ScheduleId::new(schedule_id), !no_chat)
                .await?;
            println!(
                "schedule {} (chat {}) revision={}",
                record.id,
                if record.has_chat { "on" } else { "off" },
                record.revision
            );
        }
        Command::ListSchedules => {
            for schedule_id in storage.list_schedule_ids().await? {
                println!("{schedule_id}");
            }
        }
        Command::SetRsvp {
            schedule_id,
            user_id,
            user_name,
            status,
            remove,
            announce_removals,
        } => {
            let schedule_id = ScheduleId::new(schedule_id);
            let user_id = UserId::new(user_id);
            let record = storage.get(&schedule_id).await?;
            let before = record.participants;

            let mut after: Vec<Participant> = before
                .iter()
                .filter(|participant| participant.user_id != user_id)
                .cloned()
                .collect();
            if !remove {
                let user_name = if user_name.trim().is_empty() {
                    user_id.to_string()
                } else {
                    user_name
                };
                after.push(Participant {
                    user_id: user_id.clone(),
                    user_name,
                    status,
                    responded_at: now_millis(),
                });
            } else if after.len() == before.len() {
                bail!("{user_id} is not a participant of {schedule_id}");
            }

            let revision = storage
                .update(
                    &schedule_id,
                    SchedulePatch::participants(after.clone())
                        .with_expected_revision(record.revision),
                )
                .await?;
            let written = on_participants_changed(
                &storage,
                &schedule_id,
                &before,
                &after,
                WatcherOptions { announce_removals },
            )
            .await?;
            println!("participants updated revision={revision} system_messages={written}");
        }
        Command::ListMessages { schedule_id } => {
            let record = storage.get(&ScheduleId::new(schedule_id)).await?;
            for message in record.messages.iter().filter(|m| !m.is_deleted) {
                let sender = message.sender_name.as_deref().unwrap_or("system");
                println!("{} [{}] {}: {}", message.created_at, message.id, sender, message.content);
            }
        }
    }

    Ok(())
}
