use anyhow::{bail, Result};
use chrono::Local;
use clap::{Subcommand, ValueEnum};
use tracing::info;
use crate::config::AppConfig;
use crate::database::{CallDatabase, CallerList};
use crate::indicators::Indicators;
use crate::modem::caller_id::CallerRecord;
use crate::screening::CallScreener;
use crate::voice_mail::VoiceMail;

/// Maintenance commands that work on the database without touching the modem.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the most recent calls
    Calls {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: i64
    },

    /// Always let a number ring through
    Permit {
        number: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "Added by user")]
        reason: String
    },

    /// Always treat a number as blocked
    Block {
        number: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "Added by user")]
        reason: String
    },

    /// Take a number off the whitelist or blacklist
    Unlist {
        #[arg(value_enum)]
        list: ListName,
        number: String
    },

    /// Mark a message as played, or unplayed with --unplayed
    Played {
        message: i64,
        #[arg(long)]
        unplayed: bool
    },

    /// Delete a message and its recording
    Delete {
        message: i64
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListName {
    Whitelist,
    Blacklist
}
impl From<ListName> for CallerList {
    fn from(list: ListName) -> Self {
        match list {
            ListName::Whitelist => CallerList::Whitelist,
            ListName::Blacklist => CallerList::Blacklist
        }
    }
}

fn user_record(number: String, name: String) -> CallerRecord {
    let now = Local::now();
    CallerRecord {
        date: now.format("%m%d").to_string(),
        time: now.format("%H%M").to_string(),
        name,
        number
    }
}

pub async fn run_command(command: Command, config: &AppConfig) -> Result<()> {
    let db = CallDatabase::connect(&config.database).await?;

    match command {
        Command::Calls { limit } => {
            for call in db.recent_calls(limit).await? {
                println!(
                    "{:>5}  {}  {:<15} {:<20} {:<10} {}",
                    call.call_no, call.system_date_time, call.number, call.name, call.action, call.reason
                );
            }
        },
        Command::Permit { number, name, reason } => {
            let screener = CallScreener::new(&config.screening, db)?;
            screener.whitelist_caller(&user_record(number.clone(), name), &reason).await?;
            info!("Permitted {}: {}", number, reason);
        },
        Command::Block { number, name, reason } => {
            let screener = CallScreener::new(&config.screening, db)?;
            screener.blacklist_caller(&user_record(number.clone(), name), &reason).await?;
            info!("Blocked {}: {}", number, reason);
        },
        Command::Unlist { list, number } => {
            if !db.remove_from_list(list.into(), &number).await? {
                bail!("{} is not on the {:?}", number, list);
            }
            info!("Removed {} from the {:?}", number, list);
        },
        Command::Played { message, unplayed } => {
            if !db.set_message_played(message, !unplayed).await? {
                bail!("There is no message #{}", message);
            }
            info!("Marked message #{} as {}", message, if unplayed { "unplayed" } else { "played" });
        },
        Command::Delete { message } => {
            // The running attendant owns the LEDs.
            let voice_mail = VoiceMail::new(
                config.voice_mail.clone(),
                db,
                Indicators::disabled(),
                config.modem.record_max_duration()
            );
            if !voice_mail.delete_message(message).await? {
                bail!("There is no message #{}", message);
            }
            info!("Deleted message #{}", message);
        }
    }
    Ok(())
}
