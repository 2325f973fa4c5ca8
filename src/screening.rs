use std::fmt::{Display, Formatter};
use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};
use crate::config::{PatternReasons, ScreeningConfig, ScreeningMode};
use crate::database::CallDatabase;
use crate::modem::caller_id::CallerRecord;

/// How an incoming caller was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Permitted(String),
    Blocked(String),
    Screened
}
impl Screening {
    pub fn action(&self) -> &'static str {
        match self {
            Screening::Permitted(_) => "Permitted",
            Screening::Blocked(_) => "Blocked",
            Screening::Screened => "Screened"
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Screening::Permitted(reason) | Screening::Blocked(reason) => reason,
            Screening::Screened => ""
        }
    }
}
impl Display for Screening {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Screening::Screened => write!(f, "Screened"),
            _ => write!(f, "{} ({})", self.action(), self.reason())
        }
    }
}

struct PatternSet(Vec<(Regex, String)>);
impl PatternSet {
    fn compile(name: &str, patterns: &PatternReasons) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (pattern, reason) in patterns {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Invalid {} pattern '{}'", name, pattern))?;
            compiled.push((regex, reason.clone()));
        }
        Ok(Self(compiled))
    }

    fn search(&self, value: &str) -> Option<String> {
        self.0.iter()
            .find(|(regex, _)| regex.is_match(value))
            .map(|(_, reason)| reason.clone())
    }
}

pub struct CallScreener {
    db: CallDatabase,
    mode: Vec<ScreeningMode>,
    permit_names: PatternSet,
    permit_numbers: PatternSet,
    block_names: PatternSet,
    block_numbers: PatternSet
}
impl CallScreener {
    pub fn new(config: &ScreeningConfig, db: CallDatabase) -> Result<Self> {
        Ok(Self {
            db,
            mode: config.mode.clone(),
            permit_names: PatternSet::compile("permit_name_patterns", &config.permit_name_patterns)?,
            permit_numbers: PatternSet::compile("permit_number_patterns", &config.permit_number_patterns)?,
            block_names: PatternSet::compile("block_name_patterns", &config.block_name_patterns)?,
            block_numbers: PatternSet::compile("block_number_patterns", &config.block_number_patterns)?
        })
    }

    /// Returns the reason the caller is permitted, if they are.
    pub async fn is_permitted(&self, record: &CallerRecord) -> Result<Option<String>> {
        if let Some(reason) = self.db.check_whitelist(&record.number).await? {
            return Ok(Some(reason));
        }

        debug!("Checking permitted patterns for {}", record.number);
        Ok(self.permit_names.search(&record.name)
            .or_else(|| self.permit_numbers.search(&record.number)))
    }

    /// Returns the reason the caller is blocked, if they are.
    pub async fn is_blocked(&self, record: &CallerRecord) -> Result<Option<String>> {
        if let Some(reason) = self.db.check_blacklist(&record.number).await? {
            return Ok(Some(reason));
        }

        debug!("Checking blocked patterns for {}", record.number);
        Ok(self.block_names.search(&record.name)
            .or_else(|| self.block_numbers.search(&record.number)))
    }

    /// Runs the checks enabled by the screening mode, permit before block.
    pub async fn screen(&self, record: &CallerRecord) -> Result<Screening> {
        if self.mode.contains(&ScreeningMode::Whitelist) {
            if let Some(reason) = self.is_permitted(record).await? {
                return Ok(Screening::Permitted(reason));
            }
        }
        if self.mode.contains(&ScreeningMode::Blacklist) {
            if let Some(reason) = self.is_blocked(record).await? {
                return Ok(Screening::Blocked(reason));
            }
        }

        info!("Caller {} has been screened", record.number);
        Ok(Screening::Screened)
    }

    pub async fn whitelist_caller(&self, record: &CallerRecord, reason: &str) -> Result<()> {
        self.db.add_whitelist(record, reason).await
    }

    pub async fn blacklist_caller(&self, record: &CallerRecord, reason: &str) -> Result<()> {
        self.db.add_blacklist(record, reason).await
    }
}
