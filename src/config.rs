use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use crate::modem::ModemSettings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {

    /// Default tracing directive, `RUST_LOG` takes precedence.
    pub log_level: String,
    pub modem: ModemConfig,
    pub database: DatabaseConfig,
    pub screening: ScreeningConfig,
    pub blocked: ActionConfig,
    pub screened: ActionConfig,
    pub permitted: ActionConfig,
    pub voice_mail: VoiceMailConfig,
    pub gpio: GpioConfig
}
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            modem: ModemConfig::default(),
            database: DatabaseConfig::default(),
            screening: ScreeningConfig::default(),
            blocked: ActionConfig {
                actions: vec![CallAction::Answer, CallAction::Greeting, CallAction::VoiceMail],
                greeting_file: PathBuf::from("resources/blocked_greeting.wav"),
                rings_before_answer: 0
            },
            screened: ActionConfig {
                actions: vec![CallAction::Answer, CallAction::Greeting, CallAction::RecordMessage],
                greeting_file: PathBuf::from("resources/general_greeting.wav"),
                rings_before_answer: 0
            },
            permitted: ActionConfig::default(),
            voice_mail: VoiceMailConfig::default(),
            gpio: GpioConfig::default()
        }
    }
}
impl AppConfig {

    /// Loads the TOML file if given, relative paths inside it resolving against `data_path`.
    /// Without a file every setting takes its default.
    pub fn load(config_file: Option<&Path>, data_path: &Path) -> Result<Self> {
        let mut config = match config_file {
            Some(file) => {
                let file = if file.is_relative() { data_path.join(file) } else { file.to_path_buf() };
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read config file {}", file.display()))?;
                Self::parse(&content).with_context(|| format!("Invalid config file {}", file.display()))?
            },
            None => Self::default()
        };

        config.resolve_paths(data_path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!(e))
    }

    /// Makes every file based setting absolute against the data folder.
    pub fn resolve_paths(&mut self, data_path: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = data_path.join(&*path);
            }
        };

        resolve(&mut self.database.path);
        resolve(&mut self.blocked.greeting_file);
        resolve(&mut self.screened.greeting_file);
        resolve(&mut self.permitted.greeting_file);
        resolve(&mut self.voice_mail.greeting_file);
        resolve(&mut self.voice_mail.goodbye_file);
        resolve(&mut self.voice_mail.invalid_response_file);
        resolve(&mut self.voice_mail.leave_message_file);
        resolve(&mut self.voice_mail.menu_file);
        resolve(&mut self.voice_mail.message_folder);
    }

    /// Checks everything that can be checked before the modem is opened,
    /// reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.screening.mode.is_empty() {
            problems.push("screening.mode must contain whitelist and/or blacklist".to_string());
        }
        for (section, actions) in [("blocked", &self.blocked), ("screened", &self.screened), ("permitted", &self.permitted)] {
            if let Err(e) = actions.validate() {
                problems.push(format!("{}.actions: {}", section, e));
            }
            if actions.actions.contains(&CallAction::Greeting) && !actions.greeting_file.exists() {
                problems.push(format!("{}.greeting_file not found: {}", section, actions.greeting_file.display()));
            }
        }

        for (name, patterns) in self.screening.all_patterns() {
            for pattern in patterns.keys() {
                if let Err(e) = Regex::new(pattern) {
                    problems.push(format!("screening.{} has an invalid pattern {:?}: {}", name, pattern, e));
                }
            }
        }

        for (name, path) in self.voice_mail.prompt_files() {
            if !path.exists() {
                problems.push(format!("voice_mail.{} not found: {}", name, path.display()));
            }
        }
        if self.voice_mail.menu_max_tries == 0 {
            problems.push("voice_mail.menu_max_tries must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!("Invalid configuration:\n  {}", problems.join("\n  "))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModemConfig {

    /// Serial device, probed from the available ports when unset.
    pub device: Option<String>,
    pub baud: u32,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,

    /// How long each caller ID poll may hold the modem. Lower values let
    /// a pick up in sooner at the cost of more lock traffic.
    pub poll_interval_ms: u64,
    pub record_max_duration_secs: u64,
    pub default_caller_name: String
}
impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: 57600,
            read_timeout_secs: 3,
            write_timeout_secs: 3,
            poll_interval_ms: 1000,
            record_max_duration_secs: 120,
            default_caller_name: "Unknown".to_string()
        }
    }
}
impl ModemConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn record_max_duration(&self) -> Duration {
        Duration::from_secs(self.record_max_duration_secs)
    }

    pub fn settings(&self) -> ModemSettings {
        ModemSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            default_caller_name: self.default_caller_name.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("callattendant.db") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningMode {
    Whitelist,
    Blacklist
}

/// Regex patterns mapped to the reason reported when they match.
pub type PatternReasons = BTreeMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub mode: Vec<ScreeningMode>,
    pub block_name_patterns: PatternReasons,
    pub block_number_patterns: PatternReasons,
    pub permit_name_patterns: PatternReasons,
    pub permit_number_patterns: PatternReasons
}
impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            mode: vec![ScreeningMode::Whitelist, ScreeningMode::Blacklist],
            block_name_patterns: BTreeMap::from([("V[0-9]{15}".to_string(), "Telemarketer Caller ID".to_string())]),
            block_number_patterns: BTreeMap::new(),
            permit_name_patterns: BTreeMap::new(),
            permit_number_patterns: BTreeMap::new()
        }
    }
}
impl ScreeningConfig {
    fn all_patterns(&self) -> [(&'static str, &PatternReasons); 4] {
        [
            ("block_name_patterns", &self.block_name_patterns),
            ("block_number_patterns", &self.block_number_patterns),
            ("permit_name_patterns", &self.permit_name_patterns),
            ("permit_number_patterns", &self.permit_number_patterns)
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    Answer,
    Ignore,
    Greeting,
    RecordMessage,
    VoiceMail
}
impl Display for CallAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CallAction::Answer => write!(f, "answer"),
            CallAction::Ignore => write!(f, "ignore"),
            CallAction::Greeting => write!(f, "greeting"),
            CallAction::RecordMessage => write!(f, "record_message"),
            CallAction::VoiceMail => write!(f, "voice_mail")
        }
    }
}

/// What to do with one class of caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub actions: Vec<CallAction>,
    pub greeting_file: PathBuf,
    pub rings_before_answer: u32
}
impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            actions: vec![CallAction::Ignore],
            greeting_file: PathBuf::from("resources/general_greeting.wav"),
            rings_before_answer: 0
        }
    }
}
impl ActionConfig {
    pub fn has(&self, action: CallAction) -> bool {
        self.actions.contains(&action)
    }

    fn validate(&self) -> Result<()> {
        match (self.has(CallAction::Answer), self.has(CallAction::Ignore)) {
            (false, false) => bail!("must contain either answer or ignore"),
            (true, true) => bail!("cannot contain both answer and ignore"),
            _ => {}
        }
        if self.has(CallAction::RecordMessage) && self.has(CallAction::VoiceMail) {
            bail!("cannot contain both record_message and voice_mail");
        }
        if self.has(CallAction::Ignore) && self.actions.len() > 1 {
            bail!("ignore cannot be combined with {:?}", self.actions);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceMailConfig {
    pub greeting_file: PathBuf,
    pub goodbye_file: PathBuf,
    pub invalid_response_file: PathBuf,
    pub leave_message_file: PathBuf,
    pub menu_file: PathBuf,
    pub message_folder: PathBuf,
    pub menu_wait_secs: u64,
    pub menu_max_tries: u32
}
impl Default for VoiceMailConfig {
    fn default() -> Self {
        Self {
            greeting_file: PathBuf::from("resources/general_greeting.wav"),
            goodbye_file: PathBuf::from("resources/goodbye.wav"),
            invalid_response_file: PathBuf::from("resources/invalid_response.wav"),
            leave_message_file: PathBuf::from("resources/please_leave_message.wav"),
            menu_file: PathBuf::from("resources/voice_mail_menu.wav"),
            message_folder: PathBuf::from("messages"),
            menu_wait_secs: 8,
            menu_max_tries: 3
        }
    }
}
impl VoiceMailConfig {
    pub fn menu_wait(&self) -> Duration {
        Duration::from_secs(self.menu_wait_secs)
    }

    fn prompt_files(&self) -> [(&'static str, &PathBuf); 5] {
        [
            ("greeting_file", &self.greeting_file),
            ("goodbye_file", &self.goodbye_file),
            ("invalid_response_file", &self.invalid_response_file),
            ("leave_message_file", &self.leave_message_file),
            ("menu_file", &self.menu_file)
        ]
    }
}

/// BCM pin numbers of the status LEDs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub enabled: bool,
    pub ring_pin: u8,
    pub approved_pin: u8,
    pub blocked_pin: u8,
    pub message_pin: u8
}
impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_pin: 14,
            approved_pin: 15,
            blocked_pin: 17,
            message_pin: 4
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.modem.baud, 57600);
        assert_eq!(config.modem.device, None);
        assert_eq!(config.screening.mode, vec![ScreeningMode::Whitelist, ScreeningMode::Blacklist]);
        assert_eq!(config.screening.block_name_patterns.get("V[0-9]{15}").map(String::as_str), Some("Telemarketer Caller ID"));
        assert!(config.blocked.has(CallAction::VoiceMail));
        assert!(config.screened.has(CallAction::RecordMessage));
        assert_eq!(config.permitted.actions, vec![CallAction::Ignore]);
        assert_eq!(config.voice_mail.menu_wait(), Duration::from_secs(8));
    }

    #[test]
    fn test_parse_sections() {
        let config = AppConfig::parse(r#"
            log_level = "debug"

            [modem]
            device = "/dev/ttyACM0"
            poll_interval_ms = 500

            [screening]
            mode = ["blacklist"]

            [screening.block_number_patterns]
            "^800" = "Toll free"

            [permitted]
            actions = ["answer", "greeting"]
            rings_before_answer = 4
        "#).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.modem.device.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.modem.settings().poll_interval, Duration::from_millis(500));
        assert_eq!(config.modem.read_timeout(), Duration::from_secs(3));
        assert_eq!(config.screening.mode, vec![ScreeningMode::Blacklist]);
        assert_eq!(config.screening.block_number_patterns.len(), 1);
        assert_eq!(config.permitted.rings_before_answer, 4);
        assert_eq!(config.permitted.greeting_file, PathBuf::from("resources/general_greeting.wav"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(AppConfig::parse("[blocked]\nactions = [\"answer\", \"hang_up\"]").is_err());
    }

    #[test]
    fn test_resolve_paths_against_data_path() {
        let mut config = AppConfig::parse("[database]\npath = \"/var/lib/calls.db\"").unwrap();
        config.resolve_paths(Path::new("/data"));

        assert_eq!(config.database.path, PathBuf::from("/var/lib/calls.db"));
        assert_eq!(config.voice_mail.message_folder, PathBuf::from("/data/messages"));
        assert_eq!(config.screened.greeting_file, PathBuf::from("/data/resources/general_greeting.wav"));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::parse(r#"
            [screened]
            actions = ["answer", "ignore"]

            [screening.permit_name_patterns]
            "(unclosed" = "Broken"
        "#).unwrap();
        config.resolve_paths(dir.path());

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("screened.actions"));
        assert!(message.contains("permit_name_patterns"));
        assert!(message.contains("voice_mail.menu_file not found"));
    }

    #[test]
    fn test_validate_accepts_complete_data_folder() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.resolve_paths(dir.path());

        std::fs::create_dir_all(dir.path().join("resources")).unwrap();
        for (_, path) in config.voice_mail.prompt_files() {
            std::fs::write(path, b"").unwrap();
        }
        std::fs::write(&config.blocked.greeting_file, b"").unwrap();

        config.validate().unwrap();
    }

    #[test]
    fn test_load_reads_relative_config_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("app.toml"), "[gpio]\nenabled = false\n").unwrap();

        let config = AppConfig::load(Some(Path::new("app.toml")), dir.path()).unwrap();
        assert!(!config.gpio.enabled);
        assert_eq!(config.database.path, dir.path().join("callattendant.db"));

        assert!(AppConfig::load(Some(Path::new("missing.toml")), dir.path()).is_err());
    }
}
