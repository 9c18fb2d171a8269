use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vod_archive::CommandConfig;
use vod_archive::config::hhmmss;
use vod_archive::title::TitleFormat;

use crate::error::{CliError, Result};

const CONFIG_DIR_NAME: &str = "vodarc";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variables overriding the external tool paths.
pub const ENV_DOWNLOADER: &str = "VODARC_YTDLP";
pub const ENV_FFMPEG: &str = "VODARC_FFMPEG";
pub const ENV_FFPROBE: &str = "VODARC_FFPROBE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one ledger file per channel.
    pub data_dir: PathBuf,

    pub commands: CommandConfig,

    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,

    /// Where this channel's VODs are archived.
    pub recording_path: PathBuf,

    /// Move finished parts into `<recording_path>/upload` numbered by date.
    #[serde(default)]
    pub order_before_upload: bool,

    /// Overrides `commands.divide_time` for this channel.
    #[serde(
        default,
        with = "hhmmss::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub divide_time: Option<Duration>,

    /// Rename files in the upload folder to titles after ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TitleFormat>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            commands: CommandConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/vodarc/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        path.map(Path::to_path_buf).or_else(Self::default_path)
    }

    /// Load from `path` (or the default location). A missing file yields the
    /// defaults; tool paths from the environment are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(path) {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading configuration");
                let raw = std::fs::read_to_string(&path)?;
                Self::parse(&raw)?
            }
            _ => Self::default(),
        };

        config.apply_tool_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Write the default configuration to `path` (or the default location).
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path).ok_or_else(|| {
            CliError::invalid_input("no config directory on this platform, pass --config")
        })?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_tool_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let tools = &mut self.commands.tools;
        for (key, slot) in [
            (ENV_DOWNLOADER, &mut tools.downloader),
            (ENV_FFMPEG, &mut tools.ffmpeg),
            (ENV_FFPROBE, &mut tools.ffprobe),
        ] {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!(key, value = %value, "Tool path overridden from environment");
                *slot = value;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        self.commands.validate()?;
        for (index, channel) in self.channels.iter().enumerate() {
            if channel.name.trim().is_empty() {
                return Err(CliError::invalid_input(format!(
                    "channels[{}] has an empty name",
                    index
                )));
            }
            if self.channels[..index].iter().any(|c| c.name == channel.name) {
                return Err(CliError::invalid_input(format!(
                    "channel `{}` is configured twice",
                    channel.name
                )));
            }
            if channel.divide_time.is_some_and(|d| d.is_zero()) {
                return Err(CliError::invalid_input(format!(
                    "channel `{}`: divide_time must be greater than 00:00:00",
                    channel.name
                )));
            }
            if let Some(title) = &channel.title {
                title.validate()?;
            }
        }
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelConfig> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CliError::UnknownChannel(name.to_string()))
    }

    /// The named channel, or every channel when `name` is `None`.
    pub fn select_channels(&self, name: Option<&str>) -> Result<Vec<&ChannelConfig>> {
        match name {
            Some(name) => Ok(vec![self.channel(name)?]),
            None => Ok(self.channels.iter().collect()),
        }
    }

    /// Command configuration with the channel's overrides applied.
    pub fn commands_for(&self, channel: &ChannelConfig) -> CommandConfig {
        let mut commands = self.commands.clone();
        if let Some(divide_time) = channel.divide_time {
            commands.divide_time = divide_time;
        }
        commands
    }

    pub fn ledger_path(&self, channel: &ChannelConfig) -> PathBuf {
        vod_archive::Ledger::path_for(&self.data_dir, &channel.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vod_archive::config::DEFAULT_DIVIDE_TIME;

    const SAMPLE: &str = r#"
data_dir = "/var/lib/vodarc"

[commands]
retries_infinite = false
retries = 3
divide_time = "11:59:57"
hwaccel = "cuda"

[[channels]]
name = "somechannel"
recording_path = "/recordings/somechannel"
order_before_upload = true

[[channels]]
name = "other"
recording_path = "/recordings/other"
divide_time = "05:59:57"

[channels.title]
prefix = "Other"
omit_part_if_single = true
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/vodarc"));
        assert_eq!(config.commands.retry_value(), "3");
        assert_eq!(config.commands.concurrent_fragments, 5);
        assert_eq!(config.channels.len(), 2);
        assert!(config.channels[0].order_before_upload);
        assert!(!config.channels[1].order_before_upload);
        assert!(config.channels[0].title.is_none());
        let title = config.channels[1].title.as_ref().unwrap();
        assert_eq!(title.part_format, "Part {part}");
        assert!(title.omit_part_if_single);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_title_prefix_rejected() {
        let raw = r#"
[[channels]]
name = "a"
recording_path = "/a"

[channels.title]
prefix = ""
"#;
        let config = AppConfig::parse(raw).unwrap();
        assert!(matches!(config.validate(), Err(CliError::Archive(_))));
    }

    #[test]
    fn test_channel_divide_time_override() {
        let config = AppConfig::parse(SAMPLE).unwrap();

        let some = config.channel("somechannel").unwrap();
        assert_eq!(config.commands_for(some).divide_time, DEFAULT_DIVIDE_TIME);

        let other = config.channel("other").unwrap();
        assert_eq!(
            config.commands_for(other).divide_time,
            Duration::from_secs(5 * 3600 + 59 * 60 + 57)
        );
        assert_eq!(config.commands_for(other).hwaccel.as_deref(), Some("cuda"));
    }

    #[test]
    fn test_unknown_channel() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert!(matches!(
            config.channel("nope"),
            Err(CliError::UnknownChannel(_))
        ));
        assert_eq!(config.select_channels(None).unwrap().len(), 2);
        assert_eq!(config.select_channels(Some("other")).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let raw = r#"
[[channels]]
name = "a"
recording_path = "/a"

[[channels]]
name = "a"
recording_path = "/b"
"#;
        let config = AppConfig::parse(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_divide_time_is_a_parse_error() {
        let raw = "[commands]\ndivide_time = \"12 hours\"\n";
        assert!(matches!(
            AppConfig::parse(raw),
            Err(CliError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_tool_overrides() {
        let mut config = AppConfig::default();
        config.apply_tool_overrides(|key| match key {
            ENV_FFMPEG => Some("/opt/ffmpeg/bin/ffmpeg".to_string()),
            ENV_DOWNLOADER => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.commands.tools.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.commands.tools.downloader, "yt-dlp");
        assert_eq!(config.commands.tools.ffprobe, "ffprobe");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_reset_then_show_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let written = AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(written, path);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("divide_time = \"11:59:57\""));
        assert_eq!(AppConfig::parse(&raw).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_reset_replaces_unparseable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[commands\ndivide_time = 12").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(CliError::ConfigParse(_))
        ));

        AppConfig::reset(Some(&path)).unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(config.channels.is_empty());
    }
}
