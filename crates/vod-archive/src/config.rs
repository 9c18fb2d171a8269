//! Command configuration shared by every job of a run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default split threshold: 11:59:57.
///
/// Just under twelve hours, the upload limit of the usual destination for
/// archived VODs, minus a few seconds of muxer slack.
pub const DEFAULT_DIVIDE_TIME: Duration = Duration::from_secs(11 * 3600 + 59 * 60 + 57);

/// Default downloader retry count when retries are not infinite.
pub const DEFAULT_RETRIES: u32 = 10;

/// Default number of fragments the downloader fetches concurrently.
pub const DEFAULT_CONCURRENT_FRAGMENTS: u32 = 5;

/// Paths (or names resolved through `PATH`) of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub downloader: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            downloader: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Configuration for command generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Pass `infinite` to every downloader retry flag.
    #[serde(default = "default_retries_infinite")]
    pub retries_infinite: bool,

    /// Retry count used when `retries_infinite` is false.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fragments downloaded concurrently by the downloader.
    #[serde(default = "default_concurrent_fragments")]
    pub concurrent_fragments: u32,

    /// Recordings strictly longer than this are split into segments of this length.
    #[serde(default = "default_divide_time", with = "hhmmss")]
    pub divide_time: Duration,

    /// Hardware acceleration backend passed to the split step (e.g. "cuda").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwaccel: Option<String>,

    /// Cookies file handed to the downloader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_file: Option<PathBuf>,

    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_retries_infinite() -> bool {
    true
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_concurrent_fragments() -> u32 {
    DEFAULT_CONCURRENT_FRAGMENTS
}

fn default_divide_time() -> Duration {
    DEFAULT_DIVIDE_TIME
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            retries_infinite: true,
            retries: DEFAULT_RETRIES,
            concurrent_fragments: DEFAULT_CONCURRENT_FRAGMENTS,
            divide_time: DEFAULT_DIVIDE_TIME,
            hwaccel: None,
            cookies_file: None,
            tools: ToolPaths::default(),
        }
    }
}

impl CommandConfig {
    /// Check values that would produce a nonsensical command line.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_fragments == 0 {
            return Err(Error::config("concurrent_fragments must be at least 1"));
        }
        if self.divide_time.is_zero() {
            return Err(Error::config("divide_time must be greater than 00:00:00"));
        }
        if self.hwaccel.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(Error::config("hwaccel must not be empty when set"));
        }
        for (name, value) in [
            ("downloader", &self.tools.downloader),
            ("ffmpeg", &self.tools.ffmpeg),
            ("ffprobe", &self.tools.ffprobe),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("tool path `{}` must not be empty", name)));
            }
        }
        Ok(())
    }

    /// The value passed to each downloader retry flag.
    pub fn retry_value(&self) -> String {
        if self.retries_infinite {
            "infinite".to_string()
        } else {
            self.retries.to_string()
        }
    }
}

/// Format a duration as `HH:MM:SS`, truncating sub-second precision.
///
/// Hours are not wrapped at 24.
pub fn format_hhmmss(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parse an `HH:MM:SS` string into a duration.
pub fn parse_hhmmss(value: &str) -> Result<Duration> {
    let invalid = || Error::config(format!("invalid duration `{}`, expected HH:MM:SS", value));

    let mut parts = value.trim().split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let parse = |part: &str| -> Result<u64> {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        part.parse::<u64>().map_err(|_| invalid())
    };

    let (hours, minutes, seconds) = (parse(h)?, parse(m)?, parse(s)?);
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// Serde adapter for `HH:MM:SS` durations.
pub mod hhmmss {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_hhmmss(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmmss(&raw).map_err(de::Error::custom)
    }

    /// Same adapter for optional fields.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer, de};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_str(&super::super::format_hhmmss(*duration)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| super::super::parse_hhmmss(&s).map_err(de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_command_config_default() {
        let config = CommandConfig::default();
        assert!(config.retries_infinite);
        assert_eq!(config.concurrent_fragments, 5);
        assert_eq!(config.divide_time, DEFAULT_DIVIDE_TIME);
        assert_eq!(format_hhmmss(config.divide_time), "11:59:57");
        assert!(config.hwaccel.is_none());
        assert_eq!(config.tools.downloader, "yt-dlp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_config_parse_partial() {
        let json = r#"{
            "retries_infinite": false,
            "retries": 3,
            "divide_time": "05:59:57",
            "hwaccel": "cuda"
        }"#;

        let config: CommandConfig = serde_json::from_str(json).unwrap();
        assert!(!config.retries_infinite);
        assert_eq!(config.retry_value(), "3");
        assert_eq!(config.concurrent_fragments, DEFAULT_CONCURRENT_FRAGMENTS);
        assert_eq!(config.divide_time, Duration::from_secs(5 * 3600 + 59 * 60 + 57));
        assert_eq!(config.hwaccel.as_deref(), Some("cuda"));
        assert_eq!(config.tools, ToolPaths::default());
    }

    #[test]
    fn test_command_config_rejects_bad_divide_time() {
        let json = r#"{ "divide_time": "12:75:00" }"#;
        let err = serde_json::from_str::<CommandConfig>(json).unwrap_err();
        assert!(err.to_string().contains("expected HH:MM:SS"));
    }

    #[test]
    fn test_validate() {
        let config = CommandConfig {
            concurrent_fragments: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CommandConfig {
            divide_time: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CommandConfig {
            hwaccel: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case("11:59:57", 43197)]
    #[case("00:00:01", 1)]
    #[case("1:00:00", 3600)]
    #[case("36:00:00", 129600)]
    fn test_parse_hhmmss(#[case] input: &str, #[case] secs: u64) {
        assert_eq!(parse_hhmmss(input).unwrap(), Duration::from_secs(secs));
    }

    #[rstest]
    #[case("")]
    #[case("12:00")]
    #[case("12:00:00:00")]
    #[case("aa:00:00")]
    #[case("00:60:00")]
    #[case("00:00:60")]
    #[case("-1:00:00")]
    fn test_parse_hhmmss_invalid(#[case] input: &str) {
        assert!(parse_hhmmss(input).is_err());
    }

    #[test]
    fn test_format_hhmmss() {
        assert_eq!(format_hhmmss(Duration::from_secs(43197)), "11:59:57");
        assert_eq!(format_hhmmss(Duration::from_secs_f64(61.9)), "00:01:01");
        assert_eq!(format_hhmmss(Duration::from_secs(100 * 3600)), "100:00:00");
    }
}
