use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.cf";
pub const DEFAULT_SCRATCH_DIR: &str = "files";

const DEFAULT_ALBUM_WINDOW_MS: u64 = 1000;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for `{key}`: {value:?} is not a number")]
    NotNumeric { key: &'static str, value: String },

    #[error("no admins configured; at least one id is required in `admins`")]
    NoAdmins,

    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

/// Settings read from the flat `key=value` file. Immutable after load.
#[derive(Clone, PartialEq)]
pub struct Config {
    pub admins: BTreeSet<u64>,
    pub telegram_bot_token: Option<String>,
    pub eitaa_api_token: Option<String>,
    pub eitaa_channel_identifier: Option<String>,
    pub bale_bot_token: Option<String>,
    pub bale_destination_channel_id: Option<i64>,
    pub scratch_dir: Option<PathBuf>,
    pub album_window: Duration,
    pub download_timeout: Duration,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Config {
            admins: BTreeSet::new(),
            telegram_bot_token: None,
            eitaa_api_token: None,
            eitaa_channel_identifier: None,
            bale_bot_token: None,
            bale_destination_channel_id: None,
            scratch_dir: None,
            album_window: Duration::from_millis(DEFAULT_ALBUM_WINDOW_MS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "admins" => config.admins = parse_admins(value)?,
                "telegrambottoken" => config.telegram_bot_token = non_empty(value),
                "eitaaapitoken" => config.eitaa_api_token = non_empty(value),
                "eitaachannelidentifier" => config.eitaa_channel_identifier = non_empty(value),
                "balebottoken" => config.bale_bot_token = non_empty(value),
                "baledestinationchannelid" => {
                    config.bale_destination_channel_id =
                        Some(parse_number("baledestinationchannelid", value)?)
                }
                "scratchdir" => config.scratch_dir = non_empty(value).map(PathBuf::from),
                "albumwindowms" => {
                    config.album_window =
                        Duration::from_millis(parse_number("albumwindowms", value)?)
                }
                "downloadtimeoutsecs" => {
                    config.download_timeout =
                        Duration::from_secs(parse_number("downloadtimeoutsecs", value)?)
                }
                _ => {}
            }
        }

        if config.admins.is_empty() {
            return Err(ConfigError::NoAdmins);
        }

        Ok(config)
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admins.contains(&user_id)
    }

    /// The Telegram token is the only credential the process cannot start without.
    pub fn telegram_token(&self) -> Result<&str, ConfigError> {
        self.telegram_bot_token
            .as_deref()
            .ok_or(ConfigError::Missing("telegrambottoken"))
    }

    /// Scratch directory for transient downloads, relative to `base` unless absolute.
    pub fn scratch_dir_in(&self, base: &Path) -> PathBuf {
        match &self.scratch_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join(DEFAULT_SCRATCH_DIR),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "<redacted>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("Config")
            .field("admins", &self.admins)
            .field("telegram_bot_token", &redact(&self.telegram_bot_token))
            .field("eitaa_api_token", &redact(&self.eitaa_api_token))
            .field("eitaa_channel_identifier", &self.eitaa_channel_identifier)
            .field("bale_bot_token", &redact(&self.bale_bot_token))
            .field(
                "bale_destination_channel_id",
                &self.bale_destination_channel_id,
            )
            .field("scratch_dir", &self.scratch_dir)
            .field("album_window", &self.album_window)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

fn parse_admins(value: &str) -> Result<BTreeSet<u64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_number("admins", entry))
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::NotNumeric {
        key,
        value: value.to_string(),
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
admins=111, 222,333
TelegramBotToken=tg-token
eitaaApiToken=eitaa-token
EitaaChannelIdentifier=@my_channel
balebottoken=bale-token
BaleDestinationChannelId=-1001234
";

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.admins, BTreeSet::from([111, 222, 333]));
        assert_eq!(config.telegram_bot_token.as_deref(), Some("tg-token"));
        assert_eq!(config.eitaa_api_token.as_deref(), Some("eitaa-token"));
        assert_eq!(
            config.eitaa_channel_identifier.as_deref(),
            Some("@my_channel")
        );
        assert_eq!(config.bale_bot_token.as_deref(), Some("bale-token"));
        assert_eq!(config.bale_destination_channel_id, Some(-1001234));
        assert_eq!(config.album_window, Duration::from_secs(1));
        assert_eq!(config.download_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_keys_and_malformed_lines_are_skipped() {
        let config = Config::parse("admins=1\nfavouritecolour=blue\njust some text\n\n").unwrap();
        assert!(config.is_admin(1));
        assert!(config.telegram_bot_token.is_none());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let config = Config::parse("admins=1\ntelegrambottoken=abc=def").unwrap();
        assert_eq!(config.telegram_bot_token.as_deref(), Some("abc=def"));
    }

    #[test]
    fn test_non_numeric_admin_is_rejected() {
        let err = Config::parse("admins=1,two,3").unwrap_err();
        assert!(matches!(err, ConfigError::NotNumeric { key: "admins", .. }));
    }

    #[test]
    fn test_non_numeric_bale_channel_is_rejected() {
        let err = Config::parse("admins=1\nbaledestinationchannelid=@chan").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotNumeric {
                key: "baledestinationchannelid",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_admin_list_is_rejected() {
        assert!(matches!(
            Config::parse("admins=\ntelegrambottoken=t"),
            Err(ConfigError::NoAdmins)
        ));
        assert!(matches!(
            Config::parse("telegrambottoken=t"),
            Err(ConfigError::NoAdmins)
        ));
    }

    #[test]
    fn test_missing_telegram_token() {
        let config = Config::parse("admins=1").unwrap();
        assert!(matches!(
            config.telegram_token(),
            Err(ConfigError::Missing("telegrambottoken"))
        ));
    }

    #[test]
    fn test_tuning_keys() {
        let config =
            Config::parse("admins=1\nalbumwindowms=250\ndownloadtimeoutsecs=5\nscratchdir=tmp")
                .unwrap();
        assert_eq!(config.album_window, Duration::from_millis(250));
        assert_eq!(config.download_timeout, Duration::from_secs(5));
        assert_eq!(
            config.scratch_dir_in(Path::new("/opt/teleport")),
            PathBuf::from("/opt/teleport/tmp")
        );
    }

    #[test]
    fn test_default_scratch_dir() {
        let config = Config::parse("admins=1").unwrap();
        assert_eq!(
            config.scratch_dir_in(Path::new("/opt/teleport")),
            PathBuf::from("/opt/teleport/files")
        );
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let config = Config::parse(FULL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("tg-token"));
        assert!(!debug.contains("bale-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("config.cf")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cf");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::load(&path).unwrap();
        assert!(config.is_admin(222));
        assert!(!config.is_admin(999));
    }
}
