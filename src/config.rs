//! Runtime configuration loaded from a TOML file.
//!
//! Every section and field has a default, so a missing file still yields a
//! config that scrapes the Carolina Theatre listings into `./data`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming the config file when `--config` is not given.
pub const CONFIG_ENV: &str = "SHOWTIME_CONFIG";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub store: StoreConfig,
    pub publish: PublishConfig,
    pub lock: LockConfig,
}

impl Config {
    /// Load the config at `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.listing_urls.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.listing_urls must name at least one page".to_string(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which driver renders the listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    /// Headless Chrome; needed when the listings are client-rendered.
    Browser,
    /// Plain HTTP GET.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub listing_urls: Vec<String>,
    pub backend: FetchBackend,
    pub headless: bool,
    pub timeout_secs: u64,
    /// How often the browser re-checks for the listings container.
    pub poll_interval_ms: u64,
    pub user_agent: String,
    /// Element that must be present before the listing page counts as rendered.
    pub wait_for: String,
    /// Where the live browser's PID is recorded, for cleanup after a crash.
    pub browser_pid_file: PathBuf,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            listing_urls: vec![
                "https://carolinatheatre.org/wp-admin/admin-ajax.php?action=film_filter&events=now-playing"
                    .to_string(),
                "https://carolinatheatre.org/wp-admin/admin-ajax.php?action=film_filter&events=coming-soon"
                    .to_string(),
            ],
            backend: FetchBackend::Browser,
            headless: true,
            timeout_secs: 30,
            poll_interval_ms: 250,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            wait_for: "div.card.eventCard.film".to_string(),
            browser_pid_file: PathBuf::from("data/browser.pid"),
        }
    }
}

/// CSS selectors describing the theater's markup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub film_card: String,
    pub film_title: String,
    pub film_link: String,
    pub date_block: String,
    pub date_label: String,
    pub time_entry: String,
    /// Separator between the time and the venue inside a time entry.
    pub venue_separator: String,
    /// Venue used when a time entry names none. Unset means such entries are rejected.
    pub default_venue: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            film_card: "div.card.eventCard.film".to_string(),
            film_title: "p.card__title".to_string(),
            film_link: "a".to_string(),
            date_block: "li.showInfo__date".to_string(),
            date_label: ".date".to_string(),
            time_entry: ".showInfo__times .time".to_string(),
            venue_separator: " - ".to_string(),
            default_venue: Some("Unknown Cinema".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: PathBuf,
    /// Append-only CSV mirror of every inserted row.
    pub backup_csv: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/movie_showtimes.db"),
            backup_csv: Some(PathBuf::from("data/movie_showtimes.csv")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub html_output: PathBuf,
    pub json_output: Option<PathBuf>,
    pub rss_output: Option<PathBuf>,
    /// Overrides the built-in page template.
    pub template: Option<PathBuf>,
    pub page_title: String,
    pub site_link: String,
    /// Keep a timestamped copy of each output before replacing it.
    pub backup_existing: bool,
    /// How many of those copies to keep per output; older ones are deleted.
    pub backup_keep: usize,
    /// Stylesheet copied next to the HTML output; the built-in one is used when unset.
    pub stylesheet: Option<PathBuf>,
    /// Extra static files copied next to the HTML output.
    pub assets: Vec<PathBuf>,
    pub group_by_title: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            html_output: PathBuf::from("public/index.html"),
            json_output: Some(PathBuf::from("public/showtimes.json")),
            rss_output: None,
            template: None,
            page_title: "Carolina Theatre Showtimes".to_string(),
            site_link: "https://carolinatheatre.org/".to_string(),
            backup_existing: true,
            backup_keep: 5,
            stylesheet: None,
            assets: Vec::new(),
            group_by_title: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/showtime-scrape.lock"),
        }
    }
}
