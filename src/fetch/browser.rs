use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};

use super::{PageFetcher, PageRequest};
use crate::config::FetchConfig;
use crate::error::FetchError;

#[derive(Debug, Clone)]
struct BrowserSettings {
    headless: bool,
    timeout: Duration,
    poll_interval: Duration,
    user_agent: String,
    pid_file: PathBuf,
}

/// Renders pages in headless Chrome. Each fetch launches its own browser and
/// tears it down before returning, whatever the outcome.
pub struct BrowserFetcher {
    settings: BrowserSettings,
}

impl BrowserFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            settings: BrowserSettings {
                headless: config.headless,
                timeout: config.timeout(),
                poll_interval: config.poll_interval(),
                user_agent: config.user_agent.clone(),
                pid_file: config.browser_pid_file.clone(),
            },
        }
    }
}

#[async_trait::async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String, FetchError> {
        let settings = self.settings.clone();
        let owned = request.clone();
        // The driver is blocking; keep it off the async workers.
        tokio::task::spawn_blocking(move || render_page(&settings, &owned))
            .await
            .map_err(|e| FetchError::Render {
                url: request.url.clone(),
                reason: format!("browser task failed: {e}"),
            })?
    }
}

/// Owns the Chrome process for the duration of one page render.
///
/// Fields drop in order: the browser (which kills Chrome) goes first, then
/// the pid file is removed.
struct BrowserSession {
    browser: Browser,
    _pid_file: Option<PidFile>,
}

impl BrowserSession {
    fn launch(settings: &BrowserSettings, url: &str) -> Result<Self, FetchError> {
        let user_agent = OsString::from(format!("--user-agent={}", settings.user_agent));
        let options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(settings.timeout + Duration::from_secs(30))
            .args(vec![
                user_agent.as_os_str(),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| FetchError::Render {
                url: url.to_string(),
                reason: format!("invalid browser options: {e}"),
            })?;

        let browser = Browser::new(options).map_err(|e| FetchError::Render {
            url: url.to_string(),
            reason: format!("failed to launch browser: {e:#}"),
        })?;

        let pid_file = browser.get_process_id().and_then(|pid| {
            debug!("browser launched with pid {pid}");
            PidFile::write(&settings.pid_file, pid)
        });

        Ok(Self {
            browser,
            _pid_file: pid_file,
        })
    }
}

/// Records a live browser PID on disk; removed again on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn write(path: &Path, pid: u32) -> Option<Self> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match fs::write(path, pid.to_string()) {
            Ok(()) => Some(Self {
                path: path.to_path_buf(),
            }),
            Err(e) => {
                warn!("could not record browser pid in {}: {e}", path.display());
                None
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove {}: {e}", self.path.display());
        }
    }
}

fn render_page(settings: &BrowserSettings, request: &PageRequest) -> Result<String, FetchError> {
    let url = request.url.as_str();
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let session = BrowserSession::launch(settings, url)?;

    let tab = session.browser.new_tab().map_err(|e| FetchError::Render {
        url: url.to_string(),
        reason: format!("failed to open tab: {e:#}"),
    })?;
    tab.set_default_timeout(settings.timeout);

    let navigated = tab
        .navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated());
    if let Err(e) = navigated {
        return Err(if Instant::now() >= deadline {
            FetchError::Timeout {
                url: url.to_string(),
                waited_ms: started.elapsed().as_millis(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: format!("{e:#}"),
            }
        });
    }

    if let Some(selector) = &request.wait_for {
        loop {
            if tab.find_element(selector).is_ok() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            thread::sleep(settings.poll_interval);
        }
    }

    tab.get_content().map_err(|e| FetchError::Render {
        url: url.to_string(),
        reason: format!("failed to read page content: {e:#}"),
    })
}
