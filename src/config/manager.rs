use anyhow::Result;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::Config;

/// Configuration manager with hot-reload support.
///
/// On a successful reload the hook receives the fresh configuration; the
/// server uses it to swap the rule list into the RuleEngine as one complete
/// snapshot (rules are copy-on-replace, never mutated in place).
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    _watcher: Option<RecommendedWatcher>,
    #[allow(clippy::type_complexity)]
    reload_hook: Option<Arc<dyn Fn(&Config) + Send + Sync>>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::from_file_with_env(&config_path).await?;

        Ok(ConfigManager {
            config: Arc::new(RwLock::new(config)),
            config_path,
            _watcher: None,
            reload_hook: None,
        })
    }

    /// Get a clone of the current configuration
    pub fn get_config(&self) -> Config {
        self.config.read().unwrap().clone()
    }

    /// Set a callback to be invoked after config reload succeeds
    pub fn set_reload_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Config) + Send + Sync + 'static,
    {
        self.reload_hook = Some(Arc::new(hook));
    }

    /// Start watching for configuration file changes
    pub async fn start_hot_reload(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(100);
        let config_arc = Arc::clone(&self.config);
        let config_path = self.config_path.clone();
        let reload_hook = self.reload_hook.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file change event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

        info!("Started watching config file: {:?}", config_path);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) =
                    handle_config_change(&event, &config_arc, &config_path, reload_hook.clone())
                        .await
                {
                    error!("Failed to handle config change: {}", e);
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }

    /// Manually reload configuration from file
    pub async fn reload_config(&self) -> Result<()> {
        info!(
            "Manually reloading configuration from {:?}",
            self.config_path
        );

        match Config::from_file_with_env(&self.config_path).await {
            Ok(new_config) => {
                if let Some(hook) = &self.reload_hook {
                    hook(&new_config);
                }
                let mut config = self.config.write().unwrap();
                *config = new_config;
                info!("Configuration reloaded successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload configuration: {}", e);
                Err(e)
            }
        }
    }
}

/// Handle configuration file change events
#[allow(clippy::type_complexity)]
async fn handle_config_change(
    event: &Event,
    config: &Arc<RwLock<Config>>,
    config_path: &Path,
    reload_hook: Option<Arc<dyn Fn(&Config) + Send + Sync>>,
) -> Result<()> {
    use notify::EventKind;

    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return Ok(());
    }

    let config_file_changed = event.paths.iter().any(|path| path == config_path);
    if !config_file_changed {
        return Ok(());
    }

    debug!("Config file change detected: {:?}", event);

    // A half-written file fails validation; keep the old config in that case
    match Config::from_file_with_env(config_path).await {
        Ok(new_config) => {
            if let Some(hook) = &reload_hook {
                hook(&new_config);
            }
            let mut guard = config.write().unwrap();
            *guard = new_config;
            info!("Configuration hot-reloaded");
            Ok(())
        }
        Err(e) => {
            error!("Rejected invalid configuration on reload: {}", e);
            Ok(())
        }
    }
}
