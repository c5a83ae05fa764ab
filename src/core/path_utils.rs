/*
 * Utility functions for application directories. The settings store and the
 * backup rotation both anchor their files under the per-user configuration
 * directory resolved here.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/*
 * Resolves the application's local (non-roaming) configuration directory and
 * makes sure it exists. No organization qualifier is used, so the directory
 * sits directly under the user's local application data structure. Returns
 * `None` when the platform offers no such location or the directory cannot be
 * created.
 */
pub fn get_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    log::trace!("PathUtils: Resolving config local dir for '{app_name}'");
    ProjectDirs::from("", "", app_name).and_then(|proj_dirs| {
        let config_path = proj_dirs.config_local_dir();
        if !config_path.exists() {
            if let Err(e) = fs::create_dir_all(config_path) {
                log::error!("PathUtils: Failed to create config directory {config_path:?}: {e}");
                return None;
            }
            log::debug!("PathUtils: Created config directory {config_path:?}");
        }
        Some(config_path.to_path_buf())
    })
}
