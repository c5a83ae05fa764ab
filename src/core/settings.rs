/*
 * Persistent application settings: the list of managed datasource XML files,
 * the most recently applied connection targets, and the backup policy. The
 * settings are stored as pretty-printed JSON in the application's local
 * configuration directory.
 *
 * It uses a trait-based approach (`SettingsStoreOperations`) to allow for
 * different storage backends or mock implementations for testing. The concrete
 * implementation (`CoreSettingsStore`) handles the file system interactions,
 * utilizing the shared path utility for determining the base configuration
 * directory.
 */
use crate::core::path_utils;
use serde::{Deserialize, Serialize};
use serde_json;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SETTINGS_FILENAME: &str = "settings.json";
const BACKUPS_SUBFOLDER_NAME: &str = "backups";
const DEFAULT_BACKUP_LIMIT: usize = 5;

#[derive(Debug)]
pub enum SettingsError {
    Io(io::Error),
    Json(serde_json::Error),
    NoConfigDirectory,
    InvalidXmlPath(PathBuf),
}

impl From<io::Error> for SettingsError {
    fn from(err: io::Error) -> Self {
        SettingsError::Io(err)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Json(err)
    }
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Settings I/O error: {e}"),
            SettingsError::Json(e) => write!(f, "Settings JSON error: {e}"),
            SettingsError::NoConfigDirectory => {
                write!(f, "Could not determine configuration directory for settings")
            }
            SettingsError::InvalidXmlPath(path) => {
                write!(f, "Not an existing .xml file: {}", path.display())
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Json(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/*
 * The persisted settings document. `paths` only ever holds absolute paths to
 * `.xml` files that existed when they were added; the editing methods below
 * enforce that, so callers can hand in raw user input. The `#[serde(default)]`
 * attributes keep settings files written by older versions loadable.
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub last_target_url: String,
    #[serde(default)]
    pub last_username: String,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_backup_limit")]
    pub backup_limit: usize,
}

fn default_backup_limit() -> usize {
    DEFAULT_BACKUP_LIMIT
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            paths: Vec::new(),
            last_target_url: String::new(),
            last_username: String::new(),
            backup_dir: None,
            backup_limit: DEFAULT_BACKUP_LIMIT,
        }
    }
}

impl Settings {
    /* The number of backups to keep per managed file. Stored values below one
     * are clamped so rotation never deletes the backup it just wrote. */
    pub fn backup_retention_limit(&self) -> usize {
        self.backup_limit.max(1)
    }

    /*
     * Adds raw user-supplied entries to the managed path list. Each entry is
     * stripped of surrounding quotes and made absolute; directories are walked
     * recursively for `.xml` files (case-insensitive extension), plain files
     * are accepted only when they are existing `.xml` files. Everything else
     * is skipped. Returns how many new entries the list gained.
     */
    pub fn add_paths<I, S>(&mut self, raw_entries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.paths.len();
        for raw in raw_entries {
            let cleaned = strip_surrounding_quotes(raw.as_ref());
            if cleaned.is_empty() {
                continue;
            }
            let candidate = absolutize(Path::new(cleaned));
            if candidate.is_dir() {
                for entry in WalkDir::new(&candidate).follow_links(false) {
                    match entry {
                        Ok(entry)
                            if entry.file_type().is_file()
                                && has_xml_extension(entry.path()) =>
                        {
                            self.paths.push(entry.into_path());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!(
                                "Settings: Skipping unreadable entry under {candidate:?}: {e}"
                            );
                        }
                    }
                }
            } else if is_existing_xml_file(&candidate) {
                self.paths.push(candidate);
            } else {
                log::debug!("Settings: Ignoring '{cleaned}', not an existing .xml file.");
            }
        }
        self.paths.sort();
        self.paths.dedup();
        self.paths.len().saturating_sub(before)
    }

    /* Removes entries from the managed path list. Entries are matched after
     * the same quote stripping and absolutization as `add_paths`. Returns how
     * many list entries were dropped. */
    pub fn remove_paths<I, S>(&mut self, raw_entries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.paths.len();
        for raw in raw_entries {
            let cleaned = strip_surrounding_quotes(raw.as_ref());
            if cleaned.is_empty() {
                continue;
            }
            let target = absolutize(Path::new(cleaned));
            self.paths.retain(|path| *path != target);
        }
        before.saturating_sub(self.paths.len())
    }

    /*
     * Replaces one managed path with another. The replacement is validated
     * before the list is touched: it must be an existing `.xml` file, or the
     * list stays unchanged and an error is returned. An `old_entry` that is
     * not in the list leaves the list unchanged as well.
     */
    pub fn replace_path(&mut self, old_entry: &str, new_entry: &str) -> Result<()> {
        let new_path = absolutize(Path::new(strip_surrounding_quotes(new_entry)));
        if !is_existing_xml_file(&new_path) {
            return Err(SettingsError::InvalidXmlPath(new_path));
        }

        let old_path = absolutize(Path::new(strip_surrounding_quotes(old_entry)));
        if !self.paths.contains(&old_path) {
            log::warn!(
                "Settings: '{}' is not in the managed path list, nothing replaced.",
                old_path.display()
            );
            return Ok(());
        }

        for path in &mut self.paths {
            if *path == old_path {
                *path = new_path.clone();
            }
        }
        self.paths.sort();
        self.paths.dedup();
        log::debug!(
            "Settings: Replaced '{}' with '{}'.",
            old_path.display(),
            new_path.display()
        );
        Ok(())
    }
}

fn strip_surrounding_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn has_xml_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

fn is_existing_xml_file(path: &Path) -> bool {
    path.is_file() && has_xml_extension(path)
}

pub trait SettingsStoreOperations: Send + Sync {
    fn load_settings(&self, app_name: &str) -> Result<Settings>;
    fn save_settings(&self, app_name: &str, settings: &Settings) -> Result<()>;
    fn effective_backup_dir(&self, app_name: &str, settings: &Settings) -> Result<PathBuf>;
}

pub struct CoreSettingsStore {}

impl CoreSettingsStore {
    pub fn new() -> Self {
        CoreSettingsStore {}
    }
}

impl Default for CoreSettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStoreOperations for CoreSettingsStore {
    /*
     * Loads the settings for a given application. A missing settings file is
     * not an error; it yields the defaults, as does a file that no longer
     * parses as JSON. I/O failures other than absence are reported.
     */
    fn load_settings(&self, app_name: &str) -> Result<Settings> {
        log::trace!("CoreSettingsStore: Loading settings for app '{app_name}'");
        let config_dir = path_utils::get_app_config_local_dir(app_name)
            .ok_or(SettingsError::NoConfigDirectory)?;
        let file_path = config_dir.join(SETTINGS_FILENAME);

        if !file_path.exists() {
            log::debug!(
                "CoreSettingsStore: Settings file {file_path:?} does not exist, using defaults."
            );
            return Ok(Settings::default());
        }

        let file = File::open(&file_path)?;
        let reader = BufReader::new(file);
        match serde_json::from_reader(reader) {
            Ok(settings) => {
                log::debug!("CoreSettingsStore: Loaded settings from {file_path:?}.");
                Ok(settings)
            }
            Err(e) => {
                log::warn!(
                    "CoreSettingsStore: Settings file {file_path:?} is not valid JSON ({e}), using defaults."
                );
                Ok(Settings::default())
            }
        }
    }

    fn save_settings(&self, app_name: &str, settings: &Settings) -> Result<()> {
        log::trace!("CoreSettingsStore: Saving settings for app '{app_name}'");
        let config_dir = path_utils::get_app_config_local_dir(app_name)
            .ok_or(SettingsError::NoConfigDirectory)?;
        let file_path = config_dir.join(SETTINGS_FILENAME);

        let file = File::create(&file_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, settings)?;
        log::debug!("CoreSettingsStore: Saved settings to {file_path:?}.");
        Ok(())
    }

    /*
     * Resolves the directory backups are written under. A configured
     * `backup_dir` wins; otherwise a `backups` folder inside the application's
     * configuration directory is used. The directory is created if absent so
     * callers can hand it straight to the backup rotation.
     */
    fn effective_backup_dir(&self, app_name: &str, settings: &Settings) -> Result<PathBuf> {
        let dir = match &settings.backup_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => {
                let config_dir = path_utils::get_app_config_local_dir(app_name)
                    .ok_or(SettingsError::NoConfigDirectory)?;
                config_dir.join(BACKUPS_SUBFOLDER_NAME)
            }
        };
        fs::create_dir_all(&dir)?;
        log::trace!("CoreSettingsStore: Effective backup directory is {dir:?}.");
        Ok(dir)
    }
}
