//! User settings: preference collaborator contract and typed view.
//!
//! # Responsibility
//! - Define the string key/value interface the host provides for preferences.
//! - Load those strings once into [`AppSettings`] and write edits back.
//!
//! # Invariants
//! - Unset or non-numeric lead time reads as [`DEFAULT_LEAD_TIME_MINUTES`].
//! - Stored category lists never contain blank entries.

use crate::repo::task_repo::{RepoError, RepoResult};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// Comma-joined list of known categories.
pub const CATEGORIES_KEY: &str = "categories";
/// `"true"` hides completed tasks from default listings.
pub const HIDE_COMPLETED_KEY: &str = "hide_completed";
/// Reminder lead time in whole minutes.
pub const LEAD_TIME_MINUTES_KEY: &str = "notification_time_before";

pub const DEFAULT_LEAD_TIME_MINUTES: u32 = 5;

/// String key/value preference storage supplied by the host.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> RepoResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RepoResult<()>;
}

/// Process-local preference store, used by tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> RepoResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|err| err.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|err| err.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub enum SettingsError {
    /// Lead time input is not a plain non-negative integer.
    InvalidLeadTime(String),
    BlankCategory,
    /// Category contains the list separator.
    InvalidCategory(String),
    DuplicateCategory(String),
    Repo(RepoError),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLeadTime(input) => {
                write!(f, "lead time must be whole minutes, got `{input}`")
            }
            Self::BlankCategory => write!(f, "category name is required"),
            Self::InvalidCategory(name) => {
                write!(f, "category name cannot contain a comma: {name}")
            }
            Self::DuplicateCategory(name) => write!(f, "category already exists: {name}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SettingsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SettingsError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Typed settings loaded once and passed explicitly to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub lead_time_minutes: u32,
    pub categories: Vec<String>,
    pub hide_completed: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            lead_time_minutes: DEFAULT_LEAD_TIME_MINUTES,
            categories: Vec::new(),
            hide_completed: false,
        }
    }
}

impl AppSettings {
    /// Reads every recognised key, falling back to defaults for missing or
    /// malformed values.
    pub fn load(store: &dyn PreferenceStore) -> RepoResult<Self> {
        let lead_time_minutes = parse_lead_time(store.get(LEAD_TIME_MINUTES_KEY)?.as_deref());
        let categories = store
            .get(CATEGORIES_KEY)?
            .map(|joined| split_categories(&joined))
            .unwrap_or_default();
        let hide_completed = store
            .get(HIDE_COMPLETED_KEY)?
            .is_some_and(|value| value.trim() == "true");

        Ok(Self {
            lead_time_minutes,
            categories,
            hide_completed,
        })
    }

    /// Writes every field back under its preference key.
    pub fn save(&self, store: &dyn PreferenceStore) -> RepoResult<()> {
        store.set(LEAD_TIME_MINUTES_KEY, &self.lead_time_minutes.to_string())?;
        store.set(CATEGORIES_KEY, &self.categories.join(","))?;
        store.set(HIDE_COMPLETED_KEY, &self.hide_completed.to_string())?;
        Ok(())
    }

    /// Accepts digits-only input, as typed into a settings field.
    pub fn set_lead_time_from_input(&mut self, input: &str) -> Result<(), SettingsError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(SettingsError::InvalidLeadTime(input.to_string()));
        }
        self.lead_time_minutes = trimmed
            .parse()
            .map_err(|_| SettingsError::InvalidLeadTime(input.to_string()))?;
        Ok(())
    }

    pub fn add_category(&mut self, name: &str) -> Result<(), SettingsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SettingsError::BlankCategory);
        }
        // Commas would split the entry when the joined list is read back.
        if name.contains(',') {
            return Err(SettingsError::InvalidCategory(name.to_string()));
        }
        if self.categories.iter().any(|existing| existing == name) {
            return Err(SettingsError::DuplicateCategory(name.to_string()));
        }
        self.categories.push(name.to_string());
        Ok(())
    }

    /// Returns whether the category was present.
    pub fn remove_category(&mut self, name: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|existing| existing != name.trim());
        self.categories.len() != before
    }

    pub fn set_hide_completed(&mut self, hide: bool) {
        self.hide_completed = hide;
    }
}

fn parse_lead_time(value: Option<&str>) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_LEAD_TIME_MINUTES)
}

fn split_categories(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
