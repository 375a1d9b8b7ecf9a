//! Per-user settings with partial-merge updates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use confab_core::Result;
use confab_store::{DocumentStore, Filter};

use crate::types::{SettingsPatch, UserSettings};

pub const USER_SETTINGS: &str = "user_settings";

/// Stored shape: the settings fields plus the owning user id.
#[derive(Serialize, Deserialize)]
struct SettingsDoc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    user_id: String,
    #[serde(flatten)]
    settings: UserSettings,
}

pub struct SettingsService {
    store: Arc<dyn DocumentStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn find_doc(&self, user_id: &str) -> Result<Option<SettingsDoc>> {
        match self
            .store
            .find_one(USER_SETTINGS, &[Filter::eq("user_id", user_id)])
            .await?
        {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Stored record merged over defaults; users with no record get pure
    /// defaults.
    pub async fn get(&self, user_id: &str) -> Result<UserSettings> {
        Ok(self
            .find_doc(user_id)
            .await?
            .map(|doc| doc.settings)
            .unwrap_or_default())
    }

    /// Merge only the supplied fields into the stored record; the first
    /// update creates it.
    pub async fn update(&self, user_id: &str, patch: SettingsPatch) -> Result<UserSettings> {
        let existing = self.find_doc(user_id).await?;
        let mut settings = existing
            .as_ref()
            .map(|doc| doc.settings.clone())
            .unwrap_or_default();

        if let Some(customization) = patch.prompt_customization {
            settings.prompt_customization = customization;
        }
        if let Some(theme) = patch.theme {
            settings.theme = theme;
        }
        if let Some(language) = patch.language {
            settings.language = language;
        }

        match existing {
            Some(doc) => {
                self.store
                    .update(USER_SETTINGS, &doc.id, serde_json::to_value(&settings)?)
                    .await?;
            }
            None => {
                let doc = SettingsDoc {
                    id: String::new(),
                    user_id: user_id.to_string(),
                    settings: settings.clone(),
                };
                self.store
                    .create(USER_SETTINGS, serde_json::to_value(&doc)?)
                    .await?;
            }
        }
        Ok(settings)
    }
}
