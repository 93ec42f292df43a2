use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{SettingsStore, StoreError};
use crate::device::DeviceSettings;

/// Keeps the latest snapshot in memory. Saves apply immediately.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<DeviceSettings>>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: DeviceSettings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> Option<DeviceSettings> {
        match self.settings.lock() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of `schedule_save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn replace(&self, next: Option<DeviceSettings>) {
        match self.settings.lock() {
            Ok(mut settings) => *settings = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<DeviceSettings>, StoreError> {
        Ok(self.saved())
    }

    fn schedule_save(&self, settings: DeviceSettings, _delay: Duration) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.replace(Some(settings));
    }

    async fn remove(&self) -> Result<(), StoreError> {
        self.replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_latest_and_counts_saves() {
        let store = MemorySettingsStore::new();
        assert!(store.load().await.unwrap().is_none());

        let mut settings = DeviceSettings::default();
        store.schedule_save(settings.clone(), Duration::ZERO);
        settings.target_humidity = 70;
        store.schedule_save(settings.clone(), Duration::ZERO);

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().await.unwrap(), Some(settings));

        store.remove().await.unwrap();
        assert!(store.saved().is_none());
    }
}
