use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;

use smartaq_core::{RuntimeConfig, ScheduleEntry};

/// Last application time per output channel, in seconds of the week.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    #[serde(rename = "channelTimes")]
    pub channel_times: Vec<Option<u32>>,
}

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedule_path: Arc<PathBuf>,
    channel_state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("SMARTAQ_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.smartaq"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedule_path: Arc::new(data_dir.join("schedule.json")),
            channel_state_path: Arc::new(data_dir.join("channel_state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        self.load(&self.runtime_path).await
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        self.save(&self.runtime_path, runtime).await
    }

    pub async fn load_schedule(&self) -> anyhow::Result<Vec<ScheduleEntry<f32>>> {
        self.load(&self.schedule_path).await
    }

    pub async fn save_schedule(&self, entries: &[ScheduleEntry<f32>]) -> anyhow::Result<()> {
        self.save(&self.schedule_path, entries).await
    }

    pub async fn load_channel_state(&self) -> anyhow::Result<ChannelState> {
        self.load(&self.channel_state_path).await
    }

    pub async fn save_channel_state(&self, state: &ChannelState) -> anyhow::Result<()> {
        self.save(&self.channel_state_path, state).await
    }

    async fn load<T>(&self, path: &Path) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice::<T>(&raw)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn save<T>(&self, path: &Path, value: &T) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use smartaq_core::{time::hms, DayOfWeek, TransitionMode};

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("smartaq-store-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_files_load_defaults() {
        let store = AppStore::new(scratch_dir("missing"));

        assert_eq!(store.load_runtime_config().await.unwrap(), RuntimeConfig::default());
        assert!(store.load_schedule().await.unwrap().is_empty());
        assert_eq!(store.load_channel_state().await.unwrap(), ChannelState::default());
    }

    #[tokio::test]
    async fn saved_files_load_back() {
        let dir = scratch_dir("saved");
        let store = AppStore::new(&dir);

        let mut runtime = RuntimeConfig::default();
        runtime.schedule.transition = TransitionMode::SingleShot;
        store.save_runtime_config(&runtime).await.unwrap();

        let entries = vec![ScheduleEntry {
            day: DayOfWeek::Friday,
            time_of_day: hms(9, 30, 0),
            channel: 2,
            value: 75.0,
        }];
        store.save_schedule(&entries).await.unwrap();

        let state = ChannelState {
            channel_times: vec![Some(120), None],
        };
        store.save_channel_state(&state).await.unwrap();

        assert_eq!(store.load_runtime_config().await.unwrap(), runtime);
        assert_eq!(store.load_schedule().await.unwrap(), entries);
        assert_eq!(store.load_channel_state().await.unwrap(), state);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = scratch_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("schedule.json"), b"{ not json").await.unwrap();

        let store = AppStore::new(&dir);
        let err = store.load_schedule().await.unwrap_err();
        assert!(format!("{err:#}").contains("schedule.json"));

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
