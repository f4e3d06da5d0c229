//! Settings persistence boundary.
//!
//! The live settings service persists every accepted update before
//! publishing it in memory. What "durable" means is up to the embedding
//! application: the original deployments wrote a dotenv-style file, which
//! [`EnvFileSettingsStore`] reproduces; tests and demos use
//! [`InMemorySettingsStore`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::settings::IdpSettings;

/// Durable storage for provider settings.
///
/// `persist` must either durably record the full settings or fail with
/// [`AuthError::Persistence`]; partial writes that parse back differently
/// are a store bug, not something the caller can detect.
pub trait SettingsStore: Send + Sync + 'static {
    /// Read previously persisted settings, `None` when nothing was saved yet.
    fn load(&self) -> impl Future<Output = Result<Option<IdpSettings>, AuthError>> + Send;

    /// Durably record the given settings.
    fn persist(
        &self,
        settings: &IdpSettings,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// Object-safe wrapper for [`SettingsStore`].
pub(crate) trait SettingsStoreErased: Send + Sync {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdpSettings>, AuthError>> + Send + 'a>>;
    fn persist<'a>(
        &'a self,
        settings: &'a IdpSettings,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthError>> + Send + 'a>>;
}

impl<T: SettingsStore> SettingsStoreErased for T {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdpSettings>, AuthError>> + Send + 'a>> {
        Box::pin(SettingsStore::load(self))
    }

    fn persist<'a>(
        &'a self,
        settings: &'a IdpSettings,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthError>> + Send + 'a>> {
        Box::pin(SettingsStore::persist(self, settings))
    }
}

/// Settings store backed by a flat `KEY=value` file.
///
/// The write goes to a sibling temp file first and is renamed into place,
/// so a crash mid-write never leaves a truncated settings file behind.
#[derive(Clone, Debug)]
pub struct EnvFileSettingsStore {
    path: PathBuf,
}

impl EnvFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for EnvFileSettingsStore {
    async fn load(&self) -> Result<Option<IdpSettings>, AuthError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AuthError::Persistence(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };

        let pairs: Vec<(&str, &str)> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .collect();

        IdpSettings::from_pairs(pairs).map(Some)
    }

    async fn persist(&self, settings: &IdpSettings) -> Result<(), AuthError> {
        let mut contents = String::new();
        for (key, value) in settings.to_pairs() {
            contents.push_str(&key);
            contents.push('=');
            contents.push_str(&value);
            contents.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        let write = async {
            tokio::fs::write(&tmp, contents.as_bytes()).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(|err| {
            AuthError::Persistence(format!(
                "failed to write {}: {err}",
                self.path.display()
            ))
        })
    }
}

/// In-memory settings store for demos and tests.
///
/// Clones share the same backing storage. `set_failing(true)` makes every
/// subsequent `persist` fail, which is how the update-rejection path is
/// exercised.
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    inner: Arc<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    saved: Mutex<Option<IdpSettings>>,
    failing: AtomicBool,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// The most recently persisted settings, if any.
    pub async fn saved(&self) -> Option<IdpSettings> {
        self.inner.saved.lock().await.clone()
    }
}

impl SettingsStore for InMemorySettingsStore {
    async fn load(&self) -> Result<Option<IdpSettings>, AuthError> {
        Ok(self.inner.saved.lock().await.clone())
    }

    async fn persist(&self, settings: &IdpSettings) -> Result<(), AuthError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(AuthError::Persistence("persistence unavailable".into()));
        }
        *self.inner.saved.lock().await = Some(settings.clone());
        Ok(())
    }
}
