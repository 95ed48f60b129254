//! Encrypted credential vault.
//!
//! Provider profiles are stored in one file sealed with a key derived from a
//! user passphrase ([`envelope`], [`kdf`]). The [`Vault`] session starts
//! locked; a successful [`Vault::load`] or [`Vault::save`] unlocks it and
//! keeps the derived key and profiles in memory until [`Vault::lock`] or the
//! idle timeout, at which point both are wiped.
//!
//! Key material sits behind one async mutex, so derivations, reads and
//! rewrites never interleave. Log lines mention profile names and provider
//! kinds only.

pub mod envelope;
pub mod kdf;

pub use envelope::VaultEnvelope;
pub use kdf::DerivedKey;

use crate::config::{KdfParams, VaultConfig};
use crate::error::CryptoError;
use crate::pipeline::export::write_atomic;
use crate::provider::ProviderProfile;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

struct Session {
    key: DerivedKey,
    salt: [u8; kdf::SALT_LENGTH],
    kdf: KdfParams,
    profiles: Vec<ProviderProfile>,
    last_used: Instant,
}

impl Drop for Session {
    fn drop(&mut self) {
        for p in &mut self.profiles {
            p.api_key.zeroize();
        }
    }
}

/// Passphrase-protected store of [`ProviderProfile`]s backed by one file.
pub struct Vault {
    path: PathBuf,
    kdf: KdfParams,
    idle_timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// `idle_timeout_secs == 0` disables the idle lock.
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            path: config.path.clone(),
            kdf: config.kdf,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            session: Mutex::new(None),
        }
    }

    /// Override the idle timeout with sub-second precision.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypt the vault file and unlock the session.
    ///
    /// A missing file unlocks an empty vault; the first save creates it.
    /// On failure the session is left as it was.
    pub async fn load(&self, passphrase: &str) -> Result<Vec<ProviderProfile>, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyPassphrase);
        }
        let mut guard = self.session.lock().await;
        let passphrase = Zeroizing::new(passphrase.to_string());

        let session = match self.read_file().await? {
            Some(bytes) => {
                let envelope = VaultEnvelope::from_bytes(&bytes)?;
                let (salt, kdf) = (envelope.salt, envelope.kdf);
                let (profiles, key) = blocking(move || envelope.open(&passphrase)).await?;
                Session {
                    key,
                    salt,
                    kdf,
                    profiles,
                    last_used: Instant::now(),
                }
            }
            None => {
                let kdf = self.kdf;
                let salt = kdf::generate_salt();
                let key =
                    blocking(move || kdf::derive_key(passphrase.as_bytes(), &salt, &kdf)).await?;
                debug!(path = %self.path.display(), "No vault file yet");
                Session {
                    key,
                    salt,
                    kdf,
                    profiles: Vec::new(),
                    last_used: Instant::now(),
                }
            }
        };

        let profiles = session.profiles.clone();
        info!(
            path = %self.path.display(),
            profiles = ?profile_names(&profiles),
            "Vault unlocked"
        );
        *guard = Some(session);
        Ok(profiles)
    }

    /// Seal `profiles` under `passphrase` with a fresh salt and nonce,
    /// replace the vault file, and unlock the session.
    pub async fn save(
        &self,
        passphrase: &str,
        profiles: Vec<ProviderProfile>,
    ) -> Result<(), CryptoError> {
        envelope::check_profiles(&profiles)?;
        let mut guard = self.session.lock().await;

        let passphrase = Zeroizing::new(passphrase.to_string());
        let kdf = self.kdf;
        let (sealed, key, profiles) = blocking(move || {
            let (sealed, key) = VaultEnvelope::seal(&passphrase, &profiles, &kdf)?;
            Ok((sealed, key, profiles))
        })
        .await?;
        self.write_file(sealed.to_bytes()).await?;

        info!(
            path = %self.path.display(),
            profiles = ?profile_names(&profiles),
            "Vault saved"
        );
        *guard = Some(Session {
            key,
            salt: sealed.salt,
            kdf,
            profiles,
            last_used: Instant::now(),
        });
        Ok(())
    }

    /// Replace the profile list of an unlocked vault without the passphrase.
    ///
    /// Reuses the session key and salt under a fresh nonce.
    pub async fn update_profiles(&self, profiles: Vec<ProviderProfile>) -> Result<(), CryptoError> {
        envelope::check_profiles(&profiles)?;
        let mut guard = self.session.lock().await;
        let session = self.live_session(&mut guard)?;

        let sealed = VaultEnvelope::seal_with_key(&session.key, session.salt, session.kdf, &profiles)?;
        self.write_file(sealed.to_bytes()).await?;

        info!(profiles = ?profile_names(&profiles), "Vault profiles updated");
        session.profiles = profiles;
        Ok(())
    }

    /// Profiles of the unlocked vault.
    pub async fn profiles(&self) -> Result<Vec<ProviderProfile>, CryptoError> {
        let mut guard = self.session.lock().await;
        Ok(self.live_session(&mut guard)?.profiles.clone())
    }

    /// The named profile, or the first enabled one when `name` is `None`.
    pub async fn active_profile(&self, name: Option<&str>) -> Result<ProviderProfile, CryptoError> {
        let mut guard = self.session.lock().await;
        let session = self.live_session(&mut guard)?;
        match name {
            Some(name) => {
                let profile = session
                    .profiles
                    .iter()
                    .find(|p| p.name == name)
                    .ok_or_else(|| CryptoError::UnknownProfile {
                        name: name.to_string(),
                    })?;
                if !profile.enabled {
                    return Err(CryptoError::InvalidProfile {
                        name: name.to_string(),
                        reason: "profile is disabled".into(),
                    });
                }
                Ok(profile.clone())
            }
            None => session
                .profiles
                .iter()
                .find(|p| p.enabled)
                .cloned()
                .ok_or(CryptoError::NoEnabledProfile),
        }
    }

    /// Wipe key and profiles from memory.
    pub async fn lock(&self) {
        if self.session.lock().await.take().is_some() {
            info!("Vault locked");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        let mut guard = self.session.lock().await;
        self.expire_if_idle(&mut guard);
        guard.is_some()
    }

    /// Background task that locks the vault once it has been idle for the
    /// timeout. Ends when the vault is dropped.
    pub fn spawn_idle_watchdog(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.idle_timeout.is_zero() {
            return None;
        }
        let period = (self.idle_timeout / 4).max(Duration::from_millis(10));
        let weak: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(vault) = weak.upgrade() else { break };
                let mut guard = vault.session.lock().await;
                vault.expire_if_idle(&mut guard);
            }
        }))
    }

    fn expire_if_idle(&self, slot: &mut Option<Session>) -> bool {
        let idle = match slot {
            Some(s) => !self.idle_timeout.is_zero() && s.last_used.elapsed() >= self.idle_timeout,
            None => return false,
        };
        if idle {
            *slot = None;
            info!(idle_secs = self.idle_timeout.as_secs(), "Vault locked after inactivity");
        }
        idle
    }

    fn live_session<'a>(&self, slot: &'a mut Option<Session>) -> Result<&'a mut Session, CryptoError> {
        self.expire_if_idle(slot);
        let session = slot.as_mut().ok_or(CryptoError::Locked)?;
        session.last_used = Instant::now();
        Ok(session)
    }

    async fn read_file(&self) -> Result<Option<Vec<u8>>, CryptoError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CryptoError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_file(&self, bytes: Vec<u8>) -> Result<(), CryptoError> {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|r| r);
        result.map_err(|source| CryptoError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn profile_names(profiles: &[ProviderProfile]) -> Vec<String> {
    profiles
        .iter()
        .map(|p| format!("{} ({})", p.name, p.provider))
        .collect()
}

async fn blocking<T, F>(f: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::CipherInit(format!("key derivation task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    fn vault(dir: &tempfile::TempDir) -> Vault {
        Vault::new(&VaultConfig {
            path: dir.path().join("profiles.enc"),
            idle_timeout_secs: 0,
            kdf: KdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
        })
    }

    fn openai(name: &str) -> ProviderProfile {
        ProviderProfile::new(name, ProviderKind::OpenAi, format!("sk-{name}-key"))
    }

    #[tokio::test]
    async fn starts_locked() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        assert!(!v.is_unlocked().await);
        assert!(matches!(v.profiles().await, Err(CryptoError::Locked)));
    }

    #[tokio::test]
    async fn missing_file_unlocks_empty() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        assert!(v.load("p@ss").await.unwrap().is_empty());
        assert!(v.is_unlocked().await);
        assert!(!v.path().exists());
    }

    #[tokio::test]
    async fn update_reuses_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        v.save("p@ss", vec![openai("a")]).await.unwrap();
        v.update_profiles(vec![openai("a"), openai("b")]).await.unwrap();

        let fresh = vault(&dir);
        let names: Vec<String> = fresh
            .load("p@ss")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn update_requires_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        assert!(matches!(
            v.update_profiles(vec![openai("a")]).await,
            Err(CryptoError::Locked)
        ));
    }

    #[tokio::test]
    async fn lock_wipes_session() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        v.save("p@ss", vec![openai("a")]).await.unwrap();
        v.lock().await;
        assert!(matches!(v.active_profile(None).await, Err(CryptoError::Locked)));
        assert_eq!(v.load("p@ss").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_profile_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        let mut off = openai("off");
        off.enabled = false;
        v.save("p@ss", vec![off, openai("on"), openai("second")]).await.unwrap();

        assert_eq!(v.active_profile(None).await.unwrap().name, "on");
        assert_eq!(v.active_profile(Some("second")).await.unwrap().name, "second");
        assert!(matches!(
            v.active_profile(Some("ghost")).await,
            Err(CryptoError::UnknownProfile { .. })
        ));
        assert!(matches!(
            v.active_profile(Some("off")).await,
            Err(CryptoError::InvalidProfile { .. })
        ));
    }

    #[tokio::test]
    async fn no_enabled_profile() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        v.load("p@ss").await.unwrap();
        assert!(matches!(
            v.active_profile(None).await,
            Err(CryptoError::NoEnabledProfile)
        ));
    }

    #[tokio::test]
    async fn idle_timeout_relocks() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir).with_idle_timeout(Duration::from_millis(50));
        v.save("p@ss", vec![openai("a")]).await.unwrap();
        assert!(v.is_unlocked().await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(v.profiles().await, Err(CryptoError::Locked)));
    }

    #[tokio::test]
    async fn watchdog_locks_without_access() {
        let dir = tempfile::tempdir().unwrap();
        let v = Arc::new(vault(&dir).with_idle_timeout(Duration::from_millis(40)));
        v.save("p@ss", vec![openai("a")]).await.unwrap();
        let handle = v.spawn_idle_watchdog().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(v.session.lock().await.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn rejected_save_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(&dir);
        v.save("p@ss", vec![openai("a")]).await.unwrap();
        let before = std::fs::read(v.path()).unwrap();

        let err = v.save("p@ss", vec![openai("a"), openai("a")]).await.unwrap_err();
        assert!(matches!(err, CryptoError::DuplicateProfileName { .. }));
        assert_eq!(std::fs::read(v.path()).unwrap(), before);
    }
}
