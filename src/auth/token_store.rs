use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::auth::credential::Credential;
use crate::error::{IngestError, Result};

/// Where the credential lives between runs.
pub trait TokenStore {
    /// `Ok(None)` when nothing usable is stored: missing, or unreadable as a credential.
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// `token.json` on disk, replaced atomically on save.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                log::warn!("cannot read {}: {e}; ignoring stored token", self.path.display());
                return Ok(None);
            }
        };
        match Credential::from_json(&s) {
            Ok(c) => Ok(Some(c)),
            Err(e) => {
                log::warn!("{} is not a usable token ({e}); ignoring it", self.path.display());
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let json = credential
            .to_json()
            .map_err(|e| IngestError::persistence(format!("cannot serialize token: {e}")))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;
        }

        // Write the sibling first; the target is only replaced once the bytes are on disk.
        let tmp = self.temp_path();
        let _ = fs::remove_file(&tmp);
        {
            let mut f = private_file(&tmp).map_err(|e| persist_err(&tmp, e))?;
            f.write_all(json.as_bytes())
                .and_then(|_| f.flush())
                .and_then(|_| f.sync_all())
                .map_err(|e| persist_err(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            persist_err(&self.path, e)
        })?;

        log::info!("saved token to {}", self.path.display());
        Ok(())
    }
}

/// The token carries a refresh token and client secret: owner read/write only.
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn persist_err(path: &Path, e: std::io::Error) -> IngestError {
    IngestError::persistence(format!("{}: {e}", path.display()))
}

/// In-memory store; counts saves so callers can check persistence happened.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<Credential>>,
    saves: Mutex<usize>,
}

impl MemoryTokenStore {
    pub fn new(initial: Option<Credential>) -> Self {
        Self {
            slot: Mutex::new(initial),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> Option<Credential> {
        self.slot.lock().map(|g| g.clone()).unwrap_or(None)
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|g| *g).unwrap_or(0)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.current())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| IngestError::persistence("token slot poisoned"))?;
        *slot = Some(credential.clone());
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}
