use super::descriptor::CommandDescriptor;
use std::any::Any;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tgbot_command_abi::UNIT_MARKER;

/// An opened unit. What `inner` holds is up to the loader that opened it.
#[derive(Clone)]
pub struct UnitHandle {
    path: PathBuf,
    inner: Arc<dyn Any + Send + Sync>,
}

impl UnitHandle {
    pub fn new(path: impl Into<PathBuf>, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            path: path.into(),
            inner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// The resolved `loadcmd` entry. Called with the command name derived from
/// the file name; `Ok(None)` means the unit refused to load.
pub type EntryFn = Arc<dyn Fn(&str) -> anyhow::Result<Option<CommandDescriptor>> + Send + Sync>;

/// Platform seam for opening units. Implementations must be callable from
/// blocking threads.
pub trait DynamicUnitLoader: Send + Sync {
    fn open(&self, path: &Path) -> anyhow::Result<UnitHandle>;

    fn resolve_entry(&self, unit: &UnitHandle) -> anyhow::Result<EntryFn>;

    /// Releases the loader's reference. Handlers still in flight may keep
    /// the unit mapped until they finish.
    fn close(&self, unit: UnitHandle);
}

/// `libcmd_echo.so` → `echo` (prefix and extension follow the platform).
pub fn command_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name
        .strip_prefix(DLL_PREFIX)?
        .strip_prefix(UNIT_MARKER)?
        .strip_suffix(DLL_EXTENSION)?
        .strip_suffix('.')?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// File name a unit providing `command` must have on this platform.
pub fn unit_file_name(command: &str) -> String {
    format!("{DLL_PREFIX}{UNIT_MARKER}{command}.{DLL_EXTENSION}")
}
