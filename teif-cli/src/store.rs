//! Certificate store backed by one JSON file per user.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use teif_core::service::{CertificateStore, StoreError};
use teif_core::vault::CertificateRecord;

pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for_user(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !user_id.starts_with('.');
        if !valid {
            return Err(StoreError::Unavailable(format!(
                "user id {user_id:?} is not usable as a file name"
            )));
        }
        Ok(self.base_path.join(format!("{user_id}.json")))
    }
}

impl CertificateStore for JsonFileStore {
    fn fetch(&self, user_id: &str) -> Result<Option<CertificateRecord>, StoreError> {
        let path = self.path_for_user(user_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    fn save(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        let path = self.path_for_user(&record.user_id)?;
        fs::create_dir_all(&self.base_path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.base_path.display())))?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomically(&path, json.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
