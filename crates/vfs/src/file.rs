use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// 儲存目錄中的單一檔案。 / Handle to one file inside a storage directory.
///
/// Handles order by path, which keeps every traversal over a set of files
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageFile {
    path: PathBuf,
}

impl StorageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 檔名（不含目錄）。 / File name without its directory.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn is_file(&self) -> bool {
        self.path.is_file()
    }

    /// 最後修改時間；檔案不存在時回傳 `None`。 / Last modification time, `None` when the file is gone.
    pub fn timestamp(&self) -> Option<SystemTime> {
        fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok()
    }

    pub fn load_bytes(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// 以原子方式寫入；內容相同時略過並回傳 `false`。 / Writes atomically, skipping (and returning `false`) when the bytes are unchanged.
    pub fn write(&self, data: &[u8]) -> io::Result<bool> {
        match fs::read(&self.path) {
            Ok(existing) if existing == data => return Ok(false),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        write_atomic(&self.path, data)?;
        Ok(true)
    }

    pub fn delete(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// 列出目錄的直接子項，依路徑排序。 / Lists the direct children of a directory, sorted by path.
pub fn list_children(dir: &Path) -> io::Result<Vec<StorageFile>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        children.push(StorageFile::new(entry.path()));
    }
    children.sort();
    Ok(children)
}

/// Writes data atomically by using a temporary sibling file followed by rename.
/// 以臨時檔案搭配 rename 實現原子寫入。
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn write_skips_identical_content() {
        let dir = tempdir().unwrap();
        let file = StorageFile::new(dir.path().join("state.xml"));
        assert!(file.timestamp().is_none());

        assert!(file.write(b"<a />").unwrap());
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert!(!file.write(b"<a />").unwrap());
        assert_eq!(file.timestamp(), Some(past));
        assert!(file.write(b"<b />").unwrap());
        assert_eq!(file.load_bytes().unwrap(), b"<b />");
    }

    #[test]
    fn lists_children_sorted_without_temp_leftovers() {
        let dir = tempdir().unwrap();
        write_atomic(&dir.path().join("b.xml"), b"b").unwrap();
        write_atomic(&dir.path().join("a.xml"), b"a").unwrap();

        let names: Vec<_> = list_children(dir.path())
            .unwrap()
            .iter()
            .map(StorageFile::name)
            .collect();
        assert_eq!(names, vec!["a.xml", "b.xml"]);
    }
}
