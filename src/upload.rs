use crate::errors::{AppError, AppResult};
use crate::models::{TempFile, UploadedFile};
use chrono::{Datelike, Local, NaiveDate};
use md5::{Digest, Md5};
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

const TOKEN_BYTES: usize = 5;
const MAX_TOKEN_ATTEMPTS: usize = 8;

/// Moves spooled uploads into `{root}/{day fingerprint}/{random token}` and
/// reports them under the public prefix. A batch either lands completely or
/// is moved back to its temp paths.
#[derive(Debug, Clone)]
pub struct UploadAllocator {
    root: PathBuf,
    public_prefix: String,
}

impl UploadAllocator {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn allocate(&self, files: BTreeMap<String, TempFile>) -> AppResult<Vec<UploadedFile>> {
        self.allocate_on(Local::now().date_naive(), files).await
    }

    pub async fn allocate_on(&self, day: NaiveDate, files: BTreeMap<String, TempFile>) -> AppResult<Vec<UploadedFile>> {
        if files.is_empty() {
            return Err(AppError::Validation("At least one file".to_string()));
        }

        let fingerprint = day_fingerprint(day);
        let dir = self.root.join(&fingerprint);
        let mut used = HashSet::new();
        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        let mut uploaded = Vec::with_capacity(files.len());

        for (field, file) in files {
            match place(&dir, &file, &mut used).await {
                Ok((target, token)) => {
                    moved.push((file.path, target));
                    uploaded.push(UploadedFile {
                        size: file.size,
                        name: file.name,
                        mime_type: file.mime_type,
                        path: self.public_path(&fingerprint, &token),
                    });
                }
                Err(error) => {
                    tracing::warn!(field = %field, error = %error, moved = moved.len(), "upload batch failed; rolling back");
                    roll_back(moved).await;
                    return Err(error);
                }
            }
        }

        tracing::info!(count = uploaded.len(), day = %fingerprint, "upload batch stored");
        Ok(uploaded)
    }

    fn public_path(&self, fingerprint: &str, token: &str) -> String {
        format!("{}/{}/{}", self.public_prefix.trim_end_matches('/'), fingerprint, token)
    }
}

/// MD5 of `year-month0-day`: zero-based month, no zero padding. Stored paths
/// depend on this exact string.
pub fn day_fingerprint(day: impl Datelike) -> String {
    let raw = format!("{}-{}-{}", day.year(), day.month0(), day.day());
    hex::encode(Md5::digest(raw.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

async fn place(dir: &Path, file: &TempFile, used: &mut HashSet<String>) -> AppResult<(PathBuf, String)> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|error| AppError::Io(format!("create {}: {}", dir.display(), error)))?;

    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let token = random_token();
        let target = dir.join(&token);
        if used.contains(&token) || tokio::fs::try_exists(&target).await? {
            continue;
        }
        tokio::fs::rename(&file.path, &target)
            .await
            .map_err(|error| AppError::Io(format!("move {}: {}", file.path.display(), error)))?;
        used.insert(token.clone());
        return Ok((target, token));
    }

    Err(AppError::Internal(format!(
        "no free upload path after {} attempts",
        MAX_TOKEN_ATTEMPTS
    )))
}

async fn roll_back(moved: Vec<(PathBuf, PathBuf)>) {
    for (source, target) in moved.into_iter().rev() {
        if let Err(error) = tokio::fs::rename(&target, &source).await {
            tracing::warn!(
                stored = %target.display(),
                temp = %source.display(),
                error = %error,
                "failed to restore uploaded file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{day_fingerprint, UploadAllocator};
    use crate::errors::AppError;
    use crate::models::TempFile;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashSet};
    use std::path::Path;

    fn spool(dir: &Path, name: &str, body: &str) -> TempFile {
        let path = dir.join(format!("upload_{}", name));
        std::fs::write(&path, body).expect("write temp file");
        TempFile {
            path,
            size: body.len() as u64,
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
        }
    }

    #[test]
    fn fingerprint_uses_zero_based_unpadded_month() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("date");
        assert_eq!(day_fingerprint(day), "59ce0086cac08e09d08dfd42a0069a1f");
        let december = NaiveDate::from_ymd_opt(2026, 12, 31).expect("date");
        assert_eq!(day_fingerprint(december), "1dd7fdcf20c6dc0bdce21dc8000c0ab7");
    }

    #[tokio::test]
    async fn batch_gets_distinct_paths_and_moves_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool_dir = dir.path().join("spool");
        std::fs::create_dir_all(&spool_dir).expect("spool dir");
        let allocator = UploadAllocator::new(dir.path().join("upload"), "/upload/");

        let mut files = BTreeMap::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            files.insert(name.to_string(), spool(&spool_dir, name, name));
        }
        let sources: Vec<_> = files.values().map(|file| file.path.clone()).collect();

        let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("date");
        let uploaded = allocator.allocate_on(day, files).await.expect("allocate");

        assert_eq!(uploaded.len(), 3);
        let paths: HashSet<_> = uploaded.iter().map(|file| file.path.clone()).collect();
        assert_eq!(paths.len(), 3);
        for file in &uploaded {
            assert!(file.path.starts_with("/upload/59ce0086cac08e09d08dfd42a0069a1f/"));
            let token = file.path.rsplit('/').next().expect("token");
            assert_eq!(token.len(), 10);
            let stored = allocator.root().join("59ce0086cac08e09d08dfd42a0069a1f").join(token);
            assert_eq!(std::fs::read_to_string(stored).expect("stored"), file.name);
        }
        assert!(sources.iter().all(|source| !source.exists()));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allocator = UploadAllocator::new(dir.path(), "/upload");
        let error = allocator.allocate(BTreeMap::new()).await.expect_err("empty");
        assert!(matches!(error, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_move_restores_earlier_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allocator = UploadAllocator::new(dir.path().join("upload"), "/upload");

        let mut files = BTreeMap::new();
        let first = spool(dir.path(), "first.txt", "first");
        let first_path = first.path.clone();
        files.insert("a".to_string(), first);
        files.insert(
            "b".to_string(),
            TempFile {
                path: dir.path().join("vanished"),
                size: 0,
                name: "vanished".to_string(),
                mime_type: "text/plain".to_string(),
            },
        );

        let error = allocator.allocate(files).await.expect_err("second move fails");
        assert!(matches!(error, AppError::Io(_)));
        assert_eq!(std::fs::read_to_string(&first_path).expect("restored"), "first");
    }
}
