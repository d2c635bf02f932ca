use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    time::SystemTime,
};

use futures::Stream;
use tracing::{debug, info, warn};

use super::Normalize;
use crate::pipeline::{Envelope, PipelineError, Source};

enum Inputs {
    Dir(PathBuf),
    Files(Vec<PathBuf>),
}

/// Batch source over raw files of one kind.
///
/// Each file is read, normalized and aligned on the blocking pool, then its
/// records are yielded in order. A file that fails is yielded as a single
/// `Err` item and the source moves on to the next file, so one bad export
/// never holds back the rest of the batch.
pub struct RawFileBatchSource<N> {
    normalizer: Arc<N>,
    inputs: Inputs,
}

impl<N: Normalize + 'static> RawFileBatchSource<N> {
    /// Every file in `dir` the normalizer accepts, in file-name order. A
    /// missing directory is an empty batch.
    pub fn from_dir<P: Into<PathBuf>>(normalizer: N, dir: P) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            inputs: Inputs::Dir(dir.into()),
        }
    }

    /// Exactly these files, regardless of their names.
    pub fn from_files(normalizer: N, files: Vec<PathBuf>) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            inputs: Inputs::Files(files),
        }
    }
}

async fn list_dir<N: Normalize>(normalizer: &N, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(kind = %normalizer.kind(), dir = %dir.display(), "raw directory missing, nothing to read");
            return Ok(Vec::new());
        }
        Err(e) => return Err(PipelineError::Source(format!("cannot list {}: {e}", dir.display()))),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::Source(format!("cannot list {}: {e}", dir.display())))?
    {
        let path = entry.path();
        let accepted = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| normalizer.matches(name));
        if accepted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn load_file<N: Normalize + 'static>(normalizer: Arc<N>, path: PathBuf) -> Result<Vec<N::Record>, PipelineError> {
    let origin = path.display().to_string();
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|e| PipelineError::Source(format!("cannot read {origin}: {e}")))?;

    tokio::task::spawn_blocking(move || -> Result<Vec<N::Record>, PipelineError> {
        let records = normalizer.normalize(&origin, &raw)?;
        Ok(normalizer.align(records))
    })
    .await
    .map_err(|e| PipelineError::Source(format!("normalizer task failed: {e}")))?
}

#[async_trait::async_trait]
impl<N> Source<N::Record> for RawFileBatchSource<N>
where
    N: Normalize + 'static,
{
    async fn stream(&self) -> Pin<Box<dyn Stream<Item = Result<Envelope<N::Record>, PipelineError>> + Send>> {
        let normalizer = self.normalizer.clone();
        let files = match &self.inputs {
            Inputs::Files(files) => Ok(files.clone()),
            Inputs::Dir(dir) => list_dir(normalizer.as_ref(), dir).await,
        };

        let s = async_stream::stream! {
            let files = match files {
                Ok(files) => files,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let kind = normalizer.kind();

            for path in files {
                match load_file(normalizer.clone(), path.clone()).await {
                    Ok(records) => {
                        debug!(%kind, file = %path.display(), records = records.len(), "raw file normalized");
                        let received_at = SystemTime::now();
                        for payload in records {
                            yield Ok(Envelope { payload, received_at });
                        }
                    }
                    Err(e) => {
                        warn!(%kind, file = %path.display(), error = %e, "raw file rejected");
                        metrics::counter!("normalize_file_errors_total", "kind" => kind.as_str()).increment(1);
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DayAheadPriceNormalizer;
    use futures::StreamExt;

    const GOOD: &str = "MARGINALPDBCPT;\n2024;04;01;1;60;50;\n*\n";
    const BAD: &str = "MARGINALPDBCPT;\n2024;04;01;1;60\n*\n";

    #[tokio::test]
    async fn bad_file_is_one_error_item_and_the_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marginalpdbcpt_20240401.1"), GOOD).unwrap();
        std::fs::write(dir.path().join("marginalpdbcpt_20240402.1"), BAD).unwrap();
        std::fs::write(dir.path().join("marginalpdbcpt_20240403.1"), GOOD.replace("04;01", "04;03")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = RawFileBatchSource::from_dir(DayAheadPriceNormalizer, dir.path());
        let items: Vec<_> = source.stream().await.collect().await;

        let errors = items.iter().filter(|i| i.is_err()).count();
        let records = items.iter().filter(|i| i.is_ok()).count();
        assert_eq!(errors, 1);
        assert_eq!(records, 2 * 96);
        assert!(matches!(items[96], Err(PipelineError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn missing_directory_is_an_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let source = RawFileBatchSource::from_dir(DayAheadPriceNormalizer, dir.path().join("absent"));
        let items: Vec<_> = source.stream().await.collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn explicit_files_ignore_the_name_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices-copy.txt");
        std::fs::write(&path, GOOD).unwrap();

        let source = RawFileBatchSource::from_files(DayAheadPriceNormalizer, vec![path]);
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 96);
    }
}
