use std::path::Path;

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::{
    fs::operations::{read_line_forward, seek_line_backwards, seek_line_backwards_until},
    model::{format_record, LogEntry},
    utils::time::local_time_of_millis,
};

const SCAN_BUFFER_LEN: usize = 1024;

/// Append-mostly store for one user's ping log. Keeps the file in ascending
/// timestamp order and caches the last recorded timestamp so the common
/// append case never reads the file at all.
pub struct PingLog<F> {
    file: F,
    last_timestamp: Option<i64>,
}

impl PingLog<File> {
    /// Opens or creates the log file and discovers the last recorded
    /// timestamp with a single backward scan.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        Self::from_file(file).await
    }
}

impl<F: AsyncSeek + AsyncRead + AsyncWrite + AsyncFileExt + Unpin> PingLog<F> {
    pub async fn from_file(mut file: F) -> Result<Self> {
        let last_timestamp = Self::find_last_timestamp(&mut file).await?;
        debug!("Opened ping log, last timestamp {last_timestamp:?}");
        Ok(Self {
            file,
            last_timestamp,
        })
    }

    /// The last recorded timestamp, or [None] when the file has no
    /// timestamped lines yet.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Records a ping. `timestamp_millis` is truncated to second resolution,
    /// which is what the on-disk format stores.
    ///
    /// Timestamps above the cached last one are appended at the end of the
    /// file. Anything else is a retroactive record and gets spliced in at
    /// the first line whose timestamp is not below it, shifting the rest of
    /// the file down. A crash in the middle of that rewrite can corrupt the
    /// tail; there is no journal.
    pub async fn append_or_insert(&mut self, timestamp_millis: i64, data: &str) -> Result<()> {
        // Semi-safe acquire-release for a file
        self.file.lock_exclusive()?;
        let result = Self::insert_with_file(
            &mut self.file,
            &mut self.last_timestamp,
            timestamp_millis,
            data,
        )
        .await;
        self.file.unlock_async().await?;
        result
    }

    /// Records a ping that was generated after the fact, marking it so
    /// retro entries are distinguishable from live ones.
    pub async fn log_retro(&mut self, timestamp_millis: i64, data: &str) -> Result<()> {
        self.append_or_insert(timestamp_millis, &format!("{data} RETRO"))
            .await
    }

    /// Reads every well-formed record in file order. Lines without a leading
    /// timestamp are skipped the same way the insertion scan skips them.
    pub async fn read_entries(&mut self) -> Result<Vec<LogEntry>> {
        self.file.lock_shared()?;
        let result = Self::read_entries_with_file(&mut self.file).await;
        self.file.unlock_async().await?;
        result
    }

    async fn read_entries_with_file(file: &mut F) -> Result<Vec<LogEntry>> {
        let mut buffer = vec![0; SCAN_BUFFER_LEN];
        file.seek(std::io::SeekFrom::Start(0)).await?;
        let mut entries = Vec::new();
        while let Some(line) = read_line_forward(file, &mut buffer).await? {
            match LogEntry::parse(&line) {
                Some(entry) => entries.push(entry),
                None => {
                    if !line.trim().is_empty() {
                        warn!("Skipping malformed log line {line:?}");
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn insert_with_file(
        file: &mut F,
        last_timestamp: &mut Option<i64>,
        timestamp_millis: i64,
        data: &str,
    ) -> Result<()> {
        let timestamp = timestamp_millis / 1000;
        let record = format_record(timestamp, data, local_time_of_millis(timestamp_millis));

        if last_timestamp.map_or(true, |last| timestamp > last) {
            file.seek(std::io::SeekFrom::End(0)).await?;
            file.write_all(record.as_bytes()).await?;
            file.flush().await?;
            // The cache only tracks the true end of the file, retro inserts
            // below never touch it.
            *last_timestamp = Some(timestamp);
            return Ok(());
        }

        let offset = Self::find_insertion_offset(file, timestamp).await?;
        let end = file.seek(std::io::SeekFrom::End(0)).await?;
        debug_assert!(offset <= end);

        // Buffer everything from the insertion point onward so existing
        // records survive the rewrite byte for byte.
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut tail = Vec::with_capacity((end - offset) as usize);
        file.read_to_end(&mut tail).await?;

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(record.as_bytes()).await?;
        file.write_all(&tail).await?;
        file.flush().await?;
        Ok(())
    }

    /// Finds the byte offset of the first line whose timestamp is not below
    /// `timestamp`, scanning backwards from the end since late records
    /// almost always belong near it. The scan reads the preceding line
    /// before settling on an offset, so the "fits right before the last
    /// line" case is verified instead of assumed.
    async fn find_insertion_offset(file: &mut F, timestamp: i64) -> Result<u64> {
        let mut buffer = vec![0; SCAN_BUFFER_LEN];
        let end = file.seek(std::io::SeekFrom::End(0)).await?;
        let mut insert_at = end;
        let mut scan_from = end;

        while scan_from > 0 {
            file.seek(std::io::SeekFrom::Start(scan_from)).await?;
            seek_line_backwards(file, &mut buffer).await?;
            let line_start = file.stream_position().await?;
            let line = read_line_forward(file, &mut buffer)
                .await?
                .unwrap_or_default();

            match LogEntry::parse_timestamp(&line) {
                Some(existing) if existing < timestamp => return Ok(insert_at),
                Some(_) => insert_at = line_start,
                None => {
                    // A line without a timestamp makes the backward walk
                    // ambiguous. Restart from the top of the file instead.
                    warn!("Found line without a timestamp, scanning forward: {line:?}");
                    return Self::find_insertion_offset_forward(file, timestamp).await;
                }
            }
            scan_from = line_start;
        }

        Ok(insert_at)
    }

    async fn find_insertion_offset_forward(file: &mut F, timestamp: i64) -> Result<u64> {
        let mut buffer = vec![0; SCAN_BUFFER_LEN];
        file.seek(std::io::SeekFrom::Start(0)).await?;
        loop {
            let offset = file.stream_position().await?;
            let Some(line) = read_line_forward(file, &mut buffer).await? else {
                return Ok(offset);
            };
            match LogEntry::parse_timestamp(&line) {
                Some(existing) if existing >= timestamp => return Ok(offset),
                _ => {}
            }
        }
    }

    async fn find_last_timestamp(file: &mut F) -> Result<Option<i64>> {
        let mut buffer = vec![0; SCAN_BUFFER_LEN];
        file.seek(std::io::SeekFrom::End(0)).await?;
        let found =
            seek_line_backwards_until(file, &mut buffer, |v| v.is_ascii_digit()).await?;
        if !found {
            return Ok(None);
        }
        let line = read_line_forward(file, &mut buffer)
            .await?
            .unwrap_or_default();
        Ok(LogEntry::parse_timestamp(&line))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use tempfile::tempfile;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use crate::{
        model::{LogEntry, RECORD_PAD_WIDTH},
        utils::logging::TEST_LOGGING,
    };

    use super::PingLog;

    async fn read_all(log: &mut PingLog<tokio::fs::File>) -> Result<String> {
        log.file.rewind().await?;
        let mut content = String::new();
        log.file.read_to_string(&mut content).await?;
        Ok(content)
    }

    fn timestamps(content: &str) -> Vec<i64> {
        content
            .lines()
            .filter_map(LogEntry::parse_timestamp)
            .collect()
    }

    #[tokio::test]
    async fn test_append_in_order() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        assert_eq!(log.last_timestamp(), None);

        log.append_or_insert(100_000, "first").await?;
        log.append_or_insert(200_000, "second").await?;
        log.append_or_insert(300_000, "third").await?;

        assert_eq!(log.last_timestamp(), Some(300));
        let content = read_all(&mut log).await?;
        assert_eq!(timestamps(&content), vec![100, 200, 300]);
        Ok(())
    }

    #[tokio::test]
    async fn test_append_leaves_existing_bytes_untouched() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        log.append_or_insert(100_000, "a").await?;
        log.append_or_insert(200_000, "b").await?;
        let before = read_all(&mut log).await?;

        log.append_or_insert(300_000, "c").await?;

        let after = read_all(&mut log).await?;
        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_retro_insert_keeps_existing_records_intact() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        log.append_or_insert(100_000, "a").await?;
        log.append_or_insert(200_000, "b").await?;
        log.append_or_insert(300_000, "c").await?;

        let before = read_all(&mut log).await?;
        let original_lines = before.lines().map(str::to_owned).collect::<Vec<_>>();

        log.append_or_insert(150_000, "late").await?;

        let content = read_all(&mut log).await?;
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(timestamps(&content), vec![100, 150, 200, 300]);
        // Existing records moved but were not rewritten.
        assert_eq!(lines[0], original_lines[0]);
        assert_eq!(lines[2], original_lines[1]);
        assert_eq!(lines[3], original_lines[2]);
        // Retro inserts never touch the append cache.
        assert_eq!(log.last_timestamp(), Some(300));
        Ok(())
    }

    #[tokio::test]
    async fn test_retro_insert_before_every_record() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        log.append_or_insert(200_000, "a").await?;
        log.append_or_insert(300_000, "b").await?;

        log.append_or_insert(100_000, "early").await?;

        let content = read_all(&mut log).await?;
        assert_eq!(timestamps(&content), vec![100, 200, 300]);
        Ok(())
    }

    #[tokio::test]
    async fn test_ordering_invariant_under_shuffled_arrivals() -> Result<()> {
        *TEST_LOGGING;
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        for timestamp in [500i64, 100, 300, 200, 400, 250, 250, 600] {
            log.append_or_insert(timestamp * 1000, "tag").await?;
        }

        let content = read_all(&mut log).await?;
        let found = timestamps(&content);
        assert_eq!(found.len(), 8);
        assert!(found.windows(2).all(|v| v[0] <= v[1]), "unsorted: {found:?}");
        Ok(())
    }

    #[tokio::test]
    async fn test_records_are_padded() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        log.append_or_insert(100_000, "tag1 tag2").await?;

        let content = read_all(&mut log).await?;
        assert_eq!(content.find('[').unwrap(), RECORD_PAD_WIDTH);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_timestamp_recovered_from_existing_file() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(b"1000 old entry\n2000 newer entry\n")?;
        let file = tokio::fs::File::from_std(file);

        let log = PingLog::from_file(file).await?;
        assert_eq!(log.last_timestamp(), Some(2000));
        Ok(())
    }

    #[tokio::test]
    async fn test_last_timestamp_skips_trailing_garbage() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(b"1000 old entry\nnot a record\n")?;
        let file = tokio::fs::File::from_std(file);

        let log = PingLog::from_file(file).await?;
        assert_eq!(log.last_timestamp(), Some(1000));
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_falls_back_to_forward_scan_on_malformed_line() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(b"100 a\nnot a record\n300 c\n")?;
        let file = tokio::fs::File::from_std(file);

        let mut log = PingLog::from_file(file).await?;
        log.append_or_insert(200_000, "late").await?;

        let content = read_all(&mut log).await?;
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "100 a");
        assert_eq!(lines[1], "not a record");
        assert!(lines[2].starts_with("200 late"));
        assert_eq!(lines[3], "300 c");
        Ok(())
    }

    #[tokio::test]
    async fn test_log_retro_marks_entries() -> Result<()> {
        let file = tokio::fs::File::from_std(tempfile()?);
        let mut log = PingLog::from_file(file).await?;

        log.log_retro(100_000, "afk").await?;

        let entries = log.read_entries().await?;
        assert_eq!(
            entries,
            vec![LogEntry {
                timestamp: 100,
                tags: "afk RETRO".into()
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_read_entries_skips_malformed_lines() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(b"100 a\ngarbage\n200 b\n")?;
        let file = tokio::fs::File::from_std(file);

        let mut log = PingLog::from_file(file).await?;
        let entries = log.read_entries().await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, 100);
        assert_eq!(entries[1].timestamp, 200);
        Ok(())
    }
}
