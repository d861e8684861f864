use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Moves backwards in a file to the beginning of a previous line.
/// Useful if you want to step through records without loading the whole file.
pub async fn seek_line_backwards(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<(), io::Error> {
    // We skip first new line that is right before the buffer, so that reading doesn't get stuck.
    // For example: need_to_read_this\nwe_are_here_now\n
    let mut need_to_skip = 1usize;
    loop {
        let leftover = file.stream_position().await?;
        if leftover == 0 {
            return Ok(());
        }
        let next_chunk = u64::min(leftover, buffer.len() as u64) as usize;
        file.seek(std::io::SeekFrom::Current(-(next_chunk as i64)))
            .await?;

        file.read_exact(&mut buffer[..next_chunk]).await?;
        let iter = buffer[..next_chunk].iter().rev().enumerate();
        let iter = iter.skip(need_to_skip);
        for (index, value) in iter {
            if *value == b'\n' {
                file.seek(std::io::SeekFrom::Current(-(index as i64)))
                    .await?;
                return Ok(());
            }
        }

        need_to_skip = need_to_skip.saturating_sub(1);
        file.seek(std::io::SeekFrom::Current(-(next_chunk as i64)))
            .await?;
    }
}

/// Reads one line starting at the current position. The returned string keeps
/// its terminating newline when the file has one, and the position is left on
/// the byte right after it. Returns [None] at end of file.
pub async fn read_line_forward(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<Option<String>, io::Error> {
    let mut line = Vec::new();
    loop {
        let read = file.read(buffer).await?;
        if read == 0 {
            return if line.is_empty() {
                Ok(None)
            } else {
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            };
        }
        if let Some(end) = buffer[..read].iter().position(|v| *v == b'\n') {
            line.extend_from_slice(&buffer[..=end]);
            // Put the cursor back onto the first byte after the newline.
            file.seek(std::io::SeekFrom::Current(-((read - end - 1) as i64)))
                .await?;
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        line.extend_from_slice(&buffer[..read]);
    }
}

/// Steps backwards line by line until a line whose first byte satisfies
/// `boundary` is found, leaving the position at the start of that line.
/// Returns false when no such line exists before the current position.
pub async fn seek_line_backwards_until(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
    boundary: impl Fn(u8) -> bool,
) -> Result<bool, io::Error> {
    loop {
        seek_line_backwards(file, buffer).await?;
        let line_start = file.stream_position().await?;
        let mut first = [0u8; 1];
        let read = file.read(&mut first).await?;
        file.seek(std::io::SeekFrom::Start(line_start)).await?;
        if read > 0 && boundary(first[0]) {
            return Ok(true);
        }
        if line_start == 0 {
            return Ok(false);
        }
    }
}
