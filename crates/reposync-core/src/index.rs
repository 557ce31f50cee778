//! Asynchronous pull reader over a streamed index document.
//!
//! Bytes are parsed as they arrive; each completed repository or application
//! record is handed out as soon as its element closes, so memory stays bounded
//! by the largest single application rather than the whole document.

use std::collections::VecDeque;

use quick_xml::Reader;
use reposync_schema::{IndexDocument, IndexError, IndexRecord, RepoId};
use tokio::io::AsyncBufRead;

/// Pulls [`IndexRecord`]s out of an async byte source.
pub struct IndexReader<R> {
    reader: Reader<R>,
    document: IndexDocument,
    pending: VecDeque<IndexRecord>,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> IndexReader<R> {
    /// Read the index of repository `repo_id` from `source`.
    pub fn new(source: R, repo_id: RepoId) -> Self {
        Self {
            reader: Reader::from_reader(source),
            document: IndexDocument::new(repo_id),
            pending: VecDeque::new(),
            buf: Vec::new(),
            finished: false,
        }
    }

    /// Next completed record, or `None` at the end of a well-formed document.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the document is not well-formed or the
    /// source fails.
    pub async fn next_record(&mut self) -> Result<Option<IndexRecord>, IndexError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            if self.finished {
                return Ok(None);
            }
            self.buf.clear();
            let event = self.reader.read_event_into_async(&mut self.buf).await?;
            if !self.document.feed(event, &mut self.pending)? {
                self.finished = true;
            }
        }
    }
}
