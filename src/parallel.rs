//! Batched, sentinel-terminated parallel bulk lookup over a [`TabixIndexedFile`].
//!
//! Each worker opens its own file handle (via the caller-supplied `open`
//! factory — independent readers, no shared mutable state), fetches its share
//! of the query list, and streams results back in batches of `batch_size`
//! followed by a terminal sentinel. The coordinator yields results in arrival
//! order, not input order; callers that need input order should carry their
//! own key in `K` and sort afterward.

use crate::indexed::TabixIndexedFile;
use crate::Error;
use std::collections::VecDeque;
use std::io::{Read, Seek};
use std::sync::mpsc::{channel, Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Arc;

const YIELD_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);

/// Poll a channel without blocking a rayon worker thread: try a non-blocking
/// receive first, then cooperatively yield to other rayon tasks before
/// falling back to a bounded blocking wait.
fn receive_or_yield<R>(receiver: &Receiver<R>) -> Result<R, RecvError> {
    loop {
        match receiver.try_recv() {
            Ok(t) => return Ok(t),
            Err(TryRecvError::Empty) => match rayon::yield_now() {
                None => return receiver.recv(),
                Some(rayon::Yield::Executed) => continue,
                Some(rayon::Yield::Idle) => match receiver.recv_timeout(YIELD_TIMEOUT) {
                    Ok(t) => return Ok(t),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Err(RecvError),
                },
            },
            Err(TryRecvError::Disconnected) => return Err(RecvError),
        }
    }
}

/// One query: caller-chosen key, target sequence name, and an inclusive
/// `[begin, end]` region.
pub struct Query<K> {
    pub key: K,
    pub chrom: String,
    pub begin: u64,
    pub end: u64,
}

/// The result of one [`Query`]: its key, paired with the fetched lines or the
/// error the worker hit while fetching them.
pub struct FetchResult<K> {
    pub key: K,
    pub result: Result<Vec<Vec<u8>>, Error>,
}

enum Message<K> {
    Batch(Vec<FetchResult<K>>),
    Done,
}

/// Run `queries` across `worker_count` workers, each opened independently via
/// `open`. Returns an iterator yielding [`FetchResult`]s in arrival order.
pub fn bulk_fetch<R, K, F>(
    open: F,
    queries: Vec<Query<K>>,
    worker_count: usize,
    batch_size: usize,
) -> BulkFetchIter<K>
where
    R: Read + Seek,
    K: Send + 'static,
    F: Fn() -> Result<TabixIndexedFile<R>, Error> + Send + Sync + 'static,
{
    let worker_count = worker_count.max(1);
    let batch_size = batch_size.max(1);
    let (tx, rx) = channel::<Message<K>>();
    let open = Arc::new(open);

    let chunks = partition(queries, worker_count);
    let active = chunks.len();

    for chunk in chunks {
        let tx = tx.clone();
        let open = Arc::clone(&open);
        rayon::spawn(move || {
            let mut file = match open() {
                Ok(file) => file,
                Err(_) => {
                    let failed: Vec<FetchResult<K>> = chunk
                        .into_iter()
                        .map(|q| FetchResult {
                            key: q.key,
                            result: Err(Error::Other("worker failed to open indexed file")),
                        })
                        .collect();
                    let _ = tx.send(Message::Batch(failed));
                    let _ = tx.send(Message::Done);
                    return;
                }
            };

            let mut batch = Vec::with_capacity(batch_size);
            for query in chunk {
                let result = file.fetch(&query.chrom, query.begin, query.end);
                batch.push(FetchResult {
                    key: query.key,
                    result,
                });
                if batch.len() >= batch_size {
                    if tx.send(Message::Batch(std::mem::take(&mut batch))).is_err() {
                        return;
                    }
                }
            }
            if !batch.is_empty() {
                let _ = tx.send(Message::Batch(batch));
            }
            let _ = tx.send(Message::Done);
        });
    }
    drop(tx);

    BulkFetchIter {
        rx,
        pending: VecDeque::new(),
        active,
    }
}

fn partition<K>(queries: Vec<Query<K>>, worker_count: usize) -> Vec<Vec<Query<K>>> {
    let total = queries.len();
    if total == 0 {
        return Vec::new();
    }
    let worker_count = worker_count.min(total).max(1);
    let chunk_size = (total + worker_count - 1) / worker_count;
    let mut chunks = Vec::new();
    let mut remaining = queries;
    while !remaining.is_empty() {
        let take = chunk_size.min(remaining.len());
        let rest = remaining.split_off(take);
        chunks.push(remaining);
        remaining = rest;
    }
    chunks
}

/// Iterator over [`FetchResult`]s, yielded in arrival order as workers finish
/// their batches. Dropping the iterator before exhaustion leaves any
/// in-flight workers to finish and drop their own (disconnected) sender.
pub struct BulkFetchIter<K> {
    rx: Receiver<Message<K>>,
    pending: VecDeque<FetchResult<K>>,
    active: usize,
}

impl<K> Iterator for BulkFetchIter<K> {
    type Item = FetchResult<K>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.active == 0 {
                return None;
            }
            match receive_or_yield(&self.rx) {
                Ok(Message::Batch(batch)) => self.pending.extend(batch),
                Ok(Message::Done) => self.active -= 1,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tabix::IndexBuilder;
    use crate::write::BgzfWriter;
    use crate::Compression;
    use std::io::{Cursor, Write};

    fn make_vcf_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        writer
            .write_all(
                b"##fileformat=VCFv4.2\n\
                  #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                  1\t1000\trs1\tA\tG\t.\tPASS\t.\n\
                  1\t2000\trs2\tA\tG\t.\tPASS\t.\n\
                  22\t500000\trs3\tA\tG\t.\tPASS\t.\n",
            )
            .unwrap();
        writer.close().unwrap();
        buf
    }

    #[test]
    fn fetches_every_query_exactly_once() {
        let vcf = Arc::new(make_vcf_bytes());
        let index = Arc::new(IndexBuilder::build_from(&vcf[..]).unwrap());

        let queries = vec![
            Query {
                key: 0usize,
                chrom: "1".to_string(),
                begin: 1000,
                end: 1000,
            },
            Query {
                key: 1,
                chrom: "1".to_string(),
                begin: 2000,
                end: 2000,
            },
            Query {
                key: 2,
                chrom: "22".to_string(),
                begin: 500_000,
                end: 500_000,
            },
            Query {
                key: 3,
                chrom: "ZZ".to_string(),
                begin: 1,
                end: 1,
            },
        ];

        let vcf_for_open = Arc::clone(&vcf);
        let index_for_open = Arc::clone(&index);
        let results: Vec<_> = bulk_fetch(
            move || TabixIndexedFile::new(Cursor::new((*vcf_for_open).clone()), (*index_for_open).clone()),
            queries,
            2,
            2,
        )
        .collect();

        assert_eq!(results.len(), 4);
        let mut by_key: std::collections::HashMap<usize, Vec<Vec<u8>>> = results
            .into_iter()
            .map(|r| (r.key, r.result.unwrap()))
            .collect();
        assert_eq!(by_key.remove(&0).unwrap().len(), 1);
        assert_eq!(by_key.remove(&1).unwrap().len(), 1);
        assert_eq!(by_key.remove(&2).unwrap().len(), 1);
        assert_eq!(by_key.remove(&3).unwrap().len(), 0);
    }
}
