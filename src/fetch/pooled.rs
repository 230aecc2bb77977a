use super::{FetchCallback, FetchRequest, RangeFetcher};

use std::sync::Arc;

/// Runs every request on a [`rayon::ThreadPool`] supplied by the host. Callbacks run on the pool thread that did the read, so
/// any decoding they do stays off the caller's thread.
#[derive(Clone)]
pub struct PooledFetcher {
    pool: Arc<rayon::ThreadPool>,
}

impl PooledFetcher {
    pub fn new(pool: Arc<rayon::ThreadPool>) -> Self {
        Self { pool }
    }

    /// Builds a dedicated pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("nexus-fetch-{}", i))
            .build()?;
        Ok(Self::new(Arc::new(pool)))
    }
}

impl RangeFetcher for PooledFetcher {
    fn fetch(&self, request: FetchRequest, on_complete: FetchCallback) {
        self.pool.spawn(move || {
            let result = request.read();
            if let Err(e) = &result {
                log::debug!(
                    "Read of {:?} from {} failed: {}",
                    request.range,
                    request.source.describe(),
                    e
                );
            }
            on_complete(result);
        });
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::fetch::{FetchError, MemorySource, RangeSource};
    use crate::format::ByteRange;

    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn completions_arrive_off_thread() {
        let fetcher = PooledFetcher::with_threads(2).unwrap();
        let source: Arc<dyn RangeSource> = Arc::new(MemorySource::new(vec![1, 2, 3, 4, 5]));
        let (tx, rx) = channel::unbounded();
        let caller = std::thread::current().id();

        for start in [0, 3, 9] {
            let tx = tx.clone();
            fetcher.fetch(
                FetchRequest::new(source.clone(), ByteRange::from_start_and_len(start, 2)),
                Box::new(move |result| {
                    tx.send((start, result, std::thread::current().id())).unwrap();
                }),
            );
        }

        let mut results: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        results.sort_by_key(|(start, _, _)| *start);

        assert_eq!(results[0].1, Ok(vec![1, 2]));
        assert_eq!(results[1].1, Ok(vec![4, 5]));
        assert!(matches!(results[2].1, Err(FetchError::OutOfBounds { .. })));
        assert!(results.iter().all(|(_, _, thread)| *thread != caller));
    }
}
