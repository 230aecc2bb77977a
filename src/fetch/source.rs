use super::FetchError;
use crate::format::ByteRange;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Blocking reads of byte ranges from a single static resource.
///
/// Ranges that run past the end are clipped, like an HTTP server answering a `Range` request. A range that starts past the end
/// is an error.
pub trait RangeSource: Send + Sync {
    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, FetchError>;

    /// A human-readable name for logs.
    fn describe(&self) -> String;
}

fn clip(range: ByteRange, len: u64) -> Result<(u64, u64), FetchError> {
    if range.start >= len {
        return Err(FetchError::OutOfBounds { range, len });
    }
    Ok((range.start, range.end_inclusive.min(len - 1) + 1))
}

/// A dataset that is already in memory.
#[derive(Clone)]
pub struct MemorySource {
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl RangeSource for MemorySource {
    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, FetchError> {
        let (start, end) = clip(range, self.bytes.len() as u64)?;
        Ok(self.bytes[start as usize..end as usize].to_vec())
    }

    fn describe(&self) -> String {
        format!("<memory, {} bytes>", self.bytes.len())
    }
}

/// A dataset in a local file. Every read opens its own handle, so reads from many threads don't contend on a cursor.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }
}

impl RangeSource for FileSource {
    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, FetchError> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let (start, end) = clip(range, len)?;
        file.seek(SeekFrom::Start(start))?;
        let mut bytes = vec![0; (end - start) as usize];
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A dataset served over HTTP by any server that honors `Range` requests.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpSource {
    url: String,
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::Agent::new(),
        }
    }
}

#[cfg(feature = "http")]
impl RangeSource for HttpSource {
    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, FetchError> {
        use std::io::Read;

        let response = match self
            .agent
            .get(&self.url)
            .set("Range", &range.header_value())
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(416, _)) => return Err(FetchError::OutOfBounds { range, len: 0 }),
            Err(ureq::Error::Status(status, _)) => return Err(FetchError::Status(status)),
            Err(e) => return Err(FetchError::Io(e.to_string())),
        };

        let mut bytes = Vec::with_capacity(range.len() as usize);
        response
            .into_reader()
            .take(range.len())
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Picks a source for `location`: an `http://` or `https://` URL, or else a file path.
pub fn open_location(location: &str) -> Result<Arc<dyn RangeSource>, FetchError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "http")]
        {
            return Ok(Arc::new(HttpSource::new(location)));
        }
        #[cfg(not(feature = "http"))]
        {
            return Err(FetchError::UnsupportedLocation(location.to_owned()));
        }
    }
    Ok(Arc::new(FileSource::new(location)))
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

    #[test]
    fn memory_reads_are_clipped() {
        let source = MemorySource::new((0..10u8).collect::<Vec<_>>());
        assert_eq!(
            source.read_range(ByteRange::from_start_and_len(2, 3)).unwrap(),
            vec![2, 3, 4]
        );
        assert_eq!(
            source.read_range(ByteRange::from_start_and_len(8, 100)).unwrap(),
            vec![8, 9]
        );
        assert!(matches!(
            source.read_range(ByteRange::from_start_and_len(10, 1)),
            Err(FetchError::OutOfBounds { len: 10, .. })
        ));
    }

    #[test]
    fn file_reads_match_memory_reads() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let path = std::env::temp_dir().join(format!("nexus-file-source-{}.bin", std::process::id()));
        std::fs::write(&path, &bytes).unwrap();

        let file = FileSource::new(&path);
        let memory = MemorySource::new(bytes);
        for range in [
            ByteRange::from_start_and_len(0, 88),
            ByteRange::from_start_and_len(500, 256),
            ByteRange::from_start_and_len(990, 256),
        ] {
            assert_eq!(file.read_range(range).unwrap(), memory.read_range(range).unwrap());
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = FileSource::new("/nonexistent/dataset.nxs");
        assert!(matches!(
            source.read_range(ByteRange::from_start_and_len(0, 88)),
            Err(FetchError::Io(_))
        ));
    }

    #[cfg(not(feature = "http"))]
    #[test]
    fn urls_need_the_http_feature() {
        assert!(matches!(
            open_location("https://example.com/a.nxs"),
            Err(FetchError::UnsupportedLocation(_))
        ));
    }
}
