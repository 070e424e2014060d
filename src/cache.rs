use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::CacheError;

pub const DEFAULT_CACHE_FILE: &str = "cache.log";

// Every append starts with one of these lines, followed by the ids written.
const SCOPE_MARKER: &str = "#written ";
const ESCAPE: char = '\\';

pub fn freshness_window() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Outcome of reading the cache at the start of a run.
#[derive(Debug, PartialEq, Eq)]
pub enum Loaded {
    Missing,
    /// `reset_error` is set when the stale file could be neither removed nor truncated.
    Stale {
        last_written: DateTime<Utc>,
        reset_error: Option<String>,
    },
    Fresh {
        ids: HashSet<String>,
        last_written: DateTime<Utc>,
    },
}

impl Loaded {
    pub fn into_ids(self) -> HashSet<String> {
        match self {
            Loaded::Fresh { ids, .. } => ids,
            Loaded::Missing | Loaded::Stale { .. } => HashSet::new(),
        }
    }
}

/// Append-only file of event ids already delivered within the freshness window.
///
/// No locking is done: concurrent runs against the same file may deliver
/// duplicates or lose appends.
pub struct EventCache {
    path: PathBuf,
    window: TimeDelta,
}

impl EventCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            window: freshness_window(),
        }
    }

    #[cfg(test)]
    pub fn with_window(path: impl Into<PathBuf>, window: TimeDelta) -> Self {
        Self { path: path.into(), window }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the known ids. A cache whose newest write is older than the window
    /// is reset and reported as stale; an age equal to the window is still fresh.
    pub fn load(&self, now: DateTime<Utc>) -> Result<Loaded, CacheError> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(source) => return Err(self.load_error(source)),
        };
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        // No marker postdates the last modification, so a file stale by mtime
        // is stale whatever it contains.
        if let Some(modified) = modified.filter(|m| self.is_stale(*m, now)) {
            return Ok(self.expire(modified));
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| self.load_error(source))?;
        let (ids, newest_marker) = self.parse(&contents)?;

        let last_written = match newest_marker.or(modified) {
            Some(ts) => ts,
            None => {
                return Err(self.load_error(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cache has no write markers and no modification time",
                )));
            }
        };

        if self.is_stale(last_written, now) {
            return Ok(self.expire(last_written));
        }

        Ok(Loaded::Fresh { ids, last_written })
    }

    /// Appends `ids` under a new write marker. Nothing is written for an empty slice.
    ///
    /// Ids containing line breaks cannot be stored; the others are still written
    /// and the call then fails naming the rejected ones.
    pub fn append(&self, ids: &[String], now: DateTime<Utc>) -> Result<(), CacheError> {
        let (storable, unstorable): (Vec<&String>, Vec<&String>) =
            ids.iter().partition(|id| !id.contains(['\n', '\r']));

        if !storable.is_empty() {
            self.write_block(&storable, now).map_err(|source| self.write_error(source))?;
        }

        if !unstorable.is_empty() {
            return Err(self.write_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("ids containing line breaks cannot be recorded: {:?}", unstorable),
            )));
        }

        Ok(())
    }

    fn write_block(&self, ids: &[&String], now: DateTime<Utc>) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        let needs_newline = !ends_with_newline(&mut file)?;

        let mut writer = BufWriter::new(file);
        if needs_newline {
            writeln!(writer)?;
        }
        writeln!(writer, "{}{}", SCOPE_MARKER, now.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        for id in ids {
            writeln!(writer, "{}", encode_id(id))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn parse(&self, contents: &str) -> Result<(HashSet<String>, Option<DateTime<Utc>>), CacheError> {
        let mut ids = HashSet::new();
        let mut newest: Option<DateTime<Utc>> = None;

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            if let Some(id) = line.strip_prefix(ESCAPE) {
                ids.insert(id.to_string());
                continue;
            }

            if let Some(stamp) = line.strip_prefix(SCOPE_MARKER.trim_end()) {
                let written = DateTime::parse_from_rfc3339(stamp.trim())
                    .map_err(|err| CacheError::Corrupt {
                        path: self.path.clone(),
                        line: index + 1,
                        reason: format!("bad write marker {:?}: {}", stamp.trim(), err),
                    })?
                    .with_timezone(&Utc);
                newest = Some(newest.map_or(written, |n| n.max(written)));
                continue;
            }

            ids.insert(line.to_string());
        }

        Ok((ids, newest))
    }

    fn expire(&self, last_written: DateTime<Utc>) -> Loaded {
        Loaded::Stale {
            last_written,
            reset_error: self.reset().err().map(|err| err.to_string()),
        }
    }

    fn is_stale(&self, last_written: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(last_written) > self.window
    }

    // Removal is preferred; truncation covers a directory that forbids unlinking.
    fn reset(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(_) => OpenOptions::new().write(true).truncate(true).open(&self.path).map(|_| ()),
        }
    }

    fn load_error(&self, source: io::Error) -> CacheError {
        CacheError::Load { path: self.path.clone(), source }
    }

    fn write_error(&self, source: io::Error) -> CacheError {
        CacheError::Write { path: self.path.clone(), source }
    }
}

// Ids that would read back as a marker, a blank line or an escaped id get one more escape.
fn encode_id(id: &str) -> Cow<'_, str> {
    if id.is_empty() || id.starts_with('#') || id.starts_with(ESCAPE) {
        Cow::Owned(format!("{}{}", ESCAPE, id))
    } else {
        Cow::Borrowed(id)
    }
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use tempfile::tempdir;

    fn age_file(path: &Path, hours: u64) {
        let file = File::open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(hours * 3600)).unwrap();
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));

        let loaded = cache.load(Utc::now()).unwrap();
        assert_eq!(loaded, Loaded::Missing);
        assert!(loaded.into_ids().is_empty());
    }

    #[test]
    fn appended_ids_are_loaded_back() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));
        let written = at("2026-10-18T09:00:00Z");

        cache.append(&ids(&["e1", "e2"]), written).unwrap();
        cache.append(&ids(&["e3"]), at("2026-10-18T10:00:00Z")).unwrap();

        let contents = fs::read_to_string(cache.path()).unwrap();
        assert_eq!(
            contents,
            "#written 2026-10-18T09:00:00Z\ne1\ne2\n#written 2026-10-18T10:00:00Z\ne3\n"
        );

        match cache.load(at("2026-10-18T12:00:00Z")).unwrap() {
            Loaded::Fresh { ids, last_written } => {
                assert_eq!(ids.len(), 3);
                assert!(ids.contains("e1") && ids.contains("e2") && ids.contains("e3"));
                assert_eq!(last_written, at("2026-10-18T10:00:00Z"));
            }
            other => panic!("unexpected load result: {other:?}"),
        }
    }

    #[test]
    fn empty_append_does_not_create_file() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));

        cache.append(&[], Utc::now()).unwrap();
        assert!(!cache.path().exists());
    }

    #[test]
    fn stale_cache_is_ignored_and_removed() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));
        cache.append(&ids(&["e1"]), at("2026-10-17T08:00:00Z")).unwrap();

        let loaded = cache.load(at("2026-10-18T08:00:01Z")).unwrap();
        assert_eq!(
            loaded,
            Loaded::Stale { last_written: at("2026-10-17T08:00:00Z"), reset_error: None }
        );
        assert!(!cache.path().exists());
    }

    #[test]
    fn age_equal_to_window_is_still_fresh() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));
        cache.append(&ids(&["e1"]), at("2026-10-17T08:00:00Z")).unwrap();

        let loaded = cache.load(at("2026-10-18T08:00:00Z")).unwrap();
        assert!(loaded.into_ids().contains("e1"));
    }

    #[test]
    fn freshness_follows_newest_write_not_calendar_day() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));
        cache.append(&ids(&["e1"]), at("2026-10-16T23:00:00Z")).unwrap();
        cache.append(&ids(&["e2"]), at("2026-10-17T23:30:00Z")).unwrap();

        let loaded = cache.load(at("2026-10-18T12:00:00Z")).unwrap().into_ids();
        assert!(loaded.contains("e1"));
        assert!(loaded.contains("e2"));
    }

    #[test]
    fn plain_id_file_uses_modification_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.log");
        fs::write(&path, "e1\ne2\n").unwrap();
        let cache = EventCache::new(&path);

        let fresh = cache.load(Utc::now()).unwrap().into_ids();
        assert_eq!(fresh.len(), 2);

        let later = Utc::now() + TimeDelta::hours(25);
        assert!(matches!(cache.load(later).unwrap(), Loaded::Stale { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn append_after_file_without_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.log");
        fs::write(&path, "e1").unwrap();
        let cache = EventCache::new(&path);

        cache.append(&ids(&["e2"]), Utc::now()).unwrap();

        let loaded = cache.load(Utc::now()).unwrap().into_ids();
        assert!(loaded.contains("e1"));
        assert!(loaded.contains("e2"));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn malformed_marker_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.log");
        fs::write(&path, "#written yesterday\ne1\n").unwrap();
        let cache = EventCache::new(&path);

        match cache.load(Utc::now()).unwrap_err() {
            CacheError::Corrupt { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(path.exists());
    }

    #[test]
    fn unreadable_fresh_cache_is_a_load_error() {
        let dir = tempdir().unwrap();
        // A directory at the cache path cannot be read as a file.
        let path = dir.path().join("cache.log");
        fs::create_dir(&path).unwrap();
        let cache = EventCache::new(&path);

        let err = cache.load(Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::Load { .. }));
    }

    #[test]
    fn custom_window_applies() {
        let dir = tempdir().unwrap();
        let cache = EventCache::with_window(dir.path().join("cache.log"), TimeDelta::minutes(5));
        cache.append(&ids(&["e1"]), at("2026-10-18T08:00:00Z")).unwrap();

        assert!(matches!(cache.load(at("2026-10-18T08:06:00Z")).unwrap(), Loaded::Stale { .. }));
    }

    #[test]
    fn stale_file_is_not_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.log");
        fs::write(&path, "#written garbage\ne1\n").unwrap();
        age_file(&path, 72);
        let cache = EventCache::new(&path);

        match cache.load(Utc::now()).unwrap() {
            Loaded::Stale { reset_error, .. } => assert_eq!(reset_error, None),
            other => panic!("unexpected load result: {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_cache_that_cannot_be_reset_still_loads_empty() {
        let dir = tempdir().unwrap();
        // A directory can be neither removed as a file nor truncated.
        let path = dir.path().join("cache.log");
        fs::create_dir(&path).unwrap();
        age_file(&path, 48);
        let cache = EventCache::new(&path);

        match cache.load(Utc::now()).unwrap() {
            Loaded::Stale { reset_error, .. } => assert!(reset_error.is_some()),
            other => panic!("unexpected load result: {other:?}"),
        }
    }

    #[test]
    fn ids_round_trip_exactly() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));
        let odd = ids(&[" e1", "e2 ", "#written 2026-10-18T09:00:00Z", "#e3", "\\e4", "", "e5\t"]);

        cache.append(&odd, Utc::now()).unwrap();

        let loaded = cache.load(Utc::now()).unwrap().into_ids();
        assert_eq!(loaded.len(), odd.len());
        for id in &odd {
            assert!(loaded.contains(id), "missing {id:?}");
        }
    }

    #[test]
    fn ids_with_line_breaks_are_rejected_but_others_kept() {
        let dir = tempdir().unwrap();
        let cache = EventCache::new(dir.path().join("cache.log"));

        let err = cache.append(&ids(&["e1", "e2\ne3", "e4\r"]), Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::Write { .. }));

        let loaded = cache.load(Utc::now()).unwrap().into_ids();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("e1"));
    }
}
