//! Loading named resources into memory
//!
//! A locator is either a filesystem path or a partition locator of the
//! form `MTD:<name>:<size_1>:<sha1_1>:<size_2>:<sha1_2>:...`. Files
//! carry their length in the inode; partitions do not, so the caller
//! supplies the candidate lengths (with digests) and the loader probes
//! them smallest-first until one digest matches.

use crate::error::{LoadError, LocatorError, MtdError};
use crate::hash::{parse_sha1, sha1_digest, sha1_to_hex, SHA1_DIGEST_SIZE};
use crate::mtd::{self, PartitionDriver};
use crate::sink::{FileSink, Sink};
use sha1::{Digest, Sha1};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::os::unix::fs::{chown, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Ownership and mode bits carried from source to target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Default for FileStat {
    /// Stat synthesized for partition sources, which have none of their own
    fn default() -> Self {
        Self {
            mode: 0o644,
            uid: 0,
            gid: 0,
        }
    }
}

/// A fully loaded resource: bytes, digest, and stat metadata
#[derive(Debug)]
pub struct FileContents {
    pub data: Vec<u8>,
    pub sha1: [u8; SHA1_DIGEST_SIZE],
    pub stat: FileStat,
}

impl FileContents {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// One (size, digest) candidate for a partition prefix
#[derive(Debug, Clone)]
pub struct Candidate {
    pub size: u64,
    pub sha1: [u8; SHA1_DIGEST_SIZE],
}

/// Parsed `MTD:<name>:<size>:<sha1>...` locator
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    pub partition: String,
    pub candidates: Vec<Candidate>,
}

impl PartitionSpec {
    /// Parse a partition locator. Candidates come in (size, digest)
    /// field pairs; an odd field count, a zero or non-decimal size, or
    /// an unparsable digest is a hard error. Digest fields may carry a
    /// trailing non-hex tag.
    pub fn parse(locator: &str) -> Result<Self, LocatorError> {
        let rest = locator
            .strip_prefix(mtd::MTD_PREFIX)
            .ok_or_else(|| LocatorError::NotPartition(locator.to_string()))?;

        let mut fields = rest.split(':');
        let partition = match fields.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(LocatorError::MissingName(locator.to_string())),
        };

        let fields: Vec<&str> = fields.collect();
        if fields.is_empty() {
            return Err(LocatorError::NoCandidates(locator.to_string()));
        }
        if fields.len() % 2 != 0 {
            return Err(LocatorError::UnbalancedFields(locator.to_string()));
        }

        let mut candidates = Vec::with_capacity(fields.len() / 2);
        for pair in fields.chunks(2) {
            let size = pair[0]
                .parse::<u64>()
                .ok()
                .filter(|&s| s > 0)
                .ok_or_else(|| LocatorError::BadSize {
                    locator: locator.to_string(),
                    field: pair[0].to_string(),
                })?;
            let sha1 = parse_sha1(pair[1]).ok_or_else(|| LocatorError::BadDigest {
                locator: locator.to_string(),
                field: pair[1].to_string(),
            })?;
            candidates.push(Candidate { size, sha1 });
        }

        Ok(Self {
            partition,
            candidates,
        })
    }
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match reader.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Load a resource by locator, dispatching on the `MTD:` prefix.
pub fn load_contents(
    locator: &str,
    driver: &PartitionDriver,
) -> Result<FileContents, LoadError> {
    if mtd::is_partition(locator) {
        load_partition_contents(locator, driver)
    } else {
        load_file(Path::new(locator))
    }
}

/// Load a plain file: stat, read exactly that many bytes, digest.
pub fn load_file(path: &Path) -> Result<FileContents, LoadError> {
    let meta = fs::metadata(path)?;
    let want = meta.len() as usize;

    let mut file = fs::File::open(path)?;
    let mut data = vec![0u8; want];
    let got = read_full(&mut file, &mut data)?;
    if got != want {
        return Err(LoadError::ShortRead {
            path: path.display().to_string(),
            want,
            got,
        });
    }

    let sha1 = sha1_digest(&data);
    Ok(FileContents {
        data,
        sha1,
        stat: FileStat {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
        },
    })
}

/// Load a partition by probing (size, digest) candidates smallest-first.
///
/// An interrupted install may have left either the source or the target
/// image resident, possibly of different lengths. The partition is read
/// forward once; at each candidate boundary the running digest is
/// snapshot and finalized to check that prefix, so no byte is read or
/// hashed twice.
fn load_partition_contents(
    locator: &str,
    driver: &PartitionDriver,
) -> Result<FileContents, LoadError> {
    let spec = PartitionSpec::parse(locator)?;
    let partition = driver
        .find(&spec.partition)
        .ok_or_else(|| MtdError::NotFound(spec.partition.clone()))?
        .clone();

    let mut order: Vec<usize> = (0..spec.candidates.len()).collect();
    order.sort_by_key(|&i| spec.candidates[i].size);
    let largest = spec.candidates[order[order.len() - 1]].size as usize;

    let mut reader = driver.open_read(&partition).map_err(MtdError::Io)?;
    let mut data = vec![0u8; largest];
    let mut hasher = Sha1::new();
    let mut pos = 0usize;

    for &i in &order {
        let candidate = &spec.candidates[i];
        let size = candidate.size as usize;

        if size > pos {
            let got = read_full(reader.as_mut(), &mut data[pos..size])?;
            if got != size - pos {
                return Err(LoadError::ShortRead {
                    path: locator.to_string(),
                    want: size - pos,
                    got,
                });
            }
            hasher.update(&data[pos..size]);
            pos = size;
        }

        // Finalizing consumes the state, so each prefix is checked on a
        // clone while the running digest continues past it.
        let prefix_sha1: [u8; SHA1_DIGEST_SIZE] = hasher.clone().finalize().into();
        if prefix_sha1 == candidate.sha1 {
            println!(
                "partition read matched size {} sha {}",
                size,
                sha1_to_hex(&candidate.sha1)
            );
            data.truncate(size);
            return Ok(FileContents {
                data,
                sha1: candidate.sha1,
                stat: FileStat::default(),
            });
        }
    }

    Err(LoadError::NoDigestMatch(spec.partition))
}

/// Write `contents` under `path` and carry over its stat. The file is
/// created 0600 and synced before the chmod widens it.
pub fn save_contents(path: &Path, contents: &FileContents) -> Result<(), LoadError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;

    let mut sink = FileSink::new(file);
    sink.push(&contents.data)?;
    sink.sync()?;

    fs::set_permissions(path, fs::Permissions::from_mode(contents.stat.mode))?;
    chown(path, Some(contents.stat.uid), Some(contents.stat.gid))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtd::FileBackend;

    fn driver_over(dir: &Path) -> PartitionDriver {
        PartitionDriver::new(Box::new(FileBackend::new(dir))).unwrap()
    }

    fn hex(data: &[u8]) -> String {
        sha1_to_hex(&sha1_digest(data))
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        fs::write(&path, b"source bytes").unwrap();

        let contents = load_file(&path).unwrap();
        assert_eq!(contents.data, b"source bytes");
        assert_eq!(contents.size(), 12);
        assert_eq!(contents.sha1, sha1_digest(b"source bytes"));
        assert_ne!(contents.stat.mode & 0o777, 0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_over(dir.path());
        let err = load_contents("/nonexistent/file", &driver).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_parse_partition_spec() {
        let locator = format!("MTD:boot:100:{}:200:{}", hex(b"a"), hex(b"b"));
        let spec = PartitionSpec::parse(&locator).unwrap();
        assert_eq!(spec.partition, "boot");
        assert_eq!(spec.candidates.len(), 2);
        assert_eq!(spec.candidates[0].size, 100);
        assert_eq!(spec.candidates[1].size, 200);
    }

    #[test]
    fn test_parse_rejects_malformed_specs() {
        let digest = hex(b"a");
        assert!(matches!(
            PartitionSpec::parse("/not/a/partition"),
            Err(LocatorError::NotPartition(_))
        ));
        assert!(matches!(
            PartitionSpec::parse("MTD:boot"),
            Err(LocatorError::NoCandidates(_))
        ));
        assert!(matches!(
            PartitionSpec::parse(&format!("MTD:boot:100:{}:200", digest)),
            Err(LocatorError::UnbalancedFields(_))
        ));
        assert!(matches!(
            PartitionSpec::parse(&format!("MTD:boot:0:{}", digest)),
            Err(LocatorError::BadSize { .. })
        ));
        assert!(matches!(
            PartitionSpec::parse("MTD:boot:100:nothex"),
            Err(LocatorError::BadDigest { .. })
        ));
    }

    #[test]
    fn test_partition_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let image = b"bootloader-v1-padding-padding";
        fs::write(dir.path().join("boot"), image).unwrap();
        let driver = driver_over(dir.path());

        let locator = format!("MTD:boot:13:{}", hex(&image[..13]));
        let contents = load_contents(&locator, &driver).unwrap();
        assert_eq!(contents.data, &image[..13]);
        assert_eq!(contents.stat, FileStat::default());
    }

    #[test]
    fn test_partition_second_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let image: Vec<u8> = (0u8..=255).cycle().take(300).collect();
        fs::write(dir.path().join("boot"), &image).unwrap();
        let driver = driver_over(dir.path());

        // first candidate's digest is wrong; the larger one matches
        let locator = format!("MTD:boot:50:{}:100:{}", hex(b"wrong"), hex(&image[..100]));
        let contents = load_contents(&locator, &driver).unwrap();
        assert_eq!(contents.data, &image[..100]);
    }

    #[test]
    fn test_partition_probes_ascending_regardless_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let image: Vec<u8> = (0u8..=255).cycle().take(300).collect();
        fs::write(dir.path().join("boot"), &image).unwrap();
        let driver = driver_over(dir.path());

        // listed large-first; both match, the smaller prefix must win
        let locator = format!(
            "MTD:boot:200:{}:100:{}",
            hex(&image[..200]),
            hex(&image[..100])
        );
        let contents = load_contents(&locator, &driver).unwrap();
        assert_eq!(contents.size(), 100);
    }

    #[test]
    fn test_partition_same_size_different_digests() {
        let dir = tempfile::tempdir().unwrap();
        let image = b"same-size-candidates!";
        fs::write(dir.path().join("boot"), image).unwrap();
        let driver = driver_over(dir.path());

        for locator in [
            format!("MTD:boot:10:{}:10:{}", hex(b"wrong"), hex(&image[..10])),
            format!("MTD:boot:10:{}:10:{}", hex(&image[..10]), hex(b"wrong")),
        ] {
            let contents = load_contents(&locator, &driver).unwrap();
            assert_eq!(contents.data, &image[..10]);
        }
    }

    #[test]
    fn test_partition_no_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("boot"), b"whatever contents").unwrap();
        let driver = driver_over(dir.path());

        let locator = format!("MTD:boot:5:{}:9:{}", hex(b"nope"), hex(b"also nope"));
        let err = load_contents(&locator, &driver).unwrap_err();
        assert!(matches!(err, LoadError::NoDigestMatch(p) if p == "boot"));
    }

    #[test]
    fn test_partition_short_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("boot"), b"tiny").unwrap();
        let driver = driver_over(dir.path());

        let locator = format!("MTD:boot:100:{}", hex(b"whatever"));
        let err = load_contents(&locator, &driver).unwrap_err();
        assert!(matches!(err, LoadError::ShortRead { want: 100, .. }));
    }

    #[test]
    fn test_partition_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_over(dir.path());
        let locator = format!("MTD:missing:5:{}", hex(b"x"));
        let err = load_contents(&locator, &driver).unwrap_err();
        assert!(matches!(err, LoadError::Mtd(MtdError::NotFound(_))));
    }

    #[test]
    fn test_save_contents_carries_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.file");

        let meta = fs::metadata(dir.path()).unwrap();
        let contents = FileContents {
            data: b"parked source".to_vec(),
            sha1: sha1_digest(b"parked source"),
            stat: FileStat {
                mode: 0o640,
                uid: meta.uid(),
                gid: meta.gid(),
            },
        };
        save_contents(&path, &contents).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"parked source");
        let mode = fs::metadata(&path).unwrap().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
