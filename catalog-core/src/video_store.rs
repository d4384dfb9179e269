//! Video fingerprint sidecar store: one `<id>.vdx` file per video id under
//! `<root>/<index-dir>/video/`, holding a sequence of per-frame perceptual hashes and
//! timestamps plus an optional trailing metadata block.
//!
//! Written with explicit little-endian `std::io` encoding: a sidecar is small and read
//! once per video on index load, so a plain buffered read is the simplest fit for its
//! literal byte layout.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::fingerprint::hamming::Hamming;
use crate::record::MediaId;

const MAGIC: [u8; 4] = *b"VDX1";
const VERSION: u16 = 1;
const METADATA_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHash {
    pub hash: Hamming,
    pub frame_no: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoMetadata {
    pub duration_ms: u32,
    pub fps_millihz: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VideoFingerprints {
    pub frames: Vec<FrameHash>,
    pub metadata: Option<VideoMetadata>,
}

impl VideoFingerprints {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(self.frames.len() as u32).to_le_bytes())?;
        for f in &self.frames {
            w.write_all(&f.hash.bits().to_le_bytes())?;
            w.write_all(&f.frame_no.to_le_bytes())?;
        }
        if let Some(m) = &self.metadata {
            w.write_all(&m.duration_ms.to_le_bytes())?;
            w.write_all(&m.fps_millihz.to_le_bytes())?;
            w.write_all(&m.width.to_le_bytes())?;
            w.write_all(&m.height.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| IndexError::CorruptSidecar("truncated header".into()))?;
        if magic != MAGIC {
            return Err(IndexError::CorruptSidecar("bad magic".into()));
        }

        let mut version_buf = [0u8; 2];
        r.read_exact(&mut version_buf)
            .map_err(|_| IndexError::CorruptSidecar("truncated version".into()))?;
        let version = u16::from_le_bytes(version_buf);
        if version != VERSION {
            return Err(IndexError::CorruptSidecar(format!("unsupported version {version}")));
        }

        let mut count_buf = [0u8; 4];
        r.read_exact(&mut count_buf)
            .map_err(|_| IndexError::CorruptSidecar("truncated count".into()))?;
        let count = u32::from_le_bytes(count_buf);

        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut hash_buf = [0u8; 8];
            r.read_exact(&mut hash_buf)
                .map_err(|_| IndexError::CorruptSidecar("truncated frame hash".into()))?;
            let mut frame_buf = [0u8; 4];
            r.read_exact(&mut frame_buf)
                .map_err(|_| IndexError::CorruptSidecar("truncated frame number".into()))?;
            frames.push(FrameHash {
                hash: Hamming::from_bits(u64::from_le_bytes(hash_buf)),
                frame_no: u32::from_le_bytes(frame_buf),
            });
        }

        let mut metadata = None;
        let mut rest = [0u8; METADATA_LEN];
        match r.read_exact(&mut rest) {
            Ok(()) => {
                metadata = Some(VideoMetadata {
                    duration_ms: u32::from_le_bytes(rest[0..4].try_into().unwrap()),
                    fps_millihz: u32::from_le_bytes(rest[4..8].try_into().unwrap()),
                    width: u32::from_le_bytes(rest[8..12].try_into().unwrap()),
                    height: u32::from_le_bytes(rest[12..16].try_into().unwrap()),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self { frames, metadata })
    }
}

/// Owns the `video/` subdirectory of the index root.
pub struct VideoStore {
    dir: PathBuf,
}

impl VideoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: MediaId) -> PathBuf {
        self.dir.join(format!("{}.vdx", id.get()))
    }

    /// Entirely replaces the sidecar for `id`, as during a re-index.
    pub fn save(&self, id: MediaId, fp: &VideoFingerprints) -> Result<(), IndexError> {
        fs::create_dir_all(&self.dir)?;
        let mut w = BufWriter::new(File::create(self.path_for(id))?);
        fp.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Appends a single frame hash to the sidecar, creating it if necessary.
    pub fn append_frame(&self, id: MediaId, frame: FrameHash) -> Result<(), IndexError> {
        let mut fp = self.load(id)?.unwrap_or_default();
        fp.frames.push(frame);
        self.save(id, &fp)
    }

    pub fn load(&self, id: MediaId) -> Result<Option<VideoFingerprints>, IndexError> {
        match File::open(self.path_for(id)) {
            Ok(f) => Ok(Some(VideoFingerprints::read_from(&mut BufReader::new(f))?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: MediaId) -> bool {
        self.path_for(id).is_file()
    }

    pub fn delete(&self, id: MediaId) -> Result<(), IndexError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every `.vdx` file whose id is not in `valid_ids`, returning the count
    /// removed. Called by `Catalog::vacuum`.
    pub fn vacuum(&self, valid_ids: &HashSet<MediaId>) -> Result<usize, IndexError> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("vdx") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Ok(id) = stem.parse::<u32>() else { continue };
            if !valid_ids.contains(&MediaId::new(id)) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_frames_and_metadata() {
        let fp = VideoFingerprints {
            frames: vec![
                FrameHash { hash: Hamming::from_bits(0xABCD), frame_no: 0 },
                FrameHash { hash: Hamming::from_bits(0x1234), frame_no: 5 },
            ],
            metadata: Some(VideoMetadata { duration_ms: 10_000, fps_millihz: 30_000, width: 1920, height: 1080 }),
        };

        let mut buf = Vec::new();
        fp.write_to(&mut buf).unwrap();
        let read_back = VideoFingerprints::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(fp.frames, read_back.frames);
        assert_eq!(fp.metadata, read_back.metadata);
    }

    #[test]
    fn round_trips_without_metadata() {
        let fp = VideoFingerprints {
            frames: vec![FrameHash { hash: Hamming::from_bits(1), frame_no: 0 }],
            metadata: None,
        };
        let mut buf = Vec::new();
        fp.write_to(&mut buf).unwrap();
        let read_back = VideoFingerprints::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(None, read_back.metadata);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; 10];
        assert!(VideoFingerprints::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn store_save_load_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VideoStore::new(tmp.path());
        let id = MediaId::new(7);
        let fp = VideoFingerprints {
            frames: vec![FrameHash { hash: Hamming::from_bits(9), frame_no: 1 }],
            metadata: None,
        };
        store.save(id, &fp).unwrap();
        assert!(store.exists(id));
        let loaded = store.load(id).unwrap().unwrap();
        assert_eq!(fp.frames, loaded.frames);

        store.delete(id).unwrap();
        assert!(!store.exists(id));
    }

    #[test]
    fn vacuum_removes_orphaned_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VideoStore::new(tmp.path());
        store.save(MediaId::new(1), &VideoFingerprints::default()).unwrap();
        store.save(MediaId::new(2), &VideoFingerprints::default()).unwrap();

        let valid = HashSet::from([MediaId::new(1)]);
        let removed = store.vacuum(&valid).unwrap();

        assert_eq!(1, removed);
        assert!(store.exists(MediaId::new(1)));
        assert!(!store.exists(MediaId::new(2)));
    }

    #[test]
    fn append_frame_accumulates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VideoStore::new(tmp.path());
        let id = MediaId::new(3);
        store.append_frame(id, FrameHash { hash: Hamming::from_bits(1), frame_no: 0 }).unwrap();
        store.append_frame(id, FrameHash { hash: Hamming::from_bits(2), frame_no: 1 }).unwrap();
        let fp = store.load(id).unwrap().unwrap();
        assert_eq!(2, fp.frames.len());
    }
}
