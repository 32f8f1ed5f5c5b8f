use bytes::BytesMut;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mattock_nbt::{nbt_compound, read_root_named, NbtValue};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// The three UTF-8 bytes of ☃, the required content of `session.lock`.
const SNOWMAN: &[u8] = &[0xE2, 0x98, 0x83];

/// World metadata read from `level.dat` (gzipped named NBT, `Data` compound).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelData {
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub spawn_z: i32,
    pub level_name: String,
}

impl Default for LevelData {
    fn default() -> Self {
        Self {
            spawn_x: 0,
            spawn_y: -60,
            spawn_z: 0,
            level_name: "world".to_string(),
        }
    }
}

impl LevelData {
    /// Load `level.dat`, creating a default one when missing.
    pub fn load_or_create(world_dir: &Path) -> std::io::Result<Self> {
        let path = world_dir.join("level.dat");
        if !path.exists() {
            let data = Self::default();
            data.save(world_dir)?;
            info!("created default level.dat at {}", path.display());
            return Ok(data);
        }

        let mut decoder = GzDecoder::new(File::open(&path)?);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;

        let (_, root) = read_root_named(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let data = root.get("Data").cloned().unwrap_or(NbtValue::Compound(vec![]));

        let get_i32 = |name: &str, fallback: i32| {
            data.get(name).and_then(NbtValue::as_i32).unwrap_or(fallback)
        };
        Ok(Self {
            spawn_x: get_i32("SpawnX", 0),
            spawn_y: get_i32("SpawnY", -60),
            spawn_z: get_i32("SpawnZ", 0),
            level_name: data
                .get("LevelName")
                .and_then(NbtValue::as_str)
                .unwrap_or("world")
                .to_string(),
        })
    }

    pub fn save(&self, world_dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(world_dir)?;
        let root = nbt_compound! {
            "Data" => nbt_compound! {
                "SpawnX" => NbtValue::Int(self.spawn_x),
                "SpawnY" => NbtValue::Int(self.spawn_y),
                "SpawnZ" => NbtValue::Int(self.spawn_z),
                "LevelName" => NbtValue::String(self.level_name.clone()),
            },
        };
        let mut buf = BytesMut::new();
        root.write_root_named("", &mut buf);

        let mut encoder = GzEncoder::new(File::create(world_dir.join("level.dat"))?, Compression::default());
        encoder.write_all(&buf)?;
        encoder.finish()?;
        Ok(())
    }
}

/// `session.lock` holder. The file must contain exactly ☃; the handle is
/// kept open for the server's lifetime.
pub struct SessionLock {
    path: PathBuf,
    _file: File,
}

impl SessionLock {
    pub fn acquire(world_dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(world_dir)?;
        let path = world_dir.join("session.lock");

        if path.exists() {
            let content = fs::read(&path)?;
            if content != SNOWMAN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "session.lock exists with unexpected content",
                ));
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(SNOWMAN)?;
        file.flush()?;
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_dat_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let original = LevelData {
            spawn_x: 16,
            spawn_y: -59,
            spawn_z: -32,
            level_name: "testworld".into(),
        };
        original.save(dir.path()).unwrap();
        let loaded = LevelData::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_level_dat_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LevelData::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, LevelData::default());
        assert!(dir.path().join("level.dat").exists());
    }

    #[test]
    fn test_session_lock_content() {
        let dir = tempfile::tempdir().unwrap();
        let lock = SessionLock::acquire(dir.path()).unwrap();
        let content = fs::read(lock.path()).unwrap();
        assert_eq!(content, vec![0xE2, 0x98, 0x83]);
    }

    #[test]
    fn test_session_lock_rejects_foreign_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("session.lock"), b"not a snowman").unwrap();
        assert!(SessionLock::acquire(dir.path()).is_err());
    }
}
