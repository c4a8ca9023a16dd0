use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Read size used when hashing and streaming files.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Number of leading bytes inspected by the binary/text classifier.
pub const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// I/O utility functions shared by the transfer layer and the job data helpers.
pub struct IOUtil;

impl IOUtil {
    /// Compute the lower-case hex SHA-256 digest of a file, reading it in
    /// `HASH_CHUNK_SIZE` chunks.
    pub fn file_hash(path: &Path) -> Result<String> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open '{}' for hashing", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Hex SHA-256 digest of an in-memory buffer.
    pub fn bytes_hash(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Return the last `max_lines` lines of a text file, newlines included.
    ///
    /// A missing file yields an empty string. Invalid UTF-8 is replaced
    /// lossily; the file is only read, never locked.
    pub fn tail_lines(path: &Path, max_lines: usize) -> Result<String> {
        if !path.is_file() {
            return Ok(String::new());
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open '{}' for tailing", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut window: VecDeque<Vec<u8>> = VecDeque::with_capacity(max_lines + 1);
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            if n == 0 {
                break;
            }
            if max_lines == 0 {
                continue;
            }
            if window.len() == max_lines {
                window.pop_front();
            }
            window.push_back(line.clone());
        }

        let joined: Vec<u8> = window.into_iter().flatten().collect();
        Ok(String::from_utf8_lossy(&joined).into_owned())
    }

    /// Classify a byte prefix as binary.
    ///
    /// A NUL byte or invalid UTF-8 means binary. A multi-byte sequence cut
    /// off at the end of the prefix is tolerated.
    pub fn is_binary_bytes(prefix: &[u8]) -> bool {
        if prefix.contains(&0) {
            return true;
        }
        match std::str::from_utf8(prefix) {
            Ok(_) => false,
            Err(e) => e.error_len().is_some(),
        }
    }

    /// Classify a file as binary by inspecting its first `BINARY_SNIFF_LEN` bytes.
    pub fn is_binary(path: &Path) -> Result<bool> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open '{}' for classification", path.display()))?;
        let mut prefix = Vec::with_capacity(BINARY_SNIFF_LEN);
        file.take(BINARY_SNIFF_LEN as u64)
            .read_to_end(&mut prefix)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        Ok(Self::is_binary_bytes(&prefix))
    }

    /// Whether the owner-execute bit is set on the file.
    #[cfg(unix)]
    pub fn is_executable(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o100 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    pub fn is_executable(_path: &Path) -> bool {
        false
    }

    /// Add the owner and group execute bits to a file.
    #[cfg(unix)]
    pub fn set_executable(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .with_context(|| format!("Failed to stat '{}'", path.display()))?
            .permissions();
        perms.set_mode(perms.mode() | 0o110);
        fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to chmod '{}'", path.display()))
    }

    #[cfg(not(unix))]
    pub fn set_executable(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Path of `path` relative to `root`, using `/` separators.
    /// Paths outside `root` are returned unchanged.
    pub fn relative_name(root: &Path, path: &Path) -> String {
        let relative = path.strip_prefix(root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Serialize `value` as JSON into `path`, creating parent directories.
    /// Non-ASCII characters are written as-is.
    pub fn save_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize JSON for '{}'", path.display()))?;
        fs::write(path, json).with_context(|| format!("Failed to write '{}'", path.display()))
    }

    /// Load a JSON file into `T`.
    pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON in '{}'", path.display()))
    }
}
