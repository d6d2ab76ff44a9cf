//! Streaming detection and rewriting of store references
//!
//! A reference is `<prefix>/<hash>-`, where `<hash>` is a run of base58
//! characters. Both the scanner and the replacer keep a short tail between
//! chunks so matches straddling a read boundary are not lost.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use vessel_errors::Error;
use vessel_hash::is_base58_byte;
use walkdir::WalkDir;

/// Shortest base58 run accepted as a package hash
pub const MIN_HASH_LEN: usize = 32;
/// Longest base58 encoding of a 32-byte digest
pub const MAX_HASH_LEN: usize = 44;

const READ_CHUNK: usize = 64 * 1024;

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Collects the unique hashes referenced after a fixed prefix
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    needle: Vec<u8>,
    tail: Vec<u8>,
    found: BTreeSet<String>,
}

impl ReferenceScanner {
    /// Scanner for references below `prefix` (a store path or placeholder)
    #[must_use]
    pub fn new(prefix: &[u8]) -> Self {
        let mut needle = prefix.to_vec();
        if needle.last() != Some(&b'/') {
            needle.push(b'/');
        }
        Self {
            needle,
            tail: Vec::new(),
            found: BTreeSet::new(),
        }
    }

    /// Bytes needed after a match start to decide on it
    fn window(&self) -> usize {
        self.needle.len() + MAX_HASH_LEN + 1
    }

    fn take_hash(&mut self, rest: &[u8]) {
        let len = rest.iter().take_while(|b| is_base58_byte(**b)).count();
        if (MIN_HASH_LEN..=MAX_HASH_LEN).contains(&len) && rest.get(len) == Some(&b'-') {
            // Base58 bytes are ASCII
            self.found
                .insert(String::from_utf8_lossy(&rest[..len]).into_owned());
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        let mut buf = std::mem::take(&mut self.tail);
        buf.extend_from_slice(chunk);

        let window = self.window();
        let mut pos = 0;
        while let Some(start) = find(&buf, &self.needle, pos) {
            if start + window > buf.len() {
                break;
            }
            let rest = buf[start + self.needle.len()..start + window].to_vec();
            self.take_hash(&rest);
            pos = start + 1;
        }

        let keep_from = buf.len().saturating_sub(window - 1).max(pos.min(buf.len()));
        self.tail = buf.split_off(keep_from.min(buf.len()));
    }

    /// Finish the stream and return every hash seen
    #[must_use]
    pub fn finish(mut self) -> BTreeSet<String> {
        let buf = std::mem::take(&mut self.tail);
        let mut pos = 0;
        while let Some(start) = find(&buf, &self.needle, pos) {
            let rest = buf[start + self.needle.len()..].to_vec();
            self.take_hash(&rest);
            pos = start + 1;
        }
        self.found
    }
}

/// Replaces every occurrence of one byte string with another in a stream
#[derive(Debug, Clone)]
pub struct Replacer {
    from: Vec<u8>,
    to: Vec<u8>,
    pending: Vec<u8>,
    replaced: usize,
}

impl Replacer {
    #[must_use]
    pub fn new(from: &[u8], to: &[u8]) -> Self {
        Self {
            from: from.to_vec(),
            to: to.to_vec(),
            pending: Vec::new(),
            replaced: 0,
        }
    }

    /// Feed a chunk, appending the rewritten bytes that are final to `out`
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(chunk);
        if self.from.is_empty() {
            out.append(&mut self.pending);
            return;
        }

        let mut start = 0;
        while let Some(i) = find(&self.pending, &self.from, start) {
            out.extend_from_slice(&self.pending[start..i]);
            out.extend_from_slice(&self.to);
            start = i + self.from.len();
            self.replaced += 1;
        }

        let keep = (self.from.len() - 1).min(self.pending.len() - start);
        let flush_end = self.pending.len() - keep;
        out.extend_from_slice(&self.pending[start..flush_end]);
        self.pending.drain(..flush_end);
    }

    /// Flush the held-back tail, returning the number of replacements made
    pub fn finish(mut self, out: &mut Vec<u8>) -> usize {
        out.append(&mut self.pending);
        self.replaced
    }
}

/// Replace `from` with `to` in a complete buffer
#[must_use]
pub fn replace_all(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut replacer = Replacer::new(from, to);
    replacer.feed(data, &mut out);
    replacer.finish(&mut out);
    out
}

/// Scan a single file
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_file(path: &Path, scanner: &mut ReferenceScanner) -> Result<(), Error> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io_with_path(&e, path))?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io_with_path(&e, path))?;
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n]);
    }
    Ok(())
}

/// Hashes of every store reference inside an artifact tree
///
/// Regular files are streamed; symlink targets are scanned as text. Each
/// file is scanned independently so matches never span two files.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or read.
pub async fn scan_tree(root: &Path, store: &Path) -> Result<BTreeSet<String>, Error> {
    let root: PathBuf = root.to_path_buf();
    let prefix = store.as_os_str().as_encoded_bytes().to_vec();

    tokio::task::spawn_blocking(move || {
        let mut found = BTreeSet::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::internal(format!("walk {}: {e}", root.display())))?;
            let file_type = entry.file_type();
            let mut scanner = ReferenceScanner::new(&prefix);

            if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())
                    .map_err(|e| Error::io_with_path(&e, entry.path()))?;
                scanner.feed(target.as_os_str().as_encoded_bytes());
            } else if file_type.is_file() {
                scan_file(entry.path(), &mut scanner)?;
            } else {
                continue;
            }
            found.extend(scanner.finish());
        }
        Ok(found)
    })
    .await
    .map_err(|e| Error::internal(format!("scan task failed: {e}")))?
}
