//! Remote file primitives.
//!
//! Operations a client uses to stage scripts and data on the broker's
//! host. Paths are taken as given (trusted-client model); failures are
//! returned as [`Failure`] values, never raised to the connection.
//!
//! `open` and `create` hand out restricted proxies: the remote caller sees
//! only the methods on the proxy's capability allow-list.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use simbroker_core::Failure;
use tracing::debug;

/// Status returned by `makedirs` for a fresh directory.
pub const DIR_CREATED: &str = "Directory created";

/// Status returned by `makedirs` when the path is already present.
pub const DIR_ALREADY_EXISTS: &str = "Directory already exists";

/// Read-only proxy exposing `readlines` and `close`.
#[derive(Debug)]
pub struct ReadProxy {
    path: PathBuf,
    reader: BufReader<File>,
}

impl ReadProxy {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the remaining lines, keeping line terminators.
    pub fn readlines(&mut self) -> Result<Vec<String>, Failure> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).map_err(Failure::io)?;
            if n == 0 {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Write proxy exposing `read`, `write` and `close`.
#[derive(Debug)]
pub struct WriteProxy {
    path: PathBuf,
    file: File,
}

impl WriteProxy {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `data` at the current position, returns bytes written.
    pub fn write(&mut self, data: &str) -> Result<usize, Failure> {
        self.file.write_all(data.as_bytes()).map_err(Failure::io)?;
        Ok(data.len())
    }

    /// Reads from the current position to the end.
    pub fn read(&mut self) -> Result<String, Failure> {
        let mut out = String::new();
        self.file.read_to_string(&mut out).map_err(Failure::io)?;
        Ok(out)
    }

    /// Flushes pending writes; the file is closed on drop.
    pub fn close(mut self) -> Result<(), Failure> {
        self.file.flush().map_err(Failure::io)
    }
}

/// Opens an existing file for reading.
pub fn open(path: &Path) -> Result<ReadProxy, Failure> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            Failure::not_found(format!("File {} does not exist", path.display()))
        }
        _ => Failure::io(format!("{}: {e}", path.display())),
    })?;
    debug!(path = %path.display(), "Opened file for reading");
    Ok(ReadProxy {
        path: path.to_path_buf(),
        reader: BufReader::new(file),
    })
}

/// Creates a new file; fails with `AlreadyExists` if the path exists.
pub fn create(path: &Path) -> Result<WriteProxy, Failure> {
    let already = || Failure::already_exists(format!("File {} already exists", path.display()));
    if path.exists() {
        return Err(already());
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => already(),
            _ => Failure::io(format!("{}: {e}", path.display())),
        })?;
    debug!(path = %path.display(), "Created file");
    Ok(WriteProxy {
        path: path.to_path_buf(),
        file,
    })
}

/// Creates a directory tree, reporting an already present one as status.
pub fn makedirs(path: &Path) -> Result<String, Failure> {
    if path.exists() {
        return Ok(DIR_ALREADY_EXISTS.to_string());
    }
    fs::create_dir_all(path).map_err(|e| Failure::io(format!("{}: {e}", path.display())))?;
    Ok(DIR_CREATED.to_string())
}

/// Lists entry names of `path`, sorted; empty if it does not exist.
pub fn listdir(path: &Path) -> Result<Vec<String>, Failure> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Failure::io(format!("{}: {e}", path.display()))),
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

pub fn path_exists(path: &Path) -> bool {
    path.exists()
}
