//! Small helpers shared by the file-backed stores and the instance lock.

use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents` so readers never observe a partial file.
///
/// The parent directory is created if needed; the data goes to a temporary
/// file in the same directory which is then renamed over the target.
pub fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    let mut temp = tempfile::NamedTempFile::new_in(directory)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Whether a process with `pid` exists (signal 0 probe).
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
