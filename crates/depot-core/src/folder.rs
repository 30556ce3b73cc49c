//! Folder artifacts travel as zip archives built on the fly.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

/// Zip the tree under `dir` into `out`. Entry names are relative to `dir`
/// and use `/` separators. Returns the number of files written.
///
/// # Errors
///
/// Fails on unreadable entries or a failing writer.
pub fn zip_folder<W: Write + Seek>(dir: &Path, out: W) -> io::Result<usize> {
    let mut zip = zip::ZipWriter::new(out);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(io::Error::other)?;
            continue;
        }
        zip.start_file(name, options).map_err(io::Error::other)?;
        io::copy(&mut File::open(entry.path())?, &mut zip)?;
        files += 1;
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(files)
}

/// Unpack `archive` into `dest`, creating it. Entries escaping `dest` are
/// skipped. Returns the extracted file paths.
///
/// # Errors
///
/// Fails on a malformed archive or a filesystem error.
pub fn unzip_into<R: Read + Seek>(archive: R, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(archive).map_err(io::Error::other)?;
    fs::create_dir_all(dest)?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(io::Error::other)?;
        let Some(relative) = file.enclosed_name() else {
            tracing::warn!(entry = %file.name(), "Skipping unsafe archive entry");
            continue;
        };
        let path = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        io::copy(&mut file, &mut File::create(&path)?)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
        extracted.push(path);
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_survives_zip_and_unzip() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("META-INF")).unwrap();
        fs::write(src.path().join("META-INF/MANIFEST.MF"), "Manifest-Version: 1.0\n").unwrap();
        fs::write(src.path().join("plugin.xml"), "<plugin/>").unwrap();

        let mut archive = io::Cursor::new(Vec::new());
        assert_eq!(zip_folder(src.path(), &mut archive).unwrap(), 2);

        let dest = tempfile::tempdir().unwrap();
        archive.set_position(0);
        let files = unzip_into(archive, &dest.path().join("out")).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("out/META-INF/MANIFEST.MF")).unwrap(),
            "Manifest-Version: 1.0\n"
        );
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let dest = tempfile::tempdir().unwrap();
        assert!(unzip_into(io::Cursor::new(b"nope".to_vec()), dest.path()).is_err());
    }
}
