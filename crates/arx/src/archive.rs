//! Unix `ar` member access and build-ID extraction.
//!
//! Member layout: the 8-byte magic, then per member a 60-byte header
//! (16-byte name, 12-byte mtime, 6+6-byte uid/gid, 8-byte mode, 10-byte
//! size, 2-byte terminator) followed by the data, padded to even length.
//! Appending a uniquely named member is safe; the linker ignores members it
//! does not recognise.

use crate::ArxError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;

/// The window scanned for the embedded `build id "..."` string. The build
/// ID sits in the first member's header lines, well inside this.
const BUILD_ID_WINDOW: usize = 8 * 1024;

/// Extracts the action ID of a compiled object: the first `/`-separated
/// component of its embedded build ID, base64-decoded.
///
/// # Errors
/// [`ArxError::MissingBuildId`] when no build ID string is present, which
/// means the orchestrator did not produce this file.
pub fn action_id_of(path: &Path) -> Result<Vec<u8>, ArxError> {
    let mut file = File::open(path)?;
    let mut window = vec![0u8; BUILD_ID_WINDOW];
    let n = read_up_to(&mut file, &mut window)?;
    let window = &window[..n];

    let marker = b"build id \"";
    let start = find(window, marker)
        .ok_or_else(|| ArxError::MissingBuildId {
            path: path.display().to_string(),
        })?
        + marker.len();
    let end = start
        + find(&window[start..], b"\"").ok_or_else(|| ArxError::MissingBuildId {
            path: path.display().to_string(),
        })?;
    let build_id = String::from_utf8_lossy(&window[start..end]).into_owned();
    Ok(decode_hash(split_action_id(&build_id)))
}

/// Returns the action-ID component of a build ID (`actionID/contentID`).
pub fn split_action_id(build_id: &str) -> &str {
    build_id.split('/').next().unwrap_or(build_id)
}

/// Decodes a build-ID component. Build IDs are url-safe base64 without
/// padding; undecodable input is used as raw key bytes rather than dropped,
/// so a format change upstream degrades to different hashes, not failures.
pub fn decode_hash(component: &str) -> Vec<u8> {
    URL_SAFE_NO_PAD
        .decode(component)
        .unwrap_or_else(|_| component.as_bytes().to_vec())
}

/// Appends one member to an existing archive.
///
/// Member names are capped at 16 bytes by the header format; longer names
/// are an internal error at the call site, so they are truncated here.
pub fn append_member(path: &Path, name: &str, data: &[u8]) -> Result<(), ArxError> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic).map_err(|_| ArxError::NotAnArchive {
        path: path.display().to_string(),
    })?;
    if magic != AR_MAGIC {
        return Err(ArxError::NotAnArchive {
            path: path.display().to_string(),
        });
    }

    let len = file.seek(SeekFrom::End(0))?;
    if len % 2 != 0 {
        file.write_all(b"\n")?;
    }
    file.write_all(&member_header(name, data.len() as u64))?;
    file.write_all(data)?;
    if data.len() % 2 != 0 {
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Returns the data of the named member, or `None` when absent.
pub fn extract_member(path: &Path, name: &str) -> Result<Option<Vec<u8>>, ArxError> {
    let file = File::open(path)?;
    // SAFETY: read-only map; the file handle outlives the mmap.
    let mmap = unsafe { Mmap::map(&file)? };
    let buf = &mmap[..];
    if buf.len() < AR_MAGIC.len() || &buf[..AR_MAGIC.len()] != AR_MAGIC {
        return Err(ArxError::NotAnArchive {
            path: path.display().to_string(),
        });
    }

    let mut off = AR_MAGIC.len();
    while off + HEADER_LEN <= buf.len() {
        let header = &buf[off..off + HEADER_LEN];
        let member_name = std::str::from_utf8(&header[..16])
            .map_err(|_| malformed(path))?
            .trim_end();
        let size: usize = std::str::from_utf8(&header[48..58])
            .map_err(|_| malformed(path))?
            .trim_end()
            .parse()
            .map_err(|_| malformed(path))?;
        let data_start = off + HEADER_LEN;
        if data_start + size > buf.len() {
            return Err(malformed(path));
        }
        if member_name == name {
            return Ok(Some(buf[data_start..data_start + size].to_vec()));
        }
        off = data_start + size + (size % 2);
    }
    Ok(None)
}

/// Writes a fresh archive with the given members. Mainly used to fabricate
/// objects in tests; the real compiler writes the archives we augment.
pub fn write_archive(path: &Path, members: &[(&str, &[u8])]) -> Result<(), ArxError> {
    let mut file = File::create(path)?;
    file.write_all(AR_MAGIC)?;
    for (name, data) in members {
        file.write_all(&member_header(name, data.len() as u64))?;
        file.write_all(data)?;
        if data.len() % 2 != 0 {
            file.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn member_header(name: &str, size: u64) -> [u8; HEADER_LEN] {
    let mut header = [b' '; HEADER_LEN];
    let name = &name.as_bytes()[..name.len().min(16)];
    header[..name.len()].copy_from_slice(name);
    copy_field(&mut header[16..28], "0"); // mtime
    copy_field(&mut header[28..34], "0"); // uid
    copy_field(&mut header[34..40], "0"); // gid
    copy_field(&mut header[40..48], "644"); // mode
    copy_field(&mut header[48..58], &size.to_string());
    header[58] = b'`';
    header[59] = b'\n';
    header
}

fn copy_field(dst: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    dst[..bytes.len()].copy_from_slice(bytes);
}

fn malformed(path: &Path) -> ArxError {
    ArxError::MalformedHeader {
        path: path.display().to_string(),
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkgdef(build_id: &str) -> Vec<u8> {
        format!("go object linux amd64 go1.22.1\nbuild id \"{build_id}\"\n\n").into_bytes()
    }

    #[test]
    fn test_roundtrip_members() {
        let path = std::env::temp_dir().join("garble_test_arx_roundtrip.a");
        write_archive(&path, &[("__.PKGDEF", &pkgdef("QUJD/ZGVm"))]).unwrap();

        append_member(&path, "garble/debugSrc", b"compressed-tar-bytes").unwrap();

        let data = extract_member(&path, "garble/debugSrc").unwrap().unwrap();
        assert_eq!(data, b"compressed-tar-bytes");
        assert!(extract_member(&path, "garble/nameIdx").unwrap().is_none());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_odd_sized_member_padding() {
        let path = std::env::temp_dir().join("garble_test_arx_odd.a");
        write_archive(&path, &[("__.PKGDEF", b"odd")]).unwrap();
        append_member(&path, "garble/nameIdx", b"12345").unwrap();
        append_member(&path, "garble/debugSrc", b"after").unwrap();

        assert_eq!(
            extract_member(&path, "garble/nameIdx").unwrap().unwrap(),
            b"12345"
        );
        assert_eq!(
            extract_member(&path, "garble/debugSrc").unwrap().unwrap(),
            b"after"
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_action_id_decodes_base64() {
        let path = std::env::temp_dir().join("garble_test_arx_buildid.a");
        // "QUJD" is base64url for "ABC"; the content ID after '/' is ignored.
        write_archive(&path, &[("__.PKGDEF", &pkgdef("QUJD/aWdub3JlZA"))]).unwrap();

        assert_eq!(action_id_of(&path).unwrap(), b"ABC");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_build_id() {
        let path = std::env::temp_dir().join("garble_test_arx_nobuildid.a");
        write_archive(&path, &[("__.PKGDEF", b"go object without the marker")]).unwrap();
        assert!(matches!(
            action_id_of(&path),
            Err(ArxError::MissingBuildId { .. })
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_not_an_archive() {
        let path = std::env::temp_dir().join("garble_test_arx_notar.a");
        std::fs::write(&path, b"definitely not an archive").unwrap();
        assert!(matches!(
            extract_member(&path, "x"),
            Err(ArxError::NotAnArchive { .. })
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_split_and_decode() {
        assert_eq!(split_action_id("abc/def"), "abc");
        assert_eq!(split_action_id("abc"), "abc");
        assert_eq!(decode_hash("QUJD"), b"ABC");
        // Invalid base64 degrades to the raw bytes.
        assert_eq!(decode_hash("!!"), b"!!");
    }
}
