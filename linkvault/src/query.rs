//! Metadata queries against the virtual tree

use std::path::Path;

use chrono::DateTime;
use linkvault_common::{VaultError, VaultResult, format_bytes};

use crate::session::Session;
use crate::vfs::{absolutize, vfs_walk};

/// Print the stat record behind a symlink, or the aggregate size of a
/// virtual directory.
pub fn query_meta(session: &mut Session, path: &Path) -> VaultResult<()> {
    let path = absolutize(path)?;
    let meta = path
        .symlink_metadata()
        .map_err(|e| VaultError::io("stat", &path, e))?;

    if meta.file_type().is_symlink() {
        match session.stats_for_symlink(&path)? {
            Some(stats) => {
                println!("Actual path: {}", stats.actual_path.display());
                println!("Size: {}", format_bytes(stats.size));
                println!("Modified: {}", format_timestamp(stats.mtime));
                println!("Changed: {}", format_timestamp(stats.ctime));
            }
            None => println!(
                "No stats are recorded for {} (orphan link)",
                path.display()
            ),
        }
        return Ok(());
    }

    if meta.is_dir() {
        let (size, links) = virtual_dir_size(session, &path)?;
        println!("Virtual directory: {}", path.display());
        println!("Linked files: {links}");
        println!("Total size: {}", format_bytes(size));
        return Ok(());
    }

    Err(VaultError::config(format!(
        "path {} is neither a directory nor a symlink",
        path.display()
    )))
}

/// Total indexed size of all links under a virtual directory. Links
/// without stats are skipped.
pub fn virtual_dir_size(session: &mut Session, dir: &Path) -> VaultResult<(u64, usize)> {
    let mut size = 0u64;
    let mut links = 0usize;
    for group in vfs_walk(dir)? {
        for file in &group.files {
            let is_link = file
                .symlink_metadata()
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if !is_link {
                log::debug!("File {} is not a symlink", file.display());
                continue;
            }
            match session.stats_for_symlink(file)? {
                Some(stats) => {
                    size += stats.size;
                    links += 1;
                }
                None => log::debug!("Stats missing for symlink {}", file.display()),
            }
        }
    }
    Ok((size, links))
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("@{secs}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::add_collection;
    use crate::testutil::VaultFixture;

    #[test]
    fn test_virtual_dir_size_sums_linked_stats() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/media/a.bin", 100);
        fx.write_actual("disc-a/media/sub/b.bin", 40);
        add_collection(&mut session, "media", &fx.actual_path("disc-a/media")).unwrap();

        let (size, links) =
            virtual_dir_size(&mut session, &fx.virtual_base().join("media")).unwrap();
        assert_eq!(size, 140);
        assert_eq!(links, 2);
    }

    #[test]
    fn test_query_meta_rejects_plain_files() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        let plain = fx.virtual_base().join("plain.txt");
        std::fs::write(&plain, b"x").unwrap();
        assert!(query_meta(&mut session, &plain).is_err());
    }
}
