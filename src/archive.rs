// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive assembly and extraction.
//!
//! The release host serves one 7-Zip archive split into numbered part files.
//! Assembly concatenates the parts back into the __archive bundle__ in suffix
//! order. Extraction unpacks the bundle into a __staging directory__ inside
//! the install root, unpacks every tarball found in there, and only then
//! moves the expected payload subtree to its final place. The staging
//! directory is removed no matter how extraction ends.

pub mod unpack;

pub use unpack::{SystemUnpacker, Unpacker};

use std::{
    fs::{create_dir_all, read_dir, remove_dir_all, rename, File},
    io::{copy, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Concatenate part files into archive bundle.
///
/// Parts are appended in the order given, which is the suffix order of the
/// install layout. The bundle is written to `partial` first and renamed into place once every
/// byte made it to disk, so an existing bundle is always a complete one.
///
/// # Errors
///
/// - Return [`ArchiveError::NoParts`] if no part is given.
/// - Return [`ArchiveError::Combine`] if any part cannot be read, or the
///   bundle cannot be written.
#[instrument(skip(parts, bundle, partial), level = "debug")]
pub fn combine_parts(parts: &[PathBuf], bundle: &Path, partial: &Path) -> Result<u64> {
    if parts.is_empty() {
        return Err(ArchiveError::NoParts);
    }

    let combine_err = |path: &Path| {
        let path = path.to_path_buf();
        move |err: std::io::Error| ArchiveError::Combine { source: err, path }
    };

    let mut total = 0;
    let mut out = BufWriter::new(File::create(partial).map_err(combine_err(partial))?);
    for part in parts {
        debug!("append {:?}", part.display());
        let mut input = File::open(part).map_err(combine_err(part))?;
        total += copy(&mut input, &mut out).map_err(combine_err(part))?;
    }
    out.flush().map_err(combine_err(partial))?;
    out.get_ref().sync_all().map_err(combine_err(partial))?;
    drop(out);
    rename(partial, bundle).map_err(combine_err(bundle))?;

    info!(
        "combined {} parts into {:?} ({total} bytes)",
        parts.len(),
        bundle.display()
    );
    Ok(total)
}

/// Extract payload subtree of archive bundle into target directory.
///
/// Staging happens in a hidden directory inside `root`, so the final move is
/// a rename on the same file system. An existing target directory is
/// replaced.
///
/// # Errors
///
/// - Return [`ArchiveError::Staging`] if staging directory cannot be made.
/// - Return [`ArchiveError::Unpack`] if unpacker fails.
/// - Return [`ArchiveError::UnexpectedLayout`] with a staging listing if the
///   payload subtree is missing.
/// - Return [`ArchiveError::Place`] if payload cannot be moved into place.
#[instrument(skip(unpacker, bundle, root, target), level = "debug")]
pub fn extract_payload(
    unpacker: &dyn Unpacker,
    bundle: &Path,
    root: &Path,
    subtree: &str,
    target: &Path,
) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(root)
        .map_err(|err| ArchiveError::Staging {
            source: err,
            path: root.to_path_buf(),
        })?;
    let outer = staging.path().join("outer");
    let tree = staging.path().join("tree");
    for dir in [&outer, &tree] {
        create_dir_all(dir).map_err(|err| ArchiveError::Staging {
            source: err,
            path: dir.clone(),
        })?;
    }

    info!("unpack {:?}", bundle.display());
    unpacker.unpack_archive(bundle, &outer)?;

    let tarballs = find_tarballs(&outer)?;
    let tree = if tarballs.is_empty() {
        debug!("no inner tarball, use outer tree as is");
        outer
    } else {
        for tarball in &tarballs {
            info!("unpack {:?}", tarball.file_name().unwrap_or_default());
            unpacker.unpack_tarball(tarball, &tree)?;
        }
        tree
    };

    let source = tree.join(subtree);
    if !source.is_dir() {
        return Err(ArchiveError::UnexpectedLayout {
            expected: subtree.into(),
            listing: listing(staging.path()),
        });
    }

    if target.exists() {
        remove_dir_all(target).map_err(|err| ArchiveError::Place {
            source: err,
            path: target.to_path_buf(),
        })?;
    }
    if let Some(parent) = target.parent() {
        create_dir_all(parent).map_err(|err| ArchiveError::Place {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }
    rename(&source, target).map_err(|err| ArchiveError::Place {
        source: err,
        path: target.to_path_buf(),
    })?;

    info!("placed payload at {:?}", target.display());
    Ok(())
}

/// Tarballs at the top level of directory.
fn find_tarballs(dir: &Path) -> Result<Vec<PathBuf>> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut tarballs = Vec::new();
    for pattern in ["*.tar", "*.tar.*", "*.tgz"] {
        let entries = glob::glob(&format!("{base}/{pattern}"))?;
        tarballs.extend(entries.filter_map(|entry| entry.ok()).filter(|path| path.is_file()));
    }
    tarballs.sort();
    tarballs.dedup();

    Ok(tarballs)
}

/// Two-level listing of directory for diagnostics.
pub fn listing(dir: &Path) -> String {
    fn walk(dir: &Path, depth: usize, out: &mut Vec<String>) {
        let Ok(entries) = read_dir(dir) else {
            return;
        };
        let mut entries = entries.filter_map(|entry| entry.ok()).collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            let suffix = if path.is_dir() { "/" } else { "" };
            out.push(format!(
                "{}{}{suffix}",
                "  ".repeat(depth),
                entry.file_name().to_string_lossy()
            ));
            if path.is_dir() && depth < 2 {
                walk(&path, depth + 1, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(dir, 0, &mut out);
    if out.is_empty() {
        return "<empty>".into();
    }

    out.join("\n")
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Nothing to combine.
    #[error("no part files to combine")]
    NoParts,

    /// Concatenation of part files failed.
    #[error("failed to combine part files at {:?}", path.display())]
    Combine {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Staging directory cannot be prepared.
    #[error("failed to prepare staging directory at {:?}", path.display())]
    Staging {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Unpacking failed.
    #[error(transparent)]
    Unpack(#[from] unpack::UnpackError),

    /// Archive does not contain the expected payload subtree.
    #[error("archive has no {expected:?} directory, staging contents:\n{listing}")]
    UnexpectedLayout { expected: String, listing: String },

    /// Payload cannot be moved into place.
    #[error("failed to place payload at {:?}", path.display())]
    Place {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::{read, read_to_string, write};

    /// Unpacker that lays out a fixed tree instead of running programs.
    struct FakeUnpacker {
        top: &'static str,
        tarball: bool,
    }

    impl Unpacker for FakeUnpacker {
        fn unpack_archive(&self, _archive: &Path, into: &Path) -> unpack::Result<()> {
            if self.tarball {
                write(into.join("payload.tar"), b"tar")?;
            } else {
                create_dir_all(into.join(self.top))?;
                write(into.join(self.top).join("run"), b"#!/bin/sh\n")?;
            }
            Ok(())
        }

        fn unpack_tarball(&self, _tarball: &Path, into: &Path) -> unpack::Result<()> {
            create_dir_all(into.join(self.top).join("lib"))?;
            write(into.join(self.top).join("run"), b"#!/bin/sh\n")?;
            Ok(())
        }
    }

    fn staging_leftovers(root: &Path) -> Vec<PathBuf> {
        read_dir(root)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(".staging-"))
            })
            .collect()
    }

    #[test]
    fn combine_parts_in_given_order() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let parts = ["app.7z.998", "app.7z.999", "app.7z.1000", "app.7z.1001"]
            .into_iter()
            .map(|name| root.path().join(name))
            .collect::<Vec<_>>();
        for part in &parts {
            let suffix = part.extension().unwrap().to_string_lossy().into_owned();
            write(part, format!("{suffix},"))?;
        }

        let bundle = root.path().join("app.7z");
        let partial = root.path().join("app.7z.partial");
        let total = combine_parts(&parts, &bundle, &partial)?;

        assert_eq!(total, 18);
        assert_eq!(read_to_string(&bundle)?, "998,999,1000,1001,");
        assert!(!partial.exists());

        Ok(())
    }

    #[test]
    fn combine_parts_fails_on_missing_part() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path().join("app.7z.001"), b"one")?;
        let parts = vec![root.path().join("app.7z.001"), root.path().join("app.7z.002")];

        let bundle = root.path().join("app.7z");
        let result = combine_parts(&parts, &bundle, &root.path().join("app.7z.partial"));
        assert!(matches!(result, Err(ArchiveError::Combine { path, .. }) if path.ends_with("app.7z.002")));
        assert!(!bundle.exists());

        Ok(())
    }

    #[test]
    fn extract_payload_through_inner_tarball() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bundle = root.path().join("app.7z");
        write(&bundle, b"bundle")?;
        let target = root.path().join("app");
        create_dir_all(&target)?;
        write(target.join("stale"), b"old")?;

        let unpacker = FakeUnpacker {
            top: "blah-app",
            tarball: true,
        };
        extract_payload(&unpacker, &bundle, root.path(), "blah-app", &target)?;

        assert_eq!(read(target.join("run"))?, b"#!/bin/sh\n");
        assert!(target.join("lib").is_dir());
        assert!(!target.join("stale").exists());
        assert_eq!(staging_leftovers(root.path()), Vec::<PathBuf>::new());

        Ok(())
    }

    #[test]
    fn extract_payload_without_inner_tarball() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bundle = root.path().join("app.7z");
        write(&bundle, b"bundle")?;
        let target = root.path().join("app");

        let unpacker = FakeUnpacker {
            top: "blah-app",
            tarball: false,
        };
        extract_payload(&unpacker, &bundle, root.path(), "blah-app", &target)?;
        assert!(target.join("run").is_file());

        Ok(())
    }

    /// Unpacker whose payload ships a tarball of its own.
    struct NestedTarballUnpacker;

    impl Unpacker for NestedTarballUnpacker {
        fn unpack_archive(&self, _archive: &Path, into: &Path) -> unpack::Result<()> {
            let lib = into.join("blah-app").join("lib");
            create_dir_all(&lib)?;
            write(lib.join("assets.tar.gz"), b"assets")?;
            write(into.join("blah-app").join("run"), b"#!/bin/sh\n")?;
            Ok(())
        }

        fn unpack_tarball(&self, tarball: &Path, _into: &Path) -> unpack::Result<()> {
            panic!("unexpected tarball {tarball:?}");
        }
    }

    #[test]
    fn extract_payload_leaves_nested_tarballs_alone() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bundle = root.path().join("app.7z");
        write(&bundle, b"bundle")?;
        let target = root.path().join("app");

        extract_payload(&NestedTarballUnpacker, &bundle, root.path(), "blah-app", &target)?;
        assert_eq!(read(target.join("lib").join("assets.tar.gz"))?, b"assets");
        assert!(target.join("run").is_file());

        Ok(())
    }

    #[test]
    fn extract_payload_unexpected_layout_cleans_staging() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bundle = root.path().join("app.7z");
        write(&bundle, b"bundle")?;
        let target = root.path().join("app");

        let unpacker = FakeUnpacker {
            top: "something-else",
            tarball: true,
        };
        let result = extract_payload(&unpacker, &bundle, root.path(), "blah-app", &target);

        match result {
            Err(ArchiveError::UnexpectedLayout { expected, listing }) => {
                assert_eq!(expected, "blah-app");
                let expect = indoc! {r#"
                    outer/
                      payload.tar
                    tree/
                      something-else/
                        lib/
                        run"#};
                assert_eq!(listing, expect);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!target.exists());
        assert_eq!(staging_leftovers(root.path()), Vec::<PathBuf>::new());

        Ok(())
    }
}
