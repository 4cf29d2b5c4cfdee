// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic write-then-rename persistence, grounded in the project's
//! snapshot-save idiom: write to a `.tmp` sibling, `sync_all`, then
//! `rename` over the canonical path. A crash between the two leaves the
//! previous version of the file untouched (spec.md §8 invariant 4).

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Save `value` to `path` atomically as YAML.
pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_yaml::to_writer(&mut writer, value)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a value serialized by [`save_yaml`]. Returns `Ok(None)` if the file
/// is missing; corrupt files are rotated to `.bak`/`.bak.N` so the caller
/// can decide how to recover rather than silently losing data.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    match serde_yaml::from_reader(reader) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let bak_path = rotate_bak_path(path);
            tracing::warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "corrupt run file, moving to .bak"
            );
            fs::rename(path, &bak_path)?;
            Ok(None)
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out (same
/// rotation scheme as the project's snapshot backup rotation).
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}
