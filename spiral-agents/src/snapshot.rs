//! Step-indexed checkpoints.
//!
//! ```text
//! <dir>/<step>/manifest.json
//! <dir>/<step>/generator.safetensors
//! <dir>/<step>/generator.optimizer.safetensors      (stateful update rules only)
//! <dir>/<step>/discriminator.safetensors
//! <dir>/<step>/discriminator.optimizer.safetensors
//! ```
//!
//! A snapshot is written into a hidden temporary directory next to its final location and
//! published with a single rename, so readers see either all of it or nothing.

use crate::{networks::NetworkRole, optim::TableExport};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use spiral_core::{Result, SpiralError};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub role: NetworkRole,
    pub parameters: String,
    pub update_rule: String,
    pub optimizer_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub step: usize,
    pub networks: Vec<NetworkEntry>,
}

pub struct NetworkSnapshot {
    pub role: NetworkRole,
    pub update_rule: &'static str,
    pub export: TableExport,
}

#[derive(Debug)]
pub struct LoadedNetwork {
    pub update_rule: String,
    pub parameters: HashMap<String, Tensor>,
    pub optimizer_state: Option<HashMap<String, Tensor>>,
}

#[derive(Debug)]
pub struct LoadedSnapshot {
    pub step: usize,
    pub networks: BTreeMap<NetworkRole, LoadedNetwork>,
}

impl LoadedSnapshot {
    pub fn network(&self, role: NetworkRole, path: &Path) -> Result<&LoadedNetwork> {
        self.networks
            .get(&role)
            .ok_or_else(|| SpiralError::MalformedSnapshot {
                path: path.to_path_buf(),
                detail: format!("no {role} parameters"),
            })
    }
}

/// Writes `networks` as snapshot `step` under `dir` and returns the published directory.
/// Fails with [`SpiralError::SnapshotExists`] rather than touching an existing snapshot.
pub fn write_snapshot(dir: &Path, step: usize, networks: &[NetworkSnapshot]) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|err| SpiralError::io(dir, err))?;
    let target = dir.join(step.to_string());
    if target.exists() {
        return Err(SpiralError::SnapshotExists(target));
    }
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{step}."))
        .tempdir_in(dir)
        .map_err(|err| SpiralError::io(dir, err))?;

    let mut entries = Vec::with_capacity(networks.len());
    for network in networks {
        let parameters = format!("{}.safetensors", network.role);
        candle_core::safetensors::save(
            &network.export.parameters,
            staging.path().join(&parameters),
        )?;
        let optimizer_state = if network.export.state.is_empty() {
            None
        } else {
            let file = format!("{}.optimizer.safetensors", network.role);
            candle_core::safetensors::save(&network.export.state, staging.path().join(&file))?;
            Some(file)
        };
        entries.push(NetworkEntry {
            role: network.role,
            parameters,
            update_rule: network.update_rule.to_string(),
            optimizer_state,
        });
    }
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        step,
        networks: entries,
    };
    let manifest_path = staging.path().join(MANIFEST);
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
        .map_err(|err| SpiralError::io(&manifest_path, err))?;

    if target.exists() {
        return Err(SpiralError::SnapshotExists(target));
    }
    fs::rename(staging.path(), &target).map_err(|err| SpiralError::io(&target, err))?;
    info!(step, path = %target.display(), "snapshot published");
    Ok(target)
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let manifest_path = path.join(MANIFEST);
    let bytes = fs::read(&manifest_path).map_err(|err| SpiralError::io(&manifest_path, err))?;
    let manifest: Manifest = serde_json::from_slice(&bytes)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(SpiralError::MalformedSnapshot {
            path: path.to_path_buf(),
            detail: format!("unsupported format version {}", manifest.format_version),
        });
    }
    Ok(manifest)
}

pub fn read_snapshot(path: &Path, device: &Device) -> Result<LoadedSnapshot> {
    let manifest = read_manifest(path)?;
    let mut networks = BTreeMap::new();
    for entry in manifest.networks {
        let parameters = candle_core::safetensors::load(path.join(&entry.parameters), device)?;
        let optimizer_state = entry
            .optimizer_state
            .map(|file| candle_core::safetensors::load(path.join(file), device))
            .transpose()?;
        let loaded = LoadedNetwork {
            update_rule: entry.update_rule,
            parameters,
            optimizer_state,
        };
        if networks.insert(entry.role, loaded).is_some() {
            return Err(SpiralError::MalformedSnapshot {
                path: path.to_path_buf(),
                detail: format!("{} listed twice", entry.role),
            });
        }
    }
    debug!(path = %path.display(), step = manifest.step, "snapshot read");
    Ok(LoadedSnapshot {
        step: manifest.step,
        networks,
    })
}

/// Published snapshots under `dir`, oldest first. Staging directories and anything that is not
/// a step directory with a manifest are ignored.
pub fn list_snapshots(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(SpiralError::io(dir, err)),
    };
    let mut snapshots = vec![];
    for entry in entries {
        let entry = entry.map_err(|err| SpiralError::io(dir, err))?;
        let path = entry.path();
        let Some(step) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<usize>().ok())
        else {
            continue;
        };
        if path.join(MANIFEST).is_file() {
            snapshots.push((step, path));
        }
    }
    snapshots.sort_by_key(|(step, _)| *step);
    Ok(snapshots)
}

pub fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_snapshots(dir)?.pop().map(|(_, path)| path))
}

/// Deletes all but the newest `keep` snapshots and returns what was removed.
pub fn prune_snapshots(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let snapshots = list_snapshots(dir)?;
    let excess = snapshots.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for (step, path) in snapshots.into_iter().take(excess) {
        fs::remove_dir_all(&path).map_err(|err| SpiralError::io(&path, err))?;
        debug!(step, "snapshot pruned");
        removed.push(path);
    }
    Ok(removed)
}
