mod common;

use common::{parameter_bits, tempdir, toy_agent};
use spiral_agents::{
    networks::Parameterized,
    snapshot::{MANIFEST, latest_snapshot, list_snapshots, prune_snapshots, read_manifest},
};
use spiral_core::{Result, SpiralError};
use spiral_env::ToyEnv;
use std::fs;

#[test]
fn save_then_load_restores_every_bit() -> Result<()> {
    let dir = tempdir()?;
    let mut agent = toy_agent(true, vec![8])?;
    let mut env = ToyEnv::new(common::IMSIZE)?;
    agent.train_step(&mut env)?;

    // Mutate a weight outside the training path.
    let vars = agent.generator().named_vars()?;
    let weight = &vars["trunk0.weight"];
    weight.set(&weight.as_tensor().affine(10., 0.)?)?;

    let generator_saved = parameter_bits(agent.generator())?;
    let discriminator_saved = parameter_bits(agent.discriminator())?;
    let state_saved = agent.gen_optimizer().export()?.state;
    let path = agent.snapshot(0, dir.path())?;
    assert_eq!(path, dir.path().join("0"));
    drop(agent);

    let mut restored = toy_agent(true, vec![8])?;
    assert_ne!(parameter_bits(restored.generator())?, generator_saved);
    assert_eq!(restored.load(&path)?, 0);
    assert_eq!(parameter_bits(restored.generator())?, generator_saved);
    assert_eq!(parameter_bits(restored.discriminator())?, discriminator_saved);

    let state_restored = restored.gen_optimizer().export()?.state;
    assert_eq!(state_restored.len(), state_saved.len());
    for (key, tensor) in state_saved {
        let expected: Vec<f32> = tensor.flatten_all()?.to_vec1()?;
        let found: Vec<f32> = state_restored[&key].flatten_all()?.to_vec1()?;
        assert_eq!(expected, found, "{key}");
    }
    Ok(())
}

#[test]
fn structural_mismatch_is_fatal_and_loads_nothing() -> Result<()> {
    let dir = tempdir()?;
    let agent = toy_agent(true, vec![8])?;
    let path = agent.snapshot(3, dir.path())?;

    let mut other = toy_agent(true, vec![4])?;
    let generator_before = parameter_bits(other.generator())?;
    let discriminator_before = parameter_bits(other.discriminator())?;
    let err = other.load(&path).unwrap_err();
    assert!(matches!(err, SpiralError::SnapshotMismatch { .. }), "{err}");
    assert_eq!(parameter_bits(other.generator())?, generator_before);
    assert_eq!(parameter_bits(other.discriminator())?, discriminator_before);
    assert_eq!(other.step(), 0);
    Ok(())
}

#[test]
fn existing_snapshots_are_never_overwritten() -> Result<()> {
    let dir = tempdir()?;
    let agent = toy_agent(false, vec![8])?;
    let path = agent.snapshot(5, dir.path())?;
    let manifest = read_manifest(&path)?;
    let err = agent.snapshot(5, dir.path()).unwrap_err();
    assert!(matches!(err, SpiralError::SnapshotExists(_)));
    assert_eq!(read_manifest(&path)?, manifest);
    Ok(())
}

#[test]
fn layout_names_files_by_role() -> Result<()> {
    let dir = tempdir()?;
    let agent = toy_agent(false, vec![8])?;
    let path = agent.snapshot(7, dir.path())?;
    for file in [
        MANIFEST,
        "generator.safetensors",
        "generator.optimizer.safetensors",
        "discriminator.safetensors",
        "discriminator.optimizer.safetensors",
    ] {
        assert!(path.join(file).is_file(), "{file} missing");
    }
    let manifest = read_manifest(&path)?;
    assert_eq!(manifest.step, 7);
    assert_eq!(manifest.networks.len(), 2);
    // Only the published directory remains next to the snapshots.
    let entries = fs::read_dir(dir.path())
        .map_err(|err| SpiralError::io(dir.path(), err))?
        .count();
    assert_eq!(entries, 1);
    Ok(())
}

#[test]
fn newest_snapshot_wins_and_pruning_keeps_the_tail() -> Result<()> {
    let dir = tempdir()?;
    let agent = toy_agent(false, vec![8])?;
    for step in [2, 10, 4] {
        agent.snapshot(step, dir.path())?;
    }
    // Unpublished staging directories and stray files are not snapshots.
    fs::create_dir(dir.path().join(".11.abc")).map_err(|err| SpiralError::io(dir.path(), err))?;
    fs::create_dir(dir.path().join("12")).map_err(|err| SpiralError::io(dir.path(), err))?;

    let steps: Vec<usize> = list_snapshots(dir.path())?.into_iter().map(|(s, _)| s).collect();
    assert_eq!(steps, vec![2, 4, 10]);
    assert_eq!(latest_snapshot(dir.path())?, Some(dir.path().join("10")));

    let removed = prune_snapshots(dir.path(), 2)?;
    assert_eq!(removed, vec![dir.path().join("2")]);
    let steps: Vec<usize> = list_snapshots(dir.path())?.into_iter().map(|(s, _)| s).collect();
    assert_eq!(steps, vec![4, 10]);

    let mut resumed = toy_agent(false, vec![8])?;
    assert_eq!(resumed.resume_latest(dir.path())?, Some(10));
    Ok(())
}

#[test]
fn missing_directory_has_no_snapshots() -> Result<()> {
    let dir = tempdir()?;
    assert!(list_snapshots(&dir.path().join("absent"))?.is_empty());
    assert_eq!(latest_snapshot(&dir.path().join("absent"))?, None);
    Ok(())
}
