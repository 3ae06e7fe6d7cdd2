//! Snapshots of the model parameters.
//!
//! Each snapshot is a safetensors file named `model.ckpt-<step>.safetensors` holding one
//! `F32` tensor per parameter plus the step in the `global_step` metadata entry. Snapshots
//! are never overwritten nor deleted, the latest one is the one with the highest step.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::info;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result, parameters::ModelParameters};

const PREFIX: &str = "model.ckpt-";
const EXTENSION: &str = ".safetensors";
const TMP_EXTENSION: &str = ".tmp";
const STEP_KEY: &str = "global_step";

/// Stores and restores parameter snapshots inside a directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`, the directory is created on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file of the snapshot taken at `step`.
    pub fn path_for(&self, step: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{step}{EXTENSION}"))
    }

    /// Stores a snapshot of `params` taken at `step`.
    ///
    /// The file is written under a temporary name and renamed once it's synced, so a
    /// partially written snapshot is never visible.
    ///
    /// # Returns
    /// The path of the new snapshot.
    pub fn save(&self, params: &ModelParameters, step: u64) -> Result<PathBuf> {
        let path = self.path_for(step);
        let checkpoint_err = |source| MlErr::Checkpoint {
            path: path.clone(),
            source,
        };

        info!("Storing checkpoint to {} ...", self.dir.display());

        let buffers: Vec<(String, Vec<u8>)> = params
            .layout()
            .iter()
            .map(|(id, spec)| {
                let bytes = params.get(id).iter().flat_map(|v| v.to_le_bytes()).collect();
                (spec.name.clone(), bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, bytes)| {
                let view = TensorView::new(Dtype::F32, vec![bytes.len() / 4], bytes)?;
                Ok((name.clone(), view))
            })
            .collect::<std::result::Result<Vec<_>, safetensors::SafeTensorError>>()
            .map_err(|e| checkpoint_err(io::Error::other(e.to_string())))?;

        let metadata = HashMap::from([(STEP_KEY.to_string(), step.to_string())]);
        let data = safetensors::serialize(views, &Some(metadata))
            .map_err(|e| checkpoint_err(io::Error::other(e.to_string())))?;

        fs::create_dir_all(&self.dir).map_err(checkpoint_err)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_EXTENSION);
        let tmp = PathBuf::from(tmp);

        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(checkpoint_err(e));
        }

        info!(step = step; "Done.");
        Ok(path)
    }

    /// Finds the snapshot with the highest step.
    ///
    /// # Returns
    /// `None` if the directory doesn't exist or has no snapshots.
    pub fn latest(&self) -> Result<Option<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.restore_err(&self.dir, e.to_string())),
        };

        let mut latest = None;

        for entry in entries {
            let entry = entry.map_err(|e| self.restore_err(&self.dir, e.to_string()))?;
            let name = entry.file_name();

            let Some(step) = name.to_str().and_then(parse_step) else {
                continue;
            };

            if latest.as_ref().is_none_or(|(s, _)| step > *s) {
                latest = Some((step, entry.path()));
            }
        }

        Ok(latest)
    }

    /// Restores the latest snapshot into `params`.
    ///
    /// The snapshot is fully read and checked against the layout of `params` before any
    /// value is overwritten.
    ///
    /// # Returns
    /// The step of the restored snapshot, `None` if there was none, or a `Restore` error.
    pub fn load(&self, params: &mut ModelParameters) -> Result<Option<u64>> {
        info!(
            "Trying to restore saved checkpoints from {} ...",
            self.dir.display()
        );

        let Some((step, path)) = self.latest()? else {
            info!(" No checkpoint found.");
            return Ok(None);
        };

        info!("  Checkpoint found: {}", path.display());
        info!("  Global step was: {step}");
        info!("  Restoring...");

        let values = self.read(&path, step, params)?;
        params
            .copy_from(&values)
            .map_err(|e| self.restore_err(&path, e.to_string()))?;

        info!(" Done.");
        Ok(Some(step))
    }

    /// Reads the values of every tensor of `params`'s layout from `path`.
    fn read(&self, path: &Path, step: u64, params: &ModelParameters) -> Result<Vec<f32>> {
        let err = |reason: String| self.restore_err(path, reason);

        let bytes = fs::read(path).map_err(|e| err(e.to_string()))?;

        let (_, metadata) = SafeTensors::read_metadata(&bytes).map_err(|e| err(e.to_string()))?;
        let stored = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(STEP_KEY))
            .and_then(|s| s.parse::<u64>().ok());

        if stored != Some(step) {
            return Err(err(format!(
                "the stored step {stored:?} doesn't match the file's step {step}"
            )));
        }

        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| err(e.to_string()))?;
        let layout = params.layout();

        if tensors.len() != layout.len() {
            return Err(err(format!(
                "found {} tensors but the model has {}",
                tensors.len(),
                layout.len()
            )));
        }

        let mut values = Vec::with_capacity(layout.total_len());

        for (_, spec) in layout.iter() {
            let view = tensors
                .tensor(&spec.name)
                .map_err(|e| err(format!("{}: {e}", spec.name)))?;

            if view.dtype() != Dtype::F32 || view.shape() != [spec.len] {
                return Err(err(format!(
                    "{} is {:?} {:?}, expected F32 [{}]",
                    spec.name,
                    view.dtype(),
                    view.shape(),
                    spec.len
                )));
            }

            values.extend(
                view.data()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }

        Ok(values)
    }

    fn restore_err(&self, path: &Path, reason: String) -> MlErr {
        MlErr::Restore {
            path: path.to_path_buf(),
            reason,
        }
    }
}

/// Parses the step out of a snapshot's file name.
fn parse_step(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)?
        .strip_suffix(EXTENSION)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use comms::specs::machine_learning::{InitSpec, ParamSpec};

    use super::*;
    use crate::parameters::ParamLayout;

    fn layout(len: usize) -> Arc<ParamLayout> {
        Arc::new(ParamLayout::new(vec![
            ParamSpec {
                name: "w".into(),
                len,
                init: InitSpec::Normal {
                    mean: 0.,
                    std_dev: 1.,
                },
            },
            ParamSpec {
                name: "b".into(),
                len: 1,
                init: InitSpec::Const { value: 0.25 },
            },
        ]))
    }

    #[test]
    fn restores_the_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("logdir"));

        let old = ModelParameters::init(layout(4), Some(1)).unwrap();
        let new = ModelParameters::init(layout(4), Some(2)).unwrap();
        manager.save(&old, 9).unwrap();
        manager.save(&new, 10).unwrap();
        fs::write(manager.dir().join("model.ckpt-99.index"), b"unrelated").unwrap();

        let mut params = ModelParameters::zeros(layout(4));
        assert_eq!(manager.load(&mut params).unwrap(), Some(10));
        assert_eq!(params.as_slice(), new.as_slice());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nothing-here"));

        let mut params = ModelParameters::zeros(layout(2));
        assert_eq!(manager.load(&mut params).unwrap(), None);
    }

    #[test]
    fn corrupt_snapshot_is_a_restore_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        let params = ModelParameters::init(layout(2), Some(1)).unwrap();
        manager.save(&params, 3).unwrap();
        fs::write(manager.path_for(4), b"garbage").unwrap();

        let mut restored = ModelParameters::zeros(layout(2));
        let err = manager.load(&mut restored).unwrap_err();

        assert!(matches!(err, MlErr::Restore { .. }));
        assert!(restored.as_slice().iter().all(|&v| v == 0.));
    }

    #[test]
    fn layout_mismatch_is_a_restore_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager
            .save(&ModelParameters::init(layout(2), Some(1)).unwrap(), 0)
            .unwrap();

        let mut params = ModelParameters::zeros(layout(3));
        assert!(matches!(
            manager.load(&mut params),
            Err(MlErr::Restore { .. })
        ));
    }

    #[test]
    fn no_temporary_files_are_left() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager
            .save(&ModelParameters::zeros(layout(2)), 5)
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();

        assert_eq!(names, ["model.ckpt-5.safetensors"]);
    }
}
