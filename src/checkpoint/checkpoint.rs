use super::CheckpointError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File written into a checkpoint directory once it is complete
pub const VALIDITY_STAMP: &str = "valid";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const RECOVERY_MARKER: char = 'r';

/// A checkpoint directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    name: String,
    dir: PathBuf,
    sequence: u32,
}

impl Checkpoint {
    /// Builds a checkpoint name
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use sumi_engine::Checkpoint;
    ///
    /// let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
    /// assert_eq!(Checkpoint::name_for(7, false, at), "cp00007-20240309140500");
    /// assert_eq!(Checkpoint::name_for(7, true, at), "rcp00007-20240309140500");
    /// ```
    pub fn name_for(sequence: u32, recovered: bool, at: DateTime<Utc>) -> String {
        format!(
            "{}cp{:05}-{}",
            if recovered { "r" } else { "" },
            sequence,
            at.format(TIMESTAMP_FORMAT)
        )
    }

    /// Creates the directory for a new checkpoint
    pub fn generate(
        checkpoints_dir: &Path,
        sequence: u32,
        recovered: bool,
    ) -> Result<Self, CheckpointError> {
        let name = Self::name_for(sequence, recovered, Utc::now());
        let dir = checkpoints_dir.join(&name);
        fs::create_dir_all(&dir)?;
        tracing::debug!("Created checkpoint directory {}", dir.display());
        Ok(Self {
            name,
            dir,
            sequence,
        })
    }

    /// Opens an existing checkpoint by name
    pub fn open(checkpoints_dir: &Path, name: &str) -> Result<Self, CheckpointError> {
        let sequence =
            parse_sequence(name).ok_or_else(|| CheckpointError::InvalidName(name.to_string()))?;
        let dir = checkpoints_dir.join(name);
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound(dir.display().to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            dir,
            sequence,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns true if the name carries the recovery marker
    pub fn is_recovered(&self) -> bool {
        self.name.starts_with(RECOVERY_MARKER)
    }

    /// The name without its timestamp, e.g. `cp00003`
    pub fn short_name(&self) -> &str {
        self.name
            .split_once('-')
            .map_or(self.name.as_str(), |(short, _)| short)
    }

    /// Path of a component's file inside the checkpoint
    ///
    /// `component.json` without a suffix, `component-<suffix>` with one.
    pub fn component_path(&self, component: &str, suffix: Option<&str>) -> PathBuf {
        match suffix {
            Some(suffix) => self.dir.join(format!("{}-{}", component, suffix)),
            None => self.dir.join(format!("{}.json", component)),
        }
    }

    /// Writes a component's JSON state
    pub fn save_json<T: Serialize>(&self, component: &str, value: &T) -> Result<(), CheckpointError> {
        let path = self.component_path(component, None);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Reads a component's JSON state
    pub fn load_json<T: DeserializeOwned>(&self, component: &str) -> Result<T, CheckpointError> {
        let path = self.component_path(component, None);
        let contents = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CheckpointError::NotFound(path.display().to_string()),
            _ => CheckpointError::Io(e),
        })?;
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Writes the validity stamp: the completion time, then `summary`
    pub fn write_validity_stamp(&self, summary: &str) -> Result<(), CheckpointError> {
        let contents = format!("{}\n{}\n", Utc::now().to_rfc3339(), summary);
        fs::write(self.dir.join(VALIDITY_STAMP), contents)?;
        Ok(())
    }

    pub fn has_validity_stamp(&self) -> bool {
        self.dir.join(VALIDITY_STAMP).is_file()
    }

    /// Deletes the checkpoint directory
    pub fn delete(&self) -> Result<(), CheckpointError> {
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Extracts the sequence number from a checkpoint name
fn parse_sequence(name: &str) -> Option<u32> {
    let name = name.strip_prefix(RECOVERY_MARKER).unwrap_or(name);
    let (sequence, timestamp) = name.strip_prefix("cp")?.split_once('-')?;
    let well_formed = sequence.len() >= 5
        && timestamp.len() == 14
        && sequence.bytes().all(|b| b.is_ascii_digit())
        && timestamp.bytes().all(|b| b.is_ascii_digit());
    if !well_formed {
        return None;
    }
    sequence.parse().ok()
}

/// Lists stamped checkpoints in `checkpoints_dir`, newest first
///
/// Directories with a checkpoint name but no stamp are skipped with a
/// warning. A missing directory yields an empty list.
pub fn find_available_checkpoints(checkpoints_dir: &Path) -> Result<Vec<Checkpoint>, CheckpointError> {
    let entries = match fs::read_dir(checkpoints_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut available = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(checkpoint) = Checkpoint::open(checkpoints_dir, &name) else {
            continue;
        };
        if checkpoint.has_validity_stamp() {
            available.push(checkpoint);
        } else {
            tracing::warn!("Ignoring checkpoint {} without a validity stamp", name);
        }
    }

    available.sort_by(|a, b| {
        let stamp = |cp: &Checkpoint| cp.name.rsplit('-').next().unwrap_or_default().to_string();
        b.sequence
            .cmp(&a.sequence)
            .then_with(|| stamp(b).cmp(&stamp(a)))
    });
    Ok(available)
}
