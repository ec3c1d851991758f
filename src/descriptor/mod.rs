use crate::endpoint::{shell_quote_one, Command, Endpoint};
use crate::error::{Result, SxError};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Relative path of the job descriptor file inside a container subvolume
/// (spec §6).
pub const DESCRIPTOR_FILE_NAME: &str = ".btrfs-sxbackup";

/// Highest `format_version` major this build understands.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// A job's persisted configuration, synced between source and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub source_container: String,
    pub destination_container: String,
    pub source_retention: String,
    pub destination_retention: String,
    pub compress: bool,
    pub format_version: u32,
    /// Name of the most recently fully-synchronised snapshot, i.e. the
    /// transfer parent a subsequent `run` should expect to find on both
    /// sides. `None` before the job's first successful run.
    pub last_synced: Option<String>,
    /// Keys this build doesn't recognise, preserved verbatim on rewrite.
    pub unknown: BTreeMap<String, String>,
}

impl JobDescriptor {
    /// Render as the INI-style `[Job]` document of spec §6.
    pub fn render(&self) -> String {
        let mut out = String::from("[Job]\n");
        if let Some(s) = &self.source {
            out.push_str(&format!("source={}\n", s));
        }
        if let Some(d) = &self.destination {
            out.push_str(&format!("destination={}\n", d));
        }
        out.push_str(&format!("source-container={}\n", self.source_container));
        out.push_str(&format!(
            "destination-container={}\n",
            self.destination_container
        ));
        out.push_str(&format!("source-retention={}\n", self.source_retention));
        out.push_str(&format!(
            "destination-retention={}\n",
            self.destination_retention
        ));
        out.push_str(&format!("compress={}\n", self.compress));
        out.push_str(&format!("format-version={}\n", self.format_version));
        if let Some(ls) = &self.last_synced {
            out.push_str(&format!("last-synced={}\n", ls));
        }
        for (k, v) in &self.unknown {
            out.push_str(&format!("{}={}\n", k, v));
        }
        out
    }

    /// Parse an INI-style `[Job]` document. Unknown keys are kept, not
    /// dropped, so a future rewrite doesn't lose them; an unknown
    /// `format-version` major is rejected outright.
    pub fn parse(text: &str) -> Result<JobDescriptor> {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }

        let take = |fields: &mut BTreeMap<String, String>, key: &str| fields.remove(key);

        let format_version: u32 = match take(&mut fields, "format-version") {
            Some(v) => v
                .parse()
                .map_err(|_| SxError::Config(format!("invalid format-version \"{}\"", v)))?,
            None => 1,
        };
        if format_version > CURRENT_FORMAT_VERSION {
            return Err(SxError::Config(format!(
                "descriptor format-version {} is newer than this build supports ({})",
                format_version, CURRENT_FORMAT_VERSION
            )));
        }

        let source_container = take(&mut fields, "source-container")
            .ok_or_else(|| SxError::Config("missing source-container".to_string()))?;
        let destination_container = take(&mut fields, "destination-container")
            .ok_or_else(|| SxError::Config("missing destination-container".to_string()))?;
        let source_retention = take(&mut fields, "source-retention").unwrap_or_default();
        let destination_retention =
            take(&mut fields, "destination-retention").unwrap_or_default();
        let compress = take(&mut fields, "compress")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let source = take(&mut fields, "source");
        let destination = take(&mut fields, "destination");
        let last_synced = take(&mut fields, "last-synced");

        Ok(JobDescriptor {
            source,
            destination,
            source_container,
            destination_container,
            source_retention,
            destination_retention,
            compress,
            format_version,
            last_synced,
            unknown: fields,
        })
    }
}

/// Default container subvolume name for a fresh `init` (spec §9: older
/// descriptors used `sxbackup`, transparently left alone; new ones get the
/// dotfile form).
pub const DEFAULT_CONTAINER_NAME: &str = ".sxbackup";

/// Persist and reload a job descriptor at a given endpoint and container
/// path (spec C4).
pub trait DescriptorStore {
    fn read(&self, endpoint: &Endpoint, container_path: &str) -> Result<Option<JobDescriptor>>;
    fn write(&self, endpoint: &Endpoint, container_path: &str, descriptor: &JobDescriptor) -> Result<()>;
    /// Remove the descriptor file. Idempotent: deleting an already-missing
    /// descriptor is not an error.
    fn delete(&self, endpoint: &Endpoint, container_path: &str) -> Result<()>;
}

/// Real descriptor store: reads/writes the descriptor file through the same
/// `Command` seam used for every other filesystem operation, so remote
/// descriptors are handled identically to local ones.
pub struct FileDescriptorStore {
    command: Arc<dyn Command>,
}

impl FileDescriptorStore {
    pub fn new(command: Arc<dyn Command>) -> Self {
        FileDescriptorStore { command }
    }

    fn descriptor_path(container_path: &str) -> String {
        format!(
            "{}/{}",
            container_path.trim_end_matches('/'),
            DESCRIPTOR_FILE_NAME
        )
    }
}

impl DescriptorStore for FileDescriptorStore {
    fn read(&self, endpoint: &Endpoint, container_path: &str) -> Result<Option<JobDescriptor>> {
        let path = Self::descriptor_path(container_path);
        let argv = vec!["cat".to_string(), path];

        match self.command.exec(endpoint, &argv) {
            Ok(output) => Ok(Some(JobDescriptor::parse(&output.stdout_string())?)),
            Err(SxError::Endpoint { stderr_tail, .. })
                if stderr_tail.contains("No such file or directory") =>
            {
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn write(&self, endpoint: &Endpoint, container_path: &str, descriptor: &JobDescriptor) -> Result<()> {
        let path = Self::descriptor_path(container_path);
        let shell_cmd = format!("cat > {}", shell_quote_one(&path));
        let argv = vec!["sh".to_string(), "-c".to_string(), shell_cmd];

        self.command
            .exec_with_stdin(endpoint, &argv, descriptor.render().as_bytes())?;
        Ok(())
    }

    fn delete(&self, endpoint: &Endpoint, container_path: &str) -> Result<()> {
        let path = Self::descriptor_path(container_path);
        let shell_cmd = format!("rm -f {}", shell_quote_one(&path));
        let argv = vec!["sh".to_string(), "-c".to_string(), shell_cmd];

        self.command.exec(endpoint, &argv)?;
        Ok(())
    }
}
