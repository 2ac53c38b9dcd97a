//! Container role and the role file read by external monitoring.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

/// Role this container plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerRole {
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "celery-beat")]
    CeleryBeat,
    #[serde(rename = "celery-worker")]
    CeleryWorker,
}

impl ContainerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRole::Api => "api",
            ContainerRole::CeleryBeat => "celery-beat",
            ContainerRole::CeleryWorker => "celery-worker",
        }
    }
}

impl fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "api" => Ok(ContainerRole::Api),
            "celery-beat" => Ok(ContainerRole::CeleryBeat),
            "celery-worker" => Ok(ContainerRole::CeleryWorker),
            other => Err(format!("unknown container role: {other:?}")),
        }
    }
}

/// Write the role name, without a trailing newline.
pub fn write_role_file(path: &Path, role: ContainerRole) -> std::io::Result<()> {
    std::fs::write(path, role.as_str())
}

/// Read the role recorded by a running entrypoint.
pub fn read_role_file(path: &Path) -> anyhow::Result<ContainerRole> {
    let raw = std::fs::read_to_string(path)?;
    raw.parse().map_err(anyhow::Error::msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_role_file_contents_are_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container-role");

        write_role_file(&path, ContainerRole::CeleryBeat).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "celery-beat");

        write_role_file(&path, ContainerRole::Api).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "api");
        assert_eq!(read_role_file(&path).unwrap(), ContainerRole::Api);
    }

    #[test]
    fn test_read_tolerates_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container-role");
        std::fs::write(&path, "celery-worker\n").unwrap();
        assert_eq!(read_role_file(&path).unwrap(), ContainerRole::CeleryWorker);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!("scheduler".parse::<ContainerRole>().is_err());
    }
}
