//! Sharing collaborator: offer a stored photo to some outside target.

use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// MIME type used for every shared photo.
pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("no sharing target configured")]
    NoTarget,

    #[error("could not start share command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("share command exited with {0}")]
    Exit(ExitStatus),
}

#[async_trait]
pub trait ShareTarget: Send + Sync {
    async fn share(&self, location: &str, mime: &str) -> Result<(), ShareError>;
}

/// Nowhere to share to; every request reports [`ShareError::NoTarget`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShare;

#[async_trait]
impl ShareTarget for NoShare {
    async fn share(&self, location: &str, _mime: &str) -> Result<(), ShareError> {
        debug!(location, "Share requested with no target");
        Err(ShareError::NoTarget)
    }
}

/// Runs an external program for each share request.
///
/// Arguments may contain `{path}` and `{mime}`; when no argument mentions
/// `{path}`, the location is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandShare {
    program: String,
    args: Vec<String>,
}

impl CommandShare {
    /// Build from a full command line, program first. Empty input gives `None`.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self { program: program.clone(), args: args.to_vec() })
    }

    fn arguments(&self, location: &str, mime: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{path}", location).replace("{mime}", mime))
            .collect();
        if !self.args.iter().any(|a| a.contains("{path}")) {
            args.push(location.to_string());
        }
        args
    }
}

#[async_trait]
impl ShareTarget for CommandShare {
    async fn share(&self, location: &str, mime: &str) -> Result<(), ShareError> {
        let status = Command::new(&self.program)
            .args(self.arguments(location, mime))
            .status()
            .await
            .map_err(|source| ShareError::Spawn { program: self.program.clone(), source })?;

        if !status.success() {
            return Err(ShareError::Exit(status));
        }
        info!(program = %self.program, location, "Photo shared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> CommandShare {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        CommandShare::from_command(&parts).unwrap()
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let share = command(&["send", "--type={mime}", "{path}"]);
        assert_eq!(
            share.arguments("/g/a.jpg", JPEG_MIME),
            ["--type=image/jpeg", "/g/a.jpg"]
        );
    }

    #[test]
    fn test_location_appended_without_placeholder() {
        let share = command(&["xdg-open"]);
        assert_eq!(share.arguments("/g/a.jpg", JPEG_MIME), ["/g/a.jpg"]);
    }

    #[test]
    fn test_empty_command_is_none() {
        assert!(CommandShare::from_command(&[]).is_none());
    }

    #[tokio::test]
    async fn test_no_share_reports_missing_target() {
        assert!(matches!(NoShare.share("/g/a.jpg", JPEG_MIME).await, Err(ShareError::NoTarget)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status_is_reported() {
        assert!(command(&["true"]).share("/g/a.jpg", JPEG_MIME).await.is_ok());
        assert!(matches!(
            command(&["false"]).share("/g/a.jpg", JPEG_MIME).await,
            Err(ShareError::Exit(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let result = command(&["photo-weather-no-such-program"]).share("/g/a.jpg", JPEG_MIME).await;
        assert!(matches!(result, Err(ShareError::Spawn { .. })));
    }
}
