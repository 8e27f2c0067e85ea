//! MPRIS media players driven through the `playerctl` command

use super::surface::{MediaTarget, TargetLocator};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;

/// Players probed in order; `None` lets playerctl pick whichever is active
pub const DEFAULT_PLAYERS: &[Option<&str>] = &[Some("mpv"), Some("vlc"), None];

/// One MPRIS player, or playerctl's default choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerctlTarget {
    player: Option<String>,
}

impl PlayerctlTarget {
    pub fn new(player: Option<String>) -> Self {
        Self { player }
    }

    fn args<'a>(&'a self, action: &'a str) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(3);
        if let Some(player) = &self.player {
            args.push("--player");
            args.push(player.as_str());
        }
        args.push(action);
        args
    }

    async fn run(&self, action: &str) -> Result<String> {
        let args = self.args(action);
        let output = Command::new("playerctl")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run playerctl")?;

        if !output.status.success() {
            bail!(
                "playerctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaTarget for PlayerctlTarget {
    async fn pause(&self) -> Result<()> {
        self.run("pause").await?;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.run("status").await? == "Paused")
    }

    async fn play(&self) -> Result<()> {
        self.run("play").await?;
        Ok(())
    }
}

/// Resolves when the named player is running
pub struct PlayerctlLocator {
    target: Arc<PlayerctlTarget>,
    name: String,
}

impl PlayerctlLocator {
    pub fn new(player: Option<&str>) -> Self {
        Self {
            target: Arc::new(PlayerctlTarget::new(player.map(str::to_string))),
            name: format!("playerctl:{}", player.unwrap_or("default")),
        }
    }
}

#[async_trait]
impl TargetLocator for PlayerctlLocator {
    async fn locate(&self) -> Option<Arc<dyn MediaTarget>> {
        // `status` fails when no such player exists
        match self.target.run("status").await {
            Ok(_) => Some(self.target.clone() as Arc<dyn MediaTarget>),
            Err(_) => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Locators for `DEFAULT_PLAYERS`, in probe order
pub fn default_locators() -> Vec<Box<dyn TargetLocator>> {
    DEFAULT_PLAYERS
        .iter()
        .map(|player| Box::new(PlayerctlLocator::new(*player)) as Box<dyn TargetLocator>)
        .collect()
}
