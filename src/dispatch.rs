// MIT License - Copyright (c) 2021 TJForc
// Scene execution

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::RegistrySources;
use crate::error::Result;
use crate::event::OutboundSender;
use crate::protocol::ButtonEvent;
use crate::registry::{RegistryStore, Scene};

/// Receives output level commands.
///
/// Implemented by the integration session; tests substitute a recorder.
pub trait LevelSink: Send + Sync {
    fn set_level(
        &self,
        device_id: &str,
        level: f64,
        fade_time: f64,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// What a single activation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The scene number did not resolve; nothing was sent or published
    Unknown,
    /// The reserved scene reloaded the registry
    Reloaded,
    /// The reserved scene ran but the new configuration was rejected
    ReloadFailed,
    /// Every command of the scene was sent
    Executed { sent: usize },
    /// A command failed; `sent` commands went out before it
    Interrupted { sent: usize },
}

/// Resolves scene numbers and runs scenes against a [`LevelSink`].
///
/// Each activation publishes the scene number on the outbound queue before
/// any command is sent, so bus subscribers see the selection even when the
/// controller connection fails halfway through the scene.
#[derive(Debug, Clone)]
pub struct SceneDispatcher {
    registry: Arc<RegistryStore>,
    sources: RegistrySources,
    outbound: OutboundSender,
}

impl SceneDispatcher {
    pub fn new(
        registry: Arc<RegistryStore>,
        sources: RegistrySources,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            registry,
            sources,
            outbound,
        }
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    /// Resolve `number` and run the scene.
    pub async fn activate<S: LevelSink>(&self, number: &str, sink: &S) -> Activation {
        match self.registry.resolve_scene_number(number).await {
            Some(scene) => self.run(&scene, sink).await,
            None => {
                debug!("No scene {number}, ignoring");
                Activation::Unknown
            }
        }
    }

    /// Run the scene mapped to a pressed Pico button.
    pub async fn press<S: LevelSink>(&self, event: &ButtonEvent, sink: &S) -> Activation {
        match self
            .registry
            .resolve_button(&event.device_id, &event.button_id)
            .await
        {
            Some(scene) => {
                info!(
                    "Pico {} button {} selects scene {}",
                    event.device_id,
                    event.button_id,
                    scene.label()
                );
                self.run(&scene, sink).await
            }
            None => {
                debug!(
                    "No scene mapped to Pico {} button {}",
                    event.device_id, event.button_id
                );
                Activation::Unknown
            }
        }
    }

    /// Run an already resolved scene.
    pub async fn run<S: LevelSink>(&self, scene: &Scene, sink: &S) -> Activation {
        if self.outbound.send(scene.number.clone()).is_err() {
            warn!("Outbound queue closed, scene {} not published", scene.number);
        }

        if scene.is_reload() {
            info!("Reloading scene and Pico configuration");
            return match self.registry.reload(&self.sources).await {
                Ok(()) => Activation::Reloaded,
                Err(e) => {
                    error!("Reload failed, keeping previous configuration: {e}");
                    Activation::ReloadFailed
                }
            };
        }

        info!("Running scene {}", scene.label());
        let mut sent = 0;
        for command in &scene.commands {
            let fade_time = command.effective_fade_time(scene.default_fade_time);
            if let Err(e) = sink
                .set_level(&command.device_id, command.level, fade_time)
                .await
            {
                error!(
                    "Scene {} stopped at device {}: {e}",
                    scene.label(),
                    command.device_id
                );
                return Activation::Interrupted { sent };
            }
            sent += 1;
        }
        Activation::Executed { sent }
    }
}
