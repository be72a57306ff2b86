// MIT License - Copyright (c) 2021 TJForc
// Scene and Pico registry

pub mod pico;
pub mod scene;
pub mod sections;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ConfigSource, RegistrySources};
use crate::constants::RELOAD_SCENE;
use crate::error::ConfigError;

pub use pico::{parse_picos, Pico};
pub use scene::{parse_scenes, Command, Scene};

/// One immutable generation of the scene and Pico tables.
#[derive(Debug, Clone)]
pub struct Registry {
    generation: u64,
    scenes: HashMap<String, Arc<Scene>>,
    picos: HashMap<String, Pico>,
}

impl Registry {
    fn empty() -> Self {
        let mut scenes = HashMap::new();
        scenes.insert(RELOAD_SCENE.to_string(), Arc::new(Scene::reload()));
        Self {
            generation: 0,
            scenes,
            picos: HashMap::new(),
        }
    }

    /// Incremented every time a new table is published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scenes(&self) -> &HashMap<String, Arc<Scene>> {
        &self.scenes
    }

    pub fn picos(&self) -> &HashMap<String, Pico> {
        &self.picos
    }

    pub fn scene(&self, number: &str) -> Option<Arc<Scene>> {
        self.scenes.get(number).cloned()
    }

    /// Scene mapped to `button_id` on `device_id`, through the Pico table.
    pub fn resolve_button(&self, device_id: &str, button_id: &str) -> Option<Arc<Scene>> {
        let number = self.picos.get(device_id)?.scene_for(button_id)?;
        self.scene(number)
    }

    /// Log buttons whose scene is missing from this generation.
    fn report_unmapped_buttons(&self) {
        for pico in self.picos.values() {
            for (button, number) in &pico.buttons {
                if !self.scenes.contains_key(number) {
                    warn!(
                        "Pico {} button {} refers to unknown scene {}",
                        pico.device_id, button, number
                    );
                }
            }
        }
    }
}

/// Holds the current registry generation.
///
/// Readers resolve against a single generation, so a lookup never mixes a
/// Pico table from one load with a scene table from another. Writers parse
/// the replacement outside the lock and publish it in one swap; a parse
/// failure leaves the current generation in place.
#[derive(Debug)]
pub struct RegistryStore {
    current: RwLock<Arc<Registry>>,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    /// An empty store, holding only the reserved reload scene.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Registry::empty())),
        }
    }

    /// The current generation.
    pub async fn snapshot(&self) -> Arc<Registry> {
        self.current.read().await.clone()
    }

    /// Replace the scene table.
    pub async fn load_scenes(&self, source: &ConfigSource) -> Result<(), ConfigError> {
        let scenes = read_scenes(source)?;
        let mut current = self.current.write().await;
        let next = Registry {
            generation: current.generation + 1,
            scenes,
            picos: current.picos.clone(),
        };
        self.publish(&mut current, next);
        Ok(())
    }

    /// Replace the Pico table.
    pub async fn load_picos(&self, source: &ConfigSource) -> Result<(), ConfigError> {
        let picos = read_picos(source)?;
        let mut current = self.current.write().await;
        let next = Registry {
            generation: current.generation + 1,
            scenes: current.scenes.clone(),
            picos,
        };
        self.publish(&mut current, next);
        Ok(())
    }

    /// Replace both tables as one generation.
    pub async fn reload(&self, sources: &RegistrySources) -> Result<(), ConfigError> {
        let scenes = read_scenes(&sources.scenes)?;
        let picos = read_picos(&sources.picos)?;
        let mut current = self.current.write().await;
        let next = Registry {
            generation: current.generation + 1,
            scenes,
            picos,
        };
        self.publish(&mut current, next);
        Ok(())
    }

    pub async fn resolve_button(&self, device_id: &str, button_id: &str) -> Option<Arc<Scene>> {
        self.snapshot().await.resolve_button(device_id, button_id)
    }

    pub async fn resolve_scene_number(&self, number: &str) -> Option<Arc<Scene>> {
        self.snapshot().await.scene(number)
    }

    fn publish(&self, current: &mut Arc<Registry>, next: Registry) {
        next.report_unmapped_buttons();
        info!(
            "Registry generation {}: {} scenes, {} Picos",
            next.generation,
            next.scenes.len(),
            next.picos.len()
        );
        *current = Arc::new(next);
    }
}

fn read_scenes(source: &ConfigSource) -> Result<HashMap<String, Arc<Scene>>, ConfigError> {
    let origin = source.origin();
    info!("Loading scene configuration from {origin}");
    let scenes = parse_scenes(&origin, &source.read()?)?;
    debug!("Parsed {} scenes from {origin}", scenes.len());
    Ok(scenes)
}

fn read_picos(source: &ConfigSource) -> Result<HashMap<String, Pico>, ConfigError> {
    let origin = source.origin();
    info!("Loading Pico configuration from {origin}");
    let picos = parse_picos(&origin, &source.read()?)?;
    debug!("Parsed {} Picos from {origin}", picos.len());
    Ok(picos)
}
