//! Parallel renderer configuration, stored as JSON

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bsp::validate_load_balance;
use crate::core::{Error, Result};
use crate::render::factory::RendererOptions;

/// How the volume is cut into leaves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    /// Leaves cut off the voxel grid one after another
    #[default]
    Balanced,
    /// Top-down halving of the brick inventory
    Hierarchical,
}

/// One render worker (one BSP leaf)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Display the worker renders on
    pub display: String,
    /// Address of a render server; the worker becomes a remote proxy when set
    pub remote: Option<String>,
    /// Volume file name, passed to the worker's renderer as the `filename` option
    pub filename: Option<String>,
    /// Render on the controller thread when `display` is the main display
    pub reuse_main_context: bool,
}

/// Configuration of a [`crate::parallel::ParallelBrickRenderer`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Renderer type each worker creates
    pub brick_renderer: String,
    /// Brick edge length in voxels
    pub brick_size: u32,
    pub partition: PartitionMode,
    /// Per-leaf shares summing to 1; equal shares when absent
    pub load_balance: Option<Vec<f32>>,
    /// One entry per leaf. An empty list means a single worker.
    pub workers: Vec<WorkerConfig>,
    /// Display of the controller
    pub main_display: String,
    pub startup_timeout_ms: u64,
    pub frame_timeout_ms: u64,
    /// Initial viewport size
    pub viewport: [u32; 2],
    /// Extra options passed to every worker's renderer
    pub options: BTreeMap<String, String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            brick_renderer: "default".to_string(),
            brick_size: 16,
            partition: PartitionMode::Balanced,
            load_balance: None,
            workers: Vec::new(),
            main_display: String::new(),
            startup_timeout_ms: 5000,
            frame_timeout_ms: 5000,
            viewport: [512, 512],
            options: BTreeMap::new(),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with `count` plain local workers
    pub fn with_workers(count: usize) -> Self {
        Self {
            workers: vec![WorkerConfig::default(); count],
            ..Self::default()
        }
    }

    /// Build from factory options: `bricks`, `displays`, `sockets`,
    /// `filenames`, `brickrenderer`. Lists are comma separated and the
    /// i-th entry belongs to worker i.
    pub fn from_options(options: &RendererOptions) -> Self {
        let displays = options.get_list("displays");
        let sockets = options.get_list("sockets");
        let filenames = options.get_list("filenames");
        let count = options
            .get_usize("bricks")
            .unwrap_or(0)
            .max(displays.len())
            .max(sockets.len())
            .max(1);

        let workers = (0..count)
            .map(|i| WorkerConfig {
                display: displays.get(i).cloned().unwrap_or_default(),
                remote: non_empty(&sockets, i),
                filename: non_empty(&filenames, i),
                reuse_main_context: false,
            })
            .collect();

        let mut config = Self {
            workers,
            ..Self::default()
        };
        if let Some(renderer) = options.get("brickrenderer").filter(|r| !r.is_empty()) {
            config.brick_renderer = renderer.to_string();
        }
        if let Some(size) = options.get_usize("bricksize") {
            config.brick_size = size as u32;
        }
        const CONSUMED: [&str; 6] = ["bricks", "displays", "sockets", "filenames", "brickrenderer", "bricksize"];
        for (key, value) in options.iter().filter(|(k, _)| !CONSUMED.contains(k)) {
            config.options.insert(key.to_string(), value.to_string());
        }
        config
    }

    /// Number of BSP leaves
    pub fn leaf_count(&self) -> usize {
        self.workers.len().max(1)
    }

    /// Worker `i`, falling back to a plain local worker
    pub fn worker(&self, i: usize) -> WorkerConfig {
        self.workers.get(i).cloned().unwrap_or_default()
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Renderer options for one worker
    pub fn renderer_options(&self) -> RendererOptions {
        self.options
            .iter()
            .fold(RendererOptions::new(), |opts, (k, v)| opts.with(k, v.as_str()))
    }

    /// Check everything that can be checked before workers start
    pub fn validate(&self) -> Result<()> {
        if self.brick_size == 0 {
            return Err(Error::Config("brick_size must be positive".into()));
        }
        if self.startup_timeout_ms == 0 || self.frame_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        if let Some(weights) = &self.load_balance {
            validate_load_balance(weights)?;
            if weights.len() != self.leaf_count() {
                return Err(Error::Config(format!(
                    "{} load balance weights for {} workers",
                    weights.len(),
                    self.leaf_count()
                )));
            }
        }
        Ok(())
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from file (sync)
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

fn non_empty(list: &[String], i: usize) -> Option<String> {
    list.get(i).filter(|s| !s.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RendererConfig::default();
        assert_eq!(cfg.leaf_count(), 1);
        assert_eq!(cfg.brick_size, 16);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("render.json");

        let mut cfg = RendererConfig::with_workers(3);
        cfg.workers[1].remote = Some("10.0.0.2:31050".into());
        cfg.workers[2].reuse_main_context = true;
        cfg.partition = PartitionMode::Hierarchical;
        cfg.load_balance = Some(vec![0.5, 0.25, 0.25]);
        cfg.options.insert("quality".into(), "2".into());
        cfg.save_sync(&path).unwrap();

        let loaded = RendererConfig::load_sync(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RendererConfig =
            serde_json::from_str(r#"{ "workers": [{ "display": ":1" }, {}], "partition": "hierarchical" }"#).unwrap();
        assert_eq!(cfg.leaf_count(), 2);
        assert_eq!(cfg.workers[0].display, ":1");
        assert_eq!(cfg.partition, PartitionMode::Hierarchical);
        assert_eq!(cfg.frame_timeout_ms, 5000);
    }

    #[test]
    fn test_load_rejects_bad_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "workers": [{}, {}], "load_balance": [0.5, 0.6] }"#).unwrap();
        assert!(matches!(
            RendererConfig::load_sync(&path),
            Err(Error::InvalidLoadBalance { .. })
        ));

        let mut cfg = RendererConfig::with_workers(3);
        cfg.load_balance = Some(vec![0.5, 0.5]);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_options() {
        let opts = RendererOptions::parse("bricks=2;displays=:0,:1,:2;sockets=,host:9000;brickrenderer=splat;quality=3");
        let cfg = RendererConfig::from_options(&opts);
        assert_eq!(cfg.leaf_count(), 3);
        assert_eq!(cfg.workers[0].remote, None);
        assert_eq!(cfg.workers[1].remote.as_deref(), Some("host:9000"));
        assert_eq!(cfg.workers[2].display, ":2");
        assert_eq!(cfg.brick_renderer, "splat");
        assert_eq!(cfg.options.get("quality").map(String::as_str), Some("3"));
        assert!(!cfg.options.contains_key("displays"));
    }
}
