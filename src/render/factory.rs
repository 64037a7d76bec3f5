//! Renderer registry and factory
//!
//! Renderers are created by name from an explicit table of constructors.
//! The name `default` resolves through the `PARBRICK_RENDERER` environment
//! variable, and unknown names fall back to `default`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::{Error, Result};
use crate::math::Aabb;
use crate::render::params::{RenderState, TransferFunction};
use crate::render::renderer::BrickRenderer;
use crate::parallel::coordinator;
use crate::render::{remote, serial, splat};
use crate::volume::{Brick, VolumeDesc};

/// Environment variable naming the renderer used for `default`
pub const RENDERER_ENV: &str = "PARBRICK_RENDERER";

/// Everything a renderer constructor gets to see
#[derive(Clone, Debug)]
pub struct RendererContext {
    pub volume: Arc<VolumeDesc>,
    /// Bricks this renderer draws
    pub bricks: Vec<Brick>,
    /// Object-space region this renderer is responsible for
    pub region: Aabb,
    /// Parameters set so far
    pub state: RenderState,
    pub transfer_function: TransferFunction,
}

impl RendererContext {
    /// Context covering the whole volume with the given bricks
    pub fn new(volume: Arc<VolumeDesc>, bricks: Vec<Brick>) -> Self {
        let region = volume.object_bounds();
        Self {
            volume,
            bricks,
            region,
            state: RenderState::new(),
            transfer_function: TransferFunction::default(),
        }
    }
}

/// Options in `key=value` form, several separated by `;`, list values
/// separated by `,`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RendererOptions {
    values: BTreeMap<String, String>,
}

impl RendererOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `"bricks=4;displays=:0,:1"`. Keys are lowercased; a bare key
    /// gets an empty value.
    pub fn parse(s: &str) -> Self {
        let mut options = Self::new();
        for item in s.split(';').map(str::trim).filter(|item| !item.is_empty()) {
            let (key, value) = item.split_once('=').unwrap_or((item, ""));
            options.set(key.trim(), value.trim());
        }
        options
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Comma-separated list. Entries are positional, so inner empty
    /// entries are kept.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Constructor stored in the registry
pub type RendererCtor =
    fn(&RendererFactory, &RendererContext, &RendererOptions) -> Result<Box<dyn BrickRenderer>>;

/// Table of renderer constructors and name aliases
#[derive(Clone, Default)]
pub struct RendererRegistry {
    ctors: HashMap<String, RendererCtor>,
    aliases: HashMap<String, String>,
}

impl RendererRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the renderers this crate ships
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("splat", splat::create);
        registry.register("serbrick", serial::create);
        registry.register("remote", remote::create);
        registry.register("parbrick", coordinator::create);
        registry.alias("default", "splat");
        registry.alias("soft", "splat");
        registry.alias("cpu", "splat");
        registry.alias("0", "default");
        registry.alias("13", "serbrick");
        registry.alias("client", "remote");
        registry.alias("parallel", "parbrick");
        registry
    }

    pub fn register(&mut self, name: &str, ctor: RendererCtor) {
        self.ctors.insert(name.to_lowercase(), ctor);
    }

    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_lowercase(), target.to_lowercase());
    }

    /// Follow aliases to a registered name
    pub fn canonical(&self, name: &str) -> Option<String> {
        let mut name = name.to_lowercase();
        // alias chains are short; the bound guards against cycles
        for _ in 0..=self.aliases.len() {
            if self.ctors.contains_key(&name) {
                return Some(name);
            }
            name = self.aliases.get(&name)?.clone();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn ctor(&self, canonical: &str) -> Option<RendererCtor> {
        self.ctors.get(canonical).copied()
    }
}

/// Creates renderers by type name
#[derive(Clone)]
pub struct RendererFactory {
    registry: RendererRegistry,
    env_default: Option<String>,
}

impl RendererFactory {
    /// Factory reading the `default` renderer from `PARBRICK_RENDERER`
    pub fn new(registry: RendererRegistry) -> Self {
        let env_default = std::env::var(RENDERER_ENV).ok().filter(|s| !s.is_empty());
        Self { registry, env_default }
    }

    /// Override what `default` resolves to
    pub fn with_env_default(mut self, name: Option<String>) -> Self {
        self.env_default = name;
        self
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    /// Registered name `type_name` resolves to
    pub fn resolve(&self, type_name: &str) -> Result<String> {
        let requested = if type_name.is_empty() || type_name.eq_ignore_ascii_case("default") {
            self.env_default.as_deref().unwrap_or("default")
        } else {
            type_name
        };

        if let Some(name) = self.registry.canonical(requested) {
            return Ok(name);
        }
        log::warn!("Unknown renderer type '{}', using default", requested);
        self.registry
            .canonical("default")
            .ok_or_else(|| Error::UnknownRenderer(requested.to_string()))
    }

    pub fn create(
        &self,
        type_name: &str,
        ctx: &RendererContext,
        options: &RendererOptions,
    ) -> Result<Box<dyn BrickRenderer>> {
        let name = self.resolve(type_name)?;
        let ctor = self
            .registry
            .ctor(&name)
            .ok_or_else(|| Error::UnknownRenderer(name.clone()))?;
        log::debug!("Creating '{}' renderer for {} bricks", name, ctx.bricks.len());
        ctor(self, ctx, options)
    }
}

impl Default for RendererFactory {
    fn default() -> Self {
        Self::new(RendererRegistry::with_builtin())
    }
}
