//! Manifest parsing.
//!
//! A manifest declares run settings, build targets with the paths that
//! trigger them, and relays that always run:
//!
//! ```kdl
//! settings {
//!     push_repo_prefix "ghcr.io/acme"
//!     base_image_tag "23.01"
//! }
//!
//! target "export" {
//!     paths "export/**" "libs/hermes/**"
//!     context "."
//!     dockerfile "export/Dockerfile"
//!     tag "export:latest"
//!     arg "TRITON_TAG" "${settings.base_image_tag}"
//! }
//!
//! relay "tritonserver" {
//!     source "nvcr.io/nvidia/tritonserver:${settings.base_image_tag}-py3"
//!     tag "tritonserver:${settings.base_image_tag}"
//! }
//! ```

use kdl::{KdlDocument, KdlNode};
use shipgate_core::image::with_prefix;
use shipgate_core::{BuildPlan, BuildSpec, Classifier, RelaySpec, Target, TargetRule};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::settings::Settings;
use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

/// A target as written in the manifest, before interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDef {
    pub name: String,
    pub paths: Vec<String>,
    pub context: String,
    pub dockerfile: Option<String>,
    pub tag: Option<String>,
    pub args: BTreeMap<String, String>,
    pub platform: Option<String>,
}

/// A relay as written in the manifest, before interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDef {
    pub name: String,
    pub source: String,
    pub tag: String,
}

/// A parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub settings: Settings,
    pub targets: Vec<TargetDef>,
    pub relays: Vec<RelayDef>,
}

/// Parse a manifest from KDL text.
pub fn parse_manifest(kdl: &str) -> ConfigResult<Manifest> {
    let doc: KdlDocument = kdl.parse()?;

    let mut manifest = Manifest::default();

    for node in doc.nodes() {
        match node.name().value() {
            "settings" => parse_settings(node, &mut manifest.settings),
            "target" => manifest.targets.push(parse_target(node)?),
            "relay" => manifest.relays.push(parse_relay(node)?),
            other => {
                tracing::debug!(node = %other, "Ignoring unknown manifest node");
            }
        }
    }

    let mut names = HashSet::new();
    for target in &manifest.targets {
        if !names.insert(target.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("target '{}'", target.name)));
        }
    }

    let mut names = HashSet::new();
    for relay in &manifest.relays {
        if !names.insert(relay.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("relay '{}'", relay.name)));
        }
    }

    Ok(manifest)
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn from_path(path: &std::path::Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_manifest(&content)
    }

    /// Interpolate every value and produce the immutable build plan.
    ///
    /// Path patterns are compiled here so malformed globs are reported before
    /// anything runs. Destination tags get `push_repo_prefix` prepended.
    pub fn resolve(&self, ctx: &VariableContext) -> ConfigResult<BuildPlan> {
        let prefix = ctx.settings.push_repo_prefix.as_deref();
        let global_args = ctx.settings.build_args();

        let mut targets = Vec::with_capacity(self.targets.len());
        for def in &self.targets {
            let field = |name: &str| format!("target '{}' {}", def.name, name);

            let context = ctx.interpolate_strict(&field("context"), &def.context)?;
            let dockerfile = match &def.dockerfile {
                Some(d) => ctx.interpolate_strict(&field("dockerfile"), d)?,
                None => PathBuf::from(&context)
                    .join("Dockerfile")
                    .to_string_lossy()
                    .into_owned(),
            };
            let tag = match &def.tag {
                Some(t) => ctx.interpolate_strict(&field("tag"), t)?,
                None => format!("{}:latest", def.name),
            };

            let mut args = global_args.clone();
            args.extend(ctx.interpolate_map_strict(&field("arg"), &def.args)?);

            let platform = def
                .platform
                .as_deref()
                .map(|p| ctx.interpolate_strict(&field("platform"), p))
                .transpose()?;

            targets.push(Target {
                rule: TargetRule::new(def.name.clone(), def.paths.iter().cloned()),
                build: BuildSpec {
                    context: PathBuf::from(context),
                    dockerfile: PathBuf::from(dockerfile),
                    tag: with_prefix(prefix, &tag),
                    args,
                    platform,
                },
            });
        }

        let mut relays = Vec::with_capacity(self.relays.len());
        for def in &self.relays {
            let source =
                ctx.interpolate_strict(&format!("relay '{}' source", def.name), &def.source)?;
            let tag = ctx.interpolate_strict(&format!("relay '{}' tag", def.name), &def.tag)?;
            relays.push(RelaySpec {
                name: def.name.clone(),
                source,
                tag: with_prefix(prefix, &tag),
            });
        }

        let plan = BuildPlan::new(targets, relays)
            .map_err(|e| ConfigError::Duplicate(e.to_string()))?;

        Classifier::new(&plan.rules()).map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        Ok(plan)
    }
}

fn parse_settings(node: &KdlNode, settings: &mut Settings) {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if let Some(value) = get_first_scalar_arg(child) {
                settings.set(child.name().value(), value);
            }
        }
    }
}

fn parse_target(node: &KdlNode) -> ConfigResult<TargetDef> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("target name".to_string()))?;

    let mut paths = Vec::new();
    let mut context = None;
    let mut dockerfile = None;
    let mut tag = None;
    let mut args = BTreeMap::new();
    let mut platform = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "paths" | "path" => {
                    paths.extend(get_all_string_args(child));
                }
                "context" => {
                    context = get_first_string_arg(child);
                }
                "dockerfile" | "file" => {
                    dockerfile = get_first_string_arg(child);
                }
                "tag" => {
                    tag = get_first_string_arg(child);
                }
                "platform" => {
                    platform = get_first_string_arg(child);
                }
                "arg" => {
                    let values = get_all_scalar_args(child);
                    match values.as_slice() {
                        [key, value] => {
                            args.insert(key.clone(), value.clone());
                        }
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                field: format!("arg for target '{}'", name),
                                message: "expected a name and a value".to_string(),
                            });
                        }
                    }
                }
                "args" => {
                    if let Some(grandchildren) = child.children() {
                        for gc in grandchildren.nodes() {
                            let key = gc.name().value().to_string();
                            if let Some(val) = get_first_scalar_arg(gc) {
                                args.insert(key, val);
                            }
                        }
                    }
                }
                other => {
                    return Err(ConfigError::UnknownField(format!(
                        "'{}' in target '{}'",
                        other, name
                    )));
                }
            }
        }
    }

    if paths.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "paths for target '{}'",
            name
        )));
    }

    let context =
        context.ok_or_else(|| ConfigError::MissingField(format!("context for target '{}'", name)))?;

    Ok(TargetDef {
        name,
        paths,
        context,
        dockerfile,
        tag,
        args,
        platform,
    })
}

fn parse_relay(node: &KdlNode) -> ConfigResult<RelayDef> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("relay name".to_string()))?;

    let mut source = None;
    let mut tag = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => source = get_first_string_arg(child),
                "tag" => tag = get_first_string_arg(child),
                other => {
                    return Err(ConfigError::UnknownField(format!(
                        "'{}' in relay '{}'",
                        other, name
                    )));
                }
            }
        }
    }

    let source =
        source.ok_or_else(|| ConfigError::MissingField(format!("source for relay '{}'", name)))?;
    let tag = tag.ok_or_else(|| ConfigError::MissingField(format!("tag for relay '{}'", name)))?;

    Ok(RelayDef { name, source, tag })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// Positional arguments rendered as strings. Numbers and booleans are
/// accepted; versions like `3.10` must be quoted to keep the trailing zero.
fn get_all_scalar_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| scalar_to_string(e.value()))
        .collect()
}

fn get_first_scalar_arg(node: &KdlNode) -> Option<String> {
    get_all_scalar_args(node).into_iter().next()
}

fn scalar_to_string(value: &kdl::KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    if let Some(f) = value.as_float() {
        return Some(f.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}
