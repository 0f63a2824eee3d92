//! `qvm create`: define a new qube.

use std::path::{Path, PathBuf};

use crate::app::Qubes;
use crate::cli::CreateArgs;
use crate::config::CreateConfig;
use crate::error::QvmError;
use crate::property;
use crate::storage::PoolAssignment;
use crate::transport::Transport;
use crate::vm::Vm;

/// Qube classes qubesd can create, with a one-line description.
pub const VM_CLASSES: &[(&str, &str)] = &[
    ("AppVM", "persistent qube whose root volume comes from a template"),
    ("DispVM", "disposable qube destroyed after use"),
    ("StandaloneVM", "qube with its own persistent root volume"),
    ("TemplateVM", "qube providing the root volume for AppVMs"),
];

const MAX_NAME_LEN: usize = 31;
const RESERVED_NAMES: &[&str] = &["none", "default", "dom0"];

/// Where the new root volume's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSource {
    Copy(PathBuf),
    /// Like `Copy`, but the file is deleted once imported.
    Move(PathBuf),
}

impl RootSource {
    pub fn path(&self) -> &Path {
        match self {
            RootSource::Copy(p) | RootSource::Move(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub class: String,
    pub template: Option<String>,
    pub label: String,
    pub properties: Vec<(String, String)>,
    pub pools: Option<PoolAssignment>,
    pub root: Option<RootSource>,
}

pub fn validate_name(name: &str) -> Result<(), QvmError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && name.len() <= MAX_NAME_LEN;
    if !valid {
        return Err(QvmError::validation(format!(
            "VM name must match [a-zA-Z][a-zA-Z0-9_.-]* and be at most {MAX_NAME_LEN} characters (got '{name}')"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(QvmError::validation(format!("VM name '{name}' is reserved")));
    }
    Ok(())
}

fn inherits_root(class: &str) -> bool {
    matches!(class, "AppVM" | "DispVM")
}

impl CreateRequest {
    /// Validate command-line input. Nothing here talks to qubesd.
    pub fn from_args(args: &CreateArgs, config: &CreateConfig) -> Result<Self, QvmError> {
        let name = args
            .name
            .clone()
            .ok_or_else(|| QvmError::validation("VM name is required"))?;
        validate_name(&name)?;

        let class = if args.standalone {
            "StandaloneVM".to_string()
        } else {
            args.class
                .clone()
                .unwrap_or_else(|| config.default_class.clone())
        };

        let label = match &args.label {
            Some(label) => label.clone(),
            None if !config.default_label.is_empty() => config.default_label.clone(),
            None => return Err(QvmError::validation("a label is required (--label)")),
        };

        let properties = args
            .properties
            .iter()
            .map(|p| property::parse_assignment(p))
            .collect::<Result<Vec<_>, _>>()?;

        let pools = PoolAssignment::from_args(&args.pools)?;

        let root = match (&args.root_copy_from, &args.root_move_from) {
            (Some(_), Some(_)) => {
                return Err(QvmError::validation(
                    "--root-copy-from and --root-move-from are mutually exclusive",
                ));
            }
            (Some(p), None) => Some(RootSource::Copy(p.clone())),
            (None, Some(p)) => Some(RootSource::Move(p.clone())),
            (None, None) => None,
        };
        if let Some(root) = &root {
            if inherits_root(&class) {
                return Err(QvmError::validation(format!(
                    "{class} uses its template's root volume; --root-copy-from/--root-move-from not allowed"
                )));
            }
            if !root.path().is_file() {
                return Err(QvmError::validation(format!(
                    "root image {} does not exist",
                    root.path().display()
                )));
            }
        }

        Ok(Self {
            name,
            class,
            template: args.template.clone(),
            label,
            properties,
            pools,
            root,
        })
    }

    pub fn method(&self) -> String {
        if self.pools.is_some() {
            format!("mgmt.vm.CreateInPool.{}", self.class)
        } else {
            format!("mgmt.vm.Create.{}", self.class)
        }
    }

    pub fn payload(&self) -> String {
        let mut payload = format!("name={} label={}", self.name, self.label);
        if let Some(pools) = &self.pools {
            payload.push(' ');
            payload.push_str(&pools.payload_fragment());
        }
        payload
    }
}

/// Create the qube, set its properties and import its root volume.
///
/// If anything after the create call fails, the half-built qube is removed
/// again and the original error returned.
pub async fn create<T: Transport>(app: &mut Qubes<T>, req: &CreateRequest) -> Result<Vm, QvmError> {
    app.labels.require(&app.transport, &req.label).await?;
    if app.domains.contains(&app.transport, &req.name).await? {
        return Err(QvmError::validation(format!("VM '{}' already exists", req.name)));
    }
    if let Some(template) = &req.template
        && !app.domains.contains(&app.transport, template).await?
    {
        return Err(QvmError::NotFound {
            kind: "template",
            name: template.clone(),
        });
    }

    let root_data = match &req.root {
        Some(root) => Some(tokio::fs::read(root.path()).await.map_err(|e| QvmError::Io {
            context: format!("reading root image {}", root.path().display()),
            source: e,
        })?),
        None => None,
    };

    tracing::info!(vm = %req.name, class = %req.class, label = %req.label, "creating VM");
    app.transport
        .call(
            "dom0",
            &req.method(),
            req.template.as_deref(),
            Some(req.payload().as_bytes()),
        )
        .await?;
    app.domains.clear_cache();

    let vm = Vm::new(&req.name, &req.class);
    let configured = async {
        for (name, value) in &req.properties {
            vm.property_set(&app.transport, name, value).await?;
        }
        if let Some(data) = &root_data {
            vm.volume_import(&app.transport, "root", data).await?;
        }
        Ok::<_, QvmError>(())
    }
    .await;

    if let Err(e) = configured {
        tracing::warn!(vm = %vm.name, error = %e, "configuring new VM failed, removing it");
        if let Err(remove_err) = vm.remove(&app.transport).await {
            tracing::warn!(vm = %vm.name, error = %remove_err, "failed to remove VM");
        }
        app.domains.clear_cache();
        return Err(e);
    }

    if let Some(RootSource::Move(path)) = &req.root {
        tokio::fs::remove_file(path).await.map_err(|e| QvmError::Io {
            context: format!("removing {}", path.display()),
            source: e,
        })?;
    }

    Ok(vm)
}
