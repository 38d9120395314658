use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gaia_core::{BindingPlanEntry, ErrorFields, FieldsError, LoadedProto, ProtoSchema};
use serde::Deserialize;

/// Configuration file looked up in an application root.
pub const CONFIG_FILE: &str = "gaia.yaml";

/// Extensions read as precompiled `FileDescriptorSet`s instead of being compiled with protoc.
const DESCRIPTOR_SET_EXTENSIONS: &[&str] = &["pb", "desc", "binpb"];

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid root '{}': {source}", .root.display())]
    InvalidRoot {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("root '{}' is not a directory", .0.display())]
    RootNotDir(PathBuf),

    #[error("proto root '{}' is not a directory", .0.display())]
    ProtoRootNotDir(PathBuf),

    #[error("failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to load proto '{}': {source}", .path.display())]
    LoadProto {
        path: PathBuf,
        #[source]
        source: gaia_core::ProtoError,
    },

    #[error("invalid error_props: {0}")]
    InvalidErrorProps(#[source] FieldsError),

    #[error("error_props must not be empty")]
    EmptyErrorProps,

    #[error("root of service '{name}' ('{}') is not a directory", .root.display())]
    ServiceRootNotDir { name: String, root: PathBuf },
}

/// Settings shared by the local service set and every remote service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtoConfig {
    /// Directory holding the proto files, relative to the root. Defaults to `proto`.
    #[serde(default)]
    pub proto_root: Option<PathBuf>,

    /// Files to load, relative to `proto_root`. Defaults to every `*.proto` in `proto_root`.
    #[serde(default)]
    pub protos: Option<Vec<PathBuf>>,

    /// Error fields allowed to cross the wire. Defaults to `[code, message]`.
    #[serde(default)]
    pub error_props: Option<Vec<String>>,
}

/// A remote gaia service to bind clients for.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub host: String,

    /// Application root of the remote service, relative to the local root.
    pub root: PathBuf,

    #[serde(flatten)]
    pub proto: ProtoConfig,
}

/// Deserialized `gaia.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GaiaConfig {
    #[serde(flatten)]
    pub proto: ProtoConfig,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl GaiaConfig {
    pub fn from_yaml_str(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `<root>/gaia.yaml` if present, then resolve against `root`.
    pub fn resolve_root(root: &Path) -> Result<ResolvedConfig> {
        let root = check_root(root)?;
        let file = root.join(CONFIG_FILE);
        let config = if file.is_file() {
            Self::load(&file)?
        } else {
            Self::default()
        };
        config.resolve(&root)
    }

    /// Validate every path, load every proto and build the binding plans.
    pub fn resolve(self, root: &Path) -> Result<ResolvedConfig> {
        let root = check_root(root)?;
        let local = self.proto.resolve(&root)?;

        let mut services = Vec::with_capacity(self.services.len());
        for (name, service) in self.services {
            let service_root = root.join(&service.root);
            if !service_root.is_dir() {
                return Err(ConfigError::ServiceRootNotDir {
                    name,
                    root: service_root,
                });
            }

            let protos = service.proto.resolve(&service_root)?;
            tracing::debug!(service = %name, host = %service.host, services = protos.plan.len(), "resolved remote service");
            services.push(ResolvedService {
                name,
                host: service.host,
                root: service_root,
                protos,
            });
        }

        Ok(ResolvedConfig {
            root,
            protos: local,
            services,
        })
    }
}

fn check_root(root: &Path) -> Result<PathBuf> {
    let resolved = root
        .canonicalize()
        .map_err(|source| ConfigError::InvalidRoot {
            root: root.to_path_buf(),
            source,
        })?;

    if !resolved.is_dir() {
        return Err(ConfigError::RootNotDir(root.to_path_buf()));
    }

    Ok(resolved)
}

fn error_fields(props: Option<Vec<String>>) -> Result<ErrorFields> {
    let Some(props) = props else {
        return Ok(ErrorFields::default());
    };

    ErrorFields::new(props).map_err(|e| match e {
        FieldsError::Empty => ConfigError::EmptyErrorProps,
        other => ConfigError::InvalidErrorProps(other),
    })
}

/// Every `*.proto` file directly inside `proto_root`, sorted by name.
pub fn default_protos(proto_root: &Path) -> Result<Vec<PathBuf>> {
    let read_err = |source| ConfigError::Read {
        path: proto_root.to_path_buf(),
        source,
    };

    let mut protos = Vec::new();
    for entry in std::fs::read_dir(proto_root).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file()
            && path.extension().is_some_and(|ext| ext == "proto")
            && let Some(name) = path.file_name()
        {
            protos.push(PathBuf::from(name));
        }
    }

    protos.sort();
    Ok(protos)
}

fn is_descriptor_set(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| DESCRIPTOR_SET_EXTENSIONS.contains(&ext))
}

fn load_proto(path: &Path, proto_root: &Path) -> Result<Vec<LoadedProto>> {
    let load_err = |source| ConfigError::LoadProto {
        path: path.to_path_buf(),
        source,
    };

    let schema = if is_descriptor_set(path) {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ProtoSchema::from_descriptor_set_bytes(&bytes).map_err(load_err)?
    } else {
        ProtoSchema::compile_from_proto(path, &[proto_root.to_path_buf()]).map_err(load_err)?
    };

    Ok(schema.loaded_protos())
}

impl ProtoConfig {
    fn resolve(self, root: &Path) -> Result<ResolvedProtos> {
        let proto_root = root.join(self.proto_root.unwrap_or_else(|| PathBuf::from("proto")));
        if !proto_root.is_dir() {
            return Err(ConfigError::ProtoRootNotDir(proto_root));
        }

        let error_props = error_fields(self.error_props)?;

        let protos = match self.protos {
            Some(protos) => protos,
            None => default_protos(&proto_root)?,
        };
        let protos: Vec<PathBuf> = protos.iter().map(|p| proto_root.join(p)).collect();

        let mut loaded = Vec::new();
        for path in &protos {
            loaded.extend(load_proto(path, &proto_root)?);
        }

        let plan = gaia_core::walk(&loaded);
        Ok(ResolvedProtos {
            proto_root,
            protos,
            error_props,
            plan,
        })
    }
}

/// Loaded protos and error whitelist of one service set.
#[derive(Debug, Clone)]
pub struct ResolvedProtos {
    pub proto_root: PathBuf,
    pub protos: Vec<PathBuf>,
    pub error_props: ErrorFields,
    pub plan: Vec<BindingPlanEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub name: String,
    pub host: String,
    pub root: PathBuf,
    pub protos: ResolvedProtos,
}

/// A fully validated configuration, ready to build an [`crate::App`] from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub protos: ResolvedProtos,
    pub services: Vec<ResolvedService>,
}
