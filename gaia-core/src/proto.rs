use std::path::{Path, PathBuf};

use prost::Message as _;
use prost_reflect::{DescriptorPool, ServiceDescriptor};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to locate protoc binary: {0}")]
    ProtocBin(String),

    #[error("failed to run protoc: {0}")]
    ProtocIo(#[from] std::io::Error),

    #[error("protoc failed (exit={exit}): {stderr}")]
    ProtocFailed { exit: i32, stderr: String },

    #[error("failed to build descriptor pool: {0}")]
    DescriptorPool(#[from] prost_reflect::DescriptorError),

    #[error("failed to decode FileDescriptorSet: {0}")]
    DescriptorDecode(#[from] prost::DecodeError),

    #[error("descriptor set is empty")]
    EmptyDescriptorSet,
}

/// One package level of a loaded proto file.
///
/// The root node of a file has an empty `name`; each nested node holds one segment of the
/// dotted package name.
#[derive(Debug, Clone, Default)]
pub struct PackageNode {
    pub name: String,
    pub packages: Vec<PackageNode>,
    pub services: Vec<ServiceDescriptor>,
}

/// The service hierarchy of one loaded proto file, in declaration order.
#[derive(Debug, Clone)]
pub struct LoadedProto {
    pub file: String,
    pub root: PackageNode,
}

impl LoadedProto {
    fn from_file(file: &prost_reflect::FileDescriptor) -> Self {
        let segments: Vec<&str> = file
            .package_name()
            .split('.')
            .filter(|s| !s.is_empty())
            .collect();

        let mut leaf = PackageNode {
            name: segments.last().map(|s| (*s).to_string()).unwrap_or_default(),
            packages: Vec::new(),
            services: file.services().collect(),
        };

        if segments.is_empty() {
            return Self {
                file: file.name().to_string(),
                root: leaf,
            };
        }

        for segment in segments.iter().rev().skip(1) {
            leaf = PackageNode {
                name: (*segment).to_string(),
                packages: vec![leaf],
                services: Vec::new(),
            };
        }

        Self {
            file: file.name().to_string(),
            root: PackageNode {
                name: String::new(),
                packages: vec![leaf],
                services: Vec::new(),
            },
        }
    }
}

/// A descriptor pool plus the names of the files it was loaded for.
///
/// Imported files are part of the pool (so message types resolve) but only the root files
/// contribute services.
#[derive(Debug, Clone)]
pub struct ProtoSchema {
    pool: DescriptorPool,
    roots: Vec<String>,
}

impl ProtoSchema {
    fn resolve_protoc() -> Result<std::ffi::OsString> {
        if let Some(p) = std::env::var_os("PROTOC").filter(|v| !v.is_empty()) {
            return Ok(p);
        }

        if Self::path_protoc_is_runnable() {
            return Ok(std::ffi::OsString::from("protoc"));
        }

        Err(Error::ProtocBin(
            "no runnable protoc found; install protoc and ensure it's on PATH, or set PROTOC=/path/to/protoc"
                .to_string(),
        ))
    }

    fn path_protoc_is_runnable() -> bool {
        match std::process::Command::new("protoc")
            .arg("--version")
            .output()
        {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    /// Compile `proto_file` with `protoc` into a descriptor pool.
    ///
    /// `protoc --include_imports` writes the requested file last, which makes it the single
    /// root of the resulting schema.
    pub fn compile_from_proto(proto_file: &Path, include_paths: &[PathBuf]) -> Result<Self> {
        let mut include_paths: Vec<PathBuf> = include_paths.to_vec();

        if let Some(dir) = proto_file.parent() {
            include_paths.push(dir.to_path_buf());
        }

        // Deduplicate while preserving order (tiny input sizes).
        let mut seen: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
        include_paths.retain(|p| seen.insert(p.clone()));

        let protoc = Self::resolve_protoc()?;

        let out = tempfile::NamedTempFile::new()?;
        let out_path = out.path().to_path_buf();

        let mut cmd = std::process::Command::new(protoc);
        cmd.arg("--include_imports")
            .arg(format!("--descriptor_set_out={}", out_path.display()));

        for p in &include_paths {
            cmd.arg("-I").arg(p);
        }

        cmd.arg(proto_file);

        let output = cmd.output()?;
        if !output.status.success() {
            let exit = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::ProtocFailed { exit, stderr });
        }

        let bytes = std::fs::read(out_path)?;
        let fds = prost_types::FileDescriptorSet::decode(bytes.as_slice())?;

        let root = fds
            .file
            .last()
            .and_then(|f| f.name.clone())
            .ok_or(Error::EmptyDescriptorSet)?;
        let pool = DescriptorPool::from_file_descriptor_set(fds)?;

        Ok(Self {
            pool,
            roots: vec![root],
        })
    }

    /// Load an encoded `FileDescriptorSet`; every file in it is a root.
    pub fn from_descriptor_set_bytes(bytes: &[u8]) -> Result<Self> {
        let fds = prost_types::FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(fds)
    }

    pub fn from_file_descriptor_set(fds: prost_types::FileDescriptorSet) -> Result<Self> {
        let roots = fds.file.iter().filter_map(|f| f.name.clone()).collect();
        let pool = DescriptorPool::from_file_descriptor_set(fds)?;
        Ok(Self { pool, roots })
    }

    #[must_use]
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The service hierarchy of each root file, in root order.
    #[must_use]
    pub fn loaded_protos(&self) -> Vec<LoadedProto> {
        self.roots
            .iter()
            .filter_map(|name| self.pool.get_file_by_name(name))
            .map(|file| LoadedProto::from_file(&file))
            .collect()
    }
}
