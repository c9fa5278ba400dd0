//! Run preparation: scratch environment, image build, rootfs extraction,
//! metadata capture, and the initial ENTRYPOINT/CMD candidate.
//!
//! Everything here wraps conventional docker tooling; the interesting
//! output is the [`Environment`] (exclusively owned scratch directory plus
//! image name) and the [`ImageConfig`] the generated definitions carry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dockerfile::{self, TEMPLATE_NAME};
use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::process::{shell, sudo_prefix, Cmd};
use crate::rootfs::{normalize, RootFs};

/// Image metadata captured from `docker inspect`.
///
/// Docker emits `null` for absent list fields, hence the Options; the
/// accessors flatten those away.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "User", default)]
    user: Option<String>,
    #[serde(rename = "ExposedPorts", default)]
    exposed_ports: Option<std::collections::BTreeMap<String, serde_json::Value>>,
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default)]
    working_dir: Option<String>,
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<Vec<String>>,
}

impl ImageConfig {
    pub fn user(&self) -> String {
        self.user.clone().unwrap_or_default()
    }

    pub fn exposed_ports(&self) -> Vec<String> {
        self.exposed_ports
            .as_ref()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn env(&self) -> Vec<String> {
        self.env.clone().unwrap_or_default()
    }

    pub fn cmd(&self) -> Vec<String> {
        self.cmd.clone().unwrap_or_default()
    }

    pub fn working_dir(&self) -> String {
        self.working_dir.clone().unwrap_or_default()
    }

    pub fn entrypoint(&self) -> Vec<String> {
        self.entrypoint.clone().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn sample() -> Self {
        let mut ports = std::collections::BTreeMap::new();
        ports.insert("8080/tcp".to_string(), serde_json::Value::Null);
        Self {
            user: None,
            exposed_ports: Some(ports),
            env: Some(vec!["PATH=/usr/bin".to_string()]),
            cmd: Some(vec!["--port".to_string(), "8080".to_string()]),
            working_dir: Some("/srv".to_string()),
            entrypoint: Some(vec!["/srv/app".to_string()]),
        }
    }
}

/// Per-run scratch directory and the image tags derived from it.
///
/// The directory name is a hash of a high-entropy timestamp, so sequential
/// runs never collide; the directory is exclusively owned by one run.
#[derive(Debug, Clone)]
pub struct Environment {
    path: PathBuf,
    image: String,
}

impl Environment {
    /// Create `~/.minicon/<sha256(now_ns)>`.
    pub fn create() -> Result<Self, MinimizeError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| MinimizeError::Other(e.into()))?
            .as_nanos();
        let digest = Sha256::digest(nanos.to_string().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        let home = dirs::home_dir()
            .ok_or_else(|| MinimizeError::ToolUnavailable("home directory".to_string()))?;
        let path = home.join(".minicon").join(&name);
        fs::create_dir_all(&path)?;
        info!("created environment: {}", path.display());

        let image = format!("minicon-{name}");
        Ok(Self { path, image })
    }

    #[cfg(test)]
    pub fn at(path: PathBuf, image: String) -> Self {
        Self { path, image }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base image name; candidate builds tag as `<image>:<phase-tag>`.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn rootfs(&self) -> RootFs {
        RootFs::new(self.path.join("rootfs"))
    }

    pub fn template_path(&self) -> PathBuf {
        self.path.join(TEMPLATE_NAME)
    }

    /// Remove every generated image tag and the scratch directory.
    ///
    /// Best-effort: invoked after the pipeline regardless of outcome.
    pub async fn cleanup(&self) {
        info!("cleaning up images and environment");
        let rmi = format!(
            "docker rmi -f $(docker images {} --format \"{{{{.Repository}}}}:{{{{.Tag}}}}\")",
            self.image
        );
        let _ = shell(&rmi).await;
        if fs::remove_dir_all(&self.path).is_err() {
            // Extracted rootfs entries may be root-owned
            let _ = shell(&format!(
                "{}rm -rf {}",
                sudo_prefix(),
                self.path.display()
            ))
            .await;
        }
    }
}

/// Build the image, export its filesystem into the environment, and write
/// the minimal template.
pub async fn build_and_extract(
    dockerfile_path: &Path,
    env: &Environment,
) -> Result<ImageConfig, MinimizeError> {
    let context = dockerfile_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    info!("building image {}", env.image());
    Cmd::new("docker")
        .args(["build", "-f"])
        .arg_path(dockerfile_path)
        .args(["-t", env.image()])
        .arg_path(&context)
        .error_msg("docker build failed")
        .run()
        .await?;

    info!("exporting filesystem");
    let rootfs_tar = env.path().join("rootfs.tar");
    Cmd::new("docker")
        .args(["build", "-f"])
        .arg_path(dockerfile_path)
        .arg(format!("-o=type=tar,dest={}", rootfs_tar.display()))
        .arg_path(&context)
        .error_msg("docker filesystem export failed")
        .run()
        .await?;

    let rootfs_dir = env.path().join("rootfs");
    fs::create_dir_all(&rootfs_dir)?;
    let sudo = sudo_prefix();
    shell(&format!(
        "{sudo}tar -xf {} -C {}",
        rootfs_tar.display(),
        rootfs_dir.display()
    ))
    .await?;
    let _ = fs::remove_file(&rootfs_tar);

    if !sudo_prefix().is_empty() {
        // Extracted entries may be root-owned; reclaim them for traversal
        let user = std::env::var("USER").unwrap_or_default();
        let _ = shell(&format!(
            "sudo chown -R {user}:{user} {0} && sudo chmod -R 755 {0}",
            env.path().display()
        ))
        .await;
    }

    let config = inspect_metadata(env).await?;
    let original = fs::read_to_string(dockerfile_path)?;
    dockerfile::write_template(&env.template_path(), &original, &config)?;
    Ok(config)
}

async fn inspect_metadata(env: &Environment) -> Result<ImageConfig, MinimizeError> {
    let result = Cmd::new("docker")
        .args(["inspect", "--format", "{{json .Config}}", env.image()])
        .error_msg("docker inspect failed")
        .run()
        .await?;
    let config: ImageConfig = serde_json::from_str(result.stdout_trimmed())
        .map_err(|e| MinimizeError::Other(anyhow::anyhow!("bad inspect output: {e}")))?;
    debug!("image config: {config:?}");
    Ok(config)
}

/// Resolve one ENTRYPOINT/CMD token to a classified rootfs path.
///
/// Tries the working directory first, then `which` inside the chroot.
/// Non-path tokens (flags, arguments) resolve to nothing and are skipped.
async fn resolve_token(
    token: &str,
    rootfs: &RootFs,
    config: &ImageConfig,
    files: &mut FileSet,
    symlinks: &mut SymlinkSet,
) {
    let workdir_path = normalize(&Path::new(&config.working_dir()).join(token));
    if rootfs.is_file(&workdir_path) {
        rootfs.classify(&workdir_path, files, symlinks);
        return;
    }

    let sudo = sudo_prefix();
    let which_cmd = format!("{sudo}chroot {} which {token}", rootfs.path().display());
    let Ok(result) = shell(&which_cmd).await else {
        return;
    };
    if !result.success() {
        return;
    }
    let found = result.stdout_trimmed();
    if found.is_empty() {
        return;
    }
    rootfs.classify(Path::new(found), files, symlinks);
}

/// Build the initial candidate from the image's start command tokens.
pub async fn initial_candidate(
    env: &Environment,
    config: &ImageConfig,
) -> (FileSet, SymlinkSet) {
    let rootfs = env.rootfs();
    let mut files = FileSet::new();
    let mut symlinks = SymlinkSet::new();
    for token in config.entrypoint().iter().chain(config.cmd().iter()) {
        resolve_token(token, &rootfs, config, &mut files, &mut symlinks).await;
    }
    (files, symlinks)
}

/// Locate the start command as an image-absolute path, for tracing and
/// shebang inspection.
pub async fn resolve_command(
    rootfs: &RootFs,
    config: &ImageConfig,
) -> Result<PathBuf, MinimizeError> {
    let entrypoint = config.entrypoint();
    let cmd = config.cmd();
    let command = entrypoint
        .first()
        .or(cmd.first())
        .cloned()
        .ok_or(MinimizeError::NoCommand)?;
    if command.starts_with('/') {
        return Ok(PathBuf::from(command));
    }

    let name = Path::new(&command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or(MinimizeError::NoCommand)?;
    let sudo = sudo_prefix();
    let which_cmd = format!("{sudo}chroot {} which {name}", rootfs.path().display());
    if let Ok(result) = shell(&which_cmd).await {
        if result.success() && !result.stdout_trimmed().is_empty() {
            return Ok(PathBuf::from(result.stdout_trimmed()));
        }
    }

    let fallback = normalize(&Path::new(&config.working_dir()).join(&name));
    if rootfs.is_file(&fallback) {
        return Ok(fallback);
    }
    warn!("start command '{command}' not found in filesystem");
    Err(MinimizeError::NoCommand)
}

/// Validate the input, set up the environment, and build + extract.
///
/// With `--image`, a one-line `FROM <image>` definition is synthesized in
/// the scratch directory and processed identically.
pub async fn prepare(config: &Config) -> Result<(Environment, ImageConfig), MinimizeError> {
    which::which("docker")
        .map_err(|_| MinimizeError::ToolUnavailable("docker".to_string()))?;

    let env = Environment::create()?;

    let dockerfile_path = match &config.image {
        Some(image) => {
            let path = env.path().join("Dockerfile");
            fs::write(&path, format!("FROM {image}\n"))?;
            path
        }
        None => {
            if !config.dockerfile.exists() {
                env.cleanup().await;
                return Err(MinimizeError::MissingInput(config.dockerfile.clone()));
            }
            config.dockerfile.clone()
        }
    };

    // Parse gate: the definition must be structurally valid before any
    // image is built.
    let content = fs::read_to_string(&dockerfile_path)?;
    if let Err(e) = dockerfile::parse(&content) {
        env.cleanup().await;
        return Err(e);
    }

    match build_and_extract(&dockerfile_path, &env).await {
        Ok(metadata) => Ok((env, metadata)),
        Err(e) => {
            env.cleanup().await;
            Err(e)
        }
    }
}
