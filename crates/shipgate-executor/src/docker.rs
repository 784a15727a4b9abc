//! Docker-backed builder and registry.
//!
//! Images are built with the `docker` CLI so BuildKit and `--platform` work
//! as they do for a developer. Registry traffic goes through the Engine API.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{CreateImageOptions, PushImageOptions, TagImageOptions};
use futures::StreamExt;
use shipgate_core::builder::{BuildRequest, BuiltImage, ImageBuilder, Registry};
use shipgate_core::image::ImageRef;
use shipgate_core::secret::CredentialStore;
use shipgate_core::{Error, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Number of trailing output lines kept for error messages.
const OUTPUT_TAIL: usize = 20;

/// Builds images by invoking `docker build`.
pub struct DockerCliBuilder {
    program: String,
    working_dir: PathBuf,
}

impl DockerCliBuilder {
    /// Create a builder that resolves contexts relative to `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "docker".to_string(),
            working_dir: working_dir.into(),
        }
    }

    /// Use a different executable (e.g., `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the build tool for a request.
    pub fn build_args(request: &BuildRequest) -> Vec<String> {
        let spec = &request.spec;
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            spec.dockerfile.to_string_lossy().into_owned(),
            "--tag".to_string(),
            spec.tag.clone(),
            "--label".to_string(),
            format!("shipgate.run={}", request.run_id),
            "--label".to_string(),
            format!("shipgate.target={}", request.target),
        ];

        if let Some(platform) = &spec.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }

        for (key, value) in &spec.args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.context.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    async fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage> {
        let args = Self::build_args(request);
        info!(name = %request.target, tag = %request.spec.tag, "Building image");
        debug!(program = %self.program, ?args, "Spawning build");

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Build(format!("failed to start {}: {}", self.program, e)))?;

        let stdout = tokio::spawn(forward_lines(child.stdout.take(), request.target.clone()));
        let stderr = tokio::spawn(forward_lines(child.stderr.take(), request.target.clone()));

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Build(format!("failed to wait for {}: {}", self.program, e)))?;

        let _ = stdout.await;
        let tail = stderr.await.unwrap_or_default();

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            let tail: Vec<String> = tail.into_iter().collect();
            return Err(Error::Build(format!(
                "{} build exited with {}: {}",
                self.program,
                code,
                tail.join("\n")
            )));
        }

        Ok(BuiltImage {
            tag: request.spec.tag.clone(),
            image_id: None,
        })
    }
}

/// Log each line of a build output stream and keep the last few.
async fn forward_lines<R>(reader: Option<R>, target: String) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(OUTPUT_TAIL);
    let Some(reader) = reader else {
        return tail;
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(name = %target, "{}", line);
                if tail.len() == OUTPUT_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(name = %target, error = %e, "Build output stream error");
                break;
            }
        }
    }
    tail
}

/// Registry client talking to the local Docker daemon.
pub struct DockerRegistry {
    docker: Docker,
    credentials: Arc<dyn CredentialStore>,
}

impl DockerRegistry {
    /// Connect to the local Docker daemon.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            docker,
            credentials,
        })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn docker_credentials(&self, image: &ImageRef<'_>) -> Result<Option<DockerCredentials>> {
        let registry = image.registry();
        let creds = self.credentials.credentials(registry).await?;
        Ok(creds.map(|c| DockerCredentials {
            username: Some(c.username),
            password: Some(c.password),
            serveraddress: Some(c.server),
            ..Default::default()
        }))
    }
}

#[async_trait]
impl Registry for DockerRegistry {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        let image = ImageRef::parse(reference);
        let credentials = self.docker_credentials(&image).await?;

        // A digest pins the image; the engine takes it in place of a tag.
        let tag = match image.digest {
            Some(digest) => digest.to_string(),
            None => image.tag_or_latest().to_string(),
        };

        info!(image = %reference, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.repository.to_string(),
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(Error::Pull(format!("{}: {}", reference, error)));
                    }
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => return Err(Error::Pull(format!("{}: {}", reference, e))),
            }
        }

        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let image = ImageRef::parse(target);
        let options = TagImageOptions {
            repo: image.repository.to_string(),
            tag: image.tag_or_latest().to_string(),
        };

        debug!(source = %source, dest = %target, "Tagging image");
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(|e| Error::Tag(format!("{} -> {}: {}", source, target, e)))
    }

    async fn push(&self, reference: &str) -> Result<()> {
        let image = ImageRef::parse(reference);
        let credentials = self.docker_credentials(&image).await?;

        info!(image = %reference, "Pushing image");
        let options = PushImageOptions {
            tag: image.tag_or_latest().to_string(),
        };

        let mut stream = self
            .docker
            .push_image(image.repository, Some(options), credentials);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(Error::Push(format!("{}: {}", reference, error)));
                    }
                    if let Some(status) = info.status {
                        debug!(status = %status, "Push progress");
                    }
                }
                Err(e) => return Err(Error::Push(format!("{}: {}", reference, e))),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipgate_core::{BuildSpec, RunId};
    use std::collections::BTreeMap;

    fn make_request() -> BuildRequest {
        BuildRequest {
            run_id: RunId::new(),
            target: "export".to_string(),
            spec: BuildSpec {
                context: PathBuf::from("."),
                dockerfile: PathBuf::from("export/Dockerfile"),
                tag: "ghcr.io/acme/export:latest".to_string(),
                args: BTreeMap::from([
                    ("RUNTIME_TAG".to_string(), "3.10".to_string()),
                    ("TRITON_TAG".to_string(), "23.01".to_string()),
                ]),
                platform: None,
            },
        }
    }

    #[test]
    fn test_build_args_structure() {
        let request = make_request();
        let args = DockerCliBuilder::build_args(&request);

        assert_eq!(args[0], "build");
        assert_eq!(&args[1..5], ["--file", "export/Dockerfile", "--tag", "ghcr.io/acme/export:latest"]);
        assert!(args.contains(&format!("shipgate.run={}", request.run_id)));
        assert!(args.contains(&"shipgate.target=export".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("."));
        assert!(!args.contains(&"--platform".to_string()));
    }

    #[test]
    fn test_build_args_are_sorted_and_paired() {
        let args = DockerCliBuilder::build_args(&make_request());

        let build_args: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "--build-arg")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(build_args, vec!["RUNTIME_TAG=3.10", "TRITON_TAG=23.01"]);
    }

    #[test]
    fn test_platform_flag() {
        let mut request = make_request();
        request.spec.platform = Some("linux/amd64".to_string());

        let args = DockerCliBuilder::build_args(&request);
        let idx = args.iter().position(|a| a == "--platform").unwrap();
        assert_eq!(args[idx + 1], "linux/amd64");
    }

    #[tokio::test]
    async fn test_missing_program_fails_build() {
        let builder =
            DockerCliBuilder::new(".").with_program("shipgate-test-no-such-program");

        assert!(!builder.available().await);
        let result = builder.build(&make_request()).await;
        assert!(matches!(result, Err(Error::Build(_))));
    }

    #[tokio::test]
    async fn test_forward_lines_keeps_tail() {
        let input: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = forward_lines(Some(input.as_bytes()), "t".to_string()).await;

        assert_eq!(tail.len(), OUTPUT_TAIL);
        assert_eq!(tail.front().map(String::as_str), Some("line 10"));
        assert_eq!(tail.back().map(String::as_str), Some("line 29"));
    }
}
