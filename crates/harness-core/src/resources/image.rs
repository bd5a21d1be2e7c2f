use crate::config::ImageRef;
use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Image builds download installers and patches; allow them an hour.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(3600);

/// A WebLogic image produced by the image tool build script.
#[derive(Debug, Clone)]
pub struct ImageBuild {
    script: PathBuf,
    image: ImageRef,
    remove_on_teardown: bool,
}

impl ImageBuild {
    pub fn new(script: impl Into<PathBuf>, image: ImageRef) -> Self {
        Self {
            script: script.into(),
            image,
            remove_on_teardown: false,
        }
    }

    /// Remove the image again on teardown. Off by default: images are
    /// shared across classes and expensive to rebuild.
    #[must_use]
    pub fn remove_on_teardown(mut self, remove: bool) -> Self {
        self.remove_on_teardown = remove;
        self
    }

    #[must_use]
    pub fn image(&self) -> &ImageRef {
        &self.image
    }
}

#[async_trait]
impl ExternalResource for ImageBuild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    fn identity(&self) -> String {
        self.image.to_string()
    }

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        info!(target: "harness.resources", image = %self.image, script = %self.script.display(), "Building image");
        let build = CommandSpec::new("sh")
            .arg(self.script.display().to_string())
            .env("IMAGE_NAME_WEBLOGIC", self.image.name.clone())
            .env("IMAGE_TAG_WEBLOGIC", self.image.tag.clone())
            .timeout(BUILD_TIMEOUT);
        exec_checked(ctx.runner.as_ref(), &build).await?;

        let list = CommandSpec::new("docker").args([
            "image".to_string(),
            "ls".to_string(),
            self.image.to_string(),
            "-q".to_string(),
        ]);
        let listed = exec_checked(ctx.runner.as_ref(), &list).await?;
        if listed.stdout.trim().is_empty() {
            return Err(ProvisionError::Invalid(format!(
                "image {} does not exist after build",
                self.image
            )));
        }
        info!(target: "harness.resources", image = %self.image, id = %listed.stdout.trim(), "Image built");
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        if !self.remove_on_teardown {
            info!(target: "harness.resources", image = %self.image, "Keeping image");
            return Ok(());
        }
        let rm = CommandSpec::new("docker").args(["image".to_string(), "rm".to_string(), self.image.to_string()]);
        super::run_teardown(ctx, &format!("Image {}", self.image), &rm).await
    }
}
