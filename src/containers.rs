//! Container enumeration interface
//!
//! The engine never talks to a container runtime itself; it consumes a
//! read-only view of what is running through [`ContainerSource`]. Concrete
//! runtime wrappers (Docker socket, containerd, ...) implement this trait
//! outside the crate.

#[cfg(test)]
use mockall::automock;

/// One running container as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub name: String,
    /// The image reference string exactly as the runtime reports it.
    pub image: String,
}

/// Read-only access to the set of currently running containers.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ContainerSource: Send + Sync {
    async fn running_containers(&self) -> anyhow::Result<Vec<RunningContainer>>;
}

/// Source backed by a fixed watch list, for setups without a runtime
/// integration (images named in the config file or on the command line).
/// The image string doubles as the container name.
pub struct StaticSource {
    containers: Vec<RunningContainer>,
}

impl StaticSource {
    pub fn from_images<S: AsRef<str>>(images: &[S]) -> Self {
        Self {
            containers: images
                .iter()
                .map(|image| RunningContainer {
                    name: image.as_ref().to_string(),
                    image: image.as_ref().to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl ContainerSource for StaticSource {
    async fn running_containers(&self) -> anyhow::Result<Vec<RunningContainer>> {
        Ok(self.containers.clone())
    }
}
