//! Built artifact domain type

use super::descriptor::BuildDescriptor;

/// The realized, ready-to-run form of a [`BuildDescriptor`]
///
/// Owned by the orchestrator for the duration of a single run. It carries its
/// own copy of the descriptor so nothing points back to the input sequence.
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    descriptor: BuildDescriptor,
    image: String,
    build_log: String,
}

impl BuiltArtifact {
    pub fn new(descriptor: BuildDescriptor, image: impl Into<String>, build_log: String) -> Self {
        Self {
            descriptor,
            image: image.into(),
            build_log,
        }
    }

    /// Component name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Image reference the runtime can start
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn descriptor(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    /// Output captured while executing the setup steps
    pub fn build_log(&self) -> &str {
        &self.build_log
    }
}
