use crate::descriptor::ServiceDescriptor;
use crate::error::ControlError;
use crate::layout::Layout;

/// Disk-backed descriptor store.
///
/// One `service.json` per service directory. The directory name and the
/// descriptor's `id` must agree for the descriptor to be loaded.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    layout: Layout,
}

impl DescriptorStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Write the descriptor into its service directory.
    pub async fn store(&self, descriptor: &ServiceDescriptor) -> Result<(), ControlError> {
        let path = self.layout.descriptor_path(&descriptor.id);
        let json = serde_json::to_string_pretty(descriptor)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ControlError::persistence(&path, e))?;
        tracing::debug!(service_id = %descriptor.id, path = %path.display(), "Descriptor persisted");
        Ok(())
    }

    /// Write the exported environment file next to the descriptor.
    pub async fn store_env(&self, id: &str, contents: &str) -> Result<(), ControlError> {
        let path = self.layout.env_file(id);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ControlError::persistence(&path, e))
    }

    /// Delete a service's descriptor so it is not loaded at startup.
    ///
    /// Best effort: a missing file is fine, other failures are logged.
    pub async fn discard(&self, id: &str) {
        let path = self.layout.descriptor_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(service_id = id, "Descriptor discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(service_id = id, path = %path.display(), "Failed to discard descriptor: {e}"),
        }
    }

    /// Load the descriptor of one service.
    pub async fn load(&self, id: &str) -> Result<ServiceDescriptor, ControlError> {
        let path = self.layout.descriptor_path(id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ControlError::persistence(&path, e))?;
        let descriptor: ServiceDescriptor = serde_json::from_str(&content)?;
        if descriptor.id != id {
            return Err(ControlError::InvalidDescriptor(format!(
                "{} declares id {:?}",
                path.display(),
                descriptor.id
            )));
        }
        Ok(descriptor)
    }

    /// Scan the services directory and load every valid descriptor.
    ///
    /// Directories without a readable, well-formed descriptor are skipped.
    pub async fn load_all(&self) -> Result<Vec<ServiceDescriptor>, ControlError> {
        let dir = self.layout.services_dir();
        let mut descriptors = Vec::new();
        if !dir.exists() {
            return Ok(descriptors);
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ControlError::persistence(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ControlError::persistence(&dir, e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(id) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !self.layout.descriptor_path(&id).exists() {
                tracing::debug!(service_dir = %path.display(), "No descriptor, skipping");
                continue;
            }
            match self.load(&id).await {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    tracing::warn!(service_dir = %path.display(), "Skipping invalid descriptor: {e}");
                }
            }
        }
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(descriptors)
    }
}
