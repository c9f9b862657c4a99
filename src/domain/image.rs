use log::info;

use super::error::DeployError;
use super::model::MachineImage;
use super::port::SharedControlPlane;

/// Looks up baked machine images by their tags.
pub struct ImageFinder {
    control_plane: SharedControlPlane,
}

impl ImageFinder {
    pub fn new(control_plane: SharedControlPlane) -> Self {
        Self { control_plane }
    }

    pub async fn find_by_tags(&self, tags: &[(String, String)]) -> Result<Vec<MachineImage>, DeployError> {
        Ok(self.control_plane.describe_images(tags).await?)
    }

    /// Newest available image carrying every tag.
    pub async fn find_latest(&self, tags: &[(String, String)]) -> Result<MachineImage, DeployError> {
        let image = self
            .find_by_tags(tags)
            .await?
            .into_iter()
            .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
            .ok_or_else(|| DeployError::NotFound {
                resource: "image tagged",
                name: format!("{tags:?}"),
            })?;
        info!("Found {} for {:?}", image.image_id, tags);
        Ok(image)
    }
}
