//! Proof image storage.
//!
//! Images are content addressed: the id is a UUIDv5 of the bytes plus the extension of the
//! detected type, so uploading the same image twice yields the same id.

use crate::utils::{Base64Byte, IfNotFound, IntoAnyhow};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use entity::resource_info as ResourceInfos;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::DatabaseConnection;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Accepted image types: content type, file extension and signature check
const IMAGE_KINDS: [(&str, &str, fn(&[u8]) -> bool); 4] = [
    ("image/png", "png", is_png),
    ("image/jpeg", "jpg", is_jpeg),
    ("image/gif", "gif", is_gif),
    ("image/webp", "webp", is_webp),
];

fn is_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])
}

fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xff, 0xd8, 0xff])
}

fn is_gif(data: &[u8]) -> bool {
    data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")
}

fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP"
}

/// Check an upload against the size limit and the allow-list, returning the normalized
/// content type and the extension to store it under
pub fn validate_image(content_type: &str, data: &[u8], max_size: usize) -> Result<(&'static str, &'static str)> {
    if data.is_empty() {
        bail!("image is empty");
    }
    if data.len() > max_size {
        bail!("image is {} bytes, the limit is {} bytes", data.len(), max_size);
    }
    let content_type = content_type.trim().to_ascii_lowercase();
    let (mime, ext, matches) = IMAGE_KINDS
        .iter()
        .find(|(mime, _, _)| *mime == content_type)
        .ok_or_else(|| anyhow!("content type {} is not allowed", content_type))?;
    if !matches(data) {
        bail!("image content does not match {}", mime);
    }
    Ok((*mime, *ext))
}

pub fn image_id(data: &[u8], ext: &str) -> String {
    format!("{}.{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, data), ext)
}

/// Content type for a well-formed image id, ids that could not have been issued are rejected
pub fn content_type_of(id: &str) -> Result<&'static str> {
    let (uuid, ext) = id
        .rsplit_once('.')
        .ok_or_else(|| anyhow!("invalid image id {}", id))?;
    Uuid::parse_str(uuid).map_err(|_| anyhow!("invalid image id {}", id))?;
    IMAGE_KINDS
        .iter()
        .find(|(_, kind_ext, _)| *kind_ext == ext)
        .map(|(mime, _, _)| *mime)
        .ok_or_else(|| anyhow!("invalid image id {}", id))
}

#[async_trait]
pub trait ResourceRepo {
    async fn has_resource(&self, resource_id: &str) -> Result<bool>;
    async fn get_resource(&self, resource_id: &str) -> Result<Base64Byte>;
    async fn store_resource(&self, resource_id: &str, content_type: &str, resource: Vec<u8>) -> Result<String>;
}

/// Use files under a root directory to persist images
pub struct FileResource {
    root: PathBuf,
}

impl FileResource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        FileResource {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ResourceRepo for FileResource {
    async fn has_resource(&self, resource_id: &str) -> Result<bool> {
        Ok(self.root.join(resource_id).is_file())
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Base64Byte> {
        let path = self.root.join(resource_id);
        if !path.is_file() {
            return None.if_not_found(format!("image {}", resource_id));
        }
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read file: {}", path.display()))?;
        Ok(Base64Byte::new(content))
    }

    async fn store_resource(&self, resource_id: &str, _content_type: &str, resource: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create dir: {}", self.root.display()))?;
        let path = self.root.join(resource_id);
        tokio::fs::write(&path, resource)
            .await
            .with_context(|| format!("write file: {}", path.display()))?;
        Ok(resource_id.to_string())
    }
}

/// Use the database to persist images
pub struct DbResource {
    conn: DatabaseConnection,
}

impl DbResource {
    pub fn new(conn: DatabaseConnection) -> Self {
        DbResource { conn }
    }
}

#[async_trait]
impl ResourceRepo for DbResource {
    async fn has_resource(&self, resource_id: &str) -> Result<bool> {
        ResourceInfos::Entity::find()
            .filter(ResourceInfos::Column::Id.eq(resource_id.to_string()))
            .count(&self.conn)
            .await
            .map(|count| count > 0)
            .anyhow()
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Base64Byte> {
        ResourceInfos::Entity::find_by_id(resource_id.to_string())
            .one(&self.conn)
            .await?
            .if_not_found(format!("image {}", resource_id))
            .map(|info| Base64Byte::new(info.data))
    }

    async fn store_resource(&self, resource_id: &str, content_type: &str, resource: Vec<u8>) -> Result<String> {
        if self.has_resource(resource_id).await? {
            return Ok(resource_id.to_string());
        }
        let info = ResourceInfos::ActiveModel {
            id: Set(resource_id.to_string()),
            content_type: Set(content_type.to_string()),
            data: Set(resource),
            create_at: Set(Utc::now().timestamp()),
        };
        ResourceInfos::Entity::insert(info)
            .exec_without_returning(&self.conn)
            .await
            .map(|_| resource_id.to_string())
            .anyhow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_db;
    use std::sync::Arc;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 13];

    #[test]
    fn validates_images() {
        assert_eq!(validate_image("image/png", PNG, 1024).unwrap(), ("image/png", "png"));
        assert_eq!(validate_image(" Image/PNG ", PNG, 1024).unwrap().1, "png");
        assert!(validate_image("image/png", PNG, 4).is_err());
        assert!(validate_image("image/png", &[], 1024).is_err());
        assert!(validate_image("image/svg+xml", PNG, 1024).is_err());
        assert!(validate_image("image/jpeg", PNG, 1024).is_err());
        assert!(validate_image("image/gif", b"GIF89a....", 1024).is_ok());
        assert!(validate_image("image/webp", b"RIFF\x10\0\0\0WEBPVP8 ", 1024).is_ok());
        assert!(validate_image("image/webp", b"RIFF\x10\0\0\0AVI ", 1024).is_err());
    }

    #[test]
    fn ids_are_content_addressed() {
        let id = image_id(PNG, "png");
        assert_eq!(id, image_id(PNG, "png"));
        assert_ne!(id, image_id(b"GIF89a", "gif"));
        assert!(id.ends_with(".png"));
        assert_eq!(content_type_of(&id).unwrap(), "image/png");
        assert!(content_type_of("../../etc/passwd").is_err());
        assert!(content_type_of("abc.png").is_err());
        assert!(content_type_of(&id.replace(".png", ".exe")).is_err());
    }

    async fn exercise(repo: Arc<dyn ResourceRepo + Send + Sync>) {
        let id = image_id(PNG, "png");
        assert!(!repo.has_resource(&id).await.unwrap());
        assert!(repo.get_resource(&id).await.is_err());
        repo.store_resource(&id, "image/png", PNG.to_vec()).await.unwrap();
        repo.store_resource(&id, "image/png", PNG.to_vec()).await.unwrap();
        assert!(repo.has_resource(&id).await.unwrap());
        assert_eq!(repo.get_resource(&id).await.unwrap().0, PNG.to_vec());
    }

    #[tokio::test]
    async fn file_resource_roundtrip() {
        let root = std::env::temp_dir().join(Uuid::new_v4().to_string());
        exercise(Arc::new(FileResource::new(&root))).await;
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn db_resource_roundtrip() {
        exercise(Arc::new(DbResource::new(memory_db().await))).await;
    }
}
