use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, error, warn};
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Serialize;

use crate::entity::image::{self, DomainName};
use crate::error::AppError;

const RELATIVE_DIR: &str = "images";

/// Image content types accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageType {
    Jpeg,
    Png,
    Jpg,
}

impl ImageType {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Jpg => "image/jpg",
        }
    }

    pub fn from_mime(content_type: &str) -> Result<Self, AppError> {
        let normalized = content_type.trim().to_ascii_lowercase();
        [Self::Jpeg, Self::Png, Self::Jpg]
            .into_iter()
            .find(|t| t.mime() == normalized)
            .ok_or_else(|| AppError::invalid_image_type(content_type))
    }
}

/// A file part received with a post or comment request.
#[derive(Clone, Debug)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub id: i32,
    pub name: String,
    pub path: String,
    pub url: String,
    pub content_type: String,
    pub size: i64,
    pub domain_name: DomainName,
    pub domain_id: i32,
}

impl From<image::Model> for ImageView {
    fn from(model: image::Model) -> Self {
        Self {
            url: format!("/api/v1/images/{}", model.id),
            id: model.id,
            name: model.name,
            path: model.path,
            content_type: model.content_type,
            size: model.size,
            domain_name: model.domain_name,
            domain_id: model.domain_id,
        }
    }
}

/// Local-disk image storage. Files live under `<base>/images/`, rows in
/// `t_image` keyed by (domain, domain id).
#[derive(Clone, Debug)]
pub struct ImageStore {
    base_path: PathBuf,
}

impl ImageStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Rejects any non-empty upload whose declared or sniffed type is not an
    /// accepted image type. Nothing is written.
    pub fn validate(files: &[ImageUpload]) -> Result<(), AppError> {
        for file in files.iter().filter(|f| !f.is_empty()) {
            let declared = file.content_type.as_deref().unwrap_or("");
            ImageType::from_mime(declared)?;
            if let Some(kind) = infer::get(&file.bytes) {
                ImageType::from_mime(kind.mime_type())?;
            }
        }
        Ok(())
    }

    pub async fn save<C: ConnectionTrait>(
        &self,
        db: &C,
        files: &[ImageUpload],
        domain: DomainName,
        domain_id: i32,
    ) -> Result<Vec<ImageView>, AppError> {
        Self::validate(files)?;

        let mut saved = Vec::new();
        for file in files.iter().filter(|f| !f.is_empty()) {
            let content_type = ImageType::from_mime(file.content_type.as_deref().unwrap_or(""))?;
            let relative = format!("{}/{}", RELATIVE_DIR, unique_name(&file.file_name));
            let target = self.base_path.join(&relative);
            write_file(&target, &file.bytes).await?;

            let model = image::ActiveModel {
                name: Set(file.file_name.clone()),
                content_type: Set(content_type.mime().to_string()),
                size: Set(file.bytes.len() as i64),
                path: Set(relative),
                domain_name: Set(domain),
                domain_id: Set(domain_id),
                created: Set(Some(Utc::now())),
                ..Default::default()
            }
            .insert(db)
            .await?;
            debug!("image stored id={} path={}", model.id, model.path);
            saved.push(ImageView::from(model));
        }
        Ok(saved)
    }

    pub async fn get_images<C: ConnectionTrait>(
        &self,
        db: &C,
        domain: DomainName,
        domain_id: i32,
    ) -> Result<Vec<ImageView>, AppError> {
        let rows = find_by_domain(db, domain, domain_id).await?;
        Ok(rows.into_iter().map(ImageView::from).collect())
    }

    /// Removes the files first, then the rows. A file that is already gone
    /// is skipped.
    pub async fn delete_all_images<C: ConnectionTrait>(
        &self,
        db: &C,
        domain: DomainName,
        domain_id: i32,
    ) -> Result<(), AppError> {
        let rows = find_by_domain(db, domain, domain_id).await?;
        if rows.is_empty() {
            return Ok(());
        }

        for row in &rows {
            let full = self.base_path.join(&row.path);
            match tokio::fs::remove_file(&full).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("image file already missing: {}", full.display());
                }
                Err(e) => {
                    error!("image delete failed: {} ({})", e, full.display());
                    return Err(AppError::DeleteFailure);
                }
            }
        }

        image::Entity::delete_many()
            .filter(image::Column::DomainName.eq(domain))
            .filter(image::Column::DomainId.eq(domain_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Bytes and content type of a stored image.
    pub async fn read<C: ConnectionTrait>(&self, db: &C, id: i32) -> Result<(Vec<u8>, String), AppError> {
        let row = image::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::not_found(format!("image {} not found", id)))?;
        let full = self.base_path.join(&row.path);
        let data = tokio::fs::read(&full).await.map_err(|e| {
            warn!("image read failed: {} ({})", e, full.display());
            AppError::not_found(format!("image {} not found", id))
        })?;
        Ok((data, row.content_type))
    }
}

async fn find_by_domain<C: ConnectionTrait>(
    db: &C,
    domain: DomainName,
    domain_id: i32,
) -> Result<Vec<image::Model>, AppError> {
    Ok(image::Entity::find()
        .filter(image::Column::DomainName.eq(domain))
        .filter(image::Column::DomainId.eq(domain_id))
        .order_by_asc(image::Column::Id)
        .all(db)
        .await?)
}

async fn write_file(target: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            error!("image dir create failed: {} ({})", e, parent.display());
            AppError::UploadFailure
        })?;
    }
    tokio::fs::write(target, bytes).await.map_err(|e| {
        error!("image write failed: {} ({})", e, target.display());
        AppError::UploadFailure
    })
}

fn unique_name(original: &str) -> String {
    let prefix = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}{}-{}", prefix, suffix, clean_file_name(original))
}

/// Last path component with anything outside `[A-Za-z0-9._-]` replaced.
fn clean_file_name(original: &str) -> String {
    let last = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("");
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
