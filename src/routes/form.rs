use std::collections::HashMap;
use std::str::FromStr;

use actix_multipart::Multipart;
use futures_util::StreamExt;
use log::warn;
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::store::image::ImageUpload;

const MAX_PART_BYTES: usize = 10 * 1024 * 1024;

/// A multipart body split into text fields and file parts. Any part that
/// carries a filename is treated as an image upload.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    pub images: Vec<ImageUpload>,
}

impl FormData {
    pub async fn read(mut payload: Multipart) -> Result<Self, AppError> {
        let mut form = FormData::default();
        while let Some(item) = payload.next().await {
            let mut field = item.map_err(|e| {
                warn!("multipart read failed: {}", e);
                AppError::param_error("malformed multipart body")
            })?;
            let name = field.name().to_string();
            let file_name = field
                .content_disposition()
                .get_filename()
                .map(|s| s.to_string());
            let content_type = field.content_type().map(|m| m.essence_str().to_string());

            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let data = chunk.map_err(|e| {
                    warn!("multipart chunk failed: {}", e);
                    AppError::param_error("malformed multipart body")
                })?;
                if bytes.len() + data.len() > MAX_PART_BYTES {
                    return Err(AppError::param_error(format!("part {} is too large", name)));
                }
                bytes.extend_from_slice(&data);
            }

            match file_name {
                Some(file_name) => form.images.push(ImageUpload {
                    file_name,
                    content_type,
                    bytes,
                }),
                None => {
                    let text = String::from_utf8(bytes)
                        .map_err(|_| AppError::param_error(format!("{} must be text", name)))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }

    pub fn required(&self, name: &str) -> Result<&str, AppError> {
        self.text(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::param_error(format!("{} cannot be null", name)))
    }

    pub fn number<T: FromStr>(&self, name: &str) -> Result<T, AppError> {
        self.required(name)?
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::param_error(format!("{} must be a number", name)))
    }

    /// Parses a SCREAMING_SNAKE enum value such as `DIGITAL_DEVICE`.
    pub fn enumeration<T: DeserializeOwned>(&self, name: &str) -> Result<T, AppError> {
        let raw = self.required(name)?.trim().to_string();
        serde_json::from_value(serde_json::Value::String(raw.clone()))
            .map_err(|_| AppError::param_error(format!("{} has unknown value {}", name, raw)))
    }

    #[cfg(test)]
    pub fn with_fields(fields: &[(&str, &str)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            images: Vec::new(),
        }
    }
}
