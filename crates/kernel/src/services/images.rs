//! Upload resizing for user photos and tour images.
//!
//! Uploads are sniffed with `infer`, decoded and resized off the async
//! runtime, and written as JPEG under `static/img`. A batch of tour images
//! either lands completely or not at all.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const NOT_AN_IMAGE: &str = "Not an image! Please upload only images.";

pub const JPEG_QUALITY: u8 = 90;
pub const USER_PHOTO_SIZE: (u32, u32) = (500, 500);
pub const TOUR_IMAGE_SIZE: (u32, u32) = (2000, 1333);
pub const MAX_TOUR_IMAGES: usize = 3;

/// Stored file names of a processed tour upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TourImages {
    pub image_cover: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImageProcessor {
    static_dir: PathBuf,
}

struct Job {
    bytes: Vec<u8>,
    size: (u32, u32),
    path: PathBuf,
}

impl ImageProcessor {
    pub fn new(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            static_dir: static_dir.into(),
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.static_dir.join("img").join("users")
    }

    pub fn tours_dir(&self) -> PathBuf {
        self.static_dir.join("img").join("tours")
    }

    /// Resize a profile photo; returns the stored file name.
    pub async fn user_photo(&self, user_id: Uuid, bytes: Vec<u8>) -> AppResult<String> {
        let filename = format!("user-{user_id}-{}.jpeg", Utc::now().timestamp_millis());
        let dir = self.users_dir();
        self.run(
            &dir,
            vec![Job {
                bytes,
                size: USER_PHOTO_SIZE,
                path: dir.join(&filename),
            }],
        )
        .await?;
        Ok(filename)
    }

    /// Resize a cover and up to [`MAX_TOUR_IMAGES`] gallery images.
    pub async fn tour_images(
        &self,
        tour_id: Uuid,
        cover: Option<Vec<u8>>,
        images: Vec<Vec<u8>>,
    ) -> AppResult<TourImages> {
        if images.len() > MAX_TOUR_IMAGES {
            return Err(AppError::BadRequest(format!(
                "A tour can have at most {MAX_TOUR_IMAGES} images"
            )));
        }
        let stamp = Utc::now().timestamp_millis();
        let dir = self.tours_dir();
        let mut result = TourImages::default();
        let mut jobs = Vec::with_capacity(images.len() + 1);

        if let Some(bytes) = cover {
            let filename = format!("tour-{tour_id}-{stamp}-cover.jpeg");
            jobs.push(Job {
                bytes,
                size: TOUR_IMAGE_SIZE,
                path: dir.join(&filename),
            });
            result.image_cover = Some(filename);
        }
        for (i, bytes) in images.into_iter().enumerate() {
            let filename = format!("tour-{tour_id}-{stamp}-{}.jpeg", i + 1);
            jobs.push(Job {
                bytes,
                size: TOUR_IMAGE_SIZE,
                path: dir.join(&filename),
            });
            result.images.push(filename);
        }

        self.run(&dir, jobs).await?;
        Ok(result)
    }

    /// Process every job concurrently. On any failure the files that were
    /// written are removed and the first error is returned.
    async fn run(&self, dir: &Path, jobs: Vec<Job>) -> AppResult<()> {
        for job in &jobs {
            if !infer::is_image(&job.bytes) {
                return Err(AppError::BadRequest(NOT_AN_IMAGE.to_string()));
            }
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut set = JoinSet::new();
        for job in jobs {
            set.spawn(async move {
                let path = job.path.clone();
                let outcome = process(job).await;
                (path, outcome)
            });
        }

        let mut written = Vec::new();
        let mut failure: Option<AppError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, Ok(()))) => written.push(path),
                Ok((path, Err(e))) => {
                    warn!(path = %path.display(), error = %e, "image processing failed");
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(AppError::Internal(
                        anyhow::Error::new(e).context("image task panicked"),
                    ));
                }
            }
        }

        match failure {
            None => {
                debug!(count = written.len(), "images stored");
                Ok(())
            }
            Some(e) => {
                for path in written {
                    if let Err(err) = tokio::fs::remove_file(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "failed to remove partial upload"
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

async fn process(job: Job) -> AppResult<()> {
    let (width, height) = job.size;
    let encoded = tokio::task::spawn_blocking(move || resize_to_jpeg(&job.bytes, width, height))
        .await
        .context("image task failed")??;
    tokio::fs::write(&job.path, encoded)
        .await
        .with_context(|| format!("failed to write {}", job.path.display()))?;
    Ok(())
}

/// Decode, crop-resize to exactly `width`x`height` and encode as JPEG.
pub fn resize_to_jpeg(bytes: &[u8], width: u32, height: u32) -> AppResult<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|_| AppError::BadRequest(NOT_AN_IMAGE.to_string()))?;
    let resized = img.resize_to_fill(width, height, FilterType::Lanczos3);
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
        .context("failed to encode jpeg")?;
    Ok(buf.into_inner())
}
