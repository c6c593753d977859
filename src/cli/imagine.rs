//! Unary image generation command.

use std::error::Error;
use std::path::PathBuf;

use chrono::Utc;

use crate::api::images::{generate_image, ImageRequest};
use crate::cli::SessionSettings;

pub async fn run_imagine(
    settings: &SessionSettings,
    prompt: &str,
    size: &str,
    aspect_ratio: Option<&str>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: labchat imagine <prompt>");
        std::process::exit(1);
    }

    let mut request = ImageRequest::new(prompt, size);
    if let Some(ratio) = aspect_ratio {
        request = request.with_aspect_ratio(ratio);
    }

    let bytes = generate_image(
        &settings.client,
        &settings.base_url,
        &settings.api_key,
        &request,
    )
    .await?;

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("labchat-image-{}.png", Utc::now().format("%Y%m%d-%H%M%S")))
    });
    if path.exists() {
        return Err(format!(
            "File '{}' already exists. Please specify a different output file.",
            path.display()
        )
        .into());
    }
    std::fs::write(&path, &bytes)?;
    println!("Image written to {} ({} bytes)", path.display(), bytes.len());

    Ok(())
}
