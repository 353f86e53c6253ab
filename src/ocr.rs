//! Optical character recognition via external tooling.
//!
//! Recognition shells out to the `tesseract` CLI; scanned-PDF fallback
//! rasterizes a single page with poppler's `pdftoppm` first. Binary paths,
//! languages, and rasterization DPI come from `[ocr]` in the config.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::OcrConfig;

/// Run OCR over an image file and return the recognized text.
pub fn recognize_image(config: &OcrConfig, image_path: &Path) -> Result<String> {
    let output = Command::new(&config.tesseract_path)
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(&config.languages)
        .output()
        .with_context(|| {
            format!(
                "failed to run {} (is tesseract installed?)",
                config.tesseract_path
            )
        })?;

    if !output.status.success() {
        bail!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Rasterize one page (1-based) of a PDF to a PNG in `out_dir`.
pub fn rasterize_pdf_page(
    config: &OcrConfig,
    pdf_path: &Path,
    page: usize,
    out_dir: &Path,
) -> Result<PathBuf> {
    let prefix = out_dir.join(format!("page-{}", page));
    let output = Command::new(&config.pdftoppm_path)
        .arg("-png")
        .arg("-r")
        .arg(config.dpi.to_string())
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-singlefile")
        .arg(pdf_path)
        .arg(&prefix)
        .output()
        .with_context(|| {
            format!(
                "failed to run {} (is poppler installed?)",
                config.pdftoppm_path
            )
        })?;

    if !output.status.success() {
        bail!(
            "pdftoppm exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let png = prefix.with_extension("png");
    if !png.exists() {
        bail!("pdftoppm produced no output for page {}", page);
    }
    Ok(png)
}

/// OCR a single PDF page: rasterize it to a temporary image, then recognize.
pub fn recognize_pdf_page(config: &OcrConfig, pdf_path: &Path, page: usize) -> Result<String> {
    let tmp = tempfile::tempdir().context("failed to create temp dir for rasterization")?;
    let png = rasterize_pdf_page(config, pdf_path, page, tmp.path())?;
    recognize_image(config, &png)
}
