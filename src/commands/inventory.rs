use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::InventoryArgs;
use crate::config::{manifest_dir, require_corpus_dir};
use crate::error::ConfigurationError;
use crate::model::{PdfEntry, PdfInventoryManifest};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.corpus_dir)?;

    if args.dry_run {
        info!(
            pdf_count = manifest.pdf_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| manifest_dir(&args.cache_root).join("pdf_inventory.json"));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(pdf_count = manifest.pdf_count, "inventory completed");

    Ok(())
}

pub fn build_manifest(corpus_dir: &Path) -> Result<PdfInventoryManifest> {
    let pdf_paths = discover_pdfs(corpus_dir)?;

    let mut pdfs = Vec::with_capacity(pdf_paths.len());
    for path in pdf_paths {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
        let size_bytes = fs::metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let sha256 = sha256_file(&path)?;

        pdfs.push(PdfEntry {
            filename,
            size_bytes,
            sha256,
        });
    }

    Ok(PdfInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: corpus_dir.display().to_string(),
        pdf_count: pdfs.len(),
        pdfs,
    })
}

/// `*.pdf` files directly inside `corpus_dir`, sorted by filename. A missing
/// directory or one without PDFs is a configuration error.
pub fn discover_pdfs(corpus_dir: &Path) -> Result<Vec<PathBuf>> {
    require_corpus_dir(corpus_dir)?;

    let mut pdfs = Vec::new();
    let entries = fs::read_dir(corpus_dir)
        .with_context(|| format!("failed to read {}", corpus_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", corpus_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            pdfs.push(path);
        }
    }

    if pdfs.is_empty() {
        return Err(ConfigurationError::EmptyCorpus(corpus_dir.to_path_buf()).into());
    }

    pdfs.sort();
    Ok(pdfs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_pdfs_case_insensitively_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b-plan.PDF"), b"%PDF-b").unwrap();
        fs::write(dir.path().join("a-plan.pdf"), b"%PDF-a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let manifest = build_manifest(dir.path()).unwrap();
        let names = manifest
            .pdfs
            .iter()
            .map(|entry| entry.filename.as_str())
            .collect::<Vec<&str>>();

        assert_eq!(names, vec!["a-plan.pdf", "b-plan.PDF"]);
        assert_eq!(manifest.pdf_count, 2);
        assert_eq!(manifest.pdfs[0].size_bytes, 6);
        assert_eq!(manifest.pdfs[0].sha256.len(), 64);
    }

    #[test]
    fn directory_without_pdfs_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), b"no pdfs").unwrap();

        let err = discover_pdfs(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::EmptyCorpus(_))
        ));
    }

    #[test]
    fn missing_directory_is_a_configuration_error() {
        let err = discover_pdfs(Path::new("/nonexistent/policies")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::MissingCorpusDirectory(_))
        ));
    }
}
