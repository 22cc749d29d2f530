use crate::config::CONFIG_FILE_NAME;
use crate::db::DB_FILE_NAME;
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/notas.sqlite3";
const CONFIG_ENTRY: &str = "config/notasd.toml";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "notas-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

/// Copies `src` into `dst` and returns the hex SHA-256 of the bytes copied.
fn copy_hashed(src: &mut impl Read, dst: &mut impl Write) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        dst.write_all(&buf[..n])?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    // Database first so the manifest can carry its digest.
    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    let db_sha256 = copy_hashed(&mut db_file, &mut zip).context("failed to write database entry")?;
    let mut entry_count = 1;

    let config_path = workspace_path.join(CONFIG_FILE_NAME);
    let has_config = config_path.is_file();
    if has_config {
        zip.start_file(CONFIG_ENTRY, opts)
            .context("failed to start config entry")?;
        let mut cfg = File::open(&config_path).with_context(|| {
            format!("failed to open config {}", config_path.to_string_lossy())
        })?;
        std::io::copy(&mut cfg, &mut zip).context("failed to write config entry")?;
        entry_count += 1;
    }

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&workspace_meta)
            .context("failed to serialize workspace metadata")?
            .as_bytes(),
    )
    .context("failed to write workspace metadata entry")?;
    entry_count += 1;

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
        "hasConfig": has_config,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    entry_count += 1;

    zip.finish().context("failed to finalize zip bundle")?;

    tracing::info!(
        "exported workspace {} to {}",
        workspace_path.display(),
        out_path.display()
    );
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count,
        db_sha256,
    })
}

/// Replaces the workspace database with the one in `in_path`: either a
/// bundle written by `export_workspace_bundle` or a bare SQLite file.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let tmp_dst = workspace_path.join(format!("{DB_FILE_NAME}.importing"));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let signature = read_signature(in_path)?;
    if signature.starts_with(SQLITE_HEADER) {
        let mut src = File::open(in_path)
            .with_context(|| format!("failed to open {}", in_path.to_string_lossy()))?;
        let mut out = File::create(&tmp_dst).with_context(|| {
            format!("failed to create temp database {}", tmp_dst.to_string_lossy())
        })?;
        let db_sha256 = copy_hashed(&mut src, &mut out).with_context(|| {
            format!(
                "failed to copy legacy sqlite backup from {}",
                in_path.to_string_lossy()
            )
        })?;
        out.flush().context("failed to flush copied database")?;
        drop(out);
        replace_file(&tmp_dst, &dst)?;
        tracing::info!("imported bare sqlite file {}", in_path.display());
        return Ok(ImportSummary {
            bundle_format_detected: LEGACY_SQLITE_FORMAT.to_string(),
            db_sha256,
        });
    }
    if !signature.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        return Err(anyhow!(
            "{} is neither a workspace bundle nor a sqlite database",
            in_path.to_string_lossy()
        ));
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json is missing dbSha256"))?
        .to_ascii_lowercase();

    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    let db_sha256 = {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/notas.sqlite3")?;
        copy_hashed(&mut db_entry, &mut db_out).context("failed to extract database entry")?
    };
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    if db_sha256 != expected_sha {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(anyhow!(
            "database digest mismatch: manifest {expected_sha}, bundle {db_sha256}"
        ));
    }

    replace_file(&tmp_dst, &dst)?;

    if let Ok(mut cfg_entry) = archive.by_name(CONFIG_ENTRY) {
        let cfg_path = workspace_path.join(CONFIG_FILE_NAME);
        let mut cfg_out = File::create(&cfg_path)
            .with_context(|| format!("failed to create {}", cfg_path.to_string_lossy()))?;
        std::io::copy(&mut cfg_entry, &mut cfg_out).context("failed to extract config entry")?;
    }

    tracing::info!("imported workspace bundle {}", in_path.display());
    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        db_sha256,
    })
}

fn replace_file(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(src, dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })
}

fn read_signature(path: &Path) -> anyhow::Result<Vec<u8>> {
    let f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = Vec::with_capacity(16);
    f.take(16)
        .read_to_end(&mut sig)
        .context("failed to read file signature")?;
    Ok(sig)
}
