//! OCR: turn a document image into page-level word tokens.
//!
//! The orchestrator only depends on the [`OcrExtractor`] trait. The bundled
//! [`TesseractOcr`] shells out to the `tesseract` CLI in TSV mode, which
//! gives word boxes and per-word confidence without linking native code.
//!
//! ## Tessdata resolution
//!
//! The language data directory is taken from, in order: the configured
//! directory, `TESSDATA_PATH`, `TESSDATA_PREFIX`, `/usr/share/tessdata`.
//! Every requested language must have a `<lang>.traineddata` file there;
//! this is checked on each extraction so a missing mount fails the run with
//! a clear message rather than a cryptic engine error.

use crate::config::PipelineConfig;
use crate::error::OcrError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Used when neither the config nor the environment names a tessdata dir.
pub const DEFAULT_TESSDATA_DIR: &str = "/usr/share/tessdata";

/// One recognised word and where it sits on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Engine confidence in `0.0..=1.0`, when the engine reports one.
    pub confidence: Option<f64>,
}

impl OcrToken {
    /// A token with no position, e.g. from an engine that only returns text.
    pub fn text_only(text: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            text: text.into(),
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.0,
            confidence,
        }
    }
}

/// The OCR output for one page. Produced per run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 1-based page ordinal.
    pub page: u32,
    pub tokens: Vec<OcrToken>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Converts a document on disk into pages of text tokens.
#[async_trait]
pub trait OcrExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<OcrPage>, OcrError>;
}

/// [`OcrExtractor`] backed by the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    tessdata_dir: PathBuf,
    language: String,
}

impl TesseractOcr {
    /// English OCR with the tessdata directory taken from the environment.
    pub fn new() -> Self {
        Self {
            binary: "tesseract".to_string(),
            tessdata_dir: resolve_tessdata_dir(None),
            language: "eng".to_string(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            binary: config.tesseract_bin.clone(),
            tessdata_dir: resolve_tessdata_dir(config.tessdata_dir.as_deref()),
            language: config.ocr_language.clone(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = dir.into();
        self
    }

    pub fn tessdata_dir(&self) -> &Path {
        &self.tessdata_dir
    }

    /// Every `+`-separated language must have its traineddata file.
    fn check_traineddata(&self) -> Result<(), OcrError> {
        for lang in self.language.split('+').map(str::trim).filter(|l| !l.is_empty()) {
            let data = self.tessdata_dir.join(format!("{lang}.traineddata"));
            if !data.is_file() {
                return Err(OcrError::TessdataNotFound { path: data });
            }
        }
        Ok(())
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrExtractor for TesseractOcr {
    async fn extract(&self, path: &Path) -> Result<Vec<OcrPage>, OcrError> {
        self.check_traineddata()?;

        if !path.exists() {
            return Err(OcrError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let (width, height) = image_dimensions(path).await?;
        debug!("OCR input {}: {}x{}", path.display(), width, height);

        let output = Command::new(&self.binary)
            .arg(path)
            .arg("stdout")
            .arg("--tessdata-dir")
            .arg(&self.tessdata_dir)
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .output()
            .await
            .map_err(|source| OcrError::EngineUnavailable {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineFailed {
                detail: stderr.trim().to_string(),
            });
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let mut pages = parse_tsv(&tsv);
        if pages.is_empty() {
            // Blank page: still one page, just no words.
            pages.push(OcrPage {
                page: 1,
                tokens: Vec::new(),
                metadata: BTreeMap::new(),
            });
        }

        for page in &mut pages {
            page.metadata.insert("engine".into(), Value::from("tesseract"));
            page.metadata.insert("language".into(), Value::from(self.language.as_str()));
            page.metadata.insert("image_width".into(), Value::from(width));
            page.metadata.insert("image_height".into(), Value::from(height));
        }

        debug!(
            "OCR produced {} page(s), {} token(s)",
            pages.len(),
            pages.iter().map(|p| p.tokens.len()).sum::<usize>()
        );
        Ok(pages)
    }
}

/// Tessdata directory: `explicit`, else `TESSDATA_PATH`, else
/// `TESSDATA_PREFIX`, else [`DEFAULT_TESSDATA_DIR`]. Empty values are skipped.
pub fn resolve_tessdata_dir(explicit: Option<&Path>) -> PathBuf {
    pick_tessdata_dir(
        explicit,
        std::env::var("TESSDATA_PATH").ok(),
        std::env::var("TESSDATA_PREFIX").ok(),
    )
}

fn pick_tessdata_dir(explicit: Option<&Path>, path_var: Option<String>, prefix_var: Option<String>) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
        return dir.to_path_buf();
    }
    [path_var, prefix_var]
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TESSDATA_DIR))
}

/// Read the image header only; decoding the full image is tesseract's job.
async fn image_dimensions(path: &Path) -> Result<(u32, u32), OcrError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let unreadable = |detail: String| OcrError::UnreadableImage {
            path: owned.clone(),
            detail,
        };
        image::ImageReader::open(&owned)
            .map_err(|e| unreadable(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| unreadable(e.to_string()))?
            .into_dimensions()
            .map_err(|e| unreadable(e.to_string()))
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Task join error: {e}")))?
}

/// Word rows (level 5) of tesseract's TSV output, grouped by page.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Confidence is 0–100, or -1 when unknown.
pub fn parse_tsv(tsv: &str) -> Vec<OcrPage> {
    let mut pages: BTreeMap<u32, Vec<OcrToken>> = BTreeMap::new();

    for line in tsv.lines() {
        let cols: Vec<&str> = line.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let Ok(page) = cols[1].parse::<u32>() else {
            continue;
        };
        let num = |i: usize| cols[i].trim().parse::<f64>().unwrap_or(0.0);
        let confidence = cols[10]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|c| *c >= 0.0)
            .map(|c| (c / 100.0).clamp(0.0, 1.0));

        pages.entry(page.max(1)).or_default().push(OcrToken {
            text: text.to_string(),
            x: num(6),
            y: num(7),
            w: num(8),
            h: num(9),
            confidence,
        });
    }

    pages
        .into_iter()
        .map(|(page, tokens)| OcrPage {
            page,
            tokens,
            metadata: BTreeMap::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t10\t10\t200\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t96.5\tInvoice
5\t1\t1\t1\t1\t2\t95\t10\t60\t20\t-1\tNo.
5\t1\t1\t1\t1\t3\t160\t10\t40\t20\t88\t
5\t2\t1\t1\t1\t1\t12\t40\t50\t18\t71\tTotal
";

    #[test]
    fn tsv_words_grouped_by_page() {
        let pages = parse_tsv(SAMPLE_TSV);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].tokens.len(), 2, "blank word rows are skipped");

        let first = &pages[0].tokens[0];
        assert_eq!(first.text, "Invoice");
        assert_eq!((first.x, first.y, first.w, first.h), (10.0, 10.0, 80.0, 20.0));
        assert!((first.confidence.unwrap() - 0.965).abs() < 1e-9);

        assert_eq!(pages[0].tokens[1].confidence, None, "-1 means unknown");
        assert_eq!(pages[1].tokens[0].text, "Total");
    }

    #[test]
    fn tsv_without_words_is_empty() {
        assert!(parse_tsv("level\tpage_num\n").is_empty());
        assert!(parse_tsv("").is_empty());
    }

    #[test]
    fn tessdata_resolution_order() {
        let explicit = Path::new("/opt/tess");
        assert_eq!(
            pick_tessdata_dir(Some(explicit), Some("/a".into()), Some("/b".into())),
            PathBuf::from("/opt/tess")
        );
        assert_eq!(
            pick_tessdata_dir(None, Some("/a".into()), Some("/b".into())),
            PathBuf::from("/a")
        );
        assert_eq!(pick_tessdata_dir(None, Some(String::new()), Some("/b".into())), PathBuf::from("/b"));
        assert_eq!(pick_tessdata_dir(None, None, None), PathBuf::from(DEFAULT_TESSDATA_DIR));
    }

    #[tokio::test]
    async fn missing_traineddata_fails_before_engine() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = TesseractOcr::new().with_tessdata_dir(dir.path());
        let err = ocr.extract(Path::new("/nonexistent.png")).await.unwrap_err();
        match err {
            OcrError::TessdataNotFound { path } => assert!(path.ends_with("eng.traineddata")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn every_language_needs_traineddata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"x").unwrap();
        let ocr = TesseractOcr::new().with_tessdata_dir(dir.path()).with_language("eng+fra");
        let err = ocr.extract(Path::new("/nonexistent.png")).await.unwrap_err();
        assert!(err.to_string().contains("fra.traineddata"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"x").unwrap();
        let ocr = TesseractOcr::new().with_tessdata_dir(dir.path());
        let err = ocr.extract(&dir.path().join("missing.png")).await.unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn bmp_and_gif_reach_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"x").unwrap();
        // `true` accepts any arguments and prints no TSV: one blank page.
        let ocr = TesseractOcr::new().with_tessdata_dir(dir.path()).with_binary("true");

        for name in ["pixel.bmp", "pixel.gif"] {
            let doc = dir.path().join(name);
            image::RgbaImage::new(1, 1).save(&doc).unwrap();

            let pages = ocr.extract(&doc).await.unwrap();
            assert_eq!(pages.len(), 1, "{name}");
            assert!(pages[0].tokens.is_empty());
            assert_eq!(pages[0].metadata["image_width"], 1, "{name}");
            assert_eq!(pages[0].metadata["image_height"], 1, "{name}");
        }
    }

    #[tokio::test]
    async fn non_image_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"x").unwrap();
        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, b"plain text, not an image").unwrap();
        let ocr = TesseractOcr::new().with_tessdata_dir(dir.path());
        let err = ocr.extract(&doc).await.unwrap_err();
        assert!(matches!(err, OcrError::UnreadableImage { .. }), "got: {err}");
    }
}
