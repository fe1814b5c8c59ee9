//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime for text detection and recognition.
//! Detection produces a probability map that is binarised and split into
//! connected regions; each region is read by the CRNN model and decoded with
//! greedy CTC.

use anyhow::Context;
use async_trait::async_trait;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{Array2, ArrayView2, ArrayViewD};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{load_session, DownloadProgressCallback, ModelKind, ModelManager};
use super::preprocess::{crop_region, prepare_text_detection, prepare_text_recognition};
use super::progress::{ProgressPhase, ProgressSender};
use super::TextRegion;
use crate::config::OcrSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::intake::UploadedFile;

/// Language the text grabber always requests
pub const OCR_LANGUAGE: &str = "eng";

/// Text extracted from one image
#[derive(Debug, Clone, Default)]
pub struct Recognition {
    /// Full text, lines separated by newlines
    pub text: String,
    /// Recognised regions in reading order
    pub regions: Vec<TextRegion>,
}

/// An OCR engine
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Extract the text of an image file, reporting progress as it goes
    async fn recognize(
        &self,
        file: &UploadedFile,
        language: &str,
        progress: ProgressSender,
    ) -> PipelineResult<Recognition>;
}

/// PaddleOCR engine (DBNet detection + CRNN recognition)
pub struct PaddleOcr {
    inner: Arc<PaddleInner>,
}

struct PaddleInner {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    /// Recognition classes; index 0 of the model output is the CTC blank
    dictionary: Vec<String>,
    settings: OcrSettings,
}

impl PaddleOcr {
    /// Ensure the models are present and load both sessions
    ///
    /// Downloads report `LoadingModel` progress across all three files.
    pub async fn load(
        manager: &ModelManager,
        settings: &OcrSettings,
        use_gpu: bool,
        progress: &ProgressSender,
    ) -> anyhow::Result<Self> {
        let det_path = manager
            .ensure_model_with_progress(ModelKind::TextDetection, Some(download_progress(progress, 0)))
            .await?;
        let rec_path = manager
            .ensure_model_with_progress(ModelKind::TextRecognition, Some(download_progress(progress, 1)))
            .await?;
        let dict_path = manager
            .ensure_model_with_progress(ModelKind::TextDictionary, Some(download_progress(progress, 2)))
            .await?;

        let settings = settings.clone();
        let inner = tokio::task::spawn_blocking(move || -> anyhow::Result<PaddleInner> {
            let dictionary = std::fs::read_to_string(&dict_path)
                .with_context(|| format!("Failed to read dictionary {:?}", dict_path))?;

            Ok(PaddleInner {
                detector: Mutex::new(load_session(&det_path, use_gpu)?),
                recognizer: Mutex::new(load_session(&rec_path, use_gpu)?),
                dictionary: parse_dictionary(&dictionary),
                settings,
            })
        })
        .await??;

        info!("PaddleOCR initialized ({} characters)", inner.dictionary.len());
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

#[async_trait]
impl TextRecognizer for PaddleOcr {
    async fn recognize(
        &self,
        file: &UploadedFile,
        language: &str,
        progress: ProgressSender,
    ) -> PipelineResult<Recognition> {
        if language != OCR_LANGUAGE {
            return Err(PipelineError::UnsupportedLanguage(language.to_string()));
        }

        let inner = self.inner.clone();
        let file = file.clone();
        tokio::task::spawn_blocking(move || {
            let image = file.decode()?.to_rgb8();
            inner.run(&image, &progress)
        })
        .await
        .map_err(|e| PipelineError::Recognition(e.to_string()))?
    }
}

impl PaddleInner {
    fn run(&self, image: &RgbImage, progress: &ProgressSender) -> PipelineResult<Recognition> {
        let start = Instant::now();

        progress.report(ProgressPhase::DetectingText, 0.0);
        let boxes = self.detect_boxes(image)?;
        progress.report(ProgressPhase::DetectingText, 1.0);
        debug!("Found {} candidate text regions", boxes.len());

        progress.report(ProgressPhase::RecognizingText, 0.0);
        let total = boxes.len();
        let mut regions = Vec::with_capacity(total);
        for (i, (x, y, w, h, _)) in boxes.into_iter().enumerate() {
            let crop = crop_region(image, x, y, w, h);
            let (text, confidence) = self.read_line(&crop)?;
            if !text.trim().is_empty() {
                regions.push(TextRegion {
                    text,
                    bounds: (x, y, w, h),
                    confidence,
                });
            }
            progress.report(ProgressPhase::RecognizingText, (i + 1) as f32 / total as f32);
        }
        if total == 0 {
            progress.report(ProgressPhase::RecognizingText, 1.0);
        }

        let regions = reading_order(regions);
        let text = assemble_text(&regions);
        debug!(
            "OCR complete in {:?}: {} regions, {} chars",
            start.elapsed(),
            regions.len(),
            text.len()
        );

        Ok(Recognition { text, regions })
    }

    /// Run DBNet and return boxes in source image pixels
    fn detect_boxes(&self, image: &RgbImage) -> PipelineResult<Vec<(u32, u32, u32, u32, f32)>> {
        let input = prepare_text_detection(image, self.settings.det_target_size);
        let tensor = Tensor::from_array(input.tensor).map_err(recognition_error)?;

        let prob = {
            let mut session = self.detector.lock();
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(recognition_error)?;
            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(recognition_error)?;
            last_two_dims(&output)?
        };

        let (img_w, img_h) = image.dimensions();
        let boxes = boxes_from_probability_map(&prob.view(), &self.settings)
            .into_iter()
            .filter_map(|b| {
                let x0 = (b.x0 / input.scale).max(0.0);
                let y0 = (b.y0 / input.scale).max(0.0);
                let x1 = (b.x1 / input.scale).min(img_w as f32);
                let y1 = (b.y1 / input.scale).min(img_h as f32);
                if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
                    return None;
                }
                Some((
                    x0 as u32,
                    y0 as u32,
                    (x1 - x0).round() as u32,
                    (y1 - y0).round() as u32,
                    b.score,
                ))
            })
            .collect();

        Ok(boxes)
    }

    /// Run CRNN on one line crop
    fn read_line(&self, crop: &RgbImage) -> PipelineResult<(String, f32)> {
        let tensor = Tensor::from_array(prepare_text_recognition(crop)).map_err(recognition_error)?;

        let mut session = self.recognizer.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(recognition_error)?;
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(recognition_error)?;
        let probs = last_two_dims(&output)?;

        Ok(ctc_greedy_decode(&probs.view(), &self.dictionary))
    }
}

/// Map the download of the `index`-th OCR model onto overall load progress
fn download_progress(progress: &ProgressSender, index: usize) -> DownloadProgressCallback {
    let progress = progress.clone();
    Box::new(move |downloaded, total| {
        if let Some(total) = total.filter(|&t| t > 0) {
            let file_fraction = (downloaded as f32 / total as f32).min(1.0);
            let fraction = (index as f32 + file_fraction) / ModelKind::OCR.len() as f32;
            progress.report(ProgressPhase::LoadingModel, fraction);
        }
    })
}

fn recognition_error(err: ort::Error) -> PipelineError {
    PipelineError::Recognition(err.to_string())
}

/// Collapse a `[1, .., A, B]` output into an `A x B` matrix
fn last_two_dims(output: &ArrayViewD<'_, f32>) -> PipelineResult<Array2<f32>> {
    let shape = output.shape();
    if shape.len() < 2 {
        return Err(PipelineError::Recognition(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }
    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    Array2::from_shape_vec((rows, cols), output.iter().copied().take(rows * cols).collect())
        .map_err(|e| PipelineError::Recognition(e.to_string()))
}

/// Recognition classes from a PaddleOCR dictionary file
///
/// The model reserves index 0 for the CTC blank and appends a space class.
pub fn parse_dictionary(content: &str) -> Vec<String> {
    let mut dictionary: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    dictionary.push(" ".to_string());
    dictionary
}

/// Text box in probability-map pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    /// Mean probability inside the region
    pub score: f32,
}

/// Binarise the probability map and turn each connected region into a box
pub fn boxes_from_probability_map(prob: &ArrayView2<'_, f32>, settings: &OcrSettings) -> Vec<MapBox> {
    let (rows, cols) = prob.dim();
    let binary = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        if prob[[y as usize, x as usize]] > settings.det_threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, prob_sum, count)
    let mut stats: Vec<(u32, u32, u32, u32, f32, u32)> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if stats.len() < label {
            stats.resize(label, (u32::MAX, u32::MAX, 0, 0, 0.0, 0));
        }
        let s = &mut stats[label - 1];
        s.0 = s.0.min(x);
        s.1 = s.1.min(y);
        s.2 = s.2.max(x);
        s.3 = s.3.max(y);
        s.4 += prob[[y as usize, x as usize]];
        s.5 += 1;
    }

    stats
        .into_iter()
        .filter(|s| s.5 > 0)
        .filter_map(|(min_x, min_y, max_x, max_y, sum, count)| {
            let width = (max_x - min_x + 1) as f32;
            let height = (max_y - min_y + 1) as f32;
            if width.min(height) < 3.0 {
                return None;
            }
            let score = sum / count as f32;
            if score < settings.box_threshold {
                return None;
            }
            let b = unclip(
                MapBox {
                    x0: min_x as f32,
                    y0: min_y as f32,
                    x1: (max_x + 1) as f32,
                    y1: (max_y + 1) as f32,
                    score,
                },
                settings.unclip_ratio,
            );
            Some(MapBox {
                x0: b.x0.max(0.0),
                y0: b.y0.max(0.0),
                x1: b.x1.min(cols as f32),
                y1: b.y1.min(rows as f32),
                score,
            })
        })
        .collect()
}

/// Grow a box by `area * ratio / perimeter` on every side
///
/// DBNet predicts shrunk text kernels; this restores the full extent.
pub fn unclip(b: MapBox, ratio: f32) -> MapBox {
    let w = b.x1 - b.x0;
    let h = b.y1 - b.y0;
    let perimeter = 2.0 * (w + h);
    if perimeter <= 0.0 {
        return b;
    }
    let distance = w * h * ratio / perimeter;
    MapBox {
        x0: b.x0 - distance,
        y0: b.y0 - distance,
        x1: b.x1 + distance,
        y1: b.y1 + distance,
        score: b.score,
    }
}

/// Greedy CTC decoding: best class per step, drop blanks and repeats
///
/// Returns the text and the mean probability of the kept characters.
pub fn ctc_greedy_decode(probs: &ArrayView2<'_, f32>, dictionary: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut confidence_sum = 0.0;
    let mut kept = 0;
    let mut previous = 0usize;

    for step in probs.rows() {
        let (best, best_prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        if best != 0 && best != previous {
            if let Some(ch) = dictionary.get(best - 1) {
                text.push_str(ch);
                confidence_sum += best_prob;
                kept += 1;
            }
        }
        previous = best;
    }

    let confidence = if kept > 0 { confidence_sum / kept as f32 } else { 0.0 };
    (text, confidence)
}

/// Sort regions top-to-bottom, then left-to-right within a visual line
pub fn reading_order(regions: Vec<TextRegion>) -> Vec<TextRegion> {
    group_lines(regions).into_iter().flatten().collect()
}

fn group_lines(mut regions: Vec<TextRegion>) -> Vec<Vec<TextRegion>> {
    regions.sort_by_key(|r| (r.bounds.1 + r.bounds.3 / 2, r.bounds.0));

    let mut lines: Vec<Vec<TextRegion>> = Vec::new();
    for region in regions {
        let centre = region.bounds.1 + region.bounds.3 / 2;
        let same_line = lines.last().and_then(|line| line.first()).is_some_and(|first| {
            centre >= first.bounds.1 && centre <= first.bounds.1 + first.bounds.3
        });
        match lines.last_mut() {
            Some(line) if same_line => line.push(region),
            _ => lines.push(vec![region]),
        }
    }

    for line in &mut lines {
        line.sort_by_key(|r| r.bounds.0);
    }
    lines
}

/// Join regions on a line with spaces and lines with newlines
pub fn assemble_text(regions: &[TextRegion]) -> String {
    group_lines(regions.to_vec())
        .iter()
        .map(|line| {
            line.iter()
                .map(|r| r.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
