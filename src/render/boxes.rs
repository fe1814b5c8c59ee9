//! Bounding box overlay
//!
//! Draws one outlined box and one caption per prediction, in list order.
//! Overlapping captions simply draw over each other.

use super::canvas::{Canvas, FONT_SIZE, LINE_WIDTH, OVERLAY_COLOR};
use crate::vision::Prediction;

/// Boxes closer than this to the top edge get their label inside
const LABEL_TOP_MARGIN: f32 = 20.0;

/// Caption for a prediction, e.g. `dog (87%)`
pub fn label_text(prediction: &Prediction) -> String {
    format!("{} ({}%)", prediction.label, (prediction.score * 100.0).round() as i64)
}

/// Baseline of the caption for a box whose top edge is at `y`
pub fn label_baseline(y: f32) -> f32 {
    if y > LABEL_TOP_MARGIN {
        y - 5.0
    } else {
        y + 18.0
    }
}

/// Draw every prediction onto the canvas
pub fn draw_predictions<C: Canvas + ?Sized>(canvas: &mut C, predictions: &[Prediction]) {
    for prediction in predictions {
        let bbox = &prediction.bbox;
        canvas.stroke_rect(bbox, OVERLAY_COLOR, LINE_WIDTH);
        canvas.fill_text(
            &label_text(prediction),
            bbox.x,
            label_baseline(bbox.y),
            OVERLAY_COLOR,
            FONT_SIZE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::canvas::{DrawOp, RecordingCanvas};
    use crate::vision::BoundingBox;

    fn prediction(label: &str, score: f32, x: f32, y: f32) -> Prediction {
        Prediction {
            bbox: BoundingBox { x, y, width: 30.0, height: 40.0 },
            label: label.to_string(),
            score,
        }
    }

    #[test]
    fn test_label_text_rounds_percentage() {
        assert_eq!(label_text(&prediction("dog", 0.874, 0.0, 0.0)), "dog (87%)");
        assert_eq!(label_text(&prediction("cat", 0.876, 0.0, 0.0)), "cat (88%)");
        assert_eq!(label_text(&prediction("tv", 1.0, 0.0, 0.0)), "tv (100%)");
    }

    #[test]
    fn test_label_baseline_threshold() {
        assert_eq!(label_baseline(100.0), 95.0);
        assert_eq!(label_baseline(20.5), 15.5);
        assert_eq!(label_baseline(20.0), 38.0);
        assert_eq!(label_baseline(0.0), 18.0);
    }

    #[test]
    fn test_draws_one_rect_and_label_per_prediction_in_order() {
        let predictions = vec![
            prediction("person", 0.91, 10.0, 50.0),
            prediction("dog", 0.66, 40.0, 5.0),
            prediction("person", 0.55, 12.0, 52.0),
        ];
        let mut canvas = RecordingCanvas::default();

        draw_predictions(&mut canvas, &predictions);

        assert_eq!(canvas.rects().len(), 3);
        assert_eq!(
            canvas.texts(),
            vec![
                ("person (91%)".to_string(), 10.0, 45.0),
                ("dog (66%)".to_string(), 40.0, 23.0),
                ("person (55%)".to_string(), 12.0, 47.0),
            ]
        );
        // Each rect is immediately followed by its label
        assert!(matches!(canvas.ops[0], DrawOp::Rect(_, 2)));
        assert!(matches!(canvas.ops[1], DrawOp::Text(..)));
        assert!(matches!(canvas.ops[4], DrawOp::Rect(..)));
    }

    #[test]
    fn test_no_predictions_draws_nothing() {
        let mut canvas = RecordingCanvas::default();
        draw_predictions(&mut canvas, &[]);
        assert!(canvas.ops.is_empty());
    }
}
