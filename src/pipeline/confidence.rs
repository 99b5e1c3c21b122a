//! Aggregate confidence: one quick-glance quality number per result.

use crate::model::ExtractionResult;

/// Mean of every present field confidence across every page.
///
/// Absent confidences are skipped, not counted as zero. Returns `0.0` when
/// there is no result or no field carries a confidence.
pub fn aggregate_confidence(result: Option<&ExtractionResult>) -> f64 {
    let Some(result) = result else {
        return 0.0;
    };

    let (sum, count) = result
        .pages
        .iter()
        .flat_map(|p| p.fields.iter())
        .filter_map(|f| f.confidence)
        .fold((0.0_f64, 0_usize), |(sum, n), c| (sum + c, n + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldValue, Page};
    use uuid::Uuid;

    fn field(confidence: Option<f64>) -> Field {
        Field {
            name: "f".into(),
            value: FieldValue::Null,
            confidence,
            bbox: None,
        }
    }

    fn result_with(pages: Vec<Vec<Option<f64>>>) -> ExtractionResult {
        let mut result = ExtractionResult::fallback(Uuid::new_v4(), Uuid::new_v4(), "w", 0);
        result.warnings.clear();
        result.pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, confs)| Page {
                page: i as u32 + 1,
                fields: confs.into_iter().map(field).collect(),
                tables: Vec::new(),
            })
            .collect();
        result
    }

    #[test]
    fn absent_confidences_are_excluded() {
        let result = result_with(vec![vec![Some(0.9), Some(0.8), None]]);
        let avg = aggregate_confidence(Some(&result));
        assert!((avg - 0.85).abs() < 1e-9, "got {avg}");
    }

    #[test]
    fn spans_all_pages() {
        let result = result_with(vec![vec![Some(1.0)], vec![Some(0.5), None], vec![]]);
        assert!((aggregate_confidence(Some(&result)) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_are_zero() {
        assert_eq!(aggregate_confidence(None), 0.0);
        assert_eq!(aggregate_confidence(Some(&result_with(vec![]))), 0.0);
        assert_eq!(aggregate_confidence(Some(&result_with(vec![vec![None, None]]))), 0.0);
    }
}
