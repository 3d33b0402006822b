use crate::attributes::AttributeSet;
use crate::data::SumDataPoint;

#[derive(Debug, Default)]
pub(crate) struct SumEntry {
    value: f64,
}

impl SumEntry {
    pub(crate) fn add(&mut self, value: f64) {
        self.value += value;
    }

    pub(crate) fn into_data_point(self, attrs: AttributeSet) -> SumDataPoint {
        SumDataPoint {
            attributes: attrs.into_inner(),
            value: self.value,
            exemplars: Vec::new(),
        }
    }
}

/// Per-attribute addition, per §4.2.
pub(crate) fn merge_points(dest: &mut Vec<SumDataPoint>, next: &[SumDataPoint]) {
    for point in next {
        match dest.iter_mut().find(|p| p.attributes == point.attributes) {
            Some(existing) => {
                existing.value += point.value;
                existing.exemplars.extend(point.exemplars.iter().cloned());
            }
            None => dest.push(point.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;

    #[test]
    fn merge_adds_matching_attribute_sets() {
        let mut dest = vec![SumDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 5.0,
            exemplars: vec![],
        }];
        let next = vec![SumDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 3.0,
            exemplars: vec![],
        }];
        merge_points(&mut dest, &next);
        assert_eq!(dest.len(), 1);
        assert_eq!(dest[0].value, 8.0);
    }

    #[test]
    fn merge_appends_new_attribute_sets() {
        let mut dest = vec![];
        let next = vec![SumDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 3.0,
            exemplars: vec![],
        }];
        merge_points(&mut dest, &next);
        assert_eq!(dest.len(), 1);
    }
}
