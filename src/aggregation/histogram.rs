use crate::attributes::AttributeSet;
use crate::data::HistogramDataPoint;

#[derive(Debug)]
pub(crate) struct HistogramEntry {
    boundaries: Vec<f64>,
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl HistogramEntry {
    pub(crate) fn new(boundaries: Vec<f64>) -> Self {
        let n = boundaries.len() + 1;
        HistogramEntry {
            boundaries,
            bucket_counts: vec![0; n],
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
        }
    }

    pub(crate) fn record(&mut self, value: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());
        self.bucket_counts[idx] += 1;
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub(crate) fn into_data_point(
        self,
        attrs: AttributeSet,
        boundaries: &[f64],
        record_min_max: bool,
    ) -> HistogramDataPoint {
        HistogramDataPoint {
            attributes: attrs.into_inner(),
            bounds: boundaries.to_vec(),
            bucket_counts: self.bucket_counts,
            count: self.count,
            sum: self.sum,
            min: if record_min_max { self.min } else { None },
            max: if record_min_max { self.max } else { None },
            exemplars: Vec::new(),
        }
    }
}

/// Per §4.2: counts, sum, and bucket_counts add element-wise; min/max take
/// the wider bound; a side with no observations yields to the other.
pub(crate) fn merge_points(dest: &mut Vec<HistogramDataPoint>, next: &[HistogramDataPoint]) {
    for point in next {
        match dest.iter_mut().find(|p| p.attributes == point.attributes) {
            Some(existing) => {
                existing.count += point.count;
                existing.sum += point.sum;
                for (d, n) in existing.bucket_counts.iter_mut().zip(point.bucket_counts.iter()) {
                    *d += n;
                }
                existing.min = merge_bound(existing.min, point.min, f64::min);
                existing.max = merge_bound(existing.max, point.max, f64::max);
                existing.exemplars.extend(point.exemplars.iter().cloned());
            }
            None => dest.push(point.clone()),
        }
    }
}

fn merge_bound(a: Option<f64>, b: Option<f64>, f: impl Fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;

    #[test]
    fn histogram_merge_matches_spec_scenario() {
        let mut entry = HistogramEntry::new(vec![10.0, 100.0]);
        entry.record(5.0);
        entry.record(50.0);
        let first = entry.into_data_point(
            AttributeSet::from_values(&[KeyValue::new("k", "v")]),
            &[10.0, 100.0],
            true,
        );
        assert_eq!(first.bucket_counts, vec![1, 1, 0]);

        let mut entry2 = HistogramEntry::new(vec![10.0, 100.0]);
        entry2.record(200.0);
        let second = entry2.into_data_point(
            AttributeSet::from_values(&[KeyValue::new("k", "v")]),
            &[10.0, 100.0],
            true,
        );
        assert_eq!(second.bucket_counts, vec![0, 0, 1]);

        let mut dest = vec![first];
        merge_points(&mut dest, &[second]);
        assert_eq!(dest[0].bucket_counts, vec![1, 1, 1]);
        assert_eq!(dest[0].count, 3);
        assert_eq!(dest[0].min, Some(5.0));
        assert_eq!(dest[0].max, Some(200.0));
    }

    #[test]
    fn invariants_hold_after_merge() {
        let mut entry = HistogramEntry::new(vec![10.0]);
        entry.record(5.0);
        entry.record(20.0);
        let point = entry.into_data_point(AttributeSet::default(), &[10.0], true);
        assert!(point.check_invariants());
    }
}
