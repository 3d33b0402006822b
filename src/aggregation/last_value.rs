use crate::attributes::AttributeSet;
use crate::data::GaugeDataPoint;

#[derive(Debug, Default)]
pub(crate) struct GaugeEntry {
    value: f64,
    observed_at_nanos: u64,
}

impl GaugeEntry {
    pub(crate) fn assign(&mut self, value: f64, now_nanos: u64) {
        self.value = value;
        self.observed_at_nanos = now_nanos;
    }

    pub(crate) fn into_data_point(self, attrs: AttributeSet) -> GaugeDataPoint {
        GaugeDataPoint {
            attributes: attrs.into_inner(),
            value: self.value,
            observed_at_nanos: self.observed_at_nanos,
            exemplars: Vec::new(),
        }
    }
}

/// Per-attribute most-recent-timestamp-wins, per §4.2. On a tie, the node
/// appended later in the merge order wins -- since `merge_points` is called
/// with `next` being the newer delta, `next` wins ties here.
pub(crate) fn merge_points(dest: &mut Vec<GaugeDataPoint>, next: &[GaugeDataPoint]) {
    for point in next {
        match dest.iter_mut().find(|p| p.attributes == point.attributes) {
            Some(existing) => {
                if point.observed_at_nanos >= existing.observed_at_nanos {
                    existing.value = point.value;
                    existing.observed_at_nanos = point.observed_at_nanos;
                }
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
    fn later_timestamp_wins_on_merge() {
        let mut dest = vec![GaugeDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 1.0,
            observed_at_nanos: 10,
            exemplars: vec![],
        }];
        let next = vec![GaugeDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 2.0,
            observed_at_nanos: 5,
            exemplars: vec![],
        }];
        merge_points(&mut dest, &next);
        // older timestamp in `next` should not overwrite a newer existing value
        assert_eq!(dest[0].value, 1.0);
    }

    #[test]
    fn tie_prefers_newly_appended_node() {
        let mut dest = vec![GaugeDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 1.0,
            observed_at_nanos: 10,
            exemplars: vec![],
        }];
        let next = vec![GaugeDataPoint {
            attributes: vec![KeyValue::new("k", "v")],
            value: 2.0,
            observed_at_nanos: 10,
            exemplars: vec![],
        }];
        merge_points(&mut dest, &next);
        assert_eq!(dest[0].value, 2.0);
    }
}
