use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::detection::{ClassifiedDetection, TrashClass};
use super::session::Epoch;

/// Per-frame detection tally, published alongside the frame it describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTally {
    pub container: u32,
    pub scattered_trash: u32,
    pub overload: bool,
    pub total: u32,
}

impl FrameTally {
    pub fn from_detections(detections: &[ClassifiedDetection], overload: bool) -> Self {
        let mut tally = FrameTally { overload, ..Default::default() };
        for det in detections {
            match det.class {
                TrashClass::Container => tally.container += 1,
                TrashClass::ScatteredTrash => tally.scattered_trash += 1,
                TrashClass::Overload => continue,
            }
            tally.total += 1;
        }
        tally
    }
}

/// One annotated frame as held in the frame cache. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub epoch: Epoch,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
    pub tally: FrameTally,
    pub detections: Vec<ClassifiedDetection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCounters {
    pub container: u64,
    pub scattered_trash: u64,
    pub overload: u64,
}

/// Cumulative counters for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub frames_processed: u64,
    pub detections: DetectionCounters,
    pub last_update: DateTime<Utc>,
}

impl StreamStats {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            frames_processed: 0,
            detections: DetectionCounters::default(),
            last_update: at,
        }
    }

    pub fn record(&mut self, tally: &FrameTally, at: DateTime<Utc>) {
        self.frames_processed += 1;
        self.detections.container += u64::from(tally.container);
        self.detections.scattered_trash += u64::from(tally.scattered_trash);
        if tally.overload {
            self.detections.overload += 1;
        }
        self.last_update = at;
    }
}

pub fn summarize_detections(detections: &[ClassifiedDetection]) -> String {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(det.class).or_insert(0) += 1;
    }
    counts
        .iter()
        .map(|(class, count)| format!("{} {}", count, class.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::Detection;

    fn classified(class: TrashClass) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection {
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
                score: 0.5,
                class_id: 0,
                label: "x".into(),
            },
            class,
        }
    }

    #[test]
    fn tally_counts_by_class() {
        let dets = vec![
            classified(TrashClass::Container),
            classified(TrashClass::ScatteredTrash),
            classified(TrashClass::ScatteredTrash),
        ];
        let tally = FrameTally::from_detections(&dets, true);
        assert_eq!(tally.container, 1);
        assert_eq!(tally.scattered_trash, 2);
        assert_eq!(tally.total, 3);
        assert!(tally.overload);
    }

    #[test]
    fn record_accumulates_and_counts_overload_once_per_frame() {
        let t0 = Utc::now();
        let mut stats = StreamStats::new(t0);
        let tally = FrameTally { container: 2, scattered_trash: 3, overload: true, total: 5 };
        stats.record(&tally, t0);
        stats.record(&FrameTally::default(), t0);
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.detections.container, 2);
        assert_eq!(stats.detections.scattered_trash, 3);
        assert_eq!(stats.detections.overload, 1);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = StreamStats::new(Utc::now());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["framesProcessed"], 0);
        assert_eq!(json["detections"]["scatteredTrash"], 0);
        assert!(json["lastUpdate"].is_string());
    }

    #[test]
    fn summary_is_ordered_by_class() {
        let dets = vec![
            classified(TrashClass::ScatteredTrash),
            classified(TrashClass::Container),
            classified(TrashClass::ScatteredTrash),
        ];
        assert_eq!(summarize_detections(&dets), "1 container, 2 scattered_trash");
    }
}
